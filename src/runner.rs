//! The function runner: executes one function under one input group and
//! projects the result into an output group.

use log::debug;
use thiserror;

use crate::asm::{Function, MemoryMap};
use crate::emulator::{self, X86Interpreter};
use crate::fault::Fault;
use crate::inputs::InputGroup;
use crate::outputs::OutputGroup;
use crate::policy::{self, Policy, FUNC_RET_ADDR};
use crate::provider::InstructionProvider;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A non-fault error escaped the run (malformed instructions, invalid
    /// register access). Faults never surface here; they are recorded in
    /// the output group.
    #[error(transparent)]
    Execution(#[from] emulator::Error),
}

/// How chatty the engine is. `Laconic` narrates per-function events,
/// `Effusive` narrates every instruction and input consumption. Narration
/// goes through the `log` facade and never affects semantics.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    #[default]
    Silent,
    Laconic,
    Effusive,
}

/// Parameters controlling one run.
#[derive(Clone, Debug)]
pub struct RunnerParams {
    /// Maximum number of instructions per run before giving up.
    pub timeout: u64,
    pub verbosity: Verbosity,
    /// Follow CALL instructions when the callee is resolvable rather than
    /// consuming an input.
    pub follow_calls: bool,
    /// Initialize unmapped memory from the address hasher (seeded with an
    /// input) instead of consuming inputs.
    pub init_memory: bool,
    /// Initial value for SP and BP; the stack grows down from here.
    pub initial_stack: u32,
    /// Record the IDs of intercepted callees in the output group.
    pub record_calls: bool,
    /// Record system call numbers in the output group.
    pub record_syscalls: bool,
}

impl Default for RunnerParams {
    fn default() -> Self {
        Self {
            timeout: 5000,
            verbosity: Verbosity::Silent,
            follow_calls: false,
            init_memory: false,
            initial_stack: 0x8000_0000,
            record_calls: false,
            record_syscalls: false,
        }
    }
}

/// Classifies addresses as pointer locations, guiding which input pool an
/// uninitialized memory read draws from. Consulted once per such read.
pub trait PointerOracle {
    fn is_pointer(&self, addr: u32) -> bool;
}

/// Oracle that classifies nothing as a pointer.
pub struct NullOracle;

impl PointerOracle for NullOracle {
    fn is_pointer(&self, _addr: u32) -> bool {
        false
    }
}

/// Executes functions against an instruction provider.
pub struct FunctionRunner<'a> {
    provider: &'a InstructionProvider,
    params: RunnerParams,
    image: Option<MemoryMap>,
}

impl<'a> FunctionRunner<'a> {
    pub fn new(provider: &'a InstructionProvider, params: RunnerParams) -> Self {
        Self {
            provider,
            params,
            image: None,
        }
    }

    /// Supply the loader image consulted by uninitialized memory reads.
    /// Without one, every address counts as mapped.
    pub fn with_image(mut self, image: MemoryMap) -> Self {
        self.image = Some(image);
        self
    }

    pub fn params(&self) -> &RunnerParams {
        &self.params
    }

    /// Execute `function` with `inputs` and return its output group. The
    /// sequence (function, params, input group, oracle) fully determines
    /// the result; running twice yields identical groups.
    pub fn run(
        &self,
        function: &Function,
        inputs: &mut InputGroup,
        oracle: &dyn PointerOracle,
    ) -> Result<OutputGroup> {
        if self.params.verbosity >= Verbosity::Laconic {
            debug!(
                "analyzing function {name} at {entry:#x}",
                name = function.name,
                entry = function.entry
            );
        }

        let mut policy = Policy::new(
            &self.params,
            inputs,
            oracle,
            self.provider,
            self.image.as_ref(),
        );

        match Self::execute(&mut policy, function, self.provider) {
            Ok(()) => Ok(policy.get_outputs()),
            Err(emulator::Error::Policy(policy::Error::Fault(fault))) => {
                // A faulted run keeps whatever the output group accumulated
                // while running (instruction count, recorded calls) but is
                // never projected from the state.
                let mut outputs = policy.state.output_group.clone();
                outputs.fault = fault;
                Ok(outputs)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn execute(
        policy: &mut Policy,
        function: &Function,
        provider: &InstructionProvider,
    ) -> emulator::Result<()> {
        policy.reset(function)?;
        loop {
            let ip = policy.ip()?;
            if ip == FUNC_RET_ADDR {
                return Ok(());
            }
            let insn = provider
                .get(ip)
                .ok_or(policy::Error::Fault(Fault::Disassembly))?;
            X86Interpreter::execute(policy, insn)?;
        }
    }
}
