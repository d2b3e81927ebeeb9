//! The semantic policy: every register and memory access of an executing
//! function goes through here.
//!
//! The policy tracks access bits, seeds never-written locations from the
//! input group in a deterministic order, and intercepts the instructions
//! that would otherwise leave the function under analysis (CALL, INT, HLT,
//! and the final RET). Never-written locations are the engine's free
//! parameters: two runs with the same input group explore the same path,
//! and two functions that agree on what they use produce comparable
//! outputs.

use log::trace;
use thiserror;
use word_ops::Word;

use crate::asm::{Function, Gpr, Instruction, Kind, MemoryMap, SegReg, NFLAGS};
use crate::fault::Fault;
use crate::hasher::AddressHasher;
use crate::inputs::{InputGroup, ValueKind};
use crate::outputs::OutputGroup;
use crate::provider::InstructionProvider;
use crate::runner::{PointerOracle, RunnerParams, Verbosity};
use crate::state::{Access, MachineState};

/// Sentinel planted at the top of the stack; when RET loads it into IP the
/// run is over. Any fixed address no real function occupies will do.
pub const FUNC_RET_ADDR: u32 = 4083;

/// Size of the window below the initial stack pointer treated as the
/// function's private frame when projecting outputs.
pub const STACK_FRAME_SIZE: u32 = 8192;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A run-terminating fault. The runner records it in the output group;
    /// it never propagates further.
    #[error("encountered {0}")]
    Fault(Fault),

    /// Malformed register or memory access. This is a programmer error in
    /// the instruction supplier and aborts the run unconditionally.
    #[error("access violation: {0}")]
    AccessViolation(String),
}

fn input_limit(_: crate::inputs::Error) -> Error {
    Error::Fault(Fault::InputLimit)
}

/// A policy-level register address. Sub-register operands carry the slice
/// they touch, so most malformed accesses are unrepresentable; the few
/// remaining dynamic rules (flag indices, operand widths) are checked at
/// the access site.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegisterRef {
    Gpr32(Gpr),
    Gpr16(Gpr),
    Gpr8 { reg: Gpr, high: bool },
    Seg(SegReg),
    Ip,
    /// A single EFLAGS bit.
    Flag(usize),
    /// The low 16 flags as one word.
    Flags16,
    /// All 32 flags as one word.
    Flags32,
}

/// Per-run semantic policy binding the machine state to one function, one
/// input group, and one pointer oracle.
pub struct Policy<'r> {
    pub state: MachineState,
    params: &'r RunnerParams,
    inputs: &'r mut InputGroup,
    oracle: &'r dyn PointerOracle,
    provider: &'r InstructionProvider,
    image: Option<&'r MemoryMap>,
    hasher: AddressHasher,
    ninsns: u64,
    current_kind: Option<Kind>,
}

impl<'r> Policy<'r> {
    pub fn new(
        params: &'r RunnerParams,
        inputs: &'r mut InputGroup,
        oracle: &'r dyn PointerOracle,
        provider: &'r InstructionProvider,
        image: Option<&'r MemoryMap>,
    ) -> Self {
        Self {
            state: MachineState::new(),
            params,
            inputs,
            oracle,
            provider,
            image,
            hasher: AddressHasher::new(0),
            ninsns: 0,
            current_kind: None,
        }
    }

    /// Set up the machine state to start the analysis of one function:
    /// rewind the inputs, clear the state, reseed the address hasher, and
    /// initialize the registers.
    pub fn reset(&mut self, function: &Function) -> Result<()> {
        self.inputs.reset();
        self.ninsns = 0;
        self.current_kind = None;
        self.state.reset_for_analysis();

        if self.params.init_memory {
            let seed = self.inputs.next_integer().map_err(input_limit)?;
            self.hasher = AddressHasher::new(seed);
        }

        // IP must point at the entry; SP and BP get known but arbitrary
        // values so the final RET is recognizable.
        self.write_register(RegisterRef::Ip, Word::known(32, function.entry.into()))?;
        let stack = Word::known(32, self.params.initial_stack.into());
        self.write_register(RegisterRef::Gpr32(Gpr::Sp), stack)?;
        self.write_register(RegisterRef::Gpr32(Gpr::Bp), stack)?;

        // Seed the callee-saved registers, and the caller-saved ones with
        // the same value. Two compilations of one function may differ in
        // which registers they push uninitialized; seeding them all from a
        // single input keeps that difference from perturbing consumption.
        let rval = self.next_input_value(32, ValueKind::Integer)?;
        for reg in [Gpr::Bx, Gpr::Si, Gpr::Di, Gpr::Ax, Gpr::Cx, Gpr::Dx] {
            self.write_register(RegisterRef::Gpr32(reg), rval)?;
        }

        Ok(())
    }

    /// Fresh value for a never-written location.
    fn next_input_value(&mut self, width: u32, kind: ValueKind) -> Result<Word> {
        let raw = self.inputs.next_value(kind).map_err(input_limit)?;
        let value = Word::known(width, raw);
        if self.params.verbosity >= Verbosity::Effusive {
            let consumed = match kind {
                ValueKind::Pointer => self.inputs.consumed_pointers(),
                _ => self.inputs.consumed_integers(),
            };
            trace!("using {kind:?} input #{consumed}: {value}");
        }
        Ok(value)
    }

    /// Number of instructions started since the last reset.
    pub fn instruction_count(&self) -> u64 {
        self.ninsns
    }

    /// The current instruction pointer; the engine cannot fetch through an
    /// unknown IP.
    pub fn ip(&self) -> Result<u32> {
        self.state
            .registers
            .ip
            .known_value()
            .map(|ip| ip as u32)
            .ok_or(Error::Fault(Fault::Semantics))
    }

    /// Project the final state into an output group.
    pub fn get_outputs(&self) -> OutputGroup {
        self.state
            .get_outputs(self.params.initial_stack, STACK_FRAME_SIZE)
    }

    pub fn start_instruction(&mut self, insn: &Instruction) -> Result<()> {
        self.ninsns += 1;
        if self.ninsns > self.params.timeout {
            return Err(Error::Fault(Fault::InsnLimit));
        }
        if self.params.verbosity >= Verbosity::Effusive {
            trace!("executing: {insn}");
        }
        self.current_kind = Some(insn.kind);
        self.write_register(RegisterRef::Ip, Word::known(32, insn.address.into()))
    }

    pub fn finish_instruction(&mut self, insn: &Instruction) -> Result<()> {
        self.state.output_group.ninsns += 1;

        // Unless a call is followed, it is treated as an opaque function
        // that returns a fresh input through AX: fall through, pop the
        // return address, and overwrite AX. The callee is assumed to clean
        // up nothing and to return an integer.
        if insn.kind == Kind::Call {
            let callee = self.read_register(RegisterRef::Ip)?;
            let mut follow = self.params.follow_calls;
            if follow {
                follow = match callee.known_value() {
                    Some(target) => {
                        let target = target as u32;
                        self.provider.get(target).is_some()
                            && self
                                .provider
                                .function_at(target)
                                .map_or(true, |meta| !meta.is_plt())
                    }
                    None => false,
                };
            }
            if !follow {
                if self.params.verbosity >= Verbosity::Effusive {
                    trace!("special handling for function call (fall through and return via EAX)");
                }
                if self.params.record_calls {
                    if let Some(target) = callee.known_value() {
                        if let Some(meta) = self.provider.function_at(target as u32) {
                            self.state.output_group.callee_ids.push(meta.id);
                        }
                    }
                }
                self.write_register(RegisterRef::Ip, Word::known(32, insn.fall_through().into()))?;
                let result = self.next_input_value(32, ValueKind::Integer)?;
                self.write_register(RegisterRef::Gpr32(Gpr::Ax), result)?;
                let sp = self.read_register(RegisterRef::Gpr32(Gpr::Sp))?;
                self.write_register(RegisterRef::Gpr32(Gpr::Sp), sp.add(Word::known(32, 4)))?;
            }
        }

        Ok(())
    }

    /// INT 0x80 is a system call: optionally record the call number, then
    /// consume an input into AX. Every other vector is fatal.
    pub fn interrupt(&mut self, vector: u8) -> Result<()> {
        if vector != 0x80 {
            return Err(Error::Fault(Fault::Interrupt));
        }
        if self.params.verbosity >= Verbosity::Effusive {
            trace!("special handling for system call (consume an input into EAX)");
        }
        if self.params.record_syscalls {
            let number = self.read_register(RegisterRef::Gpr32(Gpr::Ax))?;
            if let Some(number) = number.known_value() {
                self.state.output_group.syscalls.push(number as u32);
            }
        }
        let result = self.next_input_value(32, ValueKind::Integer)?;
        self.write_register(RegisterRef::Gpr32(Gpr::Ax), result)
    }

    pub fn hlt(&mut self) -> Result<()> {
        Err(Error::Fault(Fault::Halt))
    }

    /// Read `width_bits` of memory at `addr`, little-endian. A read that
    /// touches any never-materialized byte fabricates a value for the whole
    /// access (from the input group when the address is loader-mapped and
    /// memory initialization is off, from the address hasher otherwise)
    /// and writes it back, marked READ, so the next read sees the same
    /// value.
    pub fn read_memory(&mut self, segment: SegReg, addr: u32, width_bits: u32) -> Result<Word> {
        if !matches!(width_bits, 8 | 16 | 24 | 32) {
            return Err(Error::AccessViolation(format!(
                "invalid memory read width {width_bits}"
            )));
        }

        // The RET that ends the analysis reads the sentinel planted at the
        // initial stack pointer instead of consuming an input.
        if width_bits == 32
            && segment == SegReg::Ss
            && addr == self.params.initial_stack
            && matches!(self.current_kind, Some(Kind::Ret { .. }))
        {
            return Ok(Word::known(32, FUNC_RET_ADDR.into()));
        }

        let mut uninitialized = false;
        let mut value: Option<Word> = None;
        for i in 0..width_bits / 8 {
            let (byte, missing) = self.state.read_byte(segment, addr.wrapping_add(i));
            uninitialized |= missing;
            value = Some(match value {
                None => byte,
                Some(low) => low.concat(byte),
            });
        }
        let mut value = value.expect("width is at least one byte");

        if uninitialized {
            let consume_input =
                !self.params.init_memory && self.image.map_or(true, |map| map.contains(addr));
            value = if consume_input {
                let kind = if self.oracle.is_pointer(addr) {
                    ValueKind::Pointer
                } else {
                    ValueKind::Integer
                };
                self.next_input_value(width_bits, kind)?
            } else {
                if self.params.verbosity >= Verbosity::Effusive {
                    trace!("initializing memory[{addr:#x}] from address hash");
                }
                Word::known(width_bits, self.hasher.hash(addr).into())
            };
            self.write_memory_with_access(segment, addr, value, Access::READ)?;
        }

        Ok(value)
    }

    /// Write a value to memory, little-endian, tagging each byte WRITTEN.
    pub fn write_memory(&mut self, segment: SegReg, addr: u32, value: Word) -> Result<()> {
        self.write_memory_with_access(segment, addr, value, Access::WRITTEN)
    }

    fn write_memory_with_access(
        &mut self,
        segment: SegReg,
        addr: u32,
        value: Word,
        access: Access,
    ) -> Result<()> {
        let width_bits = value.width();
        if !matches!(width_bits, 8 | 16 | 24 | 32) {
            return Err(Error::AccessViolation(format!(
                "invalid memory write width {width_bits}"
            )));
        }
        for i in 0..width_bits / 8 {
            let byte = value.extract(8 * i, 8 * i + 8);
            self.state
                .write_byte(segment, addr.wrapping_add(i), byte, access);
        }
        Ok(())
    }

    pub fn read_register(&mut self, reg: RegisterRef) -> Result<Word> {
        match reg {
            RegisterRef::Flag(bit) => {
                self.check_flag_index(bit)?;
                let never_accessed = self.state.access.flag[bit].is_empty();
                self.state.access.flag[bit] |= Access::READ;
                if never_accessed {
                    self.state.registers.flag[bit] = self.next_input_value(1, ValueKind::Integer)?;
                }
                Ok(self.state.registers.flag[bit])
            }

            RegisterRef::Gpr8 { reg, high } => {
                let i = reg.index();
                let never_accessed = self.state.access.gpr[i].is_empty();
                self.state.access.gpr[i] |= Access::READ;
                if never_accessed {
                    self.state.registers.gpr[i] =
                        self.next_input_value(32, ValueKind::Integer)?;
                }
                let parent = self.state.registers.gpr[i];
                Ok(if high {
                    parent.extract(8, 16)
                } else {
                    parent.extract(0, 8)
                })
            }

            RegisterRef::Gpr16(reg) => {
                let i = reg.index();
                let never_accessed = self.state.access.gpr[i].is_empty();
                self.state.access.gpr[i] |= Access::READ;
                if never_accessed {
                    self.state.registers.gpr[i] =
                        self.next_input_value(32, ValueKind::Integer)?;
                }
                Ok(self.state.registers.gpr[i].extract(0, 16))
            }

            RegisterRef::Seg(seg) => {
                let i = seg.index();
                let never_accessed = self.state.access.segreg[i].is_empty();
                self.state.access.segreg[i] |= Access::READ;
                if never_accessed {
                    self.state.registers.segreg[i] =
                        self.next_input_value(16, ValueKind::Integer)?;
                }
                Ok(self.state.registers.segreg[i])
            }

            RegisterRef::Gpr32(reg) => {
                let i = reg.index();
                let never_accessed = self.state.access.gpr[i].is_empty();
                self.state.access.gpr[i] |= Access::READ;
                if never_accessed {
                    // Nothing is known about a whole-register read, so the
                    // choice of pool is left to the input group.
                    self.state.registers.gpr[i] =
                        self.next_input_value(32, ValueKind::Unknown)?;
                }
                Ok(self.state.registers.gpr[i])
            }

            RegisterRef::Ip => {
                let never_accessed = self.state.access.ip.is_empty();
                self.state.access.ip |= Access::READ;
                if never_accessed {
                    self.state.registers.ip = self.next_input_value(32, ValueKind::Pointer)?;
                }
                Ok(self.state.registers.ip)
            }

            RegisterRef::Flags16 => self.read_flags(16),
            RegisterRef::Flags32 => self.read_flags(32),
        }
    }

    fn read_flags(&mut self, count: u32) -> Result<Word> {
        let mut value: Option<Word> = None;
        for bit in 0..count as usize {
            let flag = self.read_register(RegisterRef::Flag(bit))?;
            value = Some(match value {
                None => flag,
                Some(low) => low.concat(flag),
            });
        }
        Ok(value.expect("flag registers are non-empty"))
    }

    pub fn write_register(&mut self, reg: RegisterRef, value: Word) -> Result<()> {
        match reg {
            RegisterRef::Flag(bit) => {
                self.check_flag_index(bit)?;
                self.check_width(&value, 1)?;
                self.state.registers.flag[bit] = value;
                self.state.access.flag[bit] |= Access::WRITTEN;
            }

            RegisterRef::Gpr8 { reg, high } => {
                self.check_width(&value, 8)?;
                let i = reg.index();
                let never_accessed = self.state.access.gpr[i].is_empty();
                self.state.access.gpr[i] |= Access::WRITTEN;
                if never_accessed {
                    // The untouched lanes of the register must come from
                    // somewhere; seed the whole register first.
                    self.state.registers.gpr[i] =
                        self.next_input_value(32, ValueKind::Integer)?;
                }
                let parent = self.state.registers.gpr[i];
                self.state.registers.gpr[i] = if high {
                    let upper = value.concat(parent.extract(16, 32));
                    parent.extract(0, 8).concat(upper)
                } else {
                    value.concat(parent.extract(8, 32))
                };
            }

            RegisterRef::Gpr16(reg) => {
                self.check_width(&value, 16)?;
                let i = reg.index();
                let never_accessed = self.state.access.gpr[i].is_empty();
                self.state.access.gpr[i] |= Access::WRITTEN;
                if never_accessed {
                    self.state.registers.gpr[i] =
                        self.next_input_value(32, ValueKind::Integer)?;
                }
                let parent = self.state.registers.gpr[i];
                self.state.registers.gpr[i] = value.concat(parent.extract(16, 32));
            }

            RegisterRef::Seg(seg) => {
                self.check_width(&value, 16)?;
                let i = seg.index();
                self.state.registers.segreg[i] = value;
                self.state.access.segreg[i] |= Access::WRITTEN;
            }

            RegisterRef::Gpr32(reg) => {
                self.check_width(&value, 32)?;
                let i = reg.index();
                self.state.registers.gpr[i] = value;
                self.state.access.gpr[i] |= Access::WRITTEN;
            }

            RegisterRef::Ip => {
                self.check_width(&value, 32)?;
                self.state.registers.ip = value;
                self.state.access.ip |= Access::WRITTEN;
            }

            RegisterRef::Flags16 => {
                self.check_width(&value, 16)?;
                self.write_flags(value, 16);
            }

            RegisterRef::Flags32 => {
                self.check_width(&value, 32)?;
                self.write_flags(value, 32);
            }
        }

        Ok(())
    }

    fn write_flags(&mut self, value: Word, count: u32) {
        for bit in 0..count {
            self.state.registers.flag[bit as usize] = value.extract(bit, bit + 1);
            self.state.access.flag[bit as usize] |= Access::WRITTEN;
        }
    }

    fn check_flag_index(&self, bit: usize) -> Result<()> {
        if bit < NFLAGS {
            Ok(())
        } else {
            Err(Error::AccessViolation(format!(
                "flag bit {bit} is not implemented"
            )))
        }
    }

    fn check_width(&self, value: &Word, expected: u32) -> Result<()> {
        if value.width() == expected {
            Ok(())
        } else {
            Err(Error::AccessViolation(format!(
                "expected a {expected}-bit value, got {actual} bits",
                actual = value.width()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::NullOracle;

    fn params() -> RunnerParams {
        RunnerParams::default()
    }

    fn inputs_with(integers: &[u64], pointers: &[u64]) -> InputGroup {
        let mut group = InputGroup::new();
        for &value in integers {
            group.add_integer(value);
        }
        for &value in pointers {
            group.add_pointer(value);
        }
        group
    }

    #[test]
    fn gpr_read_seeds_once() -> Result<()> {
        let params = params();
        let mut inputs = inputs_with(&[77, 88], &[]);
        let provider = InstructionProvider::new();
        let mut policy = Policy::new(&params, &mut inputs, &NullOracle, &provider, None);

        let first = policy.read_register(RegisterRef::Gpr32(Gpr::Bx))?;
        assert_eq!(first.known_value(), Some(77));

        // Second read must not consume another input.
        let second = policy.read_register(RegisterRef::Gpr32(Gpr::Bx))?;
        assert_eq!(second.known_value(), Some(77));
        assert_eq!(policy.inputs.consumed_integers(), 1);
        Ok(())
    }

    #[test]
    fn ip_seeds_from_pointer_pool() -> Result<()> {
        let params = params();
        let mut inputs = inputs_with(&[1], &[0x4000]);
        let provider = InstructionProvider::new();
        let mut policy = Policy::new(&params, &mut inputs, &NullOracle, &provider, None);

        let ip = policy.read_register(RegisterRef::Ip)?;
        assert_eq!(ip.known_value(), Some(0x4000));
        assert_eq!(policy.inputs.consumed_pointers(), 1);
        assert_eq!(policy.inputs.consumed_integers(), 0);
        Ok(())
    }

    #[test]
    fn subregister_read_slices_seeded_parent() -> Result<()> {
        let params = params();
        let mut inputs = inputs_with(&[0xdead_beef], &[]);
        let provider = InstructionProvider::new();
        let mut policy = Policy::new(&params, &mut inputs, &NullOracle, &provider, None);

        let al = policy.read_register(RegisterRef::Gpr8 {
            reg: Gpr::Ax,
            high: false,
        })?;
        assert_eq!(al.known_value(), Some(0xef));

        let ah = policy.read_register(RegisterRef::Gpr8 {
            reg: Gpr::Ax,
            high: true,
        })?;
        assert_eq!(ah.known_value(), Some(0xbe));

        let ax = policy.read_register(RegisterRef::Gpr16(Gpr::Ax))?;
        assert_eq!(ax.known_value(), Some(0xbeef));
        assert_eq!(policy.inputs.consumed_integers(), 1);
        Ok(())
    }

    #[test]
    fn partial_write_preserves_unwritten_lanes() -> Result<()> {
        let params = params();
        let mut inputs = inputs_with(&[], &[]);
        let provider = InstructionProvider::new();
        let mut policy = Policy::new(&params, &mut inputs, &NullOracle, &provider, None);

        policy.write_register(RegisterRef::Gpr32(Gpr::Cx), Word::known(32, 0x1122_3344))?;
        policy.write_register(
            RegisterRef::Gpr8 {
                reg: Gpr::Cx,
                high: true,
            },
            Word::known(8, 0xaa),
        )?;

        let ecx = policy.read_register(RegisterRef::Gpr32(Gpr::Cx))?;
        assert_eq!(ecx.known_value(), Some(0x1122_aa44));
        Ok(())
    }

    #[test]
    fn partial_write_into_unknown_parent_stays_unknown() -> Result<()> {
        let params = params();
        let mut inputs = inputs_with(&[], &[]);
        let provider = InstructionProvider::new();
        let mut policy = Policy::new(&params, &mut inputs, &NullOracle, &provider, None);

        policy.write_register(RegisterRef::Gpr32(Gpr::Dx), Word::unknown(32))?;
        policy.write_register(RegisterRef::Gpr16(Gpr::Dx), Word::known(16, 0x42))?;

        // Known-ness is tracked per word, not per lane: merging into an
        // opaque parent leaves the whole register opaque, and the value
        // never reaches an output group.
        let edx = policy.read_register(RegisterRef::Gpr32(Gpr::Dx))?;
        assert!(!edx.is_known());
        let dx = policy.read_register(RegisterRef::Gpr16(Gpr::Dx))?;
        assert!(!dx.is_known());
        Ok(())
    }

    #[test]
    fn flags_read_seeds_each_unvisited_bit() -> Result<()> {
        let params = params();
        let mut inputs = inputs_with(&[1, 0, 1, 1], &[]);
        let provider = InstructionProvider::new();
        let mut policy = Policy::new(&params, &mut inputs, &NullOracle, &provider, None);

        // Visit CF first so only 31 remain unvisited for the wide read.
        let cf = policy.read_register(RegisterRef::Flag(0))?;
        assert_eq!(cf.known_value(), Some(1));

        let flags = policy.read_register(RegisterRef::Flags32)?;
        assert_eq!(policy.inputs.consumed_integers(), 32);
        // CF kept its first-seeded value in bit 0.
        assert_eq!(flags.known_value().map(|bits| bits & 1), Some(1));
        Ok(())
    }

    #[test]
    fn memory_read_back_is_stable() -> Result<()> {
        let params = params();
        let mut inputs = inputs_with(&[0x1234_5678_9abc_def0], &[]);
        let provider = InstructionProvider::new();
        let mut policy = Policy::new(&params, &mut inputs, &NullOracle, &provider, None);

        let first = policy.read_memory(SegReg::Ds, 0x5000, 32)?;
        assert_eq!(first.known_value(), Some(0x9abc_def0));

        // No additional consumption and the identical value on re-read.
        let second = policy.read_memory(SegReg::Ds, 0x5000, 32)?;
        assert_eq!(second.known_value(), first.known_value());
        assert_eq!(policy.inputs.consumed_integers(), 1);

        // The materialized cells are READ, not WRITTEN, so they are not
        // outputs.
        let cell = policy.state.data_cell(0x5000).unwrap();
        assert_eq!(cell.access, Access::READ);
        Ok(())
    }

    #[test]
    fn pointer_oracle_selects_pool() -> Result<()> {
        struct EverythingPointers;
        impl PointerOracle for EverythingPointers {
            fn is_pointer(&self, _addr: u32) -> bool {
                true
            }
        }

        let params = params();
        let mut inputs = inputs_with(&[7], &[0x8000]);
        let provider = InstructionProvider::new();
        let mut policy = Policy::new(&params, &mut inputs, &EverythingPointers, &provider, None);

        let value = policy.read_memory(SegReg::Ds, 0x100, 32)?;
        assert_eq!(value.known_value(), Some(0x8000));
        assert_eq!(policy.inputs.consumed_pointers(), 1);
        Ok(())
    }

    #[test]
    fn unmapped_read_uses_address_hash() -> Result<()> {
        let mut params = params();
        params.init_memory = false;
        let mut inputs = inputs_with(&[5], &[]);
        let provider = InstructionProvider::new();
        let image = MemoryMap::new(); // nothing mapped
        let mut policy = Policy::new(&params, &mut inputs, &NullOracle, &provider, Some(&image));

        let value = policy.read_memory(SegReg::Ds, 0x100, 8)?;
        // The hasher, not the input group, supplied the value.
        assert_eq!(policy.inputs.consumed(), 0);
        assert!(value.is_known());

        let again = policy.read_memory(SegReg::Ds, 0x100, 8)?;
        assert_eq!(again.known_value(), value.known_value());
        Ok(())
    }

    #[test]
    fn ret_read_at_initial_stack_yields_sentinel() -> Result<()> {
        let params = params();
        let mut inputs = inputs_with(&[], &[]);
        let provider = InstructionProvider::new();
        let mut policy = Policy::new(&params, &mut inputs, &NullOracle, &provider, None);

        let ret = Instruction {
            address: 0x1000,
            size: 1,
            kind: Kind::Ret { pop: 0 },
            operands: Vec::new(),
        };
        policy.start_instruction(&ret)?;

        let value = policy.read_memory(SegReg::Ss, params.initial_stack, 32)?;
        assert_eq!(value.known_value(), Some(FUNC_RET_ADDR.into()));
        // The sentinel is synthesized, not materialized in memory.
        assert!(policy.state.stack_cell(params.initial_stack).is_none());
        Ok(())
    }

    #[test]
    fn interrupt_other_than_syscall_is_fatal() {
        let params = params();
        let mut inputs = inputs_with(&[], &[]);
        let provider = InstructionProvider::new();
        let mut policy = Policy::new(&params, &mut inputs, &NullOracle, &provider, None);

        assert!(matches!(
            policy.interrupt(0x3),
            Err(Error::Fault(Fault::Interrupt))
        ));
    }

    #[test]
    fn syscall_consumes_input_into_ax() -> Result<()> {
        let mut params = params();
        params.record_syscalls = true;
        let mut inputs = inputs_with(&[4, 99], &[]);
        let provider = InstructionProvider::new();
        let mut policy = Policy::new(&params, &mut inputs, &NullOracle, &provider, None);

        // AX unseeded: reading it for the syscall number consumes input 4.
        policy.interrupt(0x80)?;
        assert_eq!(policy.state.output_group.syscalls, vec![4]);

        let ax = policy.read_register(RegisterRef::Gpr32(Gpr::Ax))?;
        assert_eq!(ax.known_value(), Some(99));
        Ok(())
    }

    #[test]
    fn exhausted_inputs_fault_when_limited() {
        let params = params();
        let mut inputs = inputs_with(&[], &[]);
        inputs.limit_consumption(true);
        let provider = InstructionProvider::new();
        let mut policy = Policy::new(&params, &mut inputs, &NullOracle, &provider, None);

        assert!(matches!(
            policy.read_register(RegisterRef::Gpr32(Gpr::Si)),
            Err(Error::Fault(Fault::InputLimit))
        ));
    }

    #[test]
    fn invalid_flag_index_is_an_access_violation() {
        let params = params();
        let mut inputs = inputs_with(&[], &[]);
        let provider = InstructionProvider::new();
        let mut policy = Policy::new(&params, &mut inputs, &NullOracle, &provider, None);

        assert!(matches!(
            policy.read_register(RegisterRef::Flag(40)),
            Err(Error::AccessViolation(_))
        ));
        assert!(matches!(
            policy.write_register(RegisterRef::Gpr32(Gpr::Ax), Word::known(16, 0)),
            Err(Error::AccessViolation(_))
        ));
    }

    #[test]
    fn instruction_budget_faults_past_timeout() -> Result<()> {
        let mut params = params();
        params.timeout = 2;
        let mut inputs = inputs_with(&[], &[]);
        let provider = InstructionProvider::new();
        let mut policy = Policy::new(&params, &mut inputs, &NullOracle, &provider, None);

        let nop = Instruction {
            address: 0x1000,
            size: 1,
            kind: Kind::Nop,
            operands: Vec::new(),
        };
        policy.start_instruction(&nop)?;
        policy.finish_instruction(&nop)?;
        policy.start_instruction(&nop)?;
        policy.finish_instruction(&nop)?;
        assert!(matches!(
            policy.start_instruction(&nop),
            Err(Error::Fault(Fault::InsnLimit))
        ));
        assert_eq!(policy.state.output_group.ninsns, 2);
        Ok(())
    }
}
