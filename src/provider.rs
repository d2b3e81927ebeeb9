//! Address to instruction lookup.

use std::collections::BTreeMap;

use crate::asm::{Function, Instruction};

/// Metadata kept per function for CALL resolution.
#[derive(Clone, Debug)]
pub struct FunctionMeta {
    pub id: i32,
    pub name: String,
    pub entry: u32,
}

impl FunctionMeta {
    pub fn is_plt(&self) -> bool {
        self.name.ends_with("@plt")
    }
}

/// Read-only map from instruction address to the decoded instruction,
/// built once from the set of functions under analysis.
#[derive(Clone, Debug, Default)]
pub struct InstructionProvider {
    addr2insn: BTreeMap<u32, Instruction>,
    functions: BTreeMap<u32, FunctionMeta>,
}

impl InstructionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_functions<'a>(functions: impl IntoIterator<Item = &'a Function>) -> Self {
        let mut provider = Self::new();
        for function in functions {
            provider.insert(function);
        }
        provider
    }

    pub fn insert(&mut self, function: &Function) {
        self.functions.insert(
            function.entry,
            FunctionMeta {
                id: function.id,
                name: function.name.clone(),
                entry: function.entry,
            },
        );
        for insn in &function.instructions {
            self.addr2insn.insert(insn.address, insn.clone());
        }
    }

    pub fn get(&self, addr: u32) -> Option<&Instruction> {
        self.addr2insn.get(&addr)
    }

    /// The function whose entry point is `addr`, if any.
    pub fn function_at(&self, addr: u32) -> Option<&FunctionMeta> {
        self.functions.get(&addr)
    }
}
