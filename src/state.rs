//! Analysis machine state: a register file and two byte-granular memory
//! maps, each cell and register shadowed by read/write access bits.

use std::collections::BTreeMap;

use log::trace;
use word_ops::Word;

use crate::asm::{Gpr, SegReg, NFLAGS};
use crate::outputs::OutputGroup;

bitflags::bitflags! {
    /// Access bits recorded per register and per memory cell.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct Access: u8 {
        const READ = 1;
        const WRITTEN = 2;
    }
}

/// The register file. Every slot is a [Word] of the register's natural
/// width; never-accessed slots hold unknown words until the policy seeds
/// them from the input group.
#[derive(Clone, Debug)]
pub struct RegisterFile {
    pub gpr: [Word; Gpr::COUNT],
    pub segreg: [Word; SegReg::COUNT],
    pub ip: Word,
    pub flag: [Word; NFLAGS],
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self {
            gpr: [Word::unknown(32); Gpr::COUNT],
            segreg: [Word::unknown(16); SegReg::COUNT],
            ip: Word::unknown(32),
            flag: [Word::unknown(1); NFLAGS],
        }
    }
}

/// Access bits for the register file, same shape as [RegisterFile].
#[derive(Copy, Clone, Debug, Default)]
pub struct AccessFile {
    pub gpr: [Access; Gpr::COUNT],
    pub segreg: [Access; SegReg::COUNT],
    pub ip: Access,
    pub flag: [Access; NFLAGS],
}

/// One byte of memory plus its access bits.
#[derive(Copy, Clone, Debug)]
pub struct MemoryCell {
    pub value: Word,
    pub access: Access,
}

/// Machine state for the analysis of one function. Memory reached through
/// SS lives in the stack map; every other segment shares the data map.
/// There is no paging and no protection: a 32-bit address plus a segment
/// class names a cell, nothing more.
#[derive(Clone, Debug, Default)]
pub struct MachineState {
    pub registers: RegisterFile,
    pub access: AccessFile,
    stack_cells: BTreeMap<u32, MemoryCell>,
    data_cells: BTreeMap<u32, MemoryCell>,
    /// Filled in as the function runs (instruction count, recorded calls
    /// and syscalls); memory and register values are projected in at the
    /// end by [get_outputs](Self::get_outputs).
    pub output_group: OutputGroup,
}

impl MachineState {
    pub fn new() -> Self {
        Self::default()
    }

    fn cells(&self, segment: SegReg) -> &BTreeMap<u32, MemoryCell> {
        if segment == SegReg::Ss {
            &self.stack_cells
        } else {
            &self.data_cells
        }
    }

    fn cells_mut(&mut self, segment: SegReg) -> &mut BTreeMap<u32, MemoryCell> {
        if segment == SegReg::Ss {
            &mut self.stack_cells
        } else {
            &mut self.data_cells
        }
    }

    /// Write a single byte. Access bits merge monotonically: a cell that
    /// was ever WRITTEN stays WRITTEN.
    pub fn write_byte(&mut self, segment: SegReg, addr: u32, value: Word, access: Access) {
        debug_assert_eq!(value.width(), 8, "memory cells are byte sized");
        self.cells_mut(segment)
            .entry(addr)
            .and_modify(|cell| {
                cell.value = value;
                cell.access |= access;
            })
            .or_insert(MemoryCell { value, access });
    }

    /// Read a single byte. If no cell exists the returned flag is set and
    /// the value is an unknown placeholder the caller must replace.
    pub fn read_byte(&self, segment: SegReg, addr: u32) -> (Word, bool) {
        match self.cells(segment).get(&addr) {
            Some(cell) => (cell.value, false),
            None => (Word::unknown(8), true),
        }
    }

    pub fn stack_cell(&self, addr: u32) -> Option<&MemoryCell> {
        self.stack_cells.get(&addr)
    }

    pub fn data_cell(&self, addr: u32) -> Option<&MemoryCell> {
        self.data_cells.get(&addr)
    }

    /// Two addresses may refer to the same cell iff both are known and
    /// equal. The engine does not reason about unknown addresses.
    pub fn may_alias(addr1: &Word, addr2: &Word) -> bool {
        match (addr1.known_value(), addr2.known_value()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    pub fn must_alias(addr1: &Word, addr2: &Word) -> bool {
        Self::may_alias(addr1, addr2)
    }

    /// Clear all memory, registers, access bits, and the running output
    /// group, readying the state for the next function.
    pub fn reset_for_analysis(&mut self) {
        self.stack_cells.clear();
        self.data_cells.clear();
        self.registers = RegisterFile::default();
        self.access = AccessFile::default();
        self.output_group.clear();
    }

    /// Project the state into an output group: the written-and-known AX
    /// value, written-and-known stack bytes outside the local frame, and
    /// all written-and-known data bytes. The local frame is the closed-open
    /// window `(stack_frame_top - frame_size, stack_frame_top]`; writes
    /// inside it are the function's own locals and never escape.
    pub fn get_outputs(&self, stack_frame_top: u32, frame_size: u32) -> OutputGroup {
        let mut outputs = self.output_group.clone();

        let ax = &self.registers.gpr[Gpr::Ax.index()];
        if self.access.gpr[Gpr::Ax.index()].contains(Access::WRITTEN) {
            if let Some(value) = ax.known_value() {
                trace!("output for ax = {value:#x}");
                outputs.add_value(value as u32);
            }
        }

        let frame_bottom = stack_frame_top.wrapping_sub(frame_size);
        for (&addr, cell) in &self.stack_cells {
            let in_frame = addr <= stack_frame_top && addr > frame_bottom;
            if cell.access.contains(Access::WRITTEN) {
                if let Some(value) = cell.value.known_value() {
                    trace!(
                        "output for stack address {addr:#x}: {value:#x}{}",
                        if in_frame { " (ignored)" } else { "" }
                    );
                    if !in_frame {
                        outputs.add_value(value as u32);
                    }
                }
            }
        }

        for (&addr, cell) in &self.data_cells {
            if cell.access.contains(Access::WRITTEN) {
                if let Some(value) = cell.value.known_value() {
                    trace!("output for data address {addr:#x}: {value:#x}");
                    outputs.add_value(value as u32);
                }
            }
        }

        outputs
    }
}

impl std::fmt::Display for MachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, reg) in Gpr::ALL.iter().enumerate() {
            writeln!(
                f,
                "  {reg:?} = {value} [{access:?}]",
                value = self.registers.gpr[i],
                access = self.access.gpr[i]
            )?;
        }
        writeln!(f, "  IP = {ip} [{access:?}]", ip = self.registers.ip, access = self.access.ip)?;

        const MAX_CELLS: usize = 100;
        for (name, cells) in [("stack", &self.stack_cells), ("data", &self.data_cells)] {
            writeln!(f, "== Memory ({name} segment) ==")?;
            for (shown, (addr, cell)) in cells.iter().enumerate() {
                if shown >= MAX_CELLS {
                    writeln!(
                        f,
                        "    skipping {} more memory cells for brevity's sake...",
                        cells.len() - shown
                    )?;
                    break;
                }
                writeln!(
                    f,
                    "    {addr:#010x}: {value} [{access:?}]",
                    value = cell.value,
                    access = cell.access
                )?;
            }
        }
        Ok(())
    }
}
