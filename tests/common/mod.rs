//! Builders for hand-assembled test functions.

use clone_detect::asm::{Cond, Function, Gpr, Instruction, Kind, MemRef, Operand, Width};

pub fn insn(address: u32, size: u32, kind: Kind, operands: Vec<Operand>) -> Instruction {
    Instruction {
        address,
        size,
        kind,
        operands,
    }
}

pub fn ret(address: u32) -> Instruction {
    insn(address, 1, Kind::Ret { pop: 0 }, Vec::new())
}

pub fn hlt(address: u32) -> Instruction {
    insn(address, 1, Kind::Hlt, Vec::new())
}

pub fn mov_reg_imm(address: u32, reg: Gpr, value: u32) -> Instruction {
    insn(
        address,
        5,
        Kind::Mov,
        vec![Operand::Gpr32(reg), Operand::imm32(value)],
    )
}

pub fn mov_reg_mem(address: u32, reg: Gpr, mem: MemRef) -> Instruction {
    insn(
        address,
        6,
        Kind::Mov,
        vec![Operand::Gpr32(reg), Operand::Mem(mem)],
    )
}

pub fn mov_mem_imm(address: u32, mem: MemRef, value: u32) -> Instruction {
    insn(
        address,
        10,
        Kind::Mov,
        vec![Operand::Mem(mem), Operand::imm32(value)],
    )
}

pub fn add_reg_imm(address: u32, reg: Gpr, value: u32) -> Instruction {
    insn(
        address,
        6,
        Kind::Add,
        vec![Operand::Gpr32(reg), Operand::imm32(value)],
    )
}

pub fn cmp_reg_imm(address: u32, reg: Gpr, value: u32) -> Instruction {
    insn(
        address,
        6,
        Kind::Cmp,
        vec![Operand::Gpr32(reg), Operand::imm32(value)],
    )
}

pub fn jmp(address: u32, target: u32) -> Instruction {
    insn(address, 5, Kind::Jmp, vec![Operand::imm32(target)])
}

pub fn jcc(address: u32, cond: Cond, target: u32) -> Instruction {
    insn(address, 6, Kind::Jcc(cond), vec![Operand::imm32(target)])
}

pub fn call(address: u32, target: u32) -> Instruction {
    insn(address, 5, Kind::Call, vec![Operand::imm32(target)])
}

pub fn int(address: u32, vector: u8) -> Instruction {
    insn(address, 2, Kind::Int { vector }, Vec::new())
}

pub fn stack_mem(disp: i32) -> MemRef {
    MemRef::base_disp(Gpr::Sp, disp, Width::Dword)
}

/// A function whose entry is its first instruction's address.
pub fn function(id: i32, name: &str, instructions: Vec<Instruction>) -> Function {
    let entry = instructions
        .first()
        .map(|insn| insn.address)
        .expect("function needs at least one instruction");
    Function::new(id, name, entry, instructions)
}
