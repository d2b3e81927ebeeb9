//! Transfer functions for the interpreted x86 subset.
//!
//! Each instruction is executed against the semantic policy: operand reads
//! and writes go through the policy (which tracks access and seeds fresh
//! locations), arithmetic folds constants through [word_ops], and every
//! instruction ends by writing the next instruction pointer. Control-flow
//! and I/O instructions the harness intercepts (CALL, RET, INT, HLT) are
//! routed through the policy's hooks.

use thiserror;
use word_ops::Word;

use crate::asm::{Cond, Flag, Gpr, Instruction, Kind, MemRef, Operand, SegReg};
use crate::fault::Fault;
use crate::policy::{self, Policy, RegisterRef};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Policy(#[from] policy::Error),

    /// The supplied instruction violates the operand contract of its kind.
    #[error("illegal instruction {insn}: {reason}")]
    IllegalInstruction { insn: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;

fn illegal(insn: &Instruction, reason: impl Into<String>) -> Error {
    Error::IllegalInstruction {
        insn: insn.to_string(),
        reason: reason.into(),
    }
}

/// A value the engine must be able to name concretely (an address, a branch
/// condition). Failing to fold one is a semantics fault, not an error.
fn require_known(value: Word) -> policy::Result<u64> {
    value
        .known_value()
        .ok_or(policy::Error::Fault(Fault::Semantics))
}

/// Interpreter for the 32-bit x86 subset the harness exercises.
pub struct X86Interpreter;

impl X86Interpreter {
    /// Execute one instruction: the policy's start hook, the transfer
    /// function, then the finish hook (where CALL interception happens).
    pub fn execute(policy: &mut Policy, insn: &Instruction) -> Result<()> {
        policy.start_instruction(insn)?;
        Self::dispatch(policy, insn)?;
        policy.finish_instruction(insn)?;
        Ok(())
    }

    fn dispatch(policy: &mut Policy, insn: &Instruction) -> Result<()> {
        match insn.kind {
            // Control flow writes IP itself.
            Kind::Jmp => return Self::jmp(policy, insn),
            Kind::Jcc(cond) => return Self::jcc(policy, insn, cond),
            Kind::Call => return Self::call(policy, insn),
            Kind::Ret { pop } => return Self::ret(policy, insn, pop),
            Kind::Hlt => return Ok(policy.hlt()?),

            Kind::Int { vector } => policy.interrupt(vector)?,
            Kind::Nop => {}
            Kind::Mov => Self::mov(policy, insn)?,
            Kind::Movzx => Self::mov_extend(policy, insn, false)?,
            Kind::Movsx => Self::mov_extend(policy, insn, true)?,
            Kind::Lea => Self::lea(policy, insn)?,
            Kind::Add | Kind::Adc | Kind::Sub | Kind::Sbb | Kind::Cmp => {
                Self::arith(policy, insn)?
            }
            Kind::And | Kind::Or | Kind::Xor | Kind::Test => Self::logic(policy, insn)?,
            Kind::Not => Self::not(policy, insn)?,
            Kind::Neg => Self::neg(policy, insn)?,
            Kind::Inc | Kind::Dec => Self::inc_dec(policy, insn)?,
            Kind::Shl | Kind::Shr | Kind::Sar => Self::shift(policy, insn)?,
            Kind::Push => Self::push(policy, insn)?,
            Kind::Pop => Self::pop(policy, insn)?,
            Kind::Leave => Self::leave(policy)?,
        }

        policy.write_register(RegisterRef::Ip, Word::known(32, insn.fall_through().into()))?;
        Ok(())
    }

    fn operand<'i>(insn: &'i Instruction, index: usize) -> Result<&'i Operand> {
        insn.operands
            .get(index)
            .ok_or_else(|| illegal(insn, format!("missing operand {index}")))
    }

    fn register_ref(insn: &Instruction, operand: &Operand) -> Result<RegisterRef> {
        Ok(match operand {
            Operand::Gpr32(reg) => RegisterRef::Gpr32(*reg),
            Operand::Gpr16(reg) => RegisterRef::Gpr16(*reg),
            Operand::Gpr8 { reg, high } => RegisterRef::Gpr8 {
                reg: *reg,
                high: *high,
            },
            Operand::Seg(seg) => RegisterRef::Seg(*seg),
            _ => return Err(illegal(insn, "expected a register operand")),
        })
    }

    /// Resolve a memory reference to a concrete (segment, address) pair.
    /// Base and index registers are read through the policy, so an address
    /// computation can itself consume inputs.
    fn effective_address(policy: &mut Policy, mem: &MemRef) -> Result<(SegReg, u32)> {
        let mut addr = Word::known(32, mem.disp as u32 as u64);
        if let Some(base) = mem.base {
            let base = policy.read_register(RegisterRef::Gpr32(base))?;
            addr = addr.add(base);
        }
        if let Some((index, scale)) = mem.index {
            let index = policy.read_register(RegisterRef::Gpr32(index))?;
            addr = addr.add(index.mul(Word::known(32, scale.into())));
        }
        let addr = require_known(addr)? as u32;
        Ok((mem.effective_segment(), addr))
    }

    fn read_operand(policy: &mut Policy, insn: &Instruction, operand: &Operand) -> Result<Word> {
        match operand {
            Operand::Imm { value, width } => Ok(Word::known(width.bits(), u64::from(*value))),
            Operand::Mem(mem) => {
                let (segment, addr) = Self::effective_address(policy, mem)?;
                Ok(policy.read_memory(segment, addr, mem.width.bits())?)
            }
            _ => Ok(policy.read_register(Self::register_ref(insn, operand)?)?),
        }
    }

    fn write_operand(
        policy: &mut Policy,
        insn: &Instruction,
        operand: &Operand,
        value: Word,
    ) -> Result<()> {
        match operand {
            Operand::Imm { .. } => Err(illegal(insn, "immediate cannot be a destination")),
            Operand::Mem(mem) => {
                let (segment, addr) = Self::effective_address(policy, mem)?;
                Ok(policy.write_memory(segment, addr, value)?)
            }
            _ => Ok(policy.write_register(Self::register_ref(insn, operand)?, value)?),
        }
    }

    /// Source value for a two-operand form. A narrower immediate is the
    /// sign-extended imm8 encoding.
    fn read_source(
        policy: &mut Policy,
        insn: &Instruction,
        operand: &Operand,
        width: u32,
    ) -> Result<Word> {
        let value = Self::read_operand(policy, insn, operand)?;
        if value.width() == width {
            Ok(value)
        } else if value.width() < width && matches!(operand, Operand::Imm { .. }) {
            Ok(value.sign_extend(width))
        } else {
            Err(illegal(insn, "operand width mismatch"))
        }
    }

    fn write_flag(policy: &mut Policy, flag: Flag, value: Word) -> Result<()> {
        Ok(policy.write_register(RegisterRef::Flag(flag.bit()), value)?)
    }

    /// ZF, SF, and PF from a result.
    fn write_result_flags(policy: &mut Policy, result: Word) -> Result<()> {
        Self::write_flag(policy, Flag::Zf, result.is_zero())?;
        Self::write_flag(policy, Flag::Sf, result.msb())?;
        Self::write_flag(policy, Flag::Pf, result.parity())?;
        Ok(())
    }

    fn mov(policy: &mut Policy, insn: &Instruction) -> Result<()> {
        let dst = Self::operand(insn, 0)?;
        let src = Self::operand(insn, 1)?;
        let value = Self::read_source(policy, insn, src, dst.width().bits())?;
        Self::write_operand(policy, insn, dst, value)
    }

    fn mov_extend(policy: &mut Policy, insn: &Instruction, signed: bool) -> Result<()> {
        let dst = Self::operand(insn, 0)?;
        let src = Self::operand(insn, 1)?;
        let value = Self::read_operand(policy, insn, src)?;
        let target = dst.width().bits();
        if value.width() > target {
            return Err(illegal(insn, "source wider than destination"));
        }
        let value = if signed {
            value.sign_extend(target)
        } else {
            value.zero_extend(target)
        };
        Self::write_operand(policy, insn, dst, value)
    }

    fn lea(policy: &mut Policy, insn: &Instruction) -> Result<()> {
        let dst = Self::operand(insn, 0)?;
        let Operand::Mem(mem) = Self::operand(insn, 1)? else {
            return Err(illegal(insn, "LEA source must be a memory reference"));
        };
        let (_, addr) = Self::effective_address(policy, mem)?;
        Self::write_operand(policy, insn, dst, Word::known(32, addr.into()))
    }

    fn arith(policy: &mut Policy, insn: &Instruction) -> Result<()> {
        let dst = Self::operand(insn, 0)?;
        let src = Self::operand(insn, 1)?;
        let width = dst.width().bits();
        let a = Self::read_operand(policy, insn, dst)?;
        let b = Self::read_source(policy, insn, src, width)?;

        let no_carry = Word::known(1, 0);
        let (result, carry_in) = match insn.kind {
            Kind::Add => (a.add(b), no_carry),
            Kind::Sub | Kind::Cmp => (a.sub(b), no_carry),
            Kind::Adc => {
                let c = policy.read_register(RegisterRef::Flag(Flag::Cf.bit()))?;
                (a.add(b).add(c.zero_extend(width)), c)
            }
            Kind::Sbb => {
                let c = policy.read_register(RegisterRef::Flag(Flag::Cf.bit()))?;
                (a.sub(b).sub(c.zero_extend(width)), c)
            }
            _ => unreachable!("arith called for non-arithmetic kind"),
        };

        let subtracting = matches!(insn.kind, Kind::Sub | Kind::Sbb | Kind::Cmp);
        let (cf, of) = if subtracting {
            (a.borrow_sub(b, carry_in), a.overflow_sub(b, carry_in))
        } else {
            (a.carry_add(b, carry_in), a.overflow_add(b, carry_in))
        };
        Self::write_flag(policy, Flag::Cf, cf)?;
        Self::write_flag(policy, Flag::Of, of)?;
        Self::write_flag(policy, Flag::Af, a.xor(b).xor(result).extract(4, 5))?;
        Self::write_result_flags(policy, result)?;

        if insn.kind != Kind::Cmp {
            Self::write_operand(policy, insn, dst, result)?;
        }
        Ok(())
    }

    fn logic(policy: &mut Policy, insn: &Instruction) -> Result<()> {
        let dst = Self::operand(insn, 0)?;
        let src = Self::operand(insn, 1)?;
        let width = dst.width().bits();
        let a = Self::read_operand(policy, insn, dst)?;
        let b = Self::read_source(policy, insn, src, width)?;

        let result = match insn.kind {
            Kind::And | Kind::Test => a.and(b),
            Kind::Or => a.or(b),
            Kind::Xor => a.xor(b),
            _ => unreachable!("logic called for non-logical kind"),
        };

        Self::write_flag(policy, Flag::Cf, Word::known(1, 0))?;
        Self::write_flag(policy, Flag::Of, Word::known(1, 0))?;
        // AF is architecturally undefined after logical operations.
        Self::write_flag(policy, Flag::Af, Word::unknown(1))?;
        Self::write_result_flags(policy, result)?;

        if insn.kind != Kind::Test {
            Self::write_operand(policy, insn, dst, result)?;
        }
        Ok(())
    }

    fn not(policy: &mut Policy, insn: &Instruction) -> Result<()> {
        let dst = Self::operand(insn, 0)?;
        let value = Self::read_operand(policy, insn, dst)?;
        // NOT affects no flags.
        Self::write_operand(policy, insn, dst, value.not())
    }

    fn neg(policy: &mut Policy, insn: &Instruction) -> Result<()> {
        let dst = Self::operand(insn, 0)?;
        let a = Self::read_operand(policy, insn, dst)?;
        let result = a.neg();

        let zero = Word::known(a.width(), 0);
        let no_borrow = Word::known(1, 0);
        // CF is set unless the operand was zero.
        Self::write_flag(policy, Flag::Cf, a.is_zero().not())?;
        Self::write_flag(policy, Flag::Of, zero.overflow_sub(a, no_borrow))?;
        Self::write_flag(policy, Flag::Af, zero.xor(a).xor(result).extract(4, 5))?;
        Self::write_result_flags(policy, result)?;
        Self::write_operand(policy, insn, dst, result)
    }

    fn inc_dec(policy: &mut Policy, insn: &Instruction) -> Result<()> {
        let dst = Self::operand(insn, 0)?;
        let a = Self::read_operand(policy, insn, dst)?;
        let one = Word::known(a.width(), 1);
        let no_carry = Word::known(1, 0);

        let (result, of) = if insn.kind == Kind::Inc {
            (a.add(one), a.overflow_add(one, no_carry))
        } else {
            (a.sub(one), a.overflow_sub(one, no_carry))
        };

        // CF is untouched by INC/DEC.
        Self::write_flag(policy, Flag::Of, of)?;
        Self::write_flag(policy, Flag::Af, a.xor(one).xor(result).extract(4, 5))?;
        Self::write_result_flags(policy, result)?;
        Self::write_operand(policy, insn, dst, result)
    }

    fn shift(policy: &mut Policy, insn: &Instruction) -> Result<()> {
        let dst = Self::operand(insn, 0)?;
        let count_op = Self::operand(insn, 1)?;
        let width = dst.width().bits();
        let a = Self::read_operand(policy, insn, dst)?;
        let count = Self::read_operand(policy, insn, count_op)?;
        // The hardware masks shift counts to five bits.
        let count = count.and(Word::known(count.width(), 0x1f));

        let Some(n) = count.known_value() else {
            // Unknown count: result and flags all fold to unknown.
            Self::write_flag(policy, Flag::Cf, Word::unknown(1))?;
            Self::write_flag(policy, Flag::Of, Word::unknown(1))?;
            Self::write_flag(policy, Flag::Af, Word::unknown(1))?;
            Self::write_flag(policy, Flag::Zf, Word::unknown(1))?;
            Self::write_flag(policy, Flag::Sf, Word::unknown(1))?;
            Self::write_flag(policy, Flag::Pf, Word::unknown(1))?;
            return Self::write_operand(policy, insn, dst, Word::unknown(width));
        };

        // A zero count changes nothing, flags included.
        if n == 0 {
            return Self::write_operand(policy, insn, dst, a);
        }
        let n = n as u32;

        let result = match insn.kind {
            Kind::Shl => a.shl(count),
            Kind::Shr => a.shr(count),
            Kind::Sar => a.sar(count),
            _ => unreachable!("shift called for non-shift kind"),
        };

        let cf = match insn.kind {
            Kind::Shl if n <= width => a.extract(width - n, width - n + 1),
            Kind::Shr if n <= width => a.extract(n - 1, n),
            Kind::Sar => {
                if n <= width {
                    a.extract(n - 1, n)
                } else {
                    a.msb()
                }
            }
            // The bit shifted out is architecturally undefined here.
            _ => Word::unknown(1),
        };
        let of = if n == 1 {
            match insn.kind {
                Kind::Shl => result.msb().xor(cf),
                Kind::Shr => a.msb(),
                _ => Word::known(1, 0),
            }
        } else {
            Word::unknown(1)
        };

        Self::write_flag(policy, Flag::Cf, cf)?;
        Self::write_flag(policy, Flag::Of, of)?;
        Self::write_flag(policy, Flag::Af, Word::unknown(1))?;
        Self::write_result_flags(policy, result)?;
        Self::write_operand(policy, insn, dst, result)
    }

    fn push(policy: &mut Policy, insn: &Instruction) -> Result<()> {
        let src = Self::operand(insn, 0)?;
        if src.width().bits() != 32 {
            return Err(illegal(insn, "only doubleword pushes are modeled"));
        }
        let value = Self::read_operand(policy, insn, src)?;

        let sp = policy.read_register(RegisterRef::Gpr32(Gpr::Sp))?;
        let new_sp = sp.sub(Word::known(32, 4));
        let addr = require_known(new_sp)? as u32;
        policy.write_memory(SegReg::Ss, addr, value)?;
        policy.write_register(RegisterRef::Gpr32(Gpr::Sp), new_sp)?;
        Ok(())
    }

    fn pop(policy: &mut Policy, insn: &Instruction) -> Result<()> {
        let dst = Self::operand(insn, 0)?;
        if dst.width().bits() != 32 {
            return Err(illegal(insn, "only doubleword pops are modeled"));
        }

        let sp = policy.read_register(RegisterRef::Gpr32(Gpr::Sp))?;
        let addr = require_known(sp)? as u32;
        let value = policy.read_memory(SegReg::Ss, addr, 32)?;
        Self::write_operand(policy, insn, dst, value)?;
        policy.write_register(RegisterRef::Gpr32(Gpr::Sp), sp.add(Word::known(32, 4)))?;
        Ok(())
    }

    fn leave(policy: &mut Policy) -> Result<()> {
        let bp = policy.read_register(RegisterRef::Gpr32(Gpr::Bp))?;
        let addr = require_known(bp)? as u32;
        let saved = policy.read_memory(SegReg::Ss, addr, 32)?;
        policy.write_register(RegisterRef::Gpr32(Gpr::Bp), saved)?;
        policy.write_register(RegisterRef::Gpr32(Gpr::Sp), bp.add(Word::known(32, 4)))?;
        Ok(())
    }

    fn branch_target(policy: &mut Policy, insn: &Instruction, operand: &Operand) -> Result<Word> {
        // Direct targets are absolute immediates; indirect targets read a
        // register or memory slot.
        let target = Self::read_operand(policy, insn, operand)?;
        if target.width() != 32 {
            return Err(illegal(insn, "branch target must be 32 bits"));
        }
        Ok(target)
    }

    fn jmp(policy: &mut Policy, insn: &Instruction) -> Result<()> {
        let target = Self::branch_target(policy, insn, Self::operand(insn, 0)?)?;
        policy.write_register(RegisterRef::Ip, target)?;
        Ok(())
    }

    fn condition(policy: &mut Policy, cond: Cond) -> Result<Word> {
        let flag = |policy: &mut Policy, flag: Flag| -> Result<Word> {
            Ok(policy.read_register(RegisterRef::Flag(flag.bit()))?)
        };

        Ok(match cond {
            Cond::E => flag(policy, Flag::Zf)?,
            Cond::Ne => flag(policy, Flag::Zf)?.not(),
            Cond::B => flag(policy, Flag::Cf)?,
            Cond::Ae => flag(policy, Flag::Cf)?.not(),
            Cond::Be => flag(policy, Flag::Cf)?.or(flag(policy, Flag::Zf)?),
            Cond::A => flag(policy, Flag::Cf)?.or(flag(policy, Flag::Zf)?).not(),
            Cond::L => flag(policy, Flag::Sf)?.xor(flag(policy, Flag::Of)?),
            Cond::Ge => flag(policy, Flag::Sf)?.xor(flag(policy, Flag::Of)?).not(),
            Cond::Le => flag(policy, Flag::Sf)?
                .xor(flag(policy, Flag::Of)?)
                .or(flag(policy, Flag::Zf)?),
            Cond::G => flag(policy, Flag::Sf)?
                .xor(flag(policy, Flag::Of)?)
                .or(flag(policy, Flag::Zf)?)
                .not(),
            Cond::S => flag(policy, Flag::Sf)?,
            Cond::Ns => flag(policy, Flag::Sf)?.not(),
            Cond::O => flag(policy, Flag::Of)?,
            Cond::No => flag(policy, Flag::Of)?.not(),
            Cond::P => flag(policy, Flag::Pf)?,
            Cond::Np => flag(policy, Flag::Pf)?.not(),
        })
    }

    fn jcc(policy: &mut Policy, insn: &Instruction, cond: Cond) -> Result<()> {
        let target = Self::branch_target(policy, insn, Self::operand(insn, 0)?)?;
        let taken = Self::condition(policy, cond)?;
        let ip = match require_known(taken)? {
            0 => Word::known(32, insn.fall_through().into()),
            _ => target,
        };
        policy.write_register(RegisterRef::Ip, ip)?;
        Ok(())
    }

    fn call(policy: &mut Policy, insn: &Instruction) -> Result<()> {
        let target = Self::branch_target(policy, insn, Self::operand(insn, 0)?)?;

        let sp = policy.read_register(RegisterRef::Gpr32(Gpr::Sp))?;
        let new_sp = sp.sub(Word::known(32, 4));
        let addr = require_known(new_sp)? as u32;
        policy.write_memory(SegReg::Ss, addr, Word::known(32, insn.fall_through().into()))?;
        policy.write_register(RegisterRef::Gpr32(Gpr::Sp), new_sp)?;
        // The finish hook decides whether the call is followed or replaced
        // by a synthetic return value.
        policy.write_register(RegisterRef::Ip, target)?;
        Ok(())
    }

    fn ret(policy: &mut Policy, insn: &Instruction, pop: u16) -> Result<()> {
        let sp = policy.read_register(RegisterRef::Gpr32(Gpr::Sp))?;
        let addr = require_known(sp)? as u32;
        let return_addr = policy.read_memory(SegReg::Ss, addr, 32)?;
        if return_addr.width() != 32 {
            return Err(illegal(insn, "return address must be 32 bits"));
        }
        let released = 4 + u64::from(pop);
        policy.write_register(RegisterRef::Gpr32(Gpr::Sp), sp.add(Word::known(32, released)))?;
        policy.write_register(RegisterRef::Ip, return_addr)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::Width;
    use crate::inputs::InputGroup;
    use crate::provider::InstructionProvider;
    use crate::runner::{NullOracle, RunnerParams};

    fn insn(kind: Kind, operands: Vec<Operand>) -> Instruction {
        Instruction {
            address: 0x1000,
            size: 4,
            kind,
            operands,
        }
    }

    fn flag_of(policy: &mut Policy, flag: Flag) -> u64 {
        policy
            .read_register(RegisterRef::Flag(flag.bit()))
            .expect("flag read failed")
            .known_value()
            .expect("flag should be known")
    }

    fn gpr_of(policy: &mut Policy, reg: Gpr) -> u64 {
        policy
            .read_register(RegisterRef::Gpr32(reg))
            .expect("register read failed")
            .known_value()
            .expect("register should be known")
    }

    macro_rules! policy {
        ($policy:ident) => {
            let params = RunnerParams::default();
            let mut inputs = InputGroup::new();
            let provider = InstructionProvider::new();
            let mut $policy = Policy::new(&params, &mut inputs, &NullOracle, &provider, None);
        };
    }

    #[test]
    fn cmp_equal_sets_zf() -> Result<()> {
        policy!(policy);
        policy.write_register(RegisterRef::Gpr32(Gpr::Cx), Word::known(32, 5))?;

        let cmp = insn(
            Kind::Cmp,
            vec![Operand::Gpr32(Gpr::Cx), Operand::imm32(5)],
        );
        X86Interpreter::execute(&mut policy, &cmp)?;

        assert_eq!(flag_of(&mut policy, Flag::Zf), 1);
        assert_eq!(flag_of(&mut policy, Flag::Cf), 0);
        assert_eq!(flag_of(&mut policy, Flag::Sf), 0);
        assert_eq!(flag_of(&mut policy, Flag::Of), 0);
        // CMP must not modify its destination.
        assert_eq!(gpr_of(&mut policy, Gpr::Cx), 5);
        Ok(())
    }

    #[test]
    fn cmp_below_sets_cf_and_sf() -> Result<()> {
        policy!(policy);
        policy.write_register(RegisterRef::Gpr32(Gpr::Cx), Word::known(32, 2))?;

        let cmp = insn(
            Kind::Cmp,
            vec![Operand::Gpr32(Gpr::Cx), Operand::imm32(3)],
        );
        X86Interpreter::execute(&mut policy, &cmp)?;

        assert_eq!(flag_of(&mut policy, Flag::Zf), 0);
        assert_eq!(flag_of(&mut policy, Flag::Cf), 1);
        assert_eq!(flag_of(&mut policy, Flag::Sf), 1);
        Ok(())
    }

    #[test]
    fn add_overflow_sets_of_not_cf() -> Result<()> {
        policy!(policy);
        policy.write_register(RegisterRef::Gpr32(Gpr::Ax), Word::known(32, 0x7fff_ffff))?;

        let add = insn(
            Kind::Add,
            vec![Operand::Gpr32(Gpr::Ax), Operand::imm32(1)],
        );
        X86Interpreter::execute(&mut policy, &add)?;

        assert_eq!(gpr_of(&mut policy, Gpr::Ax), 0x8000_0000);
        assert_eq!(flag_of(&mut policy, Flag::Of), 1);
        assert_eq!(flag_of(&mut policy, Flag::Cf), 0);
        assert_eq!(flag_of(&mut policy, Flag::Sf), 1);
        Ok(())
    }

    #[test]
    fn adc_adds_the_carry() -> Result<()> {
        policy!(policy);
        policy.write_register(RegisterRef::Flag(Flag::Cf.bit()), Word::known(1, 1))?;
        policy.write_register(RegisterRef::Gpr32(Gpr::Ax), Word::known(32, 1))?;

        let adc = insn(
            Kind::Adc,
            vec![Operand::Gpr32(Gpr::Ax), Operand::imm32(2)],
        );
        X86Interpreter::execute(&mut policy, &adc)?;

        assert_eq!(gpr_of(&mut policy, Gpr::Ax), 4);
        Ok(())
    }

    #[test]
    fn logic_clears_cf_and_of() -> Result<()> {
        policy!(policy);
        policy.write_register(RegisterRef::Flag(Flag::Cf.bit()), Word::known(1, 1))?;
        policy.write_register(RegisterRef::Gpr32(Gpr::Ax), Word::known(32, 0xff00))?;

        let and = insn(
            Kind::And,
            vec![Operand::Gpr32(Gpr::Ax), Operand::imm32(0x0ff0)],
        );
        X86Interpreter::execute(&mut policy, &and)?;

        assert_eq!(gpr_of(&mut policy, Gpr::Ax), 0x0f00);
        assert_eq!(flag_of(&mut policy, Flag::Cf), 0);
        assert_eq!(flag_of(&mut policy, Flag::Of), 0);
        // AF is left undefined.
        let af = policy.read_register(RegisterRef::Flag(Flag::Af.bit()))?;
        assert!(!af.is_known());
        Ok(())
    }

    #[test]
    fn movzx_and_movsx_extend() -> Result<()> {
        policy!(policy);
        policy.write_register(RegisterRef::Gpr32(Gpr::Bx), Word::known(32, 0x80))?;

        let movzx = insn(
            Kind::Movzx,
            vec![
                Operand::Gpr32(Gpr::Ax),
                Operand::Gpr8 {
                    reg: Gpr::Bx,
                    high: false,
                },
            ],
        );
        X86Interpreter::execute(&mut policy, &movzx)?;
        assert_eq!(gpr_of(&mut policy, Gpr::Ax), 0x80);

        let movsx = insn(
            Kind::Movsx,
            vec![
                Operand::Gpr32(Gpr::Cx),
                Operand::Gpr8 {
                    reg: Gpr::Bx,
                    high: false,
                },
            ],
        );
        X86Interpreter::execute(&mut policy, &movsx)?;
        assert_eq!(gpr_of(&mut policy, Gpr::Cx), 0xffff_ff80);
        Ok(())
    }

    #[test]
    fn shl_carries_out_the_top_bit() -> Result<()> {
        policy!(policy);
        policy.write_register(RegisterRef::Gpr32(Gpr::Ax), Word::known(32, 0x8000_0001))?;

        let shl = insn(
            Kind::Shl,
            vec![
                Operand::Gpr32(Gpr::Ax),
                Operand::Imm {
                    value: 1,
                    width: Width::Byte,
                },
            ],
        );
        X86Interpreter::execute(&mut policy, &shl)?;

        assert_eq!(gpr_of(&mut policy, Gpr::Ax), 2);
        assert_eq!(flag_of(&mut policy, Flag::Cf), 1);
        // OF = msb(result) ^ CF for a single-bit shift.
        assert_eq!(flag_of(&mut policy, Flag::Of), 1);
        Ok(())
    }

    #[test]
    fn zero_shift_count_preserves_flags() -> Result<()> {
        policy!(policy);
        policy.write_register(RegisterRef::Flag(Flag::Cf.bit()), Word::known(1, 1))?;
        policy.write_register(RegisterRef::Gpr32(Gpr::Ax), Word::known(32, 7))?;

        let shl = insn(
            Kind::Shl,
            vec![
                Operand::Gpr32(Gpr::Ax),
                Operand::Imm {
                    value: 0,
                    width: Width::Byte,
                },
            ],
        );
        X86Interpreter::execute(&mut policy, &shl)?;

        assert_eq!(gpr_of(&mut policy, Gpr::Ax), 7);
        assert_eq!(flag_of(&mut policy, Flag::Cf), 1);
        Ok(())
    }

    #[test]
    fn push_then_pop_roundtrips() -> Result<()> {
        policy!(policy);
        policy.write_register(RegisterRef::Gpr32(Gpr::Sp), Word::known(32, 0x8000_0000))?;

        let push = insn(Kind::Push, vec![Operand::imm32(0xdead_beef)]);
        X86Interpreter::execute(&mut policy, &push)?;
        assert_eq!(gpr_of(&mut policy, Gpr::Sp), 0x7fff_fffc);

        let pop = insn(Kind::Pop, vec![Operand::Gpr32(Gpr::Dx)]);
        X86Interpreter::execute(&mut policy, &pop)?;
        assert_eq!(gpr_of(&mut policy, Gpr::Dx), 0xdead_beef);
        assert_eq!(gpr_of(&mut policy, Gpr::Sp), 0x8000_0000);
        Ok(())
    }

    #[test]
    fn lea_computes_without_touching_memory() -> Result<()> {
        policy!(policy);
        policy.write_register(RegisterRef::Gpr32(Gpr::Bx), Word::known(32, 0x100))?;
        policy.write_register(RegisterRef::Gpr32(Gpr::Si), Word::known(32, 4))?;

        let mem = MemRef {
            segment: None,
            base: Some(Gpr::Bx),
            index: Some((Gpr::Si, 4)),
            disp: 8,
            width: Width::Dword,
        };
        let lea = insn(Kind::Lea, vec![Operand::Gpr32(Gpr::Ax), Operand::Mem(mem)]);
        X86Interpreter::execute(&mut policy, &lea)?;

        assert_eq!(gpr_of(&mut policy, Gpr::Ax), 0x100 + 4 * 4 + 8);
        assert!(policy.state.data_cell(0x100 + 4 * 4 + 8).is_none());
        Ok(())
    }

    #[test]
    fn immediate_destination_is_illegal() {
        policy!(policy);
        let mov = insn(Kind::Mov, vec![Operand::imm32(1), Operand::imm32(2)]);
        assert!(matches!(
            X86Interpreter::execute(&mut policy, &mov),
            Err(Error::IllegalInstruction { .. })
        ));
    }
}
