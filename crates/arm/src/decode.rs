//! Translation of ARM instructions into instruction calls.

use crate::{
    Arm, Op,
    ins::{AluOp, Cond, Ins, Offset, Operand2, Shift},
};
use dyntrans::{DecodeCtx, DecodeError, InstrCall, Operand};

const PC: u8 = 15;

fn reg(r: u8) -> Operand {
    Operand::Reg(r)
}

fn imm(value: u32) -> Operand {
    Operand::Imm(u64::from(value))
}

pub fn decode(ctx: &DecodeCtx<'_, Arm>, raw: &[u8]) -> Result<InstrCall<Op>, DecodeError> {
    let Ok(bytes) = <[u8; 4]>::try_from(raw) else {
        return Err(DecodeError::Unimplemented { raw: 0 });
    };

    let word = u32::from_le_bytes(bytes);
    let ins = Ins::parse(word, ctx.addr as u32)?;

    Ok(lower(ctx, ins))
}

fn lower(ctx: &DecodeCtx<'_, Arm>, ins: Ins) -> InstrCall<Op> {
    let none = Operand::None;
    match ins {
        Ins::Alu {
            cond: Cond::Al,
            op: AluOp::Mov,
            s: false,
            rd,
            op2: Operand2::Imm { value, .. },
            ..
        } if rd != PC => {
            let op = if value == 0 { Op::Clear } else { Op::MovImm };
            InstrCall::new(op, [reg(rd), imm(value), none])
        }
        Ins::Alu {
            cond,
            op: AluOp::Mov,
            s: false,
            rd: PC,
            op2:
                Operand2::Reg {
                    rm,
                    shift: Shift::Lsl,
                    amount: 0,
                },
            ..
        } if rm != PC => InstrCall::new(Op::Bx { cond }, [reg(rm), none, none]),
        Ins::Alu {
            cond,
            op,
            s,
            rd,
            rn,
            op2: Operand2::Imm { value, carry },
        } => InstrCall::new(
            Op::AluImm { op, cond, s, carry },
            [reg(rd), reg(rn), imm(value)],
        ),
        Ins::Alu {
            cond,
            op,
            s,
            rd,
            rn,
            op2: Operand2::Reg { rm, shift, amount },
        } => InstrCall::new(
            Op::AluReg {
                op,
                cond,
                s,
                shift,
                amount,
            },
            [reg(rd), reg(rn), reg(rm)],
        ),
        Ins::Mul {
            cond,
            s,
            rd,
            rm,
            rs,
            acc,
        } => InstrCall::new(Op::Mul { cond, s, acc }, [reg(rd), reg(rm), reg(rs)]),
        Ins::Transfer {
            cond,
            load,
            byte,
            rd,
            rn,
            offset: Offset::Imm(offset),
            index,
        } => InstrCall::new(
            Op::MemImm {
                cond,
                load,
                byte,
                index,
            },
            [reg(rd), reg(rn), imm(offset as u32)],
        ),
        Ins::Transfer {
            cond,
            load,
            byte,
            rd,
            rn,
            offset:
                Offset::Reg {
                    rm,
                    shift,
                    amount,
                    up,
                },
            index,
        } => InstrCall::new(
            Op::MemReg {
                cond,
                load,
                byte,
                index,
                shift,
                amount,
                up,
            },
            [reg(rd), reg(rn), reg(rm)],
        ),
        Ins::Block {
            cond,
            load,
            rn,
            list,
            pre,
            up,
            writeback,
        } => InstrCall::new(
            Op::Block {
                cond,
                load,
                pre,
                up,
                writeback,
            },
            [reg(rn), imm(u32::from(list)), none],
        ),
        Ins::Branch { cond, link, target } => match ctx.same_page(u64::from(target)) {
            Some(slot) => InstrCall::new(Op::BranchSamePage { cond, link }, [slot, none, none]),
            // relative, so aliased mappings of the page branch within their own mapping
            None => InstrCall::new(
                Op::Branch { cond, link },
                [imm(target.wrapping_sub(ctx.addr as u32)), none, none],
            ),
        },
        Ins::Bx { cond, rm } => InstrCall::new(Op::Bx { cond }, [reg(rm), none, none]),
        Ins::Swi { cond, .. } => InstrCall::new(Op::Swi { cond }, [none; 3]),
    }
}
