//! A small disassembler in the usual assembler syntax.

use crate::{
    Special,
    ins::{Index, Ins, Offset, Operand2, Shift},
};
use std::fmt::{self, Display};

pub fn reg_name(r: u8) -> String {
    match Special::from_repr(r) {
        Some(special) => special.to_string(),
        None => format!("r{r}"),
    }
}

struct ShiftedReg {
    rm: u8,
    shift: Shift,
    amount: u8,
}

impl Display for ShiftedReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", reg_name(self.rm))?;
        match (self.shift, self.amount) {
            (Shift::Lsl, 0) => Ok(()),
            (Shift::Ror, 0) => write!(f, ", rrx"),
            (shift, 0) => write!(f, ", {shift} #32"),
            (shift, amount) => write!(f, ", {shift} #{amount}"),
        }
    }
}

fn reg_list(list: u16) -> String {
    let regs: Vec<_> = (0..16u8)
        .filter(|r| list & (1 << r) != 0)
        .map(reg_name)
        .collect();

    format!("{{{}}}", regs.join(", "))
}

impl Display for Ins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Ins::Alu {
                cond,
                op,
                s,
                rd,
                rn,
                op2,
            } => {
                // comparisons always set flags, so the suffix is implied
                let s = if s && !op.is_test() { "s" } else { "" };
                write!(f, "{op}{}{s} ", cond.suffix())?;

                if !op.is_test() {
                    write!(f, "{}, ", reg_name(rd))?;
                }

                if !op.is_move() {
                    write!(f, "{}, ", reg_name(rn))?;
                }

                match op2 {
                    Operand2::Imm { value, .. } => write!(f, "#{value:#x}"),
                    Operand2::Reg { rm, shift, amount } => {
                        write!(f, "{}", ShiftedReg { rm, shift, amount })
                    }
                }
            }
            Ins::Mul {
                cond,
                s,
                rd,
                rm,
                rs,
                acc,
            } => {
                let name = if acc.is_some() { "mla" } else { "mul" };
                let s = if s { "s" } else { "" };
                write!(
                    f,
                    "{name}{}{s} {}, {}, {}",
                    cond.suffix(),
                    reg_name(rd),
                    reg_name(rm),
                    reg_name(rs)
                )?;

                match acc {
                    Some(rn) => write!(f, ", {}", reg_name(rn)),
                    None => Ok(()),
                }
            }
            Ins::Transfer {
                cond,
                load,
                byte,
                rd,
                rn,
                offset,
                index,
            } => {
                let name = if load { "ldr" } else { "str" };
                let b = if byte { "b" } else { "" };
                write!(f, "{name}{}{b} {}, [{}", cond.suffix(), reg_name(rd), reg_name(rn))?;

                let offset = match offset {
                    Offset::Imm(0) => String::new(),
                    Offset::Imm(imm) if imm < 0 => format!(", #-{:#x}", imm.unsigned_abs()),
                    Offset::Imm(imm) => format!(", #{imm:#x}"),
                    Offset::Reg {
                        rm,
                        shift,
                        amount,
                        up,
                    } => {
                        let sign = if up { "" } else { "-" };
                        format!(", {sign}{}", ShiftedReg { rm, shift, amount })
                    }
                };

                match index {
                    Index::Offset => write!(f, "{offset}]"),
                    Index::Pre => write!(f, "{offset}]!"),
                    Index::Post => write!(f, "]{offset}"),
                }
            }
            Ins::Block {
                cond,
                load,
                rn,
                list,
                pre,
                up,
                writeback,
            } => {
                let name = if load { "ldm" } else { "stm" };
                let mode = match (up, pre) {
                    (true, false) => "ia",
                    (true, true) => "ib",
                    (false, false) => "da",
                    (false, true) => "db",
                };
                let bang = if writeback { "!" } else { "" };
                write!(
                    f,
                    "{name}{}{mode} {}{bang}, {}",
                    cond.suffix(),
                    reg_name(rn),
                    reg_list(list)
                )
            }
            Ins::Branch { cond, link, target } => {
                let l = if link { "l" } else { "" };
                write!(f, "b{l}{} {target:#x}", cond.suffix())
            }
            Ins::Bx { cond, rm } => write!(f, "bx{} {}", cond.suffix(), reg_name(rm)),
            Ins::Swi { cond, comment } => write!(f, "swi{} {comment:#x}", cond.suffix()),
        }
    }
}

/// Disassembles the instruction `word` located at `addr`.
pub fn disassemble(word: u32, addr: u32) -> String {
    match Ins::parse(word, addr) {
        Ok(ins) => ins.to_string(),
        Err(_) => format!(".word {word:#010x}"),
    }
}
