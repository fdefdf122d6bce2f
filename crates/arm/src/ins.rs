//! Parsed ARM instructions.

use crate::Cpsr;
use bitos::BitUtils;
use dyntrans::DecodeError;
use strum::{Display, FromRepr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, Display)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum Cond {
    Eq,
    Ne,
    Cs,
    Cc,
    Mi,
    Pl,
    Vs,
    Vc,
    Hi,
    Ls,
    Ge,
    Lt,
    Gt,
    Le,
    Al,
}

impl Cond {
    /// Whether an instruction with this condition executes.
    #[inline(always)]
    pub fn passes(self, cpsr: Cpsr) -> bool {
        let (n, z, c, v) = (cpsr.negative(), cpsr.zero(), cpsr.carry(), cpsr.overflow());
        match self {
            Self::Eq => z,
            Self::Ne => !z,
            Self::Cs => c,
            Self::Cc => !c,
            Self::Mi => n,
            Self::Pl => !n,
            Self::Vs => v,
            Self::Vc => !v,
            Self::Hi => c && !z,
            Self::Ls => !c || z,
            Self::Ge => n == v,
            Self::Lt => n != v,
            Self::Gt => !z && n == v,
            Self::Le => z || n != v,
            Self::Al => true,
        }
    }

    /// Mnemonic suffix: empty for `al`.
    pub fn suffix(self) -> String {
        match self {
            Self::Al => String::new(),
            _ => self.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, Display)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum AluOp {
    And,
    Eor,
    Sub,
    Rsb,
    Add,
    Adc,
    Sbc,
    Rsc,
    Tst,
    Teq,
    Cmp,
    Cmn,
    Orr,
    Mov,
    Bic,
    Mvn,
}

impl AluOp {
    /// Comparisons only set flags.
    pub fn is_test(self) -> bool {
        matches!(self, Self::Tst | Self::Teq | Self::Cmp | Self::Cmn)
    }

    /// Moves ignore the first operand register.
    pub fn is_move(self) -> bool {
        matches!(self, Self::Mov | Self::Mvn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, Display)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum Shift {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

impl Shift {
    /// Applies the barrel shifter with an immediate amount, returning the
    /// value and the shifter carry out. Amount zero encodes `lsr #32`,
    /// `asr #32` and `rrx` for the right shifts.
    pub fn apply(self, value: u32, amount: u8, carry: bool) -> (u32, bool) {
        let amount = u32::from(amount);
        match (self, amount) {
            (Self::Lsl, 0) => (value, carry),
            (Self::Lsl, n) => (value << n, (value >> (32 - n)) & 1 != 0),
            (Self::Lsr, 0) => (0, value.bit(31)),
            (Self::Lsr, n) => (value >> n, (value >> (n - 1)) & 1 != 0),
            (Self::Asr, 0) => (((value as i32) >> 31) as u32, value.bit(31)),
            (Self::Asr, n) => (((value as i32) >> n) as u32, (value >> (n - 1)) & 1 != 0),
            (Self::Ror, 0) => ((u32::from(carry) << 31) | (value >> 1), value.bit(0)),
            (Self::Ror, n) => (value.rotate_right(n), (value >> (n - 1)) & 1 != 0),
        }
    }
}

/// The flexible second operand of data processing instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand2 {
    /// A rotated 8 bit immediate. The carry out is known if it was rotated.
    Imm { value: u32, carry: Option<bool> },
    /// A register shifted by an immediate amount.
    Reg { rm: u8, shift: Shift, amount: u8 },
}

/// Addressing mode of single transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Index {
    /// `[rn, off]`
    Offset,
    /// `[rn, off]!`
    Pre,
    /// `[rn], off`
    Post,
}

impl Index {
    pub fn writes_back(self) -> bool {
        self != Self::Offset
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offset {
    /// A signed immediate.
    Imm(i32),
    /// A shifted register, added or subtracted.
    Reg {
        rm: u8,
        shift: Shift,
        amount: u8,
        up: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ins {
    Alu {
        cond: Cond,
        op: AluOp,
        s: bool,
        rd: u8,
        rn: u8,
        op2: Operand2,
    },
    Mul {
        cond: Cond,
        s: bool,
        rd: u8,
        rm: u8,
        rs: u8,
        acc: Option<u8>,
    },
    Transfer {
        cond: Cond,
        load: bool,
        byte: bool,
        rd: u8,
        rn: u8,
        offset: Offset,
        index: Index,
    },
    Block {
        cond: Cond,
        load: bool,
        rn: u8,
        list: u16,
        pre: bool,
        up: bool,
        writeback: bool,
    },
    Branch {
        cond: Cond,
        link: bool,
        target: u32,
    },
    Bx {
        cond: Cond,
        rm: u8,
    },
    Swi {
        cond: Cond,
        comment: u32,
    },
}

const PC: u8 = 15;

fn reg(word: u32, lo: u32) -> u8 {
    ((word >> lo) & 0xF) as u8
}

impl Ins {
    /// Parses the instruction `word` located at `addr`.
    pub fn parse(word: u32, addr: u32) -> Result<Self, DecodeError> {
        let unimplemented = DecodeError::Unimplemented {
            raw: u64::from(word),
        };

        let Some(cond) = Cond::from_repr(word.bits(28, 32) as u8) else {
            return Err(DecodeError::Illegal {
                raw: u64::from(word),
            });
        };

        let ins = match word.bits(25, 28) {
            0b000 if word & 0x0FFF_FFF0 == 0x012F_FF10 => Self::Bx {
                cond,
                rm: reg(word, 0),
            },
            0b000 if word.bits(4, 8) == 0b1001 => {
                // only mul and mla
                if word.bits(22, 28) != 0 {
                    return Err(unimplemented);
                }

                let ins = Self::Mul {
                    cond,
                    s: word.bit(20),
                    rd: reg(word, 16),
                    rm: reg(word, 0),
                    rs: reg(word, 8),
                    acc: word.bit(21).then(|| reg(word, 12)),
                };

                if let Self::Mul { rd, rm, rs, acc, .. } = ins
                    && [Some(rd), Some(rm), Some(rs), acc].contains(&Some(PC))
                {
                    return Err(unimplemented);
                }

                ins
            }
            0b000 | 0b001 => {
                let op = AluOp::from_repr(word.bits(21, 25) as u8).ok_or(unimplemented.clone())?;
                let s = word.bit(20);

                // status register transfers live in the unset flag space
                if op.is_test() && !s {
                    return Err(unimplemented);
                }

                let op2 = if word.bit(25) {
                    let rotate = word.bits(8, 12) * 2;
                    let value = word.bits(0, 8).rotate_right(rotate);
                    Operand2::Imm {
                        value,
                        carry: (rotate != 0).then(|| value.bit(31)),
                    }
                } else if word.bit(4) {
                    // shifts by register and the extension space
                    return Err(unimplemented);
                } else {
                    Operand2::Reg {
                        rm: reg(word, 0),
                        shift: Shift::from_repr(word.bits(5, 7) as u8).ok_or(unimplemented.clone())?,
                        amount: word.bits(7, 12) as u8,
                    }
                };

                let rd = reg(word, 12);

                // flag setting writes to pc restore the cpsr from an spsr
                if s && rd == PC && !op.is_test() {
                    return Err(unimplemented);
                }

                Self::Alu {
                    cond,
                    op,
                    s,
                    rd,
                    rn: reg(word, 16),
                    op2,
                }
            }
            0b010 | 0b011 => {
                if word.bit(25) && word.bit(4) {
                    return Err(unimplemented);
                }

                let up = word.bit(23);
                let offset = if word.bit(25) {
                    Offset::Reg {
                        rm: reg(word, 0),
                        shift: Shift::from_repr(word.bits(5, 7) as u8).ok_or(unimplemented.clone())?,
                        amount: word.bits(7, 12) as u8,
                        up,
                    }
                } else {
                    let imm = word.bits(0, 12) as i32;
                    Offset::Imm(if up { imm } else { -imm })
                };

                let index = match (word.bit(24), word.bit(21)) {
                    (true, false) => Index::Offset,
                    (true, true) => Index::Pre,
                    (false, _) => Index::Post,
                };

                let rn = reg(word, 16);
                if index.writes_back() && rn == PC {
                    return Err(unimplemented);
                }

                if let Offset::Reg { rm: PC, .. } = offset {
                    return Err(unimplemented);
                }

                Self::Transfer {
                    cond,
                    load: word.bit(20),
                    byte: word.bit(22),
                    rd: reg(word, 12),
                    rn,
                    offset,
                    index,
                }
            }
            0b100 => {
                let list = word.bits(0, 16) as u16;
                let rn = reg(word, 16);

                // user bank transfers and degenerate lists
                if word.bit(22) || list == 0 || rn == PC {
                    return Err(unimplemented);
                }

                Self::Block {
                    cond,
                    load: word.bit(20),
                    rn,
                    list,
                    pre: word.bit(24),
                    up: word.bit(23),
                    writeback: word.bit(21),
                }
            }
            0b101 => {
                let offset = ((word << 8) as i32 >> 6) as u32;
                Self::Branch {
                    cond,
                    link: word.bit(24),
                    target: addr.wrapping_add(8).wrapping_add(offset),
                }
            }
            0b111 if word.bit(24) => Self::Swi {
                cond,
                comment: word.bits(0, 24),
            },
            _ => return Err(unimplemented),
        };

        Ok(ins)
    }
}
