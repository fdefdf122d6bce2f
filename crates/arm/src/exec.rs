//! Semantics of translated ARM operations.

use crate::{
    Arm, Cpsr, LR, PC,
    ins::{AluOp, Cond, Index, Shift},
};
use dyntrans::{Arch, Ctx, ExecError, InstrCall, Operand};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// `mov rd, #0`, args `[rd, #0]`.
    Clear,
    /// `mov rd, #imm`, args `[rd, #imm]`.
    MovImm,
    /// Data processing with an immediate, args `[rd, rn, #imm]`.
    AluImm {
        op: AluOp,
        cond: Cond,
        s: bool,
        carry: Option<bool>,
    },
    /// Data processing with a shifted register, args `[rd, rn, rm]`.
    AluReg {
        op: AluOp,
        cond: Cond,
        s: bool,
        shift: Shift,
        amount: u8,
    },
    /// `mul`/`mla`, args `[rd, rm, rs]`.
    Mul {
        cond: Cond,
        s: bool,
        acc: Option<u8>,
    },
    /// Single transfer with an immediate offset, args `[rd, rn, #offset]`.
    MemImm {
        cond: Cond,
        load: bool,
        byte: bool,
        index: Index,
    },
    /// Single transfer with a register offset, args `[rd, rn, rm]`.
    MemReg {
        cond: Cond,
        load: bool,
        byte: bool,
        index: Index,
        shift: Shift,
        amount: u8,
        up: bool,
    },
    /// `ldm`/`stm`, args `[rn, #list]`.
    Block {
        cond: Cond,
        load: bool,
        pre: bool,
        up: bool,
        writeback: bool,
    },
    /// Branch to another page, args `[#offset]` relative to the instruction.
    Branch { cond: Cond, link: bool },
    /// Branch within the page, args `[slot]`.
    BranchSamePage { cond: Cond, link: bool },
    /// `bx rm` and `mov pc, rm`, args `[rm]`.
    Bx { cond: Cond },
    Swi { cond: Cond },
    /// Two moves of immediates in a row.
    Mov2,
    /// A byte fill loop, args `[ry, rz, rw]`.
    FillLoop,
}

/// Reads a register as an operand: `pc` reads 8 bytes ahead.
#[inline(always)]
fn read(ctx: &mut Ctx<'_, Arm>, r: usize) -> u32 {
    if r == PC {
        (ctx.instr_addr() as u32).wrapping_add(8)
    } else {
        ctx.regs().r[r]
    }
}

/// Writes a register. Writes to `pc` branch.
#[inline(always)]
fn write(ctx: &mut Ctx<'_, Arm>, r: usize, value: u32) {
    if r == PC {
        ctx.jump(u64::from(value & !3));
    } else {
        ctx.regs().r[r] = value;
    }
}

/// `a + b + carry` with the carry and overflow outputs.
fn add_with_carry(a: u32, b: u32, carry: bool) -> (u32, bool, bool) {
    let wide = u64::from(a) + u64::from(b) + u64::from(carry);
    let result = wide as u32;
    let overflow = ((a ^ result) & (b ^ result)) >> 31 != 0;

    (result, wide >> 32 != 0, overflow)
}

/// Flags after `cmp value, #0`.
pub(crate) fn compare_zero(cpsr: Cpsr, value: u32) -> Cpsr {
    let (result, carry, overflow) = add_with_carry(value, !0, true);
    cpsr.with_negative(result >> 31 != 0)
        .with_zero(result == 0)
        .with_carry(carry)
        .with_overflow(overflow)
}

fn data_processing(
    ctx: &mut Ctx<'_, Arm>,
    op: AluOp,
    s: bool,
    rd: Operand,
    a: u32,
    b: u32,
    shifter_carry: bool,
) {
    let cpsr = ctx.regs().cpsr;
    let (c, v) = (shifter_carry, cpsr.overflow());

    let (result, carry, overflow) = match op {
        AluOp::And | AluOp::Tst => (a & b, c, v),
        AluOp::Eor | AluOp::Teq => (a ^ b, c, v),
        AluOp::Orr => (a | b, c, v),
        AluOp::Bic => (a & !b, c, v),
        AluOp::Mov => (b, c, v),
        AluOp::Mvn => (!b, c, v),
        AluOp::Sub | AluOp::Cmp => add_with_carry(a, !b, true),
        AluOp::Add | AluOp::Cmn => add_with_carry(a, b, false),
        AluOp::Rsb => add_with_carry(b, !a, true),
        AluOp::Adc => add_with_carry(a, b, cpsr.carry()),
        AluOp::Sbc => add_with_carry(a, !b, cpsr.carry()),
        AluOp::Rsc => add_with_carry(b, !a, cpsr.carry()),
    };

    if s {
        ctx.regs().cpsr = cpsr
            .with_negative(result >> 31 != 0)
            .with_zero(result == 0)
            .with_carry(carry)
            .with_overflow(overflow);
    }

    if !op.is_test() {
        write(ctx, rd.reg(), result);
    }
}

fn read_mem(ctx: &mut Ctx<'_, Arm>, addr: u32, byte: bool) -> Option<u32> {
    if byte {
        let mut buf = [0; 1];
        ctx.load(u64::from(addr), &mut buf).then_some(u32::from(buf[0]))
    } else {
        // unaligned word loads rotate the aligned word
        let mut buf = [0; 4];
        ctx.load(u64::from(addr & !3), &mut buf)
            .then(|| u32::from_le_bytes(buf).rotate_right((addr & 3) * 8))
    }
}

fn write_mem(ctx: &mut Ctx<'_, Arm>, addr: u32, value: u32, byte: bool) -> bool {
    if byte {
        ctx.store(u64::from(addr), &[value as u8])
    } else {
        ctx.store(u64::from(addr & !3), &value.to_le_bytes())
    }
}

/// Value a store of `r` writes: `pc` stores 12 bytes ahead.
fn stored(ctx: &mut Ctx<'_, Arm>, r: usize) -> u32 {
    if r == PC {
        (ctx.instr_addr() as u32).wrapping_add(12)
    } else {
        ctx.regs().r[r]
    }
}

fn transfer(
    ctx: &mut Ctx<'_, Arm>,
    load: bool,
    byte: bool,
    index: Index,
    [rd, rn]: [usize; 2],
    offset: u32,
) {
    let base = read(ctx, rn);
    let offset_addr = base.wrapping_add(offset);
    let addr = match index {
        Index::Post => base,
        Index::Offset | Index::Pre => offset_addr,
    };

    if load {
        let Some(value) = read_mem(ctx, addr, byte) else {
            ctx.fault(ExecError::DataAccess {
                vaddr: u64::from(addr),
            });
            return;
        };

        if index.writes_back() {
            ctx.regs().r[rn] = offset_addr;
        }

        write(ctx, rd, value);
    } else {
        let value = stored(ctx, rd);
        if !write_mem(ctx, addr, value, byte) {
            ctx.fault(ExecError::DataAccess {
                vaddr: u64::from(addr),
            });
            return;
        }

        if index.writes_back() {
            ctx.regs().r[rn] = offset_addr;
        }
    }
}

#[allow(clippy::fn_params_excessive_bools)]
fn block(
    ctx: &mut Ctx<'_, Arm>,
    load: bool,
    pre: bool,
    up: bool,
    writeback: bool,
    rn: usize,
    list: u16,
) {
    let base = ctx.regs().r[rn];
    let size = 4 * list.count_ones();
    let mut addr = match (pre, up) {
        (false, true) => base,
        (true, true) => base.wrapping_add(4),
        (false, false) => base.wrapping_sub(size).wrapping_add(4),
        (true, false) => base.wrapping_sub(size),
    };

    let mut target = None;
    for r in (0..16).filter(|r| list & (1 << r) != 0) {
        let ok = if load {
            match read_mem(ctx, addr, false) {
                Some(value) if r == PC => {
                    target = Some(value);
                    true
                }
                Some(value) => {
                    ctx.regs().r[r] = value;
                    true
                }
                None => false,
            }
        } else {
            let value = stored(ctx, r);
            write_mem(ctx, addr, value, false)
        };

        if !ok {
            ctx.fault(ExecError::DataAccess {
                vaddr: u64::from(addr),
            });
            return;
        }

        addr = addr.wrapping_add(4);
    }

    // a loaded base wins over writeback
    if writeback && !(load && list & (1 << rn) != 0) {
        ctx.regs().r[rn] = if up {
            base.wrapping_add(size)
        } else {
            base.wrapping_sub(size)
        };
    }

    if let Some(target) = target {
        ctx.jump(u64::from(target & !3));
    }
}

/// Fills bytes for as many iterations of the loop
///
/// ```text
/// l:  cmp  ry, #0
///     strb rw, [rz]
///     sub  ry, ry, #1
///     add  rz, rz, #1
///     bgt  l
/// ```
///
/// as fit in the page of `rz`, then leaves the loop or enters it again.
/// Anything unusual runs the `cmp` alone and lets the plain instructions
/// follow.
fn fill_loop(ctx: &mut Ctx<'_, Arm>, ic: &InstrCall<Op>) {
    let [ry, rz, rw] = ic.args.map(Operand::reg);
    let y = ctx.regs().r[ry];
    let z = ctx.regs().r[rz];

    if (y as i32) >= 0 {
        let geometry = Arm::GEOMETRY;
        let total = u64::from(y) + 1;
        let room = geometry.page_size() - geometry.page_offset(u64::from(z));
        let n = total.min(room);
        let fill = ctx.regs().r[rw] as u8;

        if let Some(dst) = ctx.host_slice_mut(u64::from(z), n as usize) {
            dst.fill(fill);

            let n32 = n as u32;
            let regs = ctx.regs();
            regs.r[ry] = y.wrapping_sub(n32);
            regs.r[rz] = z.wrapping_add(n32);
            regs.cpsr = compare_zero(regs.cpsr, y.wrapping_sub(n32 - 1));

            ctx.count(5 * n as i64 - 1);
            if n == total {
                ctx.skip(4);
            } else {
                let slot = ctx.slot();
                ctx.jump_same_page(slot);
            }

            return;
        }
    }

    let regs = ctx.regs();
    regs.cpsr = compare_zero(regs.cpsr, y);
}

pub fn execute(ctx: &mut Ctx<'_, Arm>, op: Op, ic: &InstrCall<Op>) {
    let [a, b, c] = ic.args;
    match op {
        Op::Clear => ctx.regs().r[a.reg()] = 0,
        Op::MovImm => ctx.regs().r[a.reg()] = b.imm() as u32,
        Op::AluImm { op, cond, s, carry } => {
            if !cond.passes(ctx.regs().cpsr) {
                return;
            }

            let lhs = if op.is_move() { 0 } else { read(ctx, b.reg()) };
            let shifter_carry = carry.unwrap_or(ctx.regs().cpsr.carry());
            data_processing(ctx, op, s, a, lhs, c.imm() as u32, shifter_carry);
        }
        Op::AluReg {
            op,
            cond,
            s,
            shift,
            amount,
        } => {
            let cpsr = ctx.regs().cpsr;
            if !cond.passes(cpsr) {
                return;
            }

            let lhs = if op.is_move() { 0 } else { read(ctx, b.reg()) };
            let rm = read(ctx, c.reg());
            let (rhs, shifter_carry) = shift.apply(rm, amount, cpsr.carry());
            data_processing(ctx, op, s, a, lhs, rhs, shifter_carry);
        }
        Op::Mul { cond, s, acc } => {
            if !cond.passes(ctx.regs().cpsr) {
                return;
            }

            let regs = ctx.regs();
            let addend = acc.map_or(0, |rn| regs.r[rn as usize]);
            let result = regs.r[b.reg()]
                .wrapping_mul(regs.r[c.reg()])
                .wrapping_add(addend);

            regs.r[a.reg()] = result;
            if s {
                regs.cpsr = regs
                    .cpsr
                    .with_negative(result >> 31 != 0)
                    .with_zero(result == 0);
            }
        }
        Op::MemImm {
            cond,
            load,
            byte,
            index,
        } => {
            if !cond.passes(ctx.regs().cpsr) {
                return;
            }

            transfer(ctx, load, byte, index, [a.reg(), b.reg()], c.imm() as u32);
        }
        Op::MemReg {
            cond,
            load,
            byte,
            index,
            shift,
            amount,
            up,
        } => {
            let cpsr = ctx.regs().cpsr;
            if !cond.passes(cpsr) {
                return;
            }

            let rm = ctx.regs().r[c.reg()];
            let (offset, _) = shift.apply(rm, amount, cpsr.carry());
            let offset = if up { offset } else { offset.wrapping_neg() };
            transfer(ctx, load, byte, index, [a.reg(), b.reg()], offset);
        }
        Op::Block {
            cond,
            load,
            pre,
            up,
            writeback,
        } => {
            if !cond.passes(ctx.regs().cpsr) {
                return;
            }

            block(ctx, load, pre, up, writeback, a.reg(), b.imm() as u16);
        }
        Op::Branch { cond, link } => {
            if !cond.passes(ctx.regs().cpsr) {
                return;
            }

            if link {
                ctx.regs().r[LR] = ctx.next_addr() as u32;
            }

            let target = (ctx.instr_addr() as u32).wrapping_add(a.imm() as u32);
            ctx.jump(u64::from(target));
        }
        Op::BranchSamePage { cond, link } => {
            if !cond.passes(ctx.regs().cpsr) {
                return;
            }

            if link {
                ctx.regs().r[LR] = ctx.next_addr() as u32;
            }

            ctx.jump_same_page(a.slot());
        }
        Op::Bx { cond } => {
            if !cond.passes(ctx.regs().cpsr) {
                return;
            }

            // no thumb: the state bit is dropped
            let target = read(ctx, a.reg());
            ctx.jump(u64::from(target & !3));
        }
        Op::Swi { cond } => {
            if cond.passes(ctx.regs().cpsr) {
                tracing::debug!(pc = ctx.instr_addr(), "swi");
                ctx.halt();
            }
        }
        Op::Mov2 => {
            ctx.regs().r[a.reg()] = b.imm() as u32;

            let [c, d, _] = ctx.peek(1).args;
            ctx.regs().r[c.reg()] = d.imm() as u32;
            ctx.skip(1);
            ctx.count(1);
        }
        Op::FillLoop => fill_loop(ctx, ic),
    }
}
