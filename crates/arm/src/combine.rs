//! Peephole fusion rules.

use crate::{
    Arm, Op,
    ins::{AluOp, Cond, Index},
};
use dyntrans::{InstrCall, Operand, Pattern, SlotRef};

pub const PATTERNS: &[Pattern<Arm>] = &[
    Pattern {
        name: "mov_2",
        len: 2,
        fuse: fuse_mov_2,
    },
    Pattern {
        name: "byte_fill_loop",
        len: 5,
        fuse: fuse_fill_loop,
    },
];

fn is_mov_imm(ic: &InstrCall<Op>) -> bool {
    matches!(ic.op(), Some(Op::MovImm | Op::Clear))
}

fn fuse_mov_2(window: &[InstrCall<Op>], _: SlotRef) -> Option<InstrCall<Op>> {
    match window {
        [a, b] if is_mov_imm(a) && is_mov_imm(b) => Some(InstrCall::new(Op::Mov2, a.args)),
        _ => None,
    }
}

fn fuse_fill_loop(window: &[InstrCall<Op>], first: SlotRef) -> Option<InstrCall<Op>> {
    use Operand::{Imm, Reg, Slot};

    let [cmp, strb, sub, add, bgt] = window else {
        return None;
    };

    let Some(Op::AluImm {
        op: AluOp::Cmp,
        cond: Cond::Al,
        ..
    }) = cmp.op()
    else {
        return None;
    };
    let [_, Reg(ry), Imm(0)] = cmp.args else {
        return None;
    };

    let Some(Op::MemImm {
        cond: Cond::Al,
        load: false,
        byte: true,
        index: Index::Offset,
    }) = strb.op()
    else {
        return None;
    };
    let [Reg(rw), Reg(rz), Imm(0)] = strb.args else {
        return None;
    };

    let counts = |ic: &InstrCall<Op>, alu: AluOp, r: u8| {
        matches!(
            ic.op(),
            Some(Op::AluImm { op, cond: Cond::Al, s: false, .. }) if *op == alu
        ) && ic.args == [Reg(r), Reg(r), Imm(1)]
    };

    if !counts(sub, AluOp::Sub, ry) || !counts(add, AluOp::Add, rz) {
        return None;
    }

    let branches_back = bgt.op()
        == Some(&Op::BranchSamePage {
            cond: Cond::Gt,
            link: false,
        })
        && bgt.args[0] == Slot(first);

    let distinct = ry != rz && ry != rw && rz != rw && ![ry, rz, rw].contains(&15);

    (branches_back && distinct)
        .then(|| InstrCall::new(Op::FillLoop, [Reg(ry), Reg(rz), Reg(rw)]))
}

#[cfg(test)]
mod test {
    use super::*;
    use dyntrans::PageId;

    fn mov(rd: u8, value: u64) -> InstrCall<Op> {
        let op = if value == 0 { Op::Clear } else { Op::MovImm };
        InstrCall::new(op, [Operand::Reg(rd), Operand::Imm(value), Operand::None])
    }

    fn alu(op: AluOp, s: bool, args: [Operand; 3]) -> InstrCall<Op> {
        InstrCall::new(
            Op::AluImm {
                op,
                cond: Cond::Al,
                s,
                carry: None,
            },
            args,
        )
    }

    fn fill_loop(first: SlotRef, [ry, rz, rw]: [u8; 3]) -> [InstrCall<Op>; 5] {
        use Operand::{Imm, Reg, Slot};
        [
            alu(AluOp::Cmp, true, [Reg(0), Reg(ry), Imm(0)]),
            InstrCall::new(
                Op::MemImm {
                    cond: Cond::Al,
                    load: false,
                    byte: true,
                    index: Index::Offset,
                },
                [Reg(rw), Reg(rz), Imm(0)],
            ),
            alu(AluOp::Sub, false, [Reg(ry), Reg(ry), Imm(1)]),
            alu(AluOp::Add, false, [Reg(rz), Reg(rz), Imm(1)]),
            InstrCall::new(
                Op::BranchSamePage {
                    cond: Cond::Gt,
                    link: false,
                },
                [Slot(first), Operand::None, Operand::None],
            ),
        ]
    }

    #[test]
    fn mov_2() {
        let first = SlotRef::new(PageId(0), 0);
        let fused = fuse_mov_2(&[mov(1, 5), mov(2, 0)], first).unwrap();
        assert_eq!(fused.op(), Some(&Op::Mov2));
        assert_eq!(fused.args, mov(1, 5).args);

        let add = alu(AluOp::Add, false, [Operand::Reg(1); 3]);
        assert_eq!(fuse_mov_2(&[mov(1, 5), add], first), None);
    }

    #[test]
    fn fill_loop_matches() {
        let first = SlotRef::new(PageId(2), 10);
        let fused = fuse_fill_loop(&fill_loop(first, [2, 0, 1]), first).unwrap();
        assert_eq!(fused.op(), Some(&Op::FillLoop));
        assert_eq!(
            fused.args,
            [Operand::Reg(2), Operand::Reg(0), Operand::Reg(1)]
        );
    }

    #[test]
    fn fill_loop_rejects_lookalikes() {
        let first = SlotRef::new(PageId(2), 10);

        // branching elsewhere
        let window = fill_loop(first, [2, 0, 1]);
        assert_eq!(fuse_fill_loop(&window, first.offset(1)), None);

        // storing the counter
        let window = fill_loop(first, [2, 0, 2]);
        assert_eq!(fuse_fill_loop(&window, first), None);

        // decrementing with flags
        let mut window = fill_loop(first, [2, 0, 1]);
        window[2] = alu(AluOp::Sub, true, window[2].args);
        assert_eq!(fuse_fill_loop(&window, first), None);
    }
}
