//! The interface a guest architecture implements to run on the engine.

use crate::{
    Geometry,
    exec::Ctx,
    ic::{InstrCall, Operand, SlotRef},
};
use easyerr::Error;
use std::fmt::Debug;

/// Largest number of bytes fetched for a single instruction.
pub const MAX_FETCH_LEN: usize = 16;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("illegal instruction {raw:#010x}")]
    Illegal { raw: u64 },
    #[error("unimplemented instruction {raw:#010x}")]
    Unimplemented { raw: u64 },
}

/// What a decoder knows about the instruction it is decoding.
pub struct DecodeCtx<'a, A: Arch> {
    /// Virtual address of the instruction.
    pub addr: u64,
    /// Slot the instruction call will be installed in.
    pub slot: SlotRef,
    pub regs: &'a A::Registers,
}

impl<A: Arch> DecodeCtx<'_, A> {
    /// Address of the instruction following this one.
    #[inline(always)]
    pub fn next_addr(&self) -> u64 {
        self.addr + (1 << A::GEOMETRY.align_shift)
    }

    /// A direct slot reference to `target` if it lies on the same page as
    /// the instruction being decoded and is properly aligned.
    pub fn same_page(&self, target: u64) -> Option<Operand> {
        let geometry = A::GEOMETRY;
        let aligned = target & ((1 << geometry.align_shift) - 1) == 0;
        let same = geometry.page_base(target) == geometry.page_base(self.addr);

        (aligned && same).then(|| {
            Operand::Slot(SlotRef::new(self.slot.page, geometry.slot_of(target)))
        })
    }
}

/// A peephole fusion rule.
pub struct Pattern<A: Arch> {
    pub name: &'static str,
    /// Number of consecutive slots the rule looks at.
    pub len: usize,
    /// Given the `len` slots ending at the newly translated one and a
    /// reference to the first of them, returns the fused call to install in
    /// the first slot.
    pub fuse: fn(&[InstrCall<A::Op>], SlotRef) -> Option<InstrCall<A::Op>>,
}

/// A guest instruction set architecture.
pub trait Arch: Sized + 'static {
    type Registers: Debug + Default + Clone + 'static;
    type Op: Debug + Clone + Copy + PartialEq + 'static;

    const NAME: &'static str;
    const GEOMETRY: Geometry;
    /// Number of bytes fetched and handed to [`Arch::decode`].
    const FETCH_LEN: usize = 4;

    /// Decodes a raw instruction into an instruction call.
    fn decode(
        ctx: &DecodeCtx<'_, Self>,
        raw: &[u8],
    ) -> Result<InstrCall<Self::Op>, DecodeError>;

    /// Executes an installed instruction call.
    fn execute(ctx: &mut Ctx<'_, Self>, op: Self::Op, ic: &InstrCall<Self::Op>);

    /// Fusion rules, tried in order.
    fn patterns() -> &'static [Pattern<Self>] {
        &[]
    }

    fn disassemble(raw: &[u8], addr: u64) -> String;

    fn dump_registers(regs: &Self::Registers) -> String {
        format!("{regs:#?}")
    }
}
