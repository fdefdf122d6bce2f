//! Instruction calls: the unit of installed, translated behaviour.

use crate::page::PageId;

/// A reference to a slot of a physical page in the translation cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotRef {
    pub page: PageId,
    pub slot: u32,
}

impl SlotRef {
    #[inline(always)]
    pub fn new(page: PageId, slot: u32) -> Self {
        Self { page, slot }
    }

    /// The slot `offset` positions away on the same page.
    #[inline(always)]
    pub fn offset(self, offset: i32) -> Self {
        Self {
            page: self.page,
            slot: self.slot.wrapping_add_signed(offset),
        }
    }
}

/// An operand of an instruction call, resolved at translation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Operand {
    #[default]
    None,
    /// A guest register index.
    Reg(u8),
    /// An immediate value.
    Imm(u64),
    /// A branch target on the same physical page.
    Slot(SlotRef),
}

impl Operand {
    #[inline(always)]
    pub fn reg(self) -> usize {
        match self {
            Self::Reg(r) => r as usize,
            _ => unreachable!("operand {self:?} is not a register"),
        }
    }

    #[inline(always)]
    pub fn imm(self) -> u64 {
        match self {
            Self::Imm(i) => i,
            _ => unreachable!("operand {self:?} is not an immediate"),
        }
    }

    #[inline(always)]
    pub fn slot(self) -> SlotRef {
        match self {
            Self::Slot(s) => s,
            _ => unreachable!("operand {self:?} is not a slot reference"),
        }
    }
}

/// What an instruction call does when dispatched.
///
/// The engine owns the first four variants; everything an architecture
/// decodes (including fused sequences) lives in `Op`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler<O> {
    /// Not yet translated. Decodes the instruction on first dispatch.
    Stub,
    /// Sentinel past the last content slot of every page.
    EndOfPage,
    /// Stops translated execution. Installed for illegal instructions.
    Nothing,
    /// Stops translated execution and halts. Installed when fetching fails.
    Abort,
    /// A decoded instruction.
    Op(O),
}

/// An installed handler together with its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrCall<O> {
    pub handler: Handler<O>,
    pub args: [Operand; 3],
}

impl<O> InstrCall<O> {
    pub const STUB: Self = Self::bare(Handler::Stub);
    pub const END_OF_PAGE: Self = Self::bare(Handler::EndOfPage);
    pub const NOTHING: Self = Self::bare(Handler::Nothing);
    pub const ABORT: Self = Self::bare(Handler::Abort);

    const fn bare(handler: Handler<O>) -> Self {
        Self {
            handler,
            args: [Operand::None; 3],
        }
    }

    pub fn new(op: O, args: [Operand; 3]) -> Self {
        Self {
            handler: Handler::Op(op),
            args,
        }
    }

    #[inline(always)]
    pub fn is_stub(&self) -> bool {
        matches!(self.handler, Handler::Stub)
    }

    /// The decoded opcode, if any.
    #[inline(always)]
    pub fn op(&self) -> Option<&O> {
        match &self.handler {
            Handler::Op(op) => Some(op),
            _ => None,
        }
    }
}
