//! A dynamic-translation execution engine for retargetable emulators.
//!
//! Guest code is translated lazily, one instruction at a time, into
//! [`InstrCall`]s stored in per physical page arrays. Every slot starts out as
//! a decoder stub which translates its instruction the first time it is
//! dispatched and then executes it. A software [`Tlb`](tlb::Tlb) caches
//! virtual to physical to host mappings, and [`Cpu::run`] dispatches
//! translated calls in bounded batches.
//!
//! Architectures plug into the engine through the [`Arch`] trait, and the
//! machine around the CPU (memory, MMU, devices, debugger) through
//! [`System`].

pub mod arch;
pub mod cache;
pub mod combine;
pub mod cpu;
pub mod exec;
pub mod ic;
pub mod machine;
pub mod page;
pub mod ram;
pub mod system;
pub mod tlb;

mod invalidate;

pub use arch::{Arch, DecodeCtx, DecodeError, Pattern};
pub use cpu::{Config, Cpu, DebugState, ExecError, Stats};
pub use exec::Ctx;
pub use ic::{Handler, InstrCall, Operand, SlotRef};
pub use machine::Machine;
pub use page::PageId;
pub use ram::Ram;
pub use system::System;

/// Page and instruction granularity of a guest architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// log2 of the page size in bytes.
    pub page_shift: u32,
    /// log2 of the instruction alignment in bytes.
    pub align_shift: u32,
}

impl Geometry {
    pub const fn new(page_shift: u32, align_shift: u32) -> Self {
        assert!(align_shift < page_shift);
        Self {
            page_shift,
            align_shift,
        }
    }

    #[inline(always)]
    pub const fn page_size(self) -> u64 {
        1 << self.page_shift
    }

    /// Number of content slots per page.
    #[inline(always)]
    pub const fn entries(self) -> usize {
        1 << (self.page_shift - self.align_shift)
    }

    #[inline(always)]
    pub const fn page_base(self, addr: u64) -> u64 {
        addr & !(self.page_size() - 1)
    }

    #[inline(always)]
    pub const fn page_offset(self, addr: u64) -> u64 {
        addr & (self.page_size() - 1)
    }

    #[inline(always)]
    pub const fn page_number(self, addr: u64) -> u64 {
        addr >> self.page_shift
    }

    /// Slot of the instruction at `addr` within its page.
    #[inline(always)]
    pub const fn slot_of(self, addr: u64) -> u32 {
        (self.page_offset(addr) >> self.align_shift) as u32
    }

    /// Address of slot `slot` of the page starting at `base`.
    #[inline(always)]
    pub const fn slot_addr(self, base: u64, slot: u32) -> u64 {
        base + ((slot as u64) << self.align_shift)
    }
}
