//! The interface between the engine and the machine it runs in.

use crate::arch::DecodeError;
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Direction {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CacheKind {
    /// Instruction fetches. These must not have side effects.
    Instruction,
    Data,
}

/// Kind of access an address translation is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Access {
    Execute,
    Read,
    Write,
}

/// A virtual to physical translation produced by the MMU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    pub paddr: u64,
    /// Whether the guest may write through this mapping.
    pub writable: bool,
}

/// Offset into [`System::host_memory`] of the first byte of a guest physical
/// page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostPage(pub usize);

/// Report emitted when a CPU meets an instruction it cannot translate.
#[derive(Debug)]
pub struct Diagnostic<'a> {
    pub cpu: usize,
    pub pc: u64,
    pub error: &'a DecodeError,
    pub disassembly: &'a str,
    pub registers: &'a str,
}

/// Memory, MMU and debugger collaborators of the engine.
pub trait System {
    /// Reads or writes `buf.len()` bytes at virtual address `vaddr` on behalf
    /// of CPU `cpu`. Returns whether the access succeeded.
    fn rw(
        &mut self,
        cpu: usize,
        vaddr: u64,
        buf: &mut [u8],
        direction: Direction,
        kind: CacheKind,
    ) -> bool;

    /// Translates a virtual address. `None` means there is no mapping.
    fn translate(&mut self, cpu: usize, vaddr: u64, access: Access) -> Option<Translation>;

    /// Where the physical page starting at `paddr` lives in host memory, or
    /// `None` if it is not plain memory (devices, holes).
    fn host_page(&self, paddr: u64) -> Option<HostPage>;

    fn host_memory(&self) -> &[u8];

    fn host_memory_mut(&mut self) -> &mut [u8];

    /// Receives the disassembly of an instruction about to be traced.
    fn on_trace(&mut self, cpu: usize, pc: u64, disassembly: &str) {
        tracing::info!(cpu, "{pc:#010x}: {disassembly}");
    }

    /// Receives the report of an untranslatable instruction.
    fn diagnostic(&mut self, diagnostic: &Diagnostic<'_>) {
        tracing::error!(
            cpu = diagnostic.cpu,
            "{} at {:#010x}: {}\n{}",
            diagnostic.error,
            diagnostic.pc,
            diagnostic.disassembly,
            diagnostic.registers
        );
    }
}
