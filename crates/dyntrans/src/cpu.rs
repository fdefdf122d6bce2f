//! Per-CPU state: registers, run flags, caches and debugger state.

use crate::{
    Arch,
    cache::TranslationCache,
    ic::SlotRef,
    page::PageId,
    system::{Access, System},
    tlb::Tlb,
};
use easyerr::Error;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// Tunables of a CPU.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Instruction budget of a single [`Cpu::run`] call in bulk mode.
    pub max_instructions: u64,
    /// Capacity of the translation cache, in pages.
    pub cache_pages: usize,
    /// log2 of the number of chain heads of the translation cache table, at
    /// most [`MAX_TABLE_BITS`](crate::cache::MAX_TABLE_BITS).
    pub table_bits: u32,
    /// Number of TLB entries.
    pub tlb_entries: usize,
    /// Whether to use the direct-mapped TLB shortcut.
    pub shortcut: bool,
    /// Whether to fuse instruction sequences.
    pub combine: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_instructions: 16384,
            cache_pages: 512,
            table_bits: 16,
            tlb_entries: 64,
            shortcut: true,
            combine: true,
        }
    }
}

/// Debugger state of a CPU.
#[derive(Debug, Clone, Default)]
pub struct DebugState {
    /// Execute a single instruction per [`Cpu::run`] call.
    pub single_step: bool,
    /// Single-step and report the disassembly of every instruction.
    pub trace: bool,
    /// Don't log breakpoint hits or page reverts.
    pub quiet: bool,
    pub(crate) breakpoints: FxHashSet<u64>,
    pub(crate) step_breakpoint: bool,
}

impl DebugState {
    /// Whether the CPU is stopped at a breakpoint it has not executed yet.
    pub fn at_breakpoint(&self) -> bool {
        self.step_breakpoint
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = u64> + '_ {
        self.breakpoints.iter().copied()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub instructions: u64,
    pub batches: u64,
    pub decoded: u64,
    pub combined: u64,
    pub reverted: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("instruction address {vaddr:#x} has no mapping")]
    Translation { vaddr: u64 },
    #[error("failed to fetch instruction at {vaddr:#x}")]
    Fetch { vaddr: u64 },
    #[error("data access to {vaddr:#x} failed")]
    DataAccess { vaddr: u64 },
}

/// What a CPU of a multi-CPU [`Machine`](crate::Machine) knows and tells
/// about code translated by its peers.
#[derive(Debug, Default)]
pub(crate) struct Sharing {
    pub enabled: bool,
    /// Physical page numbers holding code translated by other CPUs.
    pub foreign: FxHashSet<u64>,
    /// Physical pages this CPU started translating since the machine last
    /// looked.
    pub translated: Vec<u64>,
    /// Physical pages holding code this CPU wrote to since the machine last
    /// looked.
    pub written: Vec<u64>,
}

/// An emulated CPU of architecture `A`.
pub struct Cpu<A: Arch> {
    id: usize,
    pub pc: u64,
    pub regs: A::Registers,
    pub debug: DebugState,
    pub stats: Stats,
    pub(crate) config: Config,
    pub(crate) running: bool,
    pub(crate) dead: bool,
    /// Whether the current batch may keep dispatching.
    pub(crate) translated: bool,
    /// Next slot to dispatch.
    pub(crate) cursor: SlotRef,
    /// Correction to the number of dispatches of the current batch.
    pub(crate) adjust: i64,
    pub(crate) fault: Option<ExecError>,
    pub(crate) cache: TranslationCache<A::Op>,
    pub(crate) tlb: Tlb,
    pub(crate) sharing: Sharing,
}

impl<A: Arch> Cpu<A> {
    pub fn new(id: usize, config: Config) -> Self {
        let geometry = A::GEOMETRY;
        tracing::debug!(arch = A::NAME, id, ?config, "creating cpu");

        Self {
            id,
            pc: 0,
            regs: A::Registers::default(),
            debug: DebugState::default(),
            stats: Stats::default(),
            running: true,
            dead: false,
            translated: false,
            cursor: SlotRef::new(PageId(0), 0),
            adjust: 0,
            fault: None,
            cache: TranslationCache::new(geometry, config.cache_pages, config.table_bits),
            tlb: Tlb::new(geometry, config.tlb_entries, config.shortcut),
            sharing: Sharing::default(),
            config,
        }
    }

    #[inline(always)]
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Whether the CPU met an instruction it could not translate.
    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub fn halt(&mut self) {
        self.running = false;
        self.translated = false;
    }

    /// Resumes a halted CPU. Dead CPUs stay dead.
    pub fn resume(&mut self) {
        self.running = !self.dead;
    }

    pub fn cache(&self) -> &TranslationCache<A::Op> {
        &self.cache
    }

    pub fn tlb(&self) -> &Tlb {
        &self.tlb
    }

    pub fn tlb_mut(&mut self) -> &mut Tlb {
        &mut self.tlb
    }

    /// The slot that will be dispatched next.
    pub fn cursor(&self) -> SlotRef {
        self.cursor
    }

    pub fn set_breakpoint(&mut self, addr: u64) {
        if self.debug.breakpoints.insert(addr) {
            self.flush_translations();
        }
    }

    pub fn clear_breakpoint(&mut self, addr: u64) {
        if self.debug.breakpoints.remove(&addr) {
            self.flush_translations();
        }
    }

    /// Whether the physical page `ppn` holds code translated by this CPU or,
    /// within a machine, by any other.
    pub(crate) fn holds_code(&self, ppn: u64) -> bool {
        self.cache.lookup(ppn << A::GEOMETRY.page_shift).is_some()
            || self.sharing.foreign.contains(&ppn)
    }

    /// Points the dispatch cursor at the slot matching the PC, resolving
    /// the PC's page through the TLB and the translation cache.
    pub fn pc_to_pointers(&mut self, sys: &mut dyn System) -> Result<(), ExecError> {
        let geometry = A::GEOMETRY;
        let vaddr = self.pc;
        let index = self
            .tlb
            .lookup_or_insert(sys, self.id, vaddr, Access::Execute)
            .map_err(|_| ExecError::Translation { vaddr })?
            .index;

        let page = match self.tlb.entry(index).code {
            Some(page) => page,
            None => {
                let ppn = self.tlb.entry(index).ppn;
                let paddr = ppn << geometry.page_shift;
                if self.sharing.enabled && self.cache.lookup(paddr).is_none() {
                    self.sharing.translated.push(ppn);
                }

                let resolved = self.cache.resolve(paddr);
                if resolved.reset {
                    self.tlb.invalidate_code_translation();
                }

                // stores to translated code must take the slow path
                self.tlb.protect_code(ppn);
                self.tlb.entry_mut(index).code = Some(resolved.page);
                resolved.page
            }
        };

        self.cursor = SlotRef::new(page, geometry.slot_of(vaddr));
        Ok(())
    }
}
