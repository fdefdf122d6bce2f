//! The execution loop, the decoder stub and the context handed to
//! instruction handlers.

use crate::{
    Arch, Cpu, ExecError,
    arch::{DecodeCtx, MAX_FETCH_LEN},
    combine,
    ic::{Handler, InstrCall, SlotRef},
    system::{Access, CacheKind, Diagnostic, Direction, System},
    tlb::TlbMiss,
};
use seq_macro::seq;

/// Largest number of bytes moved by a single [`Ctx::load`] or [`Ctx::store`].
pub const MAX_ACCESS_LEN: usize = 16;

impl<A: Arch> Cpu<A> {
    /// Runs a batch of instructions and returns how many were executed.
    ///
    /// In single-step or trace mode exactly one instruction call is
    /// dispatched. Otherwise calls are dispatched in unrolled passes until
    /// translated execution stops, a breakpoint is hit or the instruction
    /// budget is exhausted.
    ///
    /// Any fault halts the CPU. The PC is left at the faulting instruction,
    /// or at the target of a jump that could not be resolved.
    pub fn run(&mut self, sys: &mut dyn System) -> Result<u64, ExecError> {
        if !self.running {
            return Ok(0);
        }

        let _span = tracing::trace_span!("run", cpu = self.id(), pc = self.pc).entered();
        if let Err(error) = self.pc_to_pointers(sys) {
            self.halt();
            return Err(error);
        }

        self.translated = true;
        self.adjust = 0;
        self.stats.batches += 1;

        let mut dispatched = 0u64;
        if self.debug.single_step || self.debug.trace {
            self.step(sys);
            dispatched = 1;
        } else {
            let budget = self.config.max_instructions;
            loop {
                seq! {
                    N in 0..120 {
                        dispatched += u64::from(self.dispatch(sys));
                    }
                }

                if !self.translated
                    || self.debug.single_step
                    || dispatched.saturating_add_signed(self.adjust) >= budget
                {
                    break;
                }
            }
        }

        self.translated = false;
        if !matches!(self.fault, Some(ExecError::Translation { .. })) {
            self.sync_pc();
        }

        let executed = dispatched.saturating_add_signed(self.adjust);
        self.stats.instructions += executed;

        match self.fault.take() {
            Some(error) => Err(error),
            None => Ok(executed),
        }
    }

    fn step(&mut self, sys: &mut dyn System) {
        let page = self.cursor.page;
        if combine::revert(&mut self.cache, page) {
            if !self.debug.quiet {
                tracing::info!(cpu = self.id(), "single-stepping through a combined page, reverting it");
            }

            self.stats.reverted += 1;
        }

        if self.debug.trace {
            self.trace(sys);
        }

        self.dispatch(sys);
    }

    fn trace(&mut self, sys: &mut dyn System) {
        let mut buf = [0; MAX_FETCH_LEN];
        let raw = &mut buf[..A::FETCH_LEN];
        let disassembly = if self.fetch(sys, self.pc, raw) {
            A::disassemble(raw, self.pc)
        } else {
            String::from("(unreadable)")
        };

        sys.on_trace(self.id(), self.pc, &disassembly);
    }

    /// Recomputes the PC from the dispatch cursor.
    fn sync_pc(&mut self) {
        let geometry = A::GEOMETRY;
        let base = geometry.page_base(self.pc);
        let slot = self.cursor.slot;

        self.pc = if (slot as usize) < geometry.entries() {
            geometry.slot_addr(base, slot)
        } else {
            // sitting on the end of page sentinel
            base + geometry.page_size()
        };
    }

    #[inline(always)]
    fn dispatch(&mut self, sys: &mut dyn System) -> bool {
        if !self.translated {
            return false;
        }

        let slot = self.cursor;
        let ic = self.cache.get(slot);
        self.cursor.slot += 1;
        self.invoke(sys, slot, ic);

        true
    }

    #[inline]
    fn invoke(&mut self, sys: &mut dyn System, slot: SlotRef, ic: InstrCall<A::Op>) {
        match ic.handler {
            Handler::Op(op) => A::execute(&mut Ctx { cpu: self, sys, slot }, op, &ic),
            Handler::Stub => self.translate(sys, slot),
            Handler::EndOfPage => self.end_of_page(sys),
            Handler::Nothing => self.stop(slot),
            Handler::Abort => self.abort(slot),
        }
    }

    /// Stops translated execution, leaving the cursor on `slot` and not
    /// counting it as executed.
    fn stop(&mut self, slot: SlotRef) {
        self.translated = false;
        self.cursor = slot;
        self.adjust -= 1;
    }

    fn abort(&mut self, slot: SlotRef) {
        self.stop(slot);
        self.running = false;

        let geometry = A::GEOMETRY;
        let vaddr = geometry.slot_addr(geometry.page_base(self.pc), slot.slot);
        self.fault = Some(ExecError::Fetch { vaddr });
    }

    fn end_of_page(&mut self, sys: &mut dyn System) {
        let geometry = A::GEOMETRY;
        self.adjust -= 1;
        self.pc = geometry.page_base(self.pc) + geometry.page_size();

        if let Err(error) = self.pc_to_pointers(sys) {
            self.halt();
            self.fault = Some(error);
        }
    }

    /// Reads an instruction, preferring the host mapping of its page.
    fn fetch(&mut self, sys: &mut dyn System, vaddr: u64, buf: &mut [u8]) -> bool {
        let geometry = A::GEOMETRY;
        let offset = geometry.page_offset(vaddr) as usize;

        if offset + buf.len() <= geometry.page_size() as usize
            && let Some(index) = self.tlb.find(geometry.page_number(vaddr))
            && let Some(host) = self.tlb.entry(index).host_read
            && let Some(src) = sys
                .host_memory()
                .get(host.0 + offset..host.0 + offset + buf.len())
        {
            buf.copy_from_slice(src);
            return true;
        }

        sys.rw(self.id(), vaddr, buf, Direction::Read, CacheKind::Instruction)
    }

    /// The decoder stub: translates the instruction of `slot`, installs it and
    /// executes it.
    #[cold]
    fn translate(&mut self, sys: &mut dyn System, slot: SlotRef) {
        let geometry = A::GEOMETRY;
        self.pc = geometry.slot_addr(geometry.page_base(self.pc), slot.slot);

        // a breakpoint that was just hit is let through once
        let retrying = std::mem::take(&mut self.debug.step_breakpoint);
        if !retrying && self.debug.breakpoints.contains(&self.pc) {
            if !self.debug.quiet {
                tracing::info!(cpu = self.id(), "breakpoint hit at {:#010x}", self.pc);
            }

            self.debug.step_breakpoint = true;
            self.debug.single_step = true;
            self.stop(slot);
            return;
        }

        let mut buf = [0; MAX_FETCH_LEN];
        let raw = &mut buf[..A::FETCH_LEN];
        if !self.fetch(sys, self.pc, raw) {
            tracing::warn!(cpu = self.id(), "failed to fetch instruction at {:#010x}", self.pc);

            self.cache.set(slot, InstrCall::ABORT);
            self.abort(slot);
            return;
        }

        let ctx = DecodeCtx {
            addr: self.pc,
            slot,
            regs: &self.regs,
        };

        let ic = match A::decode(&ctx, raw) {
            Ok(ic) => ic,
            Err(error) => {
                let disassembly = A::disassemble(raw, self.pc);
                let registers = A::dump_registers(&self.regs);
                sys.diagnostic(&Diagnostic {
                    cpu: self.id(),
                    pc: self.pc,
                    error: &error,
                    disassembly: &disassembly,
                    registers: &registers,
                });

                self.running = false;
                self.dead = true;
                self.cache.set(slot, InstrCall::NOTHING);
                self.stop(slot);
                return;
            }
        };

        self.stats.decoded += 1;

        // the retried instruction is executed but not installed, so the
        // breakpoint fires again next time
        if retrying {
            self.invoke(sys, slot, ic);
            return;
        }

        self.cache.set(slot, ic);
        if self.config.combine
            && !self.debug.single_step
            && !self.debug.trace
            && combine::try_combine::<A>(&mut self.cache, A::patterns(), slot).is_some()
        {
            self.stats.combined += 1;
        }

        let ic = self.cache.get(slot);
        self.invoke(sys, slot, ic);
    }

    /// Looks up the TLB entry for a data access, keeping host write access
    /// away from pages holding translated code.
    fn data_entry(
        &mut self,
        sys: &mut dyn System,
        vaddr: u64,
        access: Access,
    ) -> Result<usize, TlbMiss> {
        let lookup = self.tlb.lookup_or_insert(sys, self.id(), vaddr, access)?;
        if lookup.filled {
            let entry = self.tlb.entry(lookup.index);
            if entry.host_write.is_some() && self.holds_code(entry.ppn) {
                self.tlb.entry_mut(lookup.index).host_write = None;
            }
        }

        Ok(lookup.index)
    }
}

/// What an instruction handler gets to work with.
pub struct Ctx<'a, A: Arch> {
    pub cpu: &'a mut Cpu<A>,
    pub sys: &'a mut dyn System,
    slot: SlotRef,
}

impl<A: Arch> Ctx<'_, A> {
    #[inline(always)]
    pub fn regs(&mut self) -> &mut A::Registers {
        &mut self.cpu.regs
    }

    /// The slot being executed.
    #[inline(always)]
    pub fn slot(&self) -> SlotRef {
        self.slot
    }

    /// Virtual address of the instruction being executed.
    #[inline(always)]
    pub fn instr_addr(&self) -> u64 {
        let geometry = A::GEOMETRY;
        geometry.slot_addr(geometry.page_base(self.cpu.pc), self.slot.slot)
    }

    /// Virtual address of the instruction following the one being executed.
    #[inline(always)]
    pub fn next_addr(&self) -> u64 {
        self.instr_addr() + (1 << A::GEOMETRY.align_shift)
    }

    /// Continues at a slot of the current page.
    #[inline(always)]
    pub fn jump_same_page(&mut self, target: SlotRef) {
        debug_assert_eq!(target.page, self.slot.page);
        self.cpu.cursor = target;
    }

    /// Continues at an arbitrary virtual address.
    pub fn jump(&mut self, vaddr: u64) {
        self.cpu.pc = vaddr;
        if let Err(error) = self.cpu.pc_to_pointers(self.sys) {
            self.cpu.halt();
            self.cpu.fault = Some(error);
        }
    }

    /// The instruction call `offset` slots away from the one being executed.
    #[inline(always)]
    pub fn peek(&self, offset: i32) -> InstrCall<A::Op> {
        self.cpu.cache.get(self.slot.offset(offset))
    }

    /// Skips the next `count` slots.
    #[inline(always)]
    pub fn skip(&mut self, count: u32) {
        self.cpu.cursor.slot += count;
        debug_assert!(self.cpu.cursor.slot as usize <= A::GEOMETRY.entries());
    }

    /// Accounts for `extra` guest instructions on top of the one being
    /// executed. Negative values are allowed.
    #[inline(always)]
    pub fn count(&mut self, extra: i64) {
        self.cpu.adjust += extra;
    }

    /// Stops the CPU after this instruction.
    pub fn halt(&mut self) {
        self.cpu.halt();
    }

    /// Aborts the instruction being executed: it is not counted, the PC is
    /// left pointing at it and the CPU halts.
    pub fn fault(&mut self, error: ExecError) {
        self.cpu.translated = false;
        self.cpu.cursor = self.slot;
        self.cpu.adjust -= 1;
        self.cpu.running = false;
        self.cpu.fault = Some(error);
    }

    fn fits(vaddr: u64, len: usize) -> bool {
        A::GEOMETRY.page_offset(vaddr) as usize + len <= A::GEOMETRY.page_size() as usize
    }

    /// Reads `buf.len()` bytes at `vaddr`.
    pub fn load(&mut self, vaddr: u64, buf: &mut [u8]) -> bool {
        if Self::fits(vaddr, buf.len()) {
            let Ok(index) = self.cpu.data_entry(self.sys, vaddr, Access::Read) else {
                return false;
            };

            let offset = A::GEOMETRY.page_offset(vaddr) as usize;
            if let Some(host) = self.cpu.tlb.entry(index).host_read
                && let Some(src) = self
                    .sys
                    .host_memory()
                    .get(host.0 + offset..host.0 + offset + buf.len())
            {
                buf.copy_from_slice(src);
                return true;
            }
        }

        self.sys
            .rw(self.cpu.id(), vaddr, buf, Direction::Read, CacheKind::Data)
    }

    /// Writes `data` at `vaddr`. Writes hitting translated code invalidate
    /// it.
    /// Accesses longer than [`MAX_ACCESS_LEN`] fail.
    pub fn store(&mut self, vaddr: u64, data: &[u8]) -> bool {
        if data.len() > MAX_ACCESS_LEN {
            return false;
        }

        if Self::fits(vaddr, data.len()) {
            let Ok(index) = self.cpu.data_entry(self.sys, vaddr, Access::Write) else {
                return false;
            };

            let offset = A::GEOMETRY.page_offset(vaddr) as usize;
            if let Some(host) = self.cpu.tlb.entry(index).host_write
                && let Some(dst) = self
                    .sys
                    .host_memory_mut()
                    .get_mut(host.0 + offset..host.0 + offset + data.len())
            {
                dst.copy_from_slice(data);
                return true;
            }
        }

        let mut buf = [0; MAX_ACCESS_LEN];
        let buf = &mut buf[..data.len()];
        buf.copy_from_slice(data);

        let id = self.cpu.id();
        if !self.sys.rw(id, vaddr, buf, Direction::Write, CacheKind::Data) {
            return false;
        }

        self.written(vaddr);
        if !data.is_empty() && !Self::fits(vaddr, data.len()) {
            self.written(vaddr + data.len() as u64 - 1);
        }

        true
    }

    /// Invalidates the translations of the physical page behind `vaddr`, if
    /// it has any.
    fn written(&mut self, vaddr: u64) {
        let Ok(index) = self.cpu.data_entry(self.sys, vaddr, Access::Write) else {
            return;
        };

        let ppn = self.cpu.tlb.entry(index).ppn;
        let paddr = ppn << A::GEOMETRY.page_shift;
        let own = self.cpu.cache.lookup(paddr).is_some();
        if own {
            tracing::debug!(cpu = self.cpu.id(), paddr, "write to translated code");
            self.cpu.invalidate_paddr(paddr);
        }

        let sharing = &mut self.cpu.sharing;
        if sharing.enabled && (own || sharing.foreign.contains(&ppn)) {
            sharing.written.push(ppn);
        }
    }

    /// Host memory backing `len` bytes at `vaddr`, if they lie on a single
    /// host-writable page that holds no translated code.
    pub fn host_slice_mut(&mut self, vaddr: u64, len: usize) -> Option<&mut [u8]> {
        if !Self::fits(vaddr, len) {
            return None;
        }

        let index = self.cpu.data_entry(self.sys, vaddr, Access::Write).ok()?;
        let host = self.cpu.tlb.entry(index).host_write?;
        let offset = A::GEOMETRY.page_offset(vaddr) as usize;

        self.sys
            .host_memory_mut()
            .get_mut(host.0 + offset..host.0 + offset + len)
    }
}
