use crate::{Arch, Cpu};

impl<A: Arch> Cpu<A> {
    /// Forgets everything derived from the physical page holding `paddr`:
    /// TLB entries mapping it and the translations of its instructions.
    ///
    /// Must be called whenever the page is written by something other than
    /// this CPU's stores (DMA, other CPUs, the host) or is remapped.
    pub fn invalidate_paddr(&mut self, paddr: u64) {
        let dropped = self.tlb.invalidate_paddr(paddr);
        let translated = self.cache.invalidate(paddr);
        tracing::trace!(cpu = self.id(), paddr, dropped, translated, "invalidated physical page");
    }

    /// Forgets the TLB mapping of the virtual page holding `vaddr`.
    pub fn invalidate_vaddr(&mut self, vaddr: u64) {
        self.tlb.invalidate_vaddr(vaddr);
    }

    /// Drops the translation cache page cached in every TLB entry, keeping the
    /// mappings themselves.
    pub fn invalidate_code_translation(&mut self) {
        self.tlb.invalidate_code_translation();
    }

    /// Drops every translation.
    pub fn flush_translations(&mut self) {
        self.cache.clear();
        self.tlb.invalidate_code_translation();
    }

    /// Drops every TLB mapping.
    pub fn flush_tlb(&mut self) {
        self.tlb.invalidate_all();
    }
}
