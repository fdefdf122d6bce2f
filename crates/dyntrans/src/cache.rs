//! The translation cache: an arena of physical pages indexed by page number.

use crate::{
    Geometry,
    ic::{InstrCall, SlotRef},
    page::{PageHeader, PageId},
};

/// Largest number of table bits honoured by [`TranslationCache::new`].
pub const MAX_TABLE_BITS: u32 = 20;

/// Result of resolving a physical address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub page: PageId,
    /// Whether the arena was reset to make room for the page. Every page id
    /// handed out before the reset is now dangling.
    pub reset: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub allocated: u64,
    pub resets: u64,
    pub invalidated: u64,
}

/// A bump-allocated arena of physical pages.
///
/// Pages are found through a table of chain heads indexed by the low bits of
/// the physical page number. The slots of page `i` are the `entries + 1`
/// instruction calls starting at `i * (entries + 1)` in a single flat vector,
/// and the last one is always the end of page sentinel. Pages are never freed
/// individually: when the arena is full, everything is dropped at once.
pub struct TranslationCache<O> {
    geometry: Geometry,
    capacity: usize,
    table: Box<[Option<PageId>]>,
    pages: Vec<PageHeader>,
    slots: Vec<InstrCall<O>>,
    pub stats: CacheStats,
}

impl<O: Copy> TranslationCache<O> {
    /// Creates a cache holding at most `capacity` pages, with a table of
    /// `1 << table_bits` chain heads. `table_bits` is capped at
    /// [`MAX_TABLE_BITS`].
    pub fn new(geometry: Geometry, capacity: usize, table_bits: u32) -> Self {
        let capacity = capacity.max(1);
        let table_bits = table_bits.min(MAX_TABLE_BITS);
        let stride = geometry.entries() + 1;

        Self {
            geometry,
            capacity,
            table: vec![None; 1 << table_bits].into_boxed_slice(),
            pages: Vec::with_capacity(capacity),
            slots: Vec::with_capacity(capacity * stride),
            stats: CacheStats::default(),
        }
    }

    #[inline(always)]
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    #[inline(always)]
    fn stride(&self) -> usize {
        self.geometry.entries() + 1
    }

    #[inline(always)]
    fn table_index(&self, paddr: u64) -> usize {
        (self.geometry.page_number(paddr) as usize) & (self.table.len() - 1)
    }

    /// Number of pages currently allocated.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Finds the page holding `paddr` without allocating.
    pub fn lookup(&self, paddr: u64) -> Option<PageId> {
        let base = self.geometry.page_base(paddr);
        let mut current = self.table[self.table_index(base)];
        while let Some(id) = current {
            let header = &self.pages[id.index()];
            if header.paddr == base {
                return Some(id);
            }

            current = header.next;
        }

        None
    }

    /// Finds the page holding `paddr`, allocating a fresh one on a miss.
    pub fn resolve(&mut self, paddr: u64) -> Resolved {
        if let Some(page) = self.lookup(paddr) {
            return Resolved { page, reset: false };
        }

        let mut reset = false;
        if self.pages.len() >= self.capacity {
            tracing::debug!(pages = self.pages.len(), "translation cache full, resetting");

            self.clear();
            self.stats.resets += 1;
            reset = true;
        }

        let base = self.geometry.page_base(paddr);
        let _span = tracing::trace_span!("allocating page", paddr = base).entered();

        let index = self.table_index(base);
        let id = PageId(self.pages.len() as u32);
        self.pages.push(PageHeader::new(base, self.table[index]));
        self.slots.extend(std::iter::repeat_n(
            InstrCall::STUB,
            self.geometry.entries(),
        ));
        self.slots.push(InstrCall::END_OF_PAGE);
        self.table[index] = Some(id);
        self.stats.allocated += 1;

        Resolved { page: id, reset }
    }

    /// Drops every page.
    pub fn clear(&mut self) {
        self.table.fill(None);
        self.pages.clear();
        self.slots.clear();
    }

    #[inline(always)]
    pub fn header(&self, page: PageId) -> &PageHeader {
        &self.pages[page.index()]
    }

    #[inline(always)]
    pub fn header_mut(&mut self, page: PageId) -> &mut PageHeader {
        &mut self.pages[page.index()]
    }

    /// All slots of a page, sentinel included.
    pub fn slots(&self, page: PageId) -> &[InstrCall<O>] {
        let start = page.index() * self.stride();
        &self.slots[start..start + self.stride()]
    }

    #[inline(always)]
    pub fn get(&self, slot: SlotRef) -> InstrCall<O> {
        self.slots[slot.page.index() * self.stride() + slot.slot as usize]
    }

    #[inline(always)]
    pub fn set(&mut self, slot: SlotRef, ic: InstrCall<O>) {
        debug_assert!((slot.slot as usize) < self.geometry.entries());

        let stride = self.stride();
        self.slots[slot.page.index() * stride + slot.slot as usize] = ic;
    }

    /// Resets every content slot of a page to the decoder stub and clears its
    /// combined flag.
    pub fn reset_page(&mut self, page: PageId) {
        let start = page.index() * self.stride();
        let entries = self.geometry.entries();
        self.slots[start..start + entries].fill(InstrCall::STUB);
        self.pages[page.index()].flags.set_combined(false);
    }

    /// Forgets the translations of the page holding `paddr`, if any. Returns
    /// whether such a page existed.
    pub fn invalidate(&mut self, paddr: u64) -> bool {
        match self.lookup(paddr) {
            Some(page) => {
                self.reset_page(page);
                self.stats.invalidated += 1;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ic::Handler;

    // 32 content slots of 4 bytes each
    const GEOMETRY: Geometry = Geometry::new(7, 2);

    #[test]
    fn fresh_page_is_all_stubs() {
        let mut cache = TranslationCache::<u8>::new(GEOMETRY, 8, 4);
        let resolved = cache.resolve(0x1000);

        assert!(!resolved.reset);
        assert_eq!(cache.header(resolved.page).paddr, 0x1000);
        assert!(!cache.header(resolved.page).flags.combined());

        let slots = cache.slots(resolved.page);
        assert_eq!(slots.len(), 33);
        assert!(slots[..32].iter().all(InstrCall::is_stub));
        assert_eq!(slots[32].handler, Handler::EndOfPage);
    }

    #[test]
    fn resolves_unaligned_addresses_to_the_same_page() {
        let mut cache = TranslationCache::<u8>::new(GEOMETRY, 8, 4);
        let a = cache.resolve(0x1000).page;
        let b = cache.resolve(0x107C).page;
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn colliding_pages_are_chained() {
        // a single chain head: every page collides
        let mut cache = TranslationCache::<u8>::new(GEOMETRY, 8, 0);
        let ids = [0x0, 0x80, 0x1000, 0x2080].map(|addr| cache.resolve(addr).page);
        for (addr, id) in [0x0, 0x80, 0x1000, 0x2080].into_iter().zip(ids) {
            assert_eq!(cache.lookup(addr), Some(id));
        }

        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn oversized_tables_are_capped() {
        let mut cache = TranslationCache::<u8>::new(GEOMETRY, 4, 64);
        let page = cache.resolve(0x1000).page;
        assert_eq!(cache.lookup(0x1000), Some(page));
        assert_eq!(cache.table.len(), 1 << MAX_TABLE_BITS);
    }

    #[test]
    fn full_arena_resets() {
        let mut cache = TranslationCache::<u8>::new(GEOMETRY, 4, 4);
        for i in 0..4 {
            assert!(!cache.resolve(i * 0x80).reset);
        }

        let resolved = cache.resolve(0x8000);
        assert!(resolved.reset);
        assert_eq!(resolved.page, PageId(0));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(0x0), None);
        assert_eq!(cache.stats.resets, 1);
    }

    #[test]
    fn invalidate_resets_slots_and_flag() {
        let mut cache = TranslationCache::<u8>::new(GEOMETRY, 4, 4);
        let page = cache.resolve(0x100).page;
        cache.set(SlotRef::new(page, 3), InstrCall::new(7, Default::default()));
        cache.header_mut(page).flags.set_combined(true);

        assert!(cache.invalidate(0x104));
        assert!(cache.get(SlotRef::new(page, 3)).is_stub());
        assert!(!cache.header(page).flags.combined());
        assert!(!cache.invalidate(0x4000));
    }
}
