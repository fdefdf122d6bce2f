use bitos::bitos;

/// Index of a physical page in the translation cache arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u32);

impl PageId {
    #[inline(always)]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[bitos(8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageFlags {
    /// At least one slot of the page holds a fused instruction call.
    #[bits(0)]
    pub combined: bool,
}

/// Metadata of a physical page. Its slots live in the cache's slot arena.
#[derive(Debug, Clone, Copy)]
pub struct PageHeader {
    /// Page-aligned physical base address.
    pub paddr: u64,
    pub flags: PageFlags,
    /// Next page in the same table chain.
    pub next: Option<PageId>,
}

impl PageHeader {
    pub fn new(paddr: u64, next: Option<PageId>) -> Self {
        Self {
            paddr,
            flags: PageFlags::default(),
            next,
        }
    }
}
