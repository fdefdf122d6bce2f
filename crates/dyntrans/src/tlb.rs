//! Software TLB: a small fully associative cache of virtual to physical to
//! host mappings, with an optional direct-mapped shortcut in front of it.

use crate::{
    Geometry,
    page::PageId,
    system::{Access, HostPage, System},
};
use easyerr::Error;

/// Number of entries of the direct-mapped shortcut.
pub const SHORTCUT_ENTRIES: usize = 1024;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TlbMiss {
    #[error("no mapping for address {vaddr:#x}")]
    Unmapped { vaddr: u64 },
    #[error("address {vaddr:#x} is not writable")]
    ReadOnly { vaddr: u64 },
}

/// How an update changes the write permission of an existing mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFlag {
    Keep,
    MakeWritable,
    ReadOnly,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TlbEntry {
    pub valid: bool,
    /// Virtual page number.
    pub vpn: u64,
    /// Physical page number.
    pub ppn: u64,
    pub writable: bool,
    pub host_read: Option<HostPage>,
    /// Present only while the page is writable, host backed and holds no
    /// translated code.
    pub host_write: Option<HostPage>,
    pub timestamp: u64,
    /// Translation cache page backing this mapping, once resolved.
    pub code: Option<PageId>,
}

#[derive(Debug, Clone, Copy)]
struct ShortcutEntry {
    vpn: u64,
    index: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TlbStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Result of [`Tlb::lookup_or_insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup {
    pub index: usize,
    /// Whether the entry was (re)filled from the MMU.
    pub filled: bool,
}

pub struct Tlb {
    geometry: Geometry,
    entries: Box<[TlbEntry]>,
    clock: u64,
    shortcut: Option<Box<[Option<ShortcutEntry>]>>,
    pub stats: TlbStats,
}

impl Tlb {
    pub fn new(geometry: Geometry, size: usize, shortcut: bool) -> Self {
        Self {
            geometry,
            entries: vec![TlbEntry::default(); size.max(1)].into_boxed_slice(),
            clock: 0,
            shortcut: shortcut.then(|| vec![None; SHORTCUT_ENTRIES].into_boxed_slice()),
            stats: TlbStats::default(),
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline(always)]
    pub fn entries(&self) -> &[TlbEntry] {
        &self.entries
    }

    #[inline(always)]
    pub fn entry(&self, index: usize) -> &TlbEntry {
        &self.entries[index]
    }

    #[inline(always)]
    pub(crate) fn entry_mut(&mut self, index: usize) -> &mut TlbEntry {
        &mut self.entries[index]
    }

    #[inline(always)]
    fn shortcut_index(vpn: u64) -> usize {
        (vpn as usize) & (SHORTCUT_ENTRIES - 1)
    }

    fn forget_shortcut(&mut self, vpn: u64) {
        if let Some(shortcut) = &mut self.shortcut {
            let slot = &mut shortcut[Self::shortcut_index(vpn)];
            if slot.is_some_and(|s| s.vpn == vpn) {
                *slot = None;
            }
        }
    }

    /// Finds the live entry mapping virtual page `vpn`.
    #[inline]
    pub fn find(&self, vpn: u64) -> Option<usize> {
        if let Some(shortcut) = &self.shortcut
            && let Some(s) = shortcut[Self::shortcut_index(vpn)]
        {
            let entry = &self.entries[s.index as usize];
            if s.vpn == vpn && entry.valid && entry.vpn == vpn {
                return Some(s.index as usize);
            }
        }

        self.entries.iter().position(|e| e.valid && e.vpn == vpn)
    }

    #[inline(always)]
    fn touch(&mut self, index: usize) {
        self.clock += 1;
        self.entries[index].timestamp = self.clock;
    }

    /// Index of the entry to evict: the one with the lowest timestamp.
    /// Invalid entries have a timestamp of zero and go first.
    fn victim(&self) -> usize {
        self.entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| if e.valid { e.timestamp } else { 0 })
            .map_or(0, |(i, _)| i)
    }

    /// Installs or updates the mapping of virtual page `vpn` to physical page
    /// `ppn`, returning the index of its entry.
    ///
    /// If `vpn` is already mapped to `ppn`, only the permission changes as
    /// requested by `write`. If it is mapped elsewhere, the entry is
    /// rewritten in place. Otherwise the least recently used entry is
    /// evicted.
    pub fn update(
        &mut self,
        vpn: u64,
        host: Option<HostPage>,
        write: WriteFlag,
        ppn: u64,
    ) -> usize {
        // host write access is never handed out for pages holding code
        let code = self.holds_code(ppn);
        let host_write = |writable: bool| if writable && !code { host } else { None };

        let index = if let Some(index) = self.entries.iter().position(|e| e.valid && e.vpn == vpn)
        {
            let entry = &mut self.entries[index];
            if entry.ppn == ppn {
                entry.host_read = host;
                match write {
                    WriteFlag::Keep => (),
                    WriteFlag::MakeWritable => {
                        entry.writable = true;
                        entry.host_write = host_write(true);
                    }
                    WriteFlag::ReadOnly => {
                        entry.writable = false;
                        entry.host_write = None;
                    }
                }
            } else {
                let writable = write == WriteFlag::MakeWritable;
                *entry = TlbEntry {
                    valid: true,
                    vpn,
                    ppn,
                    writable,
                    host_read: host,
                    host_write: host_write(writable),
                    timestamp: entry.timestamp,
                    code: None,
                };
            }

            index
        } else {
            let index = self.victim();
            let old = self.entries[index];
            if old.valid {
                tracing::trace!(vpn = old.vpn, ppn = old.ppn, "evicting tlb entry");
                self.stats.evictions += 1;
                self.forget_shortcut(old.vpn);
            }

            let writable = write == WriteFlag::MakeWritable;
            self.entries[index] = TlbEntry {
                valid: true,
                vpn,
                ppn,
                writable,
                host_read: host,
                host_write: host_write(writable),
                timestamp: 0,
                code: None,
            };

            index
        };

        self.touch(index);
        if let Some(shortcut) = &mut self.shortcut {
            shortcut[Self::shortcut_index(vpn)] = Some(ShortcutEntry {
                vpn,
                index: index as u32,
            });
        }

        index
    }

    /// Finds the entry for `vaddr`, asking the MMU on a miss.
    ///
    /// A write to an entry without write permission asks the MMU again, in
    /// case the permission changed, and updates the entry in place.
    pub fn lookup_or_insert(
        &mut self,
        sys: &mut dyn System,
        cpu: usize,
        vaddr: u64,
        access: Access,
    ) -> Result<Lookup, TlbMiss> {
        let vpn = self.geometry.page_number(vaddr);
        if let Some(index) = self.find(vpn) {
            self.stats.hits += 1;
            self.touch(index);

            if access != Access::Write || self.entries[index].writable {
                return Ok(Lookup {
                    index,
                    filled: false,
                });
            }
        } else {
            self.stats.misses += 1;
        }

        let Some(translation) = sys.translate(cpu, vaddr, access) else {
            return Err(TlbMiss::Unmapped { vaddr });
        };

        let ppn = self.geometry.page_number(translation.paddr);
        let host = sys.host_page(self.geometry.page_base(translation.paddr));
        let write = if translation.writable {
            WriteFlag::MakeWritable
        } else {
            WriteFlag::ReadOnly
        };

        let index = self.update(vpn, host, write, ppn);
        if access == Access::Write && !translation.writable {
            return Err(TlbMiss::ReadOnly { vaddr });
        }

        Ok(Lookup {
            index,
            filled: true,
        })
    }

    fn drop_entry(&mut self, index: usize) {
        let vpn = self.entries[index].vpn;
        self.entries[index] = TlbEntry::default();
        self.forget_shortcut(vpn);
    }

    /// Drops the mapping of the virtual page holding `vaddr`.
    pub fn invalidate_vaddr(&mut self, vaddr: u64) -> bool {
        let vpn = self.geometry.page_number(vaddr);
        match self.entries.iter().position(|e| e.valid && e.vpn == vpn) {
            Some(index) => {
                self.drop_entry(index);
                true
            }
            None => false,
        }
    }

    /// Drops every mapping to the physical page holding `paddr`. Returns how
    /// many were dropped.
    pub fn invalidate_paddr(&mut self, paddr: u64) -> usize {
        let ppn = self.geometry.page_number(paddr);
        let mut count = 0;
        for index in 0..self.entries.len() {
            let entry = &self.entries[index];
            if entry.valid && entry.ppn == ppn {
                self.drop_entry(index);
                count += 1;
            }
        }

        count
    }

    /// Forgets the translation cache page of every entry, keeping the
    /// mappings themselves.
    pub fn invalidate_code_translation(&mut self) {
        for entry in self.entries.iter_mut().filter(|e| e.valid) {
            entry.code = None;
        }
    }

    /// Whether any live entry mapping the physical page `ppn` has its
    /// translations resolved.
    fn holds_code(&self, ppn: u64) -> bool {
        self.entries
            .iter()
            .any(|e| e.valid && e.ppn == ppn && e.code.is_some())
    }

    /// Revokes host write access to the physical page `ppn` in every entry
    /// mapping it.
    pub(crate) fn protect_code(&mut self, ppn: u64) {
        for entry in self.entries.iter_mut().filter(|e| e.valid && e.ppn == ppn) {
            entry.host_write = None;
        }
    }

    pub fn invalidate_all(&mut self) {
        self.entries.fill(TlbEntry::default());
        if let Some(shortcut) = &mut self.shortcut {
            shortcut.fill(None);
        }
    }
}
