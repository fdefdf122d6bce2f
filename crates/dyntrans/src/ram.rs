//! A minimal [`System`]: identity-mapped RAM plus a write-only console.

use crate::system::{Access, CacheKind, Direction, HostPage, System, Translation};
use bitvec::vec::BitVec;

/// A contiguous block of RAM at `base`, identity mapped.
///
/// Pages can be marked read-only. An optional console page accepts byte
/// writes at its first address and collects them; it has no host backing, so
/// accesses to it always take the slow path.
pub struct Ram {
    base: u64,
    page_shift: u32,
    memory: Vec<u8>,
    read_only: BitVec,
    console: Option<u64>,
    output: Vec<u8>,
}

impl Ram {
    /// Creates `size` bytes of zeroed RAM at `base`. Both are rounded to whole
    /// pages of `1 << page_shift` bytes.
    pub fn new(base: u64, size: usize, page_shift: u32) -> Self {
        let page_size = 1usize << page_shift;
        let base = base & !(page_size as u64 - 1);
        let size = size.next_multiple_of(page_size);

        Self {
            base,
            page_shift,
            memory: vec![0; size],
            read_only: BitVec::repeat(false, size >> page_shift),
            console: None,
            output: Vec::new(),
        }
    }

    /// Places the console at `addr`, which must lie outside of RAM.
    pub fn with_console(mut self, addr: u64) -> Self {
        self.console = Some(addr);
        self
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn size(&self) -> usize {
        self.memory.len()
    }

    /// Bytes written to the console so far.
    pub fn console_output(&self) -> &[u8] {
        &self.output
    }

    fn offset(&self, paddr: u64, len: usize) -> Option<usize> {
        let offset = usize::try_from(paddr.checked_sub(self.base)?).ok()?;
        (offset.checked_add(len)? <= self.memory.len()).then_some(offset)
    }

    fn console_page(&self, addr: u64) -> bool {
        self.console
            .is_some_and(|c| (c >> self.page_shift) == (addr >> self.page_shift))
    }

    fn writable(&self, offset: usize, len: usize) -> bool {
        let first = offset >> self.page_shift;
        let last = (offset + len.max(1) - 1) >> self.page_shift;
        self.read_only[first..=last].not_any()
    }

    /// Copies `data` into RAM at `paddr`, ignoring read-only protection.
    pub fn load(&mut self, paddr: u64, data: &[u8]) -> bool {
        let Some(offset) = self.offset(paddr, data.len()) else {
            return false;
        };

        self.memory[offset..offset + data.len()].copy_from_slice(data);
        true
    }

    /// `len` bytes of RAM at `paddr`.
    pub fn slice(&self, paddr: u64, len: usize) -> Option<&[u8]> {
        let offset = self.offset(paddr, len)?;
        Some(&self.memory[offset..offset + len])
    }

    pub fn read_u32(&self, paddr: u64) -> Option<u32> {
        let bytes = self.slice(paddr, 4)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }

    pub fn set_read_only(&mut self, paddr: u64, read_only: bool) {
        if let Some(offset) = self.offset(paddr, 1) {
            self.read_only.set(offset >> self.page_shift, read_only);
        }
    }
}

impl System for Ram {
    fn rw(
        &mut self,
        _: usize,
        vaddr: u64,
        buf: &mut [u8],
        direction: Direction,
        kind: CacheKind,
    ) -> bool {
        if self.console_page(vaddr) {
            match direction {
                Direction::Read => buf.fill(0),
                Direction::Write if Some(vaddr) == self.console => self.output.extend_from_slice(buf),
                Direction::Write => (),
            }

            return kind == CacheKind::Data;
        }

        let Some(offset) = self.offset(vaddr, buf.len()) else {
            return false;
        };

        match direction {
            Direction::Read => buf.copy_from_slice(&self.memory[offset..offset + buf.len()]),
            Direction::Write => {
                if !self.writable(offset, buf.len()) {
                    return false;
                }

                self.memory[offset..offset + buf.len()].copy_from_slice(buf);
            }
        }

        true
    }

    fn translate(&mut self, _: usize, vaddr: u64, access: Access) -> Option<Translation> {
        if self.console_page(vaddr) {
            return (access != Access::Execute).then_some(Translation {
                paddr: vaddr,
                writable: true,
            });
        }

        let offset = self.offset(vaddr, 1)?;
        Some(Translation {
            paddr: vaddr,
            writable: self.writable(offset, 1),
        })
    }

    fn host_page(&self, paddr: u64) -> Option<HostPage> {
        self.offset(paddr, 1).map(HostPage)
    }

    fn host_memory(&self) -> &[u8] {
        &self.memory
    }

    fn host_memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }
}
