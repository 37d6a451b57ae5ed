//! The guest-physical → host-virtual translation walk.
//!
//! The monitor tracks every guest physical page in a fixed-depth radix table
//! rooted at the `l1_phys_map` global: successive fixed-width slices of the
//! page frame number index a root array, two intermediate pointer arrays,
//! and finally an array of [`PhysPageDesc`] leaves. Reimplementing the walk
//! out-of-band means chasing those pointers with remote reads that can fail
//! or hit null at any level; a null entry is the normal encoding for "this
//! frame was never mapped", not corruption.

use qscope_layout::phys::{
    PhysPageDesc, INTERMEDIATE_LEVELS, L2_BITS, L2_SIZE, PAGE_BITS, PAGE_SIZE, P_L1_SHIFT,
    P_L1_SIZE,
};
use qscope_layout::symbols;
use qscope_remote::{RemoteError, RemoteMemory};

use thiserror::Error;

use crate::ram::{locate_ram_ptr, RamLookupError};

/// Outcome of a successful translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translation {
    /// The address is RAM-backed: a pointer dereferenceable in the inspected
    /// process's own address space.
    Ram(u64),
    /// The page maps device I/O; there is no host pointer to hand out. A
    /// legitimate outcome, distinct from every error.
    IoSpace,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A null radix entry before the leaf: the frame has never been mapped.
    /// Expected for sparse address spaces.
    #[error("guest-physical address {gpa:#x} is unmapped (null radix entry at level {level})")]
    Unmapped { gpa: u64, level: u32 },

    /// The leaf descriptor classified the page as RAM but no registered RAM
    /// block covers its offset: the registry and the radix table disagree.
    #[error("page descriptor points at RAM offset {phys:#x} but no RAM block covers it")]
    NoRamBlock { phys: u64 },
}

/// The resolved root of the radix table.
///
/// The root array lives *at* the `l1_phys_map` symbol (the symbol is the
/// array, not a pointer to it). `resolve` looks the symbol up once per
/// command invocation; the walk itself never re-resolves it.
#[derive(Debug, Clone, Copy)]
pub struct PhysMap {
    root: u64,
}

impl PhysMap {
    pub fn resolve<M: RemoteMemory + ?Sized>(mem: &M) -> Result<Self, RemoteError> {
        Ok(Self {
            root: mem.lookup_symbol(symbols::PHYS_MAP_ROOT)?,
        })
    }

    /// For synthetic tables in tests: a map rooted at an explicit address.
    pub fn with_root(root: u64) -> Self {
        Self { root }
    }

    /// Translate one guest physical address.
    ///
    /// Any failed remote read aborts immediately; a read that fails here
    /// indicates a structural mismatch, not a transient condition.
    pub fn translate<M: RemoteMemory + ?Sized>(
        &self,
        mem: &M,
        gpa: u64,
    ) -> Result<Translation, TranslateError> {
        let pfn = gpa >> PAGE_BITS;

        // Root level: the entry address is pure arithmetic into the inline
        // root array; the entry itself is fetched in the first loop step.
        // All pointer arithmetic wraps: a corrupt entry near u64::MAX must
        // surface as a failed read at the wrapped address, not a panic.
        let mut cursor = self
            .root
            .wrapping_add(((pfn >> P_L1_SHIFT) & (P_L1_SIZE - 1)) * 8);

        for level in (1..=INTERMEDIATE_LEVELS).rev() {
            let entry = mem.read_ptr(cursor)?;
            if entry == 0 {
                return Err(TranslateError::Unmapped { gpa, level });
            }
            cursor = entry.wrapping_add(((pfn >> (level * L2_BITS)) & (L2_SIZE - 1)) * 8);
        }

        let leaf = mem.read_ptr(cursor)?;
        if leaf == 0 {
            return Err(TranslateError::Unmapped { gpa, level: 0 });
        }
        let desc_addr = leaf.wrapping_add((pfn & (L2_SIZE - 1)) * PhysPageDesc::SIZE as u64);
        let desc = PhysPageDesc::read(mem, desc_addr)?;

        if desc.is_io_space() {
            return Ok(Translation::IoSpace);
        }

        let host = match locate_ram_ptr(mem, desc.page_base()) {
            Ok(host) => host,
            Err(RamLookupError::Remote(e)) => return Err(e.into()),
            Err(RamLookupError::NotFound { addr }) => {
                return Err(TranslateError::NoRamBlock { phys: addr })
            }
        };
        Ok(Translation::Ram(host.wrapping_add(gpa & (PAGE_SIZE - 1))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qscope_layout::phys::{PhysOffsetFlags, IO_MEM_SHIFT};
    use qscope_layout::ram::{RamBlock, RamList};
    use qscope_remote::FlatImage;

    const BASE: u64 = 0x4000_0000;
    const ROOT: u64 = BASE;

    struct Table {
        img: FlatImage,
        next_free: u64,
    }

    impl Table {
        fn new() -> Self {
            let mut img = FlatImage::new(BASE, 0x10_0000);
            img.define_symbol(symbols::PHYS_MAP_ROOT, ROOT);
            Self {
                img,
                // Past the root array.
                next_free: ROOT + P_L1_SIZE * 8,
            }
        }

        fn alloc(&mut self, len: u64) -> u64 {
            let addr = self.next_free;
            self.next_free += len;
            addr
        }

        /// Ensure the pointer entry at `entry_addr` points at an array,
        /// allocating one when the entry is still null.
        fn ensure(&mut self, entry_addr: u64, array_len: u64) -> u64 {
            let existing = self.img.read_ptr(entry_addr).unwrap();
            if existing != 0 {
                return existing;
            }
            let array = self.alloc(array_len);
            self.img.put_ptr(entry_addr, array);
            array
        }

        /// Install a leaf descriptor for the page containing `gpa`.
        fn map(&mut self, gpa: u64, phys_offset: u64) {
            let pfn = gpa >> PAGE_BITS;
            let mut entry = ROOT + ((pfn >> P_L1_SHIFT) & (P_L1_SIZE - 1)) * 8;
            for level in (1..=INTERMEDIATE_LEVELS).rev() {
                let array = self.ensure(entry, L2_SIZE * 8);
                entry = array + ((pfn >> (level * L2_BITS)) & (L2_SIZE - 1)) * 8;
            }
            let descs = self.ensure(entry, L2_SIZE * PhysPageDesc::SIZE as u64);
            let desc_addr = descs + (pfn & (L2_SIZE - 1)) * PhysPageDesc::SIZE as u64;
            self.img.put_u64(desc_addr, phys_offset);
        }

        /// Register a single RAM block covering `[offset, offset+length)`.
        fn add_ram(&mut self, offset: u64, length: u64, host: u64) {
            let list = self.alloc(RamList::SIZE as u64);
            let block = self.alloc(RamBlock::SIZE as u64);
            self.img.define_symbol(symbols::RAM_LIST, list);
            self.img.put_ptr(list + RamList::BLOCKS_OFFSET as u64, block);
            self.img.put_ptr(block + RamBlock::HOST_OFFSET as u64, host);
            self.img.put_u64(block + RamBlock::OFFSET_OFFSET as u64, offset);
            self.img.put_u64(block + RamBlock::LENGTH_OFFSET as u64, length);
        }
    }

    #[test]
    fn mapped_frame_round_trips_to_host_pointer() {
        let mut t = Table::new();
        let gpa = 0x1234_5678u64;
        t.map(gpa, 0x5000);
        t.add_ram(0x0, 0x1_0000, 0x7f00_0000_0000);

        let map = PhysMap::resolve(&t.img).unwrap();
        let got = map.translate(&t.img, gpa).unwrap();
        assert_eq!(got, Translation::Ram(0x7f00_0000_5000 + (gpa & 0xfff)));
    }

    #[test]
    fn distant_frames_index_distinct_root_slots() {
        let mut t = Table::new();
        let low = 0x1000u64;
        // Differs in the bits the root level indexes on (gpa bits 42+).
        let high = low + (1u64 << 42) * 3;
        t.map(low, 0x5000);
        t.map(high, 0x6000);
        t.add_ram(0x0, 0x1_0000, 0x7f00_0000_0000);

        let map = PhysMap::resolve(&t.img).unwrap();
        assert_eq!(
            map.translate(&t.img, low).unwrap(),
            Translation::Ram(0x7f00_0000_5000)
        );
        assert_eq!(
            map.translate(&t.img, high).unwrap(),
            Translation::Ram(0x7f00_0000_6000)
        );
    }

    #[test]
    fn untouched_frame_is_unmapped() {
        let mut t = Table::new();
        t.map(0x1000, 0x0);

        let map = PhysMap::resolve(&t.img).unwrap();

        // A frame whose root slot was never populated: null at the first
        // fetched level.
        let far = 1u64 << 42;
        assert_eq!(
            map.translate(&t.img, far),
            Err(TranslateError::Unmapped {
                gpa: far,
                level: INTERMEDIATE_LEVELS
            })
        );

        // A sibling sharing the upper levels but with a null leaf pointer.
        let sibling = 0x1000 + L2_SIZE * PAGE_SIZE;
        assert_eq!(
            map.translate(&t.img, sibling),
            Err(TranslateError::Unmapped {
                gpa: sibling,
                level: 0
            })
        );

        // A sibling one intermediate level up.
        let mid = 0x1000 + L2_SIZE * L2_SIZE * PAGE_SIZE;
        assert_eq!(
            map.translate(&t.img, mid),
            Err(TranslateError::Unmapped { gpa: mid, level: 1 })
        );
    }

    #[test]
    fn io_space_descriptor_short_circuits_before_ram_lookup() {
        let mut t = Table::new();
        let gpa = 0x2000u64;
        t.map(gpa, 0x9000 | (3 << IO_MEM_SHIFT));
        // No ram_list symbol on purpose: reaching the RAM lookup would fail
        // with SymbolNotFound rather than produce IoSpace.

        let map = PhysMap::resolve(&t.img).unwrap();
        assert_eq!(map.translate(&t.img, gpa).unwrap(), Translation::IoSpace);
    }

    #[test]
    fn romd_page_is_translated_like_ram() {
        let mut t = Table::new();
        let gpa = 0x3000u64;
        t.map(
            gpa,
            0x6000 | (3 << IO_MEM_SHIFT) | PhysOffsetFlags::ROMD.bits(),
        );
        t.add_ram(0x0, 0x1_0000, 0x7f00_0000_0000);

        let map = PhysMap::resolve(&t.img).unwrap();
        assert_eq!(
            map.translate(&t.img, gpa).unwrap(),
            Translation::Ram(0x7f00_0000_6000)
        );
    }

    #[test]
    fn ram_descriptor_without_covering_block() {
        let mut t = Table::new();
        let gpa = 0x4000u64;
        t.map(gpa, 0x80_0000);
        t.add_ram(0x0, 0x1000, 0x7f00_0000_0000);

        let map = PhysMap::resolve(&t.img).unwrap();
        assert_eq!(
            map.translate(&t.img, gpa),
            Err(TranslateError::NoRamBlock { phys: 0x80_0000 })
        );
    }

    #[test]
    fn corrupt_entry_near_the_address_limit_fails_the_read() {
        let mut t = Table::new();
        // Level-2 index 1, so the advance adds a non-zero offset to the
        // corrupt entry; the sum wraps and the next read fails cleanly.
        let gpa = 1u64 << 32;
        let pfn = gpa >> PAGE_BITS;
        let root_entry = ROOT + ((pfn >> P_L1_SHIFT) & (P_L1_SIZE - 1)) * 8;
        t.img.put_ptr(root_entry, u64::MAX - 4);

        let map = PhysMap::resolve(&t.img).unwrap();
        assert!(matches!(
            map.translate(&t.img, gpa),
            Err(TranslateError::Remote(RemoteError::ReadFailed { .. }))
        ));
    }

    #[test]
    fn corrupt_leaf_pointer_fails_the_descriptor_read() {
        let mut t = Table::new();
        let gpa = 0x1000u64;
        t.map(gpa, 0x5000);
        // Replace the leaf array pointer with a value that wraps once the
        // in-array descriptor offset is added.
        let pfn = gpa >> PAGE_BITS;
        let mut entry = ROOT + ((pfn >> P_L1_SHIFT) & (P_L1_SIZE - 1)) * 8;
        for level in (1..=INTERMEDIATE_LEVELS).rev() {
            let array = t.img.read_ptr(entry).unwrap();
            entry = array + ((pfn >> (level * L2_BITS)) & (L2_SIZE - 1)) * 8;
        }
        t.img.put_ptr(entry, u64::MAX - 4);

        let map = PhysMap::resolve(&t.img).unwrap();
        assert!(matches!(
            map.translate(&t.img, gpa),
            Err(TranslateError::Remote(RemoteError::ReadFailed { .. }))
        ));
    }

    #[test]
    fn dangling_intermediate_pointer_is_a_read_failure() {
        let mut t = Table::new();
        let gpa = 0x5000u64;
        let pfn = gpa >> PAGE_BITS;
        let root_entry = ROOT + ((pfn >> P_L1_SHIFT) & (P_L1_SIZE - 1)) * 8;
        t.img.put_ptr(root_entry, 0xdead_0000_0000);

        let map = PhysMap::resolve(&t.img).unwrap();
        assert!(matches!(
            map.translate(&t.img, gpa),
            Err(TranslateError::Remote(RemoteError::ReadFailed { .. }))
        ));
    }
}
