//! Physical-page descriptors and the address-space constants the radix
//! translation table is built from.
//!
//! The constants are derived once from the monitor's compile-time address
//! parameters (physical address bits, page bits, per-level index bits) and
//! must not be recomputed per call: the table depth and per-level index
//! widths follow from them.

use qscope_remote::{RemoteMemory, RemoteResult};

use crate::get_u64;

/// Guest page size parameters (target x86-64, 4 KiB pages).
pub const PAGE_BITS: u32 = 12;
pub const PAGE_SIZE: u64 = 1 << PAGE_BITS;
pub const PAGE_MASK: u64 = !(PAGE_SIZE - 1);

/// Width of the guest physical address space.
pub const PHYS_ADDR_BITS: u32 = 52;

/// Index width of every non-root radix level.
pub const L2_BITS: u32 = 10;
pub const L2_SIZE: u64 = 1 << L2_BITS;

const P_L1_BITS_REM: u32 = (PHYS_ADDR_BITS - PAGE_BITS) % L2_BITS;

/// Index width of the root level: the remainder bits, widened by one full
/// level when the remainder alone would be degenerate (< 4 bits).
pub const P_L1_BITS: u32 = if P_L1_BITS_REM < 4 {
    P_L1_BITS_REM + L2_BITS
} else {
    P_L1_BITS_REM
};
pub const P_L1_SIZE: u64 = 1 << P_L1_BITS;

/// Right-shift applied to a page frame number to obtain the root index.
pub const P_L1_SHIFT: u32 = PHYS_ADDR_BITS - PAGE_BITS - P_L1_BITS;

/// Pointer-array levels between the root and the descriptor leaf.
pub const INTERMEDIATE_LEVELS: u32 = P_L1_SHIFT / L2_BITS - 1;

/// Width of the io-region flag field in `phys_offset` (bits below the
/// io-region index).
pub const IO_MEM_SHIFT: u32 = 3;

/// First io-region index that is a real I/O region: indices at or below ROM
/// (RAM = 0, ROM = 1) stay host-addressable.
pub const IO_MEM_ROM: u64 = 1 << IO_MEM_SHIFT;

bitflags::bitflags! {
    /// Flag bits stored below the io-region index in `phys_offset`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PhysOffsetFlags: u64 {
        /// ROM region that is also directly readable through host memory.
        const ROMD = 1 << 0;
        const SUBPAGE = 1 << 1;
        const SUBWIDTH = 1 << 2;
    }
}

/// Leaf record of the radix table: classifies one guest physical page and,
/// for RAM-backed pages, gives its offset in host RAM space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysPageDesc {
    /// Page-aligned host-RAM-space offset, with the io-region index and
    /// [`PhysOffsetFlags`] packed into the low bits.
    pub phys_offset: u64,
    pub region_offset: u64,
}

impl PhysPageDesc {
    pub const SIZE: usize = 16;

    pub const PHYS_OFFSET_OFFSET: usize = 0;
    pub const REGION_OFFSET_OFFSET: usize = 8;

    pub fn read<M: RemoteMemory + ?Sized>(mem: &M, addr: u64) -> RemoteResult<Self> {
        let buf = mem.read_bytes(addr, Self::SIZE)?;
        Ok(Self {
            phys_offset: get_u64(&buf, Self::PHYS_OFFSET_OFFSET),
            region_offset: get_u64(&buf, Self::REGION_OFFSET_OFFSET),
        })
    }

    pub fn flags(&self) -> PhysOffsetFlags {
        PhysOffsetFlags::from_bits_truncate(self.phys_offset)
    }

    /// True when the page maps device I/O rather than host-addressable
    /// memory: the io-region index exceeds ROM and the page is not a
    /// direct-access ROM.
    pub fn is_io_space(&self) -> bool {
        (self.phys_offset & !PAGE_MASK) > IO_MEM_ROM
            && !self.flags().contains(PhysOffsetFlags::ROMD)
    }

    /// Page-aligned RAM-space offset (only meaningful when not I/O space).
    pub fn page_base(&self) -> u64 {
        self.phys_offset & PAGE_MASK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_constants() {
        // 52-bit phys, 12-bit pages, 10-bit levels: the 40 frame bits split
        // into a widened 10-bit root at shift 30, two 10-bit intermediate
        // levels, and a 10-bit leaf.
        assert_eq!(P_L1_BITS, 10);
        assert_eq!(P_L1_SIZE, 1024);
        assert_eq!(P_L1_SHIFT, 30);
        assert_eq!(INTERMEDIATE_LEVELS, 2);
    }

    #[test]
    fn ram_and_rom_pages_are_not_io_space() {
        let ram = PhysPageDesc {
            phys_offset: 0x12_3000,
            region_offset: 0,
        };
        assert!(!ram.is_io_space());
        assert_eq!(ram.page_base(), 0x12_3000);

        // io-region index exactly at the ROM boundary stays translatable.
        let rom = PhysPageDesc {
            phys_offset: 0x12_3000 | IO_MEM_ROM,
            region_offset: 0,
        };
        assert!(!rom.is_io_space());
    }

    #[test]
    fn io_pages_classify_as_io_space_unless_romd() {
        let io = PhysPageDesc {
            phys_offset: 0x12_3000 | (2 << IO_MEM_SHIFT),
            region_offset: 0,
        };
        assert!(io.is_io_space());

        let romd = PhysPageDesc {
            phys_offset: 0x12_3000 | (2 << IO_MEM_SHIFT) | PhysOffsetFlags::ROMD.bits(),
            region_offset: 0,
        };
        assert!(!romd.is_io_space());
    }
}
