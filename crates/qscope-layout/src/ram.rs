//! The guest-RAM block registry: a linked list of contiguous RAM extents,
//! each mapping a guest-physical offset range to host memory.

use qscope_remote::{RemoteMemory, RemoteResult};

use crate::{get_cstr, get_u64};

/// The registry header rooted at the `ram_list` global.
///
/// ```c
/// typedef struct RAMList {
///     uint8_t *phys_dirty;
///     QLIST_HEAD(ram, RAMBlock) blocks;
/// } RAMList;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RamList {
    /// Address of the first [`RamBlock`]; null when no RAM is registered.
    pub blocks: u64,
}

impl RamList {
    pub const SIZE: usize = 16;

    /// The list head follows the dirty-bitmap pointer.
    pub const BLOCKS_OFFSET: usize = 8;

    pub fn read<M: RemoteMemory + ?Sized>(mem: &M, addr: u64) -> RemoteResult<Self> {
        let buf = mem.read_bytes(addr, Self::SIZE)?;
        Ok(Self {
            blocks: get_u64(&buf, Self::BLOCKS_OFFSET),
        })
    }
}

/// One contiguous extent of guest RAM.
///
/// Blocks never overlap: `offset <= a < offset + length` identifies at most
/// one block for any guest-physical address `a`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RamBlock {
    /// Host-side base of the backing allocation (an address in the inspected
    /// process).
    pub host: u64,
    /// Guest-physical offset the extent starts at.
    pub offset: u64,
    pub length: u64,
    /// Human-readable block identifier (e.g. `pc.ram`).
    pub idstr: String,
    /// Forward link; null at the list end.
    pub next: u64,
}

impl RamBlock {
    /// Size of the record prefix this library consumes (through the forward
    /// link; trailing fields are platform-conditional and never read).
    pub const SIZE: usize = 288;

    pub const HOST_OFFSET: usize = 0;
    pub const OFFSET_OFFSET: usize = 8;
    pub const LENGTH_OFFSET: usize = 16;
    pub const IDSTR_OFFSET: usize = 24;
    pub const IDSTR_LEN: usize = 256;
    pub const NEXT_OFFSET: usize = 280;

    pub fn read<M: RemoteMemory + ?Sized>(mem: &M, addr: u64) -> RemoteResult<Self> {
        let buf = mem.read_bytes(addr, Self::SIZE)?;
        Ok(Self {
            host: get_u64(&buf, Self::HOST_OFFSET),
            offset: get_u64(&buf, Self::OFFSET_OFFSET),
            length: get_u64(&buf, Self::LENGTH_OFFSET),
            idstr: get_cstr(&buf, Self::IDSTR_OFFSET, Self::IDSTR_LEN),
            next: get_u64(&buf, Self::NEXT_OFFSET),
        })
    }

    /// Membership test for a guest-physical address. Wrapping subtraction on
    /// purpose: addresses below `offset` wrap to huge values and fail the
    /// length comparison.
    pub fn contains(&self, addr: u64) -> bool {
        addr.wrapping_sub(self.offset) < self.length
    }

    /// Host address backing `addr`, which must be inside the block. Wrapping
    /// arithmetic for the same reason as [`RamBlock::contains`]: a corrupt
    /// `host` field must produce an address whose read fails, not a panic.
    pub fn host_addr(&self, addr: u64) -> u64 {
        self.host.wrapping_add(addr.wrapping_sub(self.offset))
    }
}
