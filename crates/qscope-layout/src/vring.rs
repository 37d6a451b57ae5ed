//! Virtio split-ring descriptors.
//!
//! A `VRing` names the guest-physical addresses of a queue's three rings.
//! The avail and used rings share a header shape (`u16 flags, u16 idx`,
//! then `num` elements) but their element widths differ: avail carries
//! 16-bit descriptor indices, used carries `(u32 id, u32 len)` pairs. The
//! 16-bit event slot each side watches sits immediately past the element
//! array, so its byte offset depends on `num`.

use qscope_remote::{RemoteMemory, RemoteResult};

use crate::{get_u32, get_u64};

/// ```c
/// typedef struct VRing {
///     unsigned int num;
///     target_phys_addr_t desc;
///     target_phys_addr_t avail;
///     target_phys_addr_t used;
/// } VRing;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VRing {
    /// Ring size in elements.
    pub num: u32,
    /// Guest-physical address of the descriptor table.
    pub desc: u64,
    /// Guest-physical address of the avail ring.
    pub avail: u64,
    /// Guest-physical address of the used ring.
    pub used: u64,
}

impl VRing {
    pub const SIZE: usize = 32;

    pub const NUM_OFFSET: usize = 0;
    pub const DESC_OFFSET: usize = 8;
    pub const AVAIL_OFFSET: usize = 16;
    pub const USED_OFFSET: usize = 24;

    pub fn read<M: RemoteMemory + ?Sized>(mem: &M, addr: u64) -> RemoteResult<Self> {
        let buf = mem.read_bytes(addr, Self::SIZE)?;
        Ok(Self {
            num: get_u32(&buf, Self::NUM_OFFSET),
            desc: get_u64(&buf, Self::DESC_OFFSET),
            avail: get_u64(&buf, Self::AVAIL_OFFSET),
            used: get_u64(&buf, Self::USED_OFFSET),
        })
    }

    /// Byte offset of the event slot within the avail ring: past the `u16
    /// flags, u16 idx` header and `num` 16-bit ring entries.
    pub fn avail_ring_event_offset(&self) -> u64 {
        u64::from(self.num) * 2 + 4
    }

    /// Byte offset of the event slot within the used ring: the header again,
    /// then `num` 8-byte `(id, len)` elements.
    pub fn used_ring_event_offset(&self) -> u64 {
        u64::from(self.num) * 8 + 4
    }
}
