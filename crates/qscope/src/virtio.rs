//! Virtio ring event-index decoding and the PCI-device → virtio projection.
//!
//! The ring operations take the address of a `VRing` record inside the
//! monitor, translate the relevant ring's guest-physical address to a host
//! pointer with the radix engine, and read the 16-bit event slot at the end
//! of that ring's element array.
//!
//! Naming note: `used_index` reads the event slot of the *avail* ring and
//! `avail_index` reads the event slot of the *used* ring. That crossover is
//! how the split-ring layout works (each side publishes the index it wants
//! the other side to signal at inside the ring it owns) and it matches the
//! historical tooling these functions replace.

use qscope_layout::pci::VirtioPciProxy;
use qscope_layout::vring::VRing;
use qscope_remote::{RemoteError, RemoteMemory};

use thiserror::Error;

use crate::radix::{PhysMap, TranslateError, Translation};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RingError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Translate(#[from] TranslateError),

    /// The ring's guest-physical address translated to device I/O space;
    /// a live ring must sit in guest RAM.
    #[error("ring memory at guest-physical {gpa:#x} is in I/O space")]
    RingInIoSpace { gpa: u64 },
}

fn ring_base<M: RemoteMemory + ?Sized>(mem: &M, gpa: u64) -> Result<u64, RingError> {
    let map = PhysMap::resolve(mem)?;
    match map.translate(mem, gpa)? {
        Translation::Ram(host) => Ok(host),
        Translation::IoSpace => Err(RingError::RingInIoSpace { gpa }),
    }
}

/// Read the used-side event index of the ring described at `ring_addr`
/// (the 16-bit slot past the avail ring's element array).
pub fn used_index<M: RemoteMemory + ?Sized>(mem: &M, ring_addr: u64) -> Result<u16, RingError> {
    let ring = VRing::read(mem, ring_addr)?;
    let base = ring_base(mem, ring.avail)?;
    Ok(mem.read_u16(base.wrapping_add(ring.avail_ring_event_offset()))?)
}

/// Read the avail-side event index of the ring described at `ring_addr`
/// (the 16-bit slot past the used ring's element array).
pub fn avail_index<M: RemoteMemory + ?Sized>(mem: &M, ring_addr: u64) -> Result<u16, RingError> {
    let ring = VRing::read(mem, ring_addr)?;
    let base = ring_base(mem, ring.used)?;
    Ok(mem.read_u16(base.wrapping_add(ring.used_ring_event_offset()))?)
}

/// Project a PCI device record to its backing `VirtIODevice` address.
///
/// The pointer is returned verbatim: callers pointing this at a device that
/// is not virtio-backed get whatever bytes occupy the field, null included.
pub fn backing_device<M: RemoteMemory + ?Sized>(
    mem: &M,
    pci_device_addr: u64,
) -> Result<u64, RemoteError> {
    let proxy = VirtioPciProxy::read(mem, pci_device_addr)?;
    Ok(proxy.vdev)
}
