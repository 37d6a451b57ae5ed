#![forbid(unsafe_code)]

//! Out-of-band introspection of a running (or dumped) QEMU process.
//!
//! Given nothing but fallible "read N bytes at address A" access to the
//! monitor's address space (see [`qscope_remote`]), this crate reconstructs
//! the monitor's live state: the PCI topology, the guest-RAM block registry,
//! and the guest-physical → host-virtual translation table, and decodes
//! virtio ring state through the latter.
//!
//! The entry points mirror a debugger module's surface:
//!
//! - [`walk`]: resumable cursors over the host-bus list, a bus's device
//!   slots, and name-filtered device subsets.
//! - [`ram`]: locate the RAM block covering a guest-physical address.
//! - [`radix`]: walk the fixed-depth physical-page radix table.
//! - [`virtio`]: ring event-index decoding and the pci-device → virtio
//!   projection.
//! - [`module`]: command dispatch and the walker registry, including the
//!   per-device-name walkers discovered at load time.
//!
//! Nothing here mutates the inspected process, caches across invocations, or
//! panics on bad foreign data: every operation re-reads foreign memory and
//! reports failures to the caller.

pub mod module;
pub mod radix;
pub mod ram;
pub mod virtio;
pub mod walk;

pub use module::{Command, CommandError, CommandOutput, Module, WalkerRegistry, WalkerSpec};
pub use radix::{PhysMap, TranslateError, Translation};
pub use ram::{locate_ram_ptr, RamLookupError};
pub use virtio::{avail_index, backing_device, used_index, RingError};
pub use walk::{HostBusWalker, NamedDeviceWalker, PciDeviceWalker, WalkError};
