//! PCI topology records: host buses, the per-bus device slot array, devices,
//! and the virtio-pci proxy wrapper.

use qscope_remote::{RemoteMemory, RemoteResult};

use crate::{get_cstr, get_u32, get_u64};

/// Number of device/function slots on a PCI bus.
pub const NSLOTS: usize = 256;

/// One node of the monitor's host-bus list.
///
/// ```c
/// struct PCIHostBus {
///     int domain;
///     struct PCIBus *bus;
///     QLIST_ENTRY(PCIHostBus) next;
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBus {
    /// PCI domain identifier.
    pub domain: i32,
    /// Address of the attached [`PciBus`] record.
    pub bus: u64,
    /// Forward link to the next list node; null at the list end.
    pub next: u64,
}

impl HostBus {
    pub const SIZE: usize = 32;

    pub const DOMAIN_OFFSET: usize = 0;
    pub const BUS_OFFSET: usize = 8;
    pub const NEXT_OFFSET: usize = 16;

    pub fn read<M: RemoteMemory + ?Sized>(mem: &M, addr: u64) -> RemoteResult<Self> {
        let buf = mem.read_bytes(addr, Self::SIZE)?;
        Ok(Self {
            domain: get_u32(&buf, Self::DOMAIN_OFFSET) as i32,
            bus: get_u64(&buf, Self::BUS_OFFSET),
            next: get_u64(&buf, Self::NEXT_OFFSET),
        })
    }
}

/// The portion of a `PCIBus` record the engine consumes: the fixed array of
/// optional device pointers, indexed by devfn. Empty slots are null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PciBus {
    pub devices: Vec<u64>,
}

impl PciBus {
    /// Byte offset of `PCIDevice *devices[NSLOTS]` within the bus record
    /// (past the embedded `BusState` and the irq-routing callbacks).
    pub const DEVICES_OFFSET: usize = 0x50;

    /// Snapshot the full slot array in one read. `addr` comes from foreign
    /// memory, so the offset add wraps and a corrupt pointer fails the read.
    pub fn read<M: RemoteMemory + ?Sized>(mem: &M, addr: u64) -> RemoteResult<Self> {
        let buf = mem.read_bytes(addr.wrapping_add(Self::DEVICES_OFFSET as u64), NSLOTS * 8)?;
        let devices = (0..NSLOTS).map(|i| get_u64(&buf, i * 8)).collect();
        Ok(Self { devices })
    }
}

/// A PCI device record. Only the fields the walkers and commands consume are
/// decoded; `name` doubles as the device-type discriminator used by the
/// per-name walkers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PciDevice {
    pub name: String,
    /// Configured devfn (slot/function number), as stored in the record.
    pub devfn: i32,
}

impl PciDevice {
    /// Full record size; one read fetches the whole device.
    pub const SIZE: usize = 0x2a0;

    /// `char name[64]`, NUL-padded.
    pub const NAME_OFFSET: usize = 0x60;
    pub const NAME_LEN: usize = 64;

    pub const DEVFN_OFFSET: usize = 0xa0;

    pub fn read<M: RemoteMemory + ?Sized>(mem: &M, addr: u64) -> RemoteResult<Self> {
        let buf = mem.read_bytes(addr, Self::SIZE)?;
        Ok(Self {
            name: get_cstr(&buf, Self::NAME_OFFSET, Self::NAME_LEN),
            devfn: get_u32(&buf, Self::DEVFN_OFFSET) as i32,
        })
    }
}

/// The virtio-pci proxy: a `PCIDevice` with the paravirtual device state
/// hanging off it.
///
/// ```c
/// typedef struct {
///     PCIDevice pci_dev;
///     VirtIODevice *vdev;
///     ...
/// } VirtIOPCIProxy;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtioPciProxy {
    /// Address of the backing `VirtIODevice`. Passed through verbatim: a
    /// device that is not virtio-backed yields whatever bytes sit at the
    /// field's offset, including null.
    pub vdev: u64,
}

impl VirtioPciProxy {
    /// `vdev` immediately follows the embedded `PCIDevice`.
    pub const VDEV_OFFSET: usize = PciDevice::SIZE;

    pub const SIZE: usize = Self::VDEV_OFFSET + 8;

    pub fn read<M: RemoteMemory + ?Sized>(mem: &M, addr: u64) -> RemoteResult<Self> {
        let buf = mem.read_bytes(addr, Self::SIZE)?;
        Ok(Self {
            vdev: get_u64(&buf, Self::VDEV_OFFSET),
        })
    }
}
