//! Resumable cursors over the monitor's PCI topology.
//!
//! A walker is an explicit state object, not a thread of control: each call
//! to `next` receives the remote-memory handle, performs the reads for one
//! step, and returns one `(address, record)` pair or `None` at the end of
//! the sequence. Foreign memory is re-read on every step; the inspected
//! process may have moved on between calls.

use qscope_layout::pci::{HostBus, PciBus, PciDevice, NSLOTS};
use qscope_layout::symbols;
use qscope_remote::{RemoteError, RemoteMemory};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalkError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The host-bus list head is null: the monitor has no PCI topology (or
    /// has not built one yet).
    #[error("the host-bus list is empty")]
    NoHostBus,

    /// The walker only supports global walks rooted at its well-known
    /// symbol.
    #[error("walker `{name}` does not support an explicit starting address")]
    UnsupportedStart { name: &'static str },
}

/// Dereference the `host_buses` global.
///
/// The symbol is an anonymous list head with no recoverable static type in
/// the inspected binary's symbol table, so it cannot be decoded as a typed
/// record: the one thing known about it is that its first pointer-sized word
/// is the first [`HostBus`] node (or null). That reinterpretation lives here
/// and nowhere else.
pub(crate) fn host_bus_list_head<M: RemoteMemory + ?Sized>(mem: &M) -> Result<u64, RemoteError> {
    let sym = mem.lookup_symbol(symbols::HOST_BUSES)?;
    mem.read_ptr(sym)
}

/// Walks the singly-linked list of host buses.
#[derive(Debug, Clone)]
pub struct HostBusWalker {
    cursor: u64,
}

impl HostBusWalker {
    /// Seed the walk from the `host_buses` global. A null head is a valid,
    /// immediately-terminal walk.
    pub fn from_global<M: RemoteMemory + ?Sized>(mem: &M) -> Result<Self, WalkError> {
        Ok(Self {
            cursor: host_bus_list_head(mem)?,
        })
    }

    pub fn next<M: RemoteMemory + ?Sized>(
        &mut self,
        mem: &M,
    ) -> Result<Option<(u64, HostBus)>, WalkError> {
        if self.cursor == 0 {
            return Ok(None);
        }
        let addr = self.cursor;
        let bus = HostBus::read(mem, addr)?;
        self.cursor = bus.next;
        Ok(Some((addr, bus)))
    }
}

/// Walks the populated device slots of one PCI bus.
///
/// The 256-slot device array is snapshotted once when the walker is created;
/// each step scans forward to the next non-null slot and re-reads that
/// device record from foreign memory.
#[derive(Debug, Clone)]
pub struct PciDeviceWalker {
    slots: Vec<u64>,
    idx: usize,
}

impl PciDeviceWalker {
    /// Seed the walk from the `host_buses` global.
    ///
    /// This assumes exactly one host bus carrying exactly one PCI bus, true
    /// of every configuration these tools are pointed at. Multi-bus
    /// topologies need [`PciDeviceWalker::from_bus`] with an explicit bus
    /// address.
    pub fn from_global<M: RemoteMemory + ?Sized>(mem: &M) -> Result<Self, WalkError> {
        let head = host_bus_list_head(mem)?;
        if head == 0 {
            return Err(WalkError::NoHostBus);
        }
        let host = HostBus::read(mem, head)?;
        Self::from_bus(mem, host.bus)
    }

    /// Seed the walk from an explicit `PCIBus` address.
    pub fn from_bus<M: RemoteMemory + ?Sized>(mem: &M, bus_addr: u64) -> Result<Self, WalkError> {
        let bus = PciBus::read(mem, bus_addr)?;
        Ok(Self {
            slots: bus.devices,
            idx: 0,
        })
    }

    pub fn next<M: RemoteMemory + ?Sized>(
        &mut self,
        mem: &M,
    ) -> Result<Option<(u64, PciDevice)>, WalkError> {
        while self.idx < NSLOTS {
            let addr = self.slots[self.idx];
            self.idx += 1;
            if addr == 0 {
                continue;
            }
            let dev = PciDevice::read(mem, addr)?;
            return Ok(Some((addr, dev)));
        }
        Ok(None)
    }
}

/// A [`PciDeviceWalker`] filtered to devices whose name matches exactly.
#[derive(Debug, Clone)]
pub struct NamedDeviceWalker {
    inner: PciDeviceWalker,
    name: String,
}

impl NamedDeviceWalker {
    pub fn from_global<M: RemoteMemory + ?Sized>(mem: &M, name: &str) -> Result<Self, WalkError> {
        Ok(Self {
            inner: PciDeviceWalker::from_global(mem)?,
            name: name.to_owned(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn next<M: RemoteMemory + ?Sized>(
        &mut self,
        mem: &M,
    ) -> Result<Option<(u64, PciDevice)>, WalkError> {
        while let Some((addr, dev)) = self.inner.next(mem)? {
            if dev.name == self.name {
                return Ok(Some((addr, dev)));
            }
        }
        Ok(None)
    }
}
