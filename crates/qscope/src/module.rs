//! The debugger-module surface: command dispatch plus the walker registry,
//! including the per-device-name walkers discovered when the module loads.
//!
//! The host owns argument parsing and output formatting; this layer only
//! enforces the command calling convention (an explicit target address, at
//! most one optional argument) and returns typed results.

use qscope_layout::pci::{HostBus, PciDevice};
use qscope_remote::{RemoteError, RemoteMemory};

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::radix::{PhysMap, TranslateError, Translation};
use crate::virtio::{avail_index, backing_device, used_index, RingError};
use crate::walk::{HostBusWalker, NamedDeviceWalker, PciDeviceWalker, WalkError};

/// Name of the always-registered host-bus walker.
pub const HOST_BUS_WALKER: &str = "qemu_host_bus";

/// Name of the always-registered device walker.
pub const PCI_DEVICE_WALKER: &str = "qemu_pci_device";

/// What a registered walker enumerates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkerKind {
    HostBus,
    PciDevice,
    NamedDevice(String),
}

/// A registered walker: the descriptor the host lists and spawns by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkerSpec {
    pub name: String,
    pub description: String,
    pub kind: WalkerKind,
}

impl WalkerSpec {
    pub fn host_bus() -> Self {
        Self {
            name: HOST_BUS_WALKER.to_owned(),
            description: "walk qemu PCIHostBus structures".to_owned(),
            kind: WalkerKind::HostBus,
        }
    }

    pub fn pci_device() -> Self {
        Self {
            name: PCI_DEVICE_WALKER.to_owned(),
            description: "walk a PCI bus's attached devices".to_owned(),
            kind: WalkerKind::PciDevice,
        }
    }

    /// A walker over the devices with the given name, as discovered on the
    /// bus at load time.
    pub fn named_device(device_name: &str) -> Self {
        Self {
            name: format!("qemu_{device_name}"),
            description: format!("walk the qemu {device_name} devices"),
            kind: WalkerKind::NamedDevice(device_name.to_owned()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("a walker named `{name}` is already registered")]
pub struct AlreadyRegistered {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpawnError {
    #[error("no walker named `{name}` is registered")]
    Unknown { name: String },

    #[error(transparent)]
    Walk(#[from] WalkError),
}

/// The set of registered walkers, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct WalkerRegistry {
    walkers: BTreeMap<String, WalkerSpec>,
}

impl WalkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a walker. The first registration under a name wins;
    /// duplicates are rejected.
    pub fn register(&mut self, spec: WalkerSpec) -> Result<(), AlreadyRegistered> {
        if self.walkers.contains_key(&spec.name) {
            return Err(AlreadyRegistered { name: spec.name });
        }
        self.walkers.insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&WalkerSpec> {
        self.walkers.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WalkerSpec> {
        self.walkers.values()
    }

    /// Instantiate the named walker.
    ///
    /// `start` is only meaningful for the device walker (an explicit bus
    /// address); the host-bus and name-filtered walkers are global-only and
    /// reject it.
    pub fn spawn<M: RemoteMemory + ?Sized>(
        &self,
        mem: &M,
        name: &str,
        start: Option<u64>,
    ) -> Result<AnyWalker, SpawnError> {
        let spec = self.get(name).ok_or_else(|| SpawnError::Unknown {
            name: name.to_owned(),
        })?;
        match &spec.kind {
            WalkerKind::HostBus => {
                if start.is_some() {
                    return Err(WalkError::UnsupportedStart {
                        name: HOST_BUS_WALKER,
                    }
                    .into());
                }
                Ok(AnyWalker::HostBus(HostBusWalker::from_global(mem)?))
            }
            WalkerKind::PciDevice => Ok(AnyWalker::PciDevice(match start {
                Some(bus_addr) => PciDeviceWalker::from_bus(mem, bus_addr)?,
                None => PciDeviceWalker::from_global(mem)?,
            })),
            WalkerKind::NamedDevice(device_name) => {
                if start.is_some() {
                    return Err(WalkError::UnsupportedStart {
                        name: "named device walkers",
                    }
                    .into());
                }
                Ok(AnyWalker::NamedDevice(NamedDeviceWalker::from_global(
                    mem,
                    device_name,
                )?))
            }
        }
    }
}

/// A spawned walker of any registered kind.
#[derive(Debug, Clone)]
pub enum AnyWalker {
    HostBus(HostBusWalker),
    PciDevice(PciDeviceWalker),
    NamedDevice(NamedDeviceWalker),
}

/// One record yielded by an [`AnyWalker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkRecord {
    HostBus(HostBus),
    Device(PciDevice),
}

impl AnyWalker {
    pub fn next<M: RemoteMemory + ?Sized>(
        &mut self,
        mem: &M,
    ) -> Result<Option<(u64, WalkRecord)>, WalkError> {
        Ok(match self {
            AnyWalker::HostBus(w) => w
                .next(mem)?
                .map(|(addr, bus)| (addr, WalkRecord::HostBus(bus))),
            AnyWalker::PciDevice(w) => w
                .next(mem)?
                .map(|(addr, dev)| (addr, WalkRecord::Device(dev))),
            AnyWalker::NamedDevice(w) => w
                .next(mem)?
                .map(|(addr, dev)| (addr, WalkRecord::Device(dev))),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    #[error("failed to register base walker: {0}")]
    Register(#[from] AlreadyRegistered),
}

/// The loaded module: the walker registry populated from one scan of the
/// inspected topology.
#[derive(Debug, Clone)]
pub struct Module {
    registry: WalkerRegistry,
}

impl Module {
    /// Register the base walkers, then walk the PCI bus once and register a
    /// name-specialized walker for every distinct device name observed.
    ///
    /// Discovery is best-effort: a monitor with no topology (or one that
    /// fails mid-walk) still loads with the base walkers. Duplicate names
    /// (several devices of the same type) fail re-registration and the
    /// failure is ignored; the first registration wins.
    pub fn load<M: RemoteMemory + ?Sized>(mem: &M) -> Result<Self, ModuleError> {
        let mut registry = WalkerRegistry::new();
        registry.register(WalkerSpec::host_bus())?;
        registry.register(WalkerSpec::pci_device())?;

        if let Ok(mut walker) = PciDeviceWalker::from_global(mem) {
            while let Ok(Some((_, dev))) = walker.next(mem) {
                let _ = registry.register(WalkerSpec::named_device(&dev.name));
            }
        }

        Ok(Self { registry })
    }

    pub fn registry(&self) -> &WalkerRegistry {
        &self.registry
    }
}

/// The commands this module exposes to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Project a virtio PCI device to its backing `VirtIODevice` address.
    PciDevToVirtio,
    /// Translate a guest (target) physical address to a monitor virtual
    /// address.
    TranslateAddress,
    /// Read the used event index of a vring.
    VringUsed,
    /// Read the avail event index of a vring.
    VringAvail,
}

impl Command {
    pub const ALL: [Command; 4] = [
        Command::PciDevToVirtio,
        Command::TranslateAddress,
        Command::VringUsed,
        Command::VringAvail,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::PciDevToVirtio => "pcidev2virtio",
            Command::TranslateAddress => "qemu_tpa2qva",
            Command::VringUsed => "qemu_vrused",
            Command::VringAvail => "qemu_vravail",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Command::PciDevToVirtio => "translate a virtio PCI device to its virtio equivalent",
            Command::TranslateAddress => {
                "translate a target physical address to a QEMU virtual address"
            }
            Command::VringUsed => "print the used event of the vring",
            Command::VringAvail => "print the avail event of the vring",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|cmd| cmd.name() == name)
    }

    /// Run the command against `addr`.
    ///
    /// Every command requires an explicit target address and accepts at most
    /// one optional argument (currently none are interpreted); anything else
    /// is a usage error, reported before any foreign memory is touched.
    pub fn run<M: RemoteMemory + ?Sized>(
        self,
        mem: &M,
        addr: Option<u64>,
        args: &[&str],
    ) -> Result<CommandOutput, CommandError> {
        let target = addr.ok_or(CommandError::MissingAddress { cmd: self.name() })?;
        if args.len() > 1 {
            return Err(CommandError::TooManyArgs { cmd: self.name() });
        }
        match self {
            Command::PciDevToVirtio => Ok(CommandOutput::Pointer(backing_device(mem, target)?)),
            Command::TranslateAddress => {
                let map = PhysMap::resolve(mem)?;
                match map.translate(mem, target)? {
                    Translation::Ram(host) => Ok(CommandOutput::Pointer(host)),
                    Translation::IoSpace => Ok(CommandOutput::IoSpace),
                }
            }
            Command::VringUsed => Ok(CommandOutput::Index(used_index(mem, target)?)),
            Command::VringAvail => Ok(CommandOutput::Index(avail_index(mem, target)?)),
        }
    }
}

/// Typed command results; the host decides presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutput {
    Pointer(u64),
    Index(u16),
    /// The target address maps device I/O; there is nothing to dereference.
    IoSpace,
}

impl fmt::Display for CommandOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutput::Pointer(p) => write!(f, "{p:#x}"),
            CommandOutput::Index(i) => write!(f, "{i}"),
            CommandOutput::IoSpace => write!(f, "address is in I/O space, not touching it"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("command `{cmd}` requires an explicit target address")]
    MissingAddress { cmd: &'static str },

    #[error("command `{cmd}` accepts at most one optional argument")]
    TooManyArgs { cmd: &'static str },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    Ring(#[from] RingError),
}

impl CommandError {
    /// True for malformed invocations (as opposed to inspection failures).
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            CommandError::MissingAddress { .. } | CommandError::TooManyArgs { .. }
        )
    }
}
