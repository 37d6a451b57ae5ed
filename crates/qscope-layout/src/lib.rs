#![forbid(unsafe_code)]

//! Read-only projections of the inspected QEMU process's data structures.
//!
//! Each type here mirrors the in-memory layout of one structure of the
//! monitor (x86-64 LP64 build): field offsets and record sizes are spelled
//! out as named constants, and `read` fetches exactly one record's bytes via
//! [`qscope_remote::RemoteMemory`] and decodes the fields this library
//! consumes. Nothing is ever written back; every value is a transient
//! snapshot of foreign memory at the moment of the read.
//!
//! The offsets model the monitor build these tools are used against. When the
//! inspected binary's layout drifts, reads still "succeed" but decode
//! nonsense; symbol lookup failures are the usual early warning for that
//! kind of version mismatch.

pub mod pci;
pub mod phys;
pub mod ram;
pub mod vring;

/// Global symbols of the inspected process that the engine anchors on.
pub mod symbols {
    /// Head of the host-bus list. The symbol is an anonymous list head with
    /// no recoverable static type; see [`crate::pci`] for how it is decoded.
    pub const HOST_BUSES: &str = "host_buses";

    /// The guest-RAM block registry ([`crate::ram::RamList`]).
    pub const RAM_LIST: &str = "ram_list";

    /// Root array of the physical-page radix table. The symbol address *is*
    /// the root array, not a pointer to it.
    pub const PHYS_MAP_ROOT: &str = "l1_phys_map";
}

pub(crate) fn get_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

pub(crate) fn get_u64(buf: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(buf[off..off + 8].try_into().unwrap())
}

/// Decode a fixed-size NUL-padded C string field.
pub(crate) fn get_cstr(buf: &[u8], off: usize, len: usize) -> String {
    let field = &buf[off..off + len];
    let end = field.iter().position(|&b| b == 0).unwrap_or(len);
    String::from_utf8_lossy(&field[..end]).into_owned()
}
