#![forbid(unsafe_code)]

//! Access to a foreign (inspected) process's address space.
//!
//! Everything qscope knows about the inspected QEMU process comes through two
//! primitives: "resolve a global symbol name to an address" and "read exactly
//! N bytes at address A". Both are supplied by whatever host embeds the
//! library: a live debugger, or [`FlatImage`] when working against a dumped
//! memory image offline.
//!
//! Every read is fallible. The inspected process is not coordinated with us:
//! a pointer fetched one moment may be stale the next, so callers re-read on
//! every step and treat any failed or short read as an abort of the current
//! operation, never of the whole host.

use std::collections::HashMap;

use thiserror::Error;

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors surfaced by the remote-memory primitives.
///
/// `SymbolNotFound` usually means the inspected binary does not match the
/// structure layouts this library was built against (version mismatch);
/// `ReadFailed` means the address is simply not mapped/readable in the
/// inspected image. The two are kept distinct because only the former calls
/// the data model itself into question.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("failed to read {len} bytes at {addr:#x} in the inspected process")]
    ReadFailed { addr: u64, len: usize },

    #[error("symbol `{name}` not found in the inspected process")]
    SymbolNotFound { name: String },
}

impl RemoteError {
    pub fn symbol_not_found(name: &str) -> Self {
        RemoteError::SymbolNotFound {
            name: name.to_owned(),
        }
    }
}

/// Sized, typed reads from the inspected process's address space.
///
/// Implementations must treat a partial read as a failure: `read_into` either
/// fills the whole buffer or returns `ReadFailed`. The trait is object-safe
/// so walker and command plumbing can hold `&dyn RemoteMemory`.
///
/// All multi-byte reads are little-endian; the inspected monitor is an LP64
/// x86-64 build, so pointers are 8 bytes.
pub trait RemoteMemory {
    /// Resolve a global symbol of the inspected process to its address.
    fn lookup_symbol(&self, name: &str) -> RemoteResult<u64>;

    /// Read exactly `buf.len()` bytes at `addr`.
    fn read_into(&self, addr: u64, buf: &mut [u8]) -> RemoteResult<()>;

    fn read_u16(&self, addr: u64) -> RemoteResult<u16> {
        let mut buf = [0u8; 2];
        self.read_into(addr, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32(&self, addr: u64) -> RemoteResult<u32> {
        let mut buf = [0u8; 4];
        self.read_into(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&self, addr: u64) -> RemoteResult<u64> {
        let mut buf = [0u8; 8];
        self.read_into(addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read a pointer-sized value (LP64: 8 bytes).
    fn read_ptr(&self, addr: u64) -> RemoteResult<u64> {
        self.read_u64(addr)
    }

    fn read_bytes(&self, addr: u64, len: usize) -> RemoteResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_into(addr, &mut buf)?;
        Ok(buf)
    }
}

/// A contiguous memory image with a symbol table.
///
/// This is the offline [`RemoteMemory`] backend: a raw dump of (part of) the
/// inspected process's address space loaded at a known base, plus a symbol
/// map. It doubles as the fixture builder for tests: the `put_*` methods
/// compose synthetic images byte-for-byte in the same layouts the engine
/// decodes.
#[derive(Debug, Clone, Default)]
pub struct FlatImage {
    base: u64,
    mem: Vec<u8>,
    symbols: HashMap<String, u64>,
}

impl FlatImage {
    /// An all-zero image of `len` bytes loaded at `base`.
    pub fn new(base: u64, len: usize) -> Self {
        Self {
            base,
            mem: vec![0u8; len],
            symbols: HashMap::new(),
        }
    }

    /// Wrap raw dump contents loaded at `base`.
    pub fn from_bytes(base: u64, mem: Vec<u8>) -> Self {
        Self {
            base,
            mem,
            symbols: HashMap::new(),
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.mem.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mem.is_empty()
    }

    /// Associate `name` with `addr` in the image's symbol table.
    pub fn define_symbol(&mut self, name: &str, addr: u64) {
        self.symbols.insert(name.to_owned(), addr);
    }

    fn offset_of(&self, addr: u64, len: usize) -> Option<usize> {
        let off = addr.checked_sub(self.base)?;
        let off = usize::try_from(off).ok()?;
        let end = off.checked_add(len)?;
        (end <= self.mem.len()).then_some(off)
    }

    /// Write raw bytes at `addr`.
    ///
    /// Panics if the range falls outside the image; the `put_*` family is a
    /// fixture-construction API and an out-of-range write is a bug in the
    /// image being composed, not a runtime condition.
    pub fn put_bytes(&mut self, addr: u64, bytes: &[u8]) {
        let off = self
            .offset_of(addr, bytes.len())
            .unwrap_or_else(|| panic!("put_bytes out of range: {:#x}+{}", addr, bytes.len()));
        self.mem[off..off + bytes.len()].copy_from_slice(bytes);
    }

    pub fn put_u16(&mut self, addr: u64, value: u16) {
        self.put_bytes(addr, &value.to_le_bytes());
    }

    pub fn put_u32(&mut self, addr: u64, value: u32) {
        self.put_bytes(addr, &value.to_le_bytes());
    }

    pub fn put_u64(&mut self, addr: u64, value: u64) {
        self.put_bytes(addr, &value.to_le_bytes());
    }

    /// Write a pointer-sized value (LP64: 8 bytes).
    pub fn put_ptr(&mut self, addr: u64, value: u64) {
        self.put_u64(addr, value);
    }
}

impl RemoteMemory for FlatImage {
    fn lookup_symbol(&self, name: &str) -> RemoteResult<u64> {
        self.symbols
            .get(name)
            .copied()
            .ok_or_else(|| RemoteError::symbol_not_found(name))
    }

    fn read_into(&self, addr: u64, buf: &mut [u8]) -> RemoteResult<()> {
        let off = self
            .offset_of(addr, buf.len())
            .ok_or(RemoteError::ReadFailed {
                addr,
                len: buf.len(),
            })?;
        buf.copy_from_slice(&self.mem[off..off + buf.len()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_reads_are_little_endian() {
        let mut img = FlatImage::new(0x1000, 0x100);
        img.put_bytes(0x1000, &[0x34, 0x12]);
        img.put_bytes(0x1010, &[0xef, 0xbe, 0xad, 0xde, 0x00, 0x00, 0x00, 0x00]);

        assert_eq!(img.read_u16(0x1000).unwrap(), 0x1234);
        assert_eq!(img.read_u32(0x1010).unwrap(), 0xdead_beef);
        assert_eq!(img.read_u64(0x1010).unwrap(), 0xdead_beef);
        assert_eq!(img.read_ptr(0x1010).unwrap(), 0xdead_beef);
    }

    #[test]
    fn out_of_range_reads_fail_without_partial_results() {
        let img = FlatImage::new(0x1000, 0x10);

        // Entirely below and above the image.
        assert_eq!(
            img.read_u64(0x0),
            Err(RemoteError::ReadFailed { addr: 0, len: 8 })
        );
        assert!(img.read_u64(0x2000).is_err());

        // Straddling the end: must fail, not truncate.
        assert_eq!(
            img.read_u64(0x100c),
            Err(RemoteError::ReadFailed { addr: 0x100c, len: 8 })
        );

        // Address arithmetic must not wrap.
        assert!(img.read_u64(u64::MAX - 3).is_err());
    }

    #[test]
    fn symbol_lookup() {
        let mut img = FlatImage::new(0, 0x10);
        img.define_symbol("ram_list", 0x8);

        assert_eq!(img.lookup_symbol("ram_list").unwrap(), 0x8);
        assert_eq!(
            img.lookup_symbol("host_buses"),
            Err(RemoteError::symbol_not_found("host_buses"))
        );
    }
}
