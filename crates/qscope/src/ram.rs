//! Guest-RAM block registry lookup.

use qscope_layout::ram::{RamBlock, RamList};
use qscope_layout::symbols;
use qscope_remote::{RemoteError, RemoteMemory};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RamLookupError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// No registered RAM block covers the address. Not fatal by itself:
    /// guest-physical addresses can legitimately point at I/O regions
    /// handled elsewhere.
    #[error("no RAM block covers guest-physical address {addr:#x}")]
    NotFound { addr: u64 },
}

/// Map a guest-physical RAM address to the host address backing it.
///
/// Linear scan of the registry's block list; the registry guarantees blocks
/// do not overlap and imposes no ordering, so the first containing block is
/// the only one.
pub fn locate_ram_ptr<M: RemoteMemory + ?Sized>(
    mem: &M,
    ram_addr: u64,
) -> Result<u64, RamLookupError> {
    let sym = mem.lookup_symbol(symbols::RAM_LIST)?;
    let list = RamList::read(mem, sym)?;

    let mut cursor = list.blocks;
    while cursor != 0 {
        let block = RamBlock::read(mem, cursor)?;
        if block.contains(ram_addr) {
            return Ok(block.host_addr(ram_addr));
        }
        cursor = block.next;
    }
    Err(RamLookupError::NotFound { addr: ram_addr })
}

/// Enumerates the registry's RAM blocks in list order.
#[derive(Debug, Clone)]
pub struct RamBlockWalker {
    cursor: u64,
}

impl RamBlockWalker {
    pub fn from_global<M: RemoteMemory + ?Sized>(mem: &M) -> Result<Self, RamLookupError> {
        let sym = mem.lookup_symbol(symbols::RAM_LIST)?;
        let list = RamList::read(mem, sym)?;
        Ok(Self {
            cursor: list.blocks,
        })
    }

    pub fn next<M: RemoteMemory + ?Sized>(
        &mut self,
        mem: &M,
    ) -> Result<Option<(u64, RamBlock)>, RamLookupError> {
        if self.cursor == 0 {
            return Ok(None);
        }
        let addr = self.cursor;
        let block = RamBlock::read(mem, addr)?;
        self.cursor = block.next;
        Ok(Some((addr, block)))
    }
}
