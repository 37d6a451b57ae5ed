//! A synthetic monitor image for integration tests: one host bus, one PCI
//! bus, a guest-RAM arena registered in the block list, and a radix table
//! rooted at the usual symbol. Host pointers produced by translation point
//! back into the image itself, so translated memory stays readable through
//! the same [`FlatImage`].

#![allow(dead_code)]

use qscope_layout::pci::{HostBus, PciBus, PciDevice, VirtioPciProxy};
use qscope_layout::phys::{
    PhysPageDesc, INTERMEDIATE_LEVELS, L2_BITS, L2_SIZE, PAGE_BITS, P_L1_SHIFT, P_L1_SIZE,
};
use qscope_layout::ram::{RamBlock, RamList};
use qscope_layout::symbols;
use qscope_layout::vring::VRing;
use qscope_remote::{FlatImage, RemoteMemory};

pub const BASE: u64 = 0x5000_0000;

pub struct MonitorImage {
    pub img: FlatImage,
    pub host_bus_addr: u64,
    pub bus_addr: u64,
    radix_root: u64,
    ram_list: u64,
    last_block: Option<u64>,
    next_free: u64,
}

impl MonitorImage {
    pub fn new() -> Self {
        let mut img = FlatImage::new(BASE, 0x40_0000);

        let head_sym = BASE;
        let host_bus_addr = BASE + 0x100;
        let bus_addr = BASE + 0x200;
        img.define_symbol(symbols::HOST_BUSES, head_sym);
        img.put_ptr(head_sym, host_bus_addr);
        img.put_u32(host_bus_addr + HostBus::DOMAIN_OFFSET as u64, 0);
        img.put_ptr(host_bus_addr + HostBus::BUS_OFFSET as u64, bus_addr);

        let ram_list = BASE + 0x300;
        img.define_symbol(symbols::RAM_LIST, ram_list);

        let radix_root = BASE + 0x1000;
        img.define_symbol(symbols::PHYS_MAP_ROOT, radix_root);

        Self {
            img,
            host_bus_addr,
            bus_addr,
            radix_root,
            ram_list,
            last_block: None,
            next_free: radix_root + P_L1_SIZE * 8,
        }
    }

    pub fn alloc(&mut self, len: u64) -> u64 {
        let addr = self.next_free;
        self.next_free += len;
        addr
    }

    /// Place a device record named `name` in the given bus slot; the record
    /// is shaped as a virtio proxy with `vdev` as its backing pointer.
    pub fn device(&mut self, slot: usize, name: &str, vdev: u64) -> u64 {
        let addr = self.alloc(VirtioPciProxy::SIZE as u64);
        let mut bytes = name.as_bytes().to_vec();
        bytes.push(0);
        self.img
            .put_bytes(addr + PciDevice::NAME_OFFSET as u64, &bytes);
        self.img
            .put_u32(addr + PciDevice::DEVFN_OFFSET as u64, slot as u32);
        self.img
            .put_ptr(addr + VirtioPciProxy::VDEV_OFFSET as u64, vdev);
        self.img.put_ptr(
            self.bus_addr + PciBus::DEVICES_OFFSET as u64 + slot as u64 * 8,
            addr,
        );
        addr
    }

    /// Append a RAM block to the registry.
    pub fn ram_block(&mut self, offset: u64, length: u64, host: u64) {
        let list = self.ram_list;
        let block = self.alloc(RamBlock::SIZE as u64);
        self.img.put_ptr(block + RamBlock::HOST_OFFSET as u64, host);
        self.img.put_u64(block + RamBlock::OFFSET_OFFSET as u64, offset);
        self.img.put_u64(block + RamBlock::LENGTH_OFFSET as u64, length);
        match self.last_block {
            Some(prev) => self.img.put_ptr(prev + RamBlock::NEXT_OFFSET as u64, block),
            None => self.img.put_ptr(list + RamList::BLOCKS_OFFSET as u64, block),
        }
        self.last_block = Some(block);
    }

    /// Carve a guest-RAM arena inside the image: registers a block mapping
    /// guest-physical offsets `[offset, offset+length)` to image-backed host
    /// memory and returns the host base.
    pub fn guest_ram(&mut self, offset: u64, length: u64) -> u64 {
        let host = self.alloc(length);
        self.ram_block(offset, length, host);
        host
    }

    /// Install a leaf descriptor for the page containing `gpa`.
    pub fn map_page(&mut self, gpa: u64, phys_offset: u64) {
        let pfn = gpa >> PAGE_BITS;
        let mut entry = self.radix_root + ((pfn >> P_L1_SHIFT) & (P_L1_SIZE - 1)) * 8;
        for level in (1..=INTERMEDIATE_LEVELS).rev() {
            let array = self.ensure(entry, L2_SIZE * 8);
            entry = array + ((pfn >> (level * L2_BITS)) & (L2_SIZE - 1)) * 8;
        }
        let descs = self.ensure(entry, L2_SIZE * PhysPageDesc::SIZE as u64);
        self.img.put_u64(
            descs + (pfn & (L2_SIZE - 1)) * PhysPageDesc::SIZE as u64,
            phys_offset,
        );
    }

    fn ensure(&mut self, entry_addr: u64, array_len: u64) -> u64 {
        let existing = self.img.read_ptr(entry_addr).unwrap();
        if existing != 0 {
            return existing;
        }
        let array = self.alloc(array_len);
        self.img.put_ptr(entry_addr, array);
        array
    }

    /// Write a `VRing` record and return its address.
    pub fn vring(&mut self, num: u32, desc: u64, avail: u64, used: u64) -> u64 {
        let addr = self.alloc(VRing::SIZE as u64);
        self.img.put_u32(addr + VRing::NUM_OFFSET as u64, num);
        self.img.put_u64(addr + VRing::DESC_OFFSET as u64, desc);
        self.img.put_u64(addr + VRing::AVAIL_OFFSET as u64, avail);
        self.img.put_u64(addr + VRing::USED_OFFSET as u64, used);
        addr
    }
}
