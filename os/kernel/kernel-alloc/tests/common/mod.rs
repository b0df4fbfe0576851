//! Simulated physical memory for the integration tests.

#![allow(dead_code)]

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;

use kernel_alloc::phys_mapper::OffsetPhysMapper;
use kernel_alloc::{BootConfig, MemoryManager};
use kernel_info::boot::{BootMemoryInfo, KernelImage, MemoryRegion};

/// 16 MiB of RAM.
pub const RAM_SIZE: usize = 16 << 20;

/// A PC-like map: low memory, the legacy hole, then extended memory.
pub const REGIONS: [MemoryRegion; 3] = [
    MemoryRegion::usable(0, 0x9_F000),
    MemoryRegion::reserved(0x9_F000, 0x6_1000),
    MemoryRegion::usable(0x10_0000, RAM_SIZE as u64 - 0x10_0000),
];

pub const KERNEL: KernelImage = KernelImage {
    start: 0x10_0000,
    end: 0x18_0000,
};

/// 4096 descriptors of 24 bytes behind the kernel image.
pub const TABLE_END: u32 = 0x19_8000;

pub const POOL_PAGES: u32 = 64;

/// Frames the boot directory and its tables take from the pool:
/// one directory, four tables for the low 16 MiB, four for the APIC window.
pub const BOOT_TABLE_FRAMES: u32 = 9;

/// Page-aligned zeroed heap memory standing in for physical RAM.
pub struct Ram {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl Ram {
    pub fn new(size: usize) -> Self {
        let layout = Layout::from_size_align(size, 4096).unwrap();
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) }).expect("out of host memory");
        Self { ptr, layout }
    }

    pub fn mapper(&self) -> OffsetPhysMapper {
        unsafe { OffsetPhysMapper::new(self.ptr.as_ptr(), self.layout.size()) }
    }

    pub fn byte(&self, pa: u32) -> u8 {
        assert!((pa as usize) < self.layout.size());
        unsafe { self.ptr.as_ptr().add(pa as usize).read_volatile() }
    }
}

impl Drop for Ram {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// Boot a memory manager over `mapper` with the standard map.
pub fn boot(mapper: &OffsetPhysMapper) -> MemoryManager<'_, OffsetPhysMapper> {
    let info = BootMemoryInfo {
        regions: &REGIONS,
        kernel: KERNEL,
    };
    let config = BootConfig {
        table_pool_pages: POOL_PAGES,
    };
    unsafe { MemoryManager::init(mapper, &info, config) }
}

/// Total free frames held by the buddy allocator.
pub fn buddy_free_frames(mm: &MemoryManager<'_, OffsetPhysMapper>) -> u32 {
    mm.free_area_counts()
        .iter()
        .enumerate()
        .map(|(k, n)| n << k)
        .sum()
}

/// Free runs as `(start, len)`.
pub fn runs(mm: &MemoryManager<'_, OffsetPhysMapper>) -> Vec<(u32, u32)> {
    let mut v = Vec::new();
    mm.runs(|pa, len| v.push((pa.as_u32(), len)));
    v
}
