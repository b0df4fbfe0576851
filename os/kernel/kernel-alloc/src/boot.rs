//! # Boot Initialization
//!
//! Builds the [`MemoryManager`] from the loader's firmware memory map.
//!
//! ```text
//!  0        1 MiB   kernel   table           highest usable end
//!  ├─────────┼────────┬──────┬───────────────────────┤
//!  │reserved │        │image │descr.│ pool │  runs ...  │
//!  └─────────┴────────┴──────┴──────┴──────┴────────────┘
//! ```
//!
//! The descriptor table lands right behind the kernel image. The first free
//! stretch that can hold the page-table pool seeds the buddy allocator;
//! every other free frame goes to the run allocator.

use crate::MemoryManager;
use crate::buddy::BuddyAllocator;
use crate::frame_table::PageFrame;
use crate::run_list::RunList;
use crate::vmm::link_table_window;
use core::ops::Range;
use core::{ptr, slice};
use kernel_info::boot::{BootMemoryInfo, MemoryRegion};
use kernel_info::memory::{
    APIC_MMIO_BASE, APIC_MMIO_SIZE, BASE_MEMORY_END, PAGE_SIZE, TABLE_POOL_PAGES, USER_BASE,
};
use kernel_memory_addresses::{FrameNumber, LinearAddress, PhysicalAddress};
use kernel_sync::SpinLock;
use kernel_vmem::{FrameAlloc, PageEntryBits, PhysMapper};

/// Runtime knobs for [`MemoryManager::init`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BootConfig {
    /// Frames handed to the buddy allocator for page directories and tables.
    pub table_pool_pages: u32,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            table_pool_pages: TABLE_POOL_PAGES,
        }
    }
}

const fn page_up(v: u64) -> u64 {
    (v + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1)
}

/// Frames `[0, n)` where `n` is the highest usable end, capped at 4 GiB.
#[allow(clippy::cast_possible_truncation)]
fn frame_count(regions: &[MemoryRegion]) -> u32 {
    let top = regions
        .iter()
        .filter(|r| r.is_usable())
        .map(MemoryRegion::end)
        .max()
        .unwrap_or(0)
        .min(1 << 32);
    (top / u64::from(PAGE_SIZE)) as u32
}

fn covered_by_usable(regions: &[MemoryRegion], start: u64, end: u64) -> bool {
    regions
        .iter()
        .any(|r| r.is_usable() && r.contains(start, end))
}

/// Whether the frame at `start` may be handed out.
fn is_free_frame(regions: &[MemoryRegion], held: &[Range<u64>], start: u64) -> bool {
    let end = start + u64::from(PAGE_SIZE);
    if end > u64::from(USER_BASE) {
        // Beyond the identity-mapped kernel region.
        return false;
    }
    covered_by_usable(regions, start, end)
        && !regions
            .iter()
            .any(|r| !r.is_usable() && r.overlaps(start, end))
        && !held.iter().any(|h| start < h.end && h.start < end)
}

/// Visit maximal stretches of frames in `[0, count)` for which `pred` holds.
fn for_each_stretch(count: u32, mut pred: impl FnMut(u32) -> bool, mut f: impl FnMut(u32, u32)) {
    let mut start = None;
    for idx in 0..=count {
        match (start, idx < count && pred(idx)) {
            (None, true) => start = Some(idx),
            (Some(s), false) => {
                f(s, idx - s);
                start = None;
            }
            _ => {}
        }
    }
}

impl<'m, M: PhysMapper> MemoryManager<'m, M> {
    /// Take over physical memory as described by `info`.
    ///
    /// # Safety
    /// - Every usable region must be RAM reachable through `mapper` and not
    ///   in use by anyone but the kernel image.
    /// - Call once.
    ///
    /// # Panics
    /// - If the descriptor table does not fit in usable RAM behind the kernel.
    /// - If no page directory can be allocated or the boot mappings fail.
    pub unsafe fn init(mapper: &'m M, info: &BootMemoryInfo<'_>, config: BootConfig) -> Self {
        let regions = info.regions;
        let count = frame_count(regions);
        for r in regions {
            log::info!("memory map: {r:?}");
        }

        let table_start = page_up(u64::from(info.kernel.end));
        let table_bytes = u64::from(count) * size_of::<PageFrame>() as u64;
        let table_end = page_up(table_start + table_bytes);
        assert!(
            table_end <= u64::from(USER_BASE) && covered_by_usable(regions, table_start, table_end),
            "frame table [{table_start:#X}, {table_end:#X}) outside usable memory"
        );
        log::info!("frame table: {count} frames at [{table_start:#X}, {table_end:#X})");

        #[allow(clippy::cast_possible_truncation)]
        let frames: &'m mut [PageFrame] = {
            // SAFETY: the descriptor table lies in usable RAM behind the kernel.
            let first: &'m mut PageFrame =
                unsafe { mapper.phys_to_mut(PhysicalAddress::new(table_start as u32)) };
            unsafe { slice::from_raw_parts_mut(ptr::from_mut(first), count as usize) }
        };
        let mut buddy = BuddyAllocator::new(frames);

        let held = [
            0..u64::from(BASE_MEMORY_END),
            u64::from(info.kernel.start)..u64::from(info.kernel.end),
            table_start..table_end,
        ];
        let is_free = |idx: u32| is_free_frame(regions, &held, u64::from(idx) * u64::from(PAGE_SIZE));

        let mut pool: Option<(u32, u32)> = None;
        for_each_stretch(count, is_free, |start, len| {
            if pool.is_none() && len >= config.table_pool_pages {
                pool = Some((start, config.table_pool_pages));
            }
        });
        let pool = pool.unwrap_or_else(|| {
            log::warn!(
                "no free stretch of {} frames; page-table pool is empty",
                config.table_pool_pages
            );
            (0, 0)
        });
        if pool.1 > 0 {
            buddy.add_range(FrameNumber::new(pool.0), pool.1);
        }
        log::info!(
            "page-table pool: {} frames at {}",
            pool.1,
            FrameNumber::new(pool.0)
        );

        let in_pool = |idx: u32| idx >= pool.0 && idx < pool.0 + pool.1;
        let mut runs = RunList::new();
        let mut run_bytes = 0u64;
        for_each_stretch(
            count,
            |idx| !in_pool(idx) && is_free(idx),
            |start, len| {
                for idx in start..start + len {
                    buddy.table_mut().at_mut(idx).set_reserved(false);
                }
                let pa = FrameNumber::new(start).base();
                // SAFETY: the stretch is free RAM reachable through `mapper`.
                unsafe { runs.free(mapper, pa, len * PAGE_SIZE) };
                run_bytes += u64::from(len) * u64::from(PAGE_SIZE);
            },
        );
        log::info!("run allocator: {} KiB free", run_bytes / 1024);

        let Some(boot_dir) = buddy.alloc_4k() else {
            panic!("no frame for the boot page directory");
        };
        mapper.directory_mut(boot_dir).zero();
        link_table_window(mapper, boot_dir);

        let mm = Self {
            mapper,
            buddy: SpinLock::new("buddy", buddy),
            runs: SpinLock::new("runs", runs),
            vm: SpinLock::new("vm", ()),
            boot_dir,
        };
        let kernel_frames = count.min(USER_BASE / PAGE_SIZE);
        mm.map_boot_regions(regions, kernel_frames);

        let check_end = (2 * BASE_MEMORY_END).min(kernel_frames * PAGE_SIZE);
        let bad = mm.check_identity_map(boot_dir, BASE_MEMORY_END, check_end);
        if bad > 0 {
            log::warn!("identity map: {bad} addresses wrong in [{BASE_MEMORY_END:#X}, {check_end:#X})");
        }
        log::info!("boot directory at {boot_dir}");
        mm
    }

    /// Identity map base memory, usable RAM in the kernel region and the
    /// APIC window into the boot directory.
    fn map_boot_regions(&self, regions: &[MemoryRegion], kernel_frames: u32) {
        let perm = PageEntryBits::user_rw();
        let map = |start: u32, len: u32| {
            let pa = PhysicalAddress::new(start);
            if let Err(e) =
                self.map_kernel_range(self.boot_dir, pa, LinearAddress::new(start), len, perm)
            {
                panic!("boot mapping of [{start:#X}, +{len:#X}) failed: {e}");
            }
        };

        map(0, BASE_MEMORY_END);

        let first = BASE_MEMORY_END / PAGE_SIZE;
        for_each_stretch(
            kernel_frames,
            |idx| {
                let start = u64::from(idx) * u64::from(PAGE_SIZE);
                idx >= first && covered_by_usable(regions, start, start + u64::from(PAGE_SIZE))
            },
            |start, len| map(start * PAGE_SIZE, len * PAGE_SIZE),
        );

        map(APIC_MMIO_BASE, APIC_MMIO_SIZE);
        log::debug!("boot directory maps the APIC window at {APIC_MMIO_BASE:#X}");
    }
}
