//! # Kernel Memory Allocation and Virtual Memory Management
//!
//! The physical and virtual memory manager of the kernel. It owns every
//! usable physical frame, hands frames out, reclaims them when nothing
//! references them any more, and maintains each address space's two-level
//! page table.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │            MemoryManager (ownership root)           │
//! │    • public allocation and mapping operations       │
//! │    • boot initialization from the firmware map      │
//! └──────┬──────────────────┬───────────────────┬───────┘
//!        │ mapper lock      │                   │
//! ┌──────▼──────────┐       │                   │
//! │  Vmm            │───────┼──────────┐        │
//! │  • insert/remove│       │          │        │
//! │  • mapcounts    │       │          │        │
//! └─────────────────┘       │          │        │
//!        allocator lock ┌───▼──────────▼──┐ ┌───▼───────────────┐
//!                       │ BuddyAllocator  │ │ RunList           │ run lock
//!                       │ • frame table   │ │ • address ordered │
//!                       │ • free areas    │ │ • coalescing      │
//!                       └─────────────────┘ └───────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Frame Table and Buddy Allocator ([`frame_table`], [`buddy`])
//!
//! One descriptor per physical frame and power-of-two free blocks of orders
//! `0..=10`. Page directories and page tables come from here.
//!
//! ### Run Allocator ([`run_list`])
//!
//! Page-multiple byte ranges, first fit, kept sorted and coalesced. Data
//! pages for processes and kernel stacks come from here and return here
//! once unreferenced.
//!
//! ### Mapper
//!
//! Installs and removes 4 KiB mappings, keeping every frame's mapcount
//! consistent with the page tables that reference it.
//!
//! ## Locking
//!
//! Three named spin locks guard the allocator, the run list and the page
//! tables. The order is always mapper → allocator or mapper → run; the
//! allocator and run locks are never held together.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod boot;
pub mod buddy;
pub mod frame_table;
pub mod phys_mapper;
pub mod run_list;
mod vmm;

pub use crate::boot::BootConfig;
use crate::buddy::BuddyAllocator;
pub use crate::frame_table::{FrameFlags, FrameInfo};
use crate::run_list::RunList;
use crate::vmm::{Vmm, link_table_window};
pub use crate::vmm::{MapError, UnmapError};
use kernel_info::memory::{MAX_ORDER, PAGE_SIZE, PAGE_TABLE_WINDOW, USER_BASE, USER_END};
use kernel_memory_addresses::{FrameNumber, LinearAddress, PhysicalAddress};
use kernel_sync::SpinLock;
use kernel_vmem::address_space::RootPage;
use kernel_vmem::{AddressSpace, FrameAlloc, L2Index, PageEntryBits, PhysMapper};
pub use kernel_vmem::{TranslateError, WalkError};

/// Owner of all physical memory and page tables.
pub struct MemoryManager<'m, M: PhysMapper> {
    mapper: &'m M,
    /// Frame descriptors and buddy free areas.
    buddy: SpinLock<BuddyAllocator<'m>>,
    /// Free runs.
    runs: SpinLock<RunList>,
    /// Serializes page-table edits.
    vm: SpinLock<()>,
    boot_dir: RootPage,
}

impl<'m, M: PhysMapper> MemoryManager<'m, M> {
    fn vmm(&self, dir: RootPage) -> Vmm<'_, 'm, M> {
        Vmm::new(
            AddressSpace::from_root(self.mapper, dir),
            self.boot_dir,
            self.mapper,
            &self.buddy,
            &self.runs,
        )
    }

    /// One page from the run allocator.
    pub fn allocate_page(&self) -> Option<PhysicalAddress> {
        self.allocate_run(PAGE_SIZE)
    }

    /// `len` bytes of contiguous physical memory from the run allocator.
    ///
    /// # Panics
    /// If `len` is not a positive multiple of the page size.
    pub fn allocate_run(&self, len: u32) -> Option<PhysicalAddress> {
        let pa = self.runs.lock().alloc(self.mapper, len);
        if pa.is_none() {
            log::warn!("allocate_run: out of memory for {len:#X} bytes");
        }
        pa
    }

    /// Return `[pa, pa + len)` to the run allocator.
    ///
    /// # Safety
    /// The range must have come from [`allocate_run`](Self::allocate_run) (or
    /// be otherwise unused RAM) and must not be referenced any more.
    ///
    /// # Panics
    /// On a bad length or when the range overlaps a free run.
    pub unsafe fn free_run(&self, pa: PhysicalAddress, len: u32) {
        unsafe { self.runs.lock().free(self.mapper, pa, len) };
    }

    /// A block of `2^order` frames from the buddy allocator.
    ///
    /// # Panics
    /// If `order > 10`.
    pub fn allocate_block(&self, order: usize) -> Option<FrameNumber> {
        let block = self.buddy.lock().alloc(order);
        if block.is_none() {
            log::warn!("allocate_block: no free block of order {order}");
        }
        block
    }

    /// Return a block to the buddy allocator.
    ///
    /// # Safety
    /// The block must have come from [`allocate_block`](Self::allocate_block)
    /// with the same order and must not be referenced any more.
    pub unsafe fn free_block(&self, frame: FrameNumber, order: usize) {
        self.buddy.lock().free(frame, order);
    }

    /// Map `[la, la + len)` to `[pa, pa + len)` in `dir`, taking a reference
    /// on every frame outside the page-table pool.
    ///
    /// # Errors
    /// - [`MapError::NotAligned`] if an address or `len` is not page aligned.
    /// - [`MapError::Exists`] if a page is already mapped.
    /// - [`MapError::NoMemory`] if a page table could not be allocated.
    /// - [`MapError::NotShared`] if a kernel-region page of a directory other
    ///   than the boot directory has no table shared from the boot directory.
    /// - [`MapError::PageTableWindow`] for pages in the page-table window.
    ///
    /// Pages mapped before the failing one stay mapped.
    pub fn map_range(
        &self,
        dir: RootPage,
        pa: PhysicalAddress,
        la: LinearAddress,
        len: u32,
        perm: PageEntryBits,
    ) -> Result<(), MapError> {
        let _vm = self.vm.lock();
        self.vmm(dir).map_range(pa, la, len, perm, false)
    }

    /// Like [`map_range`](Self::map_range), but as kernel-internal mappings
    /// that take no frame references.
    ///
    /// # Errors
    /// As for [`map_range`](Self::map_range).
    pub fn map_kernel_range(
        &self,
        dir: RootPage,
        pa: PhysicalAddress,
        la: LinearAddress,
        len: u32,
        perm: PageEntryBits,
    ) -> Result<(), MapError> {
        let _vm = self.vm.lock();
        self.vmm(dir).map_range(pa, la, len, perm, true)
    }

    /// Remove every mapping in `[la, la + len)`.
    ///
    /// # Errors
    /// - [`UnmapError::NotAligned`] if `la` or `len` is not page aligned.
    /// - [`UnmapError::AlreadyFree`] at the first page that is not mapped.
    /// - [`UnmapError::PageTableWindow`] for pages in the page-table window.
    pub fn unmap_range(&self, dir: RootPage, la: LinearAddress, len: u32) -> Result<(), UnmapError> {
        let _vm = self.vm.lock();
        self.vmm(dir).unmap_range(la, len)
    }

    /// Remove every mapping in the user region of `dir`, releasing its page tables.
    ///
    /// # Errors
    /// The first removal error.
    pub fn unmap_all_user(&self, dir: RootPage) -> Result<(), UnmapError> {
        let _vm = self.vm.lock();
        self.vmm(dir).unmap_all_user()
    }

    /// Translate `la` in `dir`.
    ///
    /// # Errors
    /// [`TranslateError::NoDirectoryEntry`] or [`TranslateError::NoTableEntry`].
    pub fn translate(&self, dir: RootPage, la: LinearAddress) -> Result<PhysicalAddress, TranslateError> {
        let _vm = self.vm.lock();
        self.vmm(dir).translate(la)
    }

    /// Turn on paging for the executing processor with `dir` active.
    ///
    /// # Safety
    /// See [`kernel_vmem::enable_paging`]. Call once per processor.
    #[cfg(all(feature = "asm", any(target_arch = "x86", target_arch = "x86_64")))]
    #[allow(clippy::unused_self)]
    pub unsafe fn enable_translation(&self, dir: RootPage) {
        log::info!("enabling paging with directory {dir}");
        unsafe { kernel_vmem::enable_paging(dir) };
    }

    /// The directory built at initialization.
    #[must_use]
    pub const fn boot_directory(&self) -> RootPage {
        self.boot_dir
    }

    /// A fresh directory sharing the boot directory's kernel region, with
    /// its own page-table window.
    ///
    /// Returns `None` if no frame is left for the directory.
    pub fn create_address_space(&self) -> Option<RootPage> {
        let _vm = self.vm.lock();
        let Some(dir) = self.buddy.lock().alloc_4k() else {
            log::warn!("create_address_space: no frame for a directory");
            return None;
        };

        let boot = AddressSpace::from_root(self.mapper, self.boot_dir);
        let space = AddressSpace::from_root(self.mapper, dir);
        space.clear();
        space.share_entries(&boot, kernel_entries_below());
        space.share_entries(&boot, kernel_entries_above());
        link_table_window(self.mapper, dir);
        log::debug!("created address space {dir}");
        Some(dir)
    }

    /// Unmap a directory's user region and release the directory.
    ///
    /// # Errors
    /// The first removal error; the directory is kept in that case.
    ///
    /// # Panics
    /// If `dir` is the boot directory.
    pub fn destroy_address_space(&self, dir: RootPage) -> Result<(), UnmapError> {
        assert_ne!(dir, self.boot_dir, "destroying the boot directory");
        self.unmap_all_user(dir)?;
        self.buddy.lock().free(dir.frame(), 0);
        log::debug!("destroyed address space {dir}");
        Ok(())
    }

    /// Snapshot of `frame`'s descriptor, if the frame is in the table.
    #[must_use]
    pub fn frame_info(&self, frame: FrameNumber) -> Option<FrameInfo> {
        self.buddy.lock().frame_info(frame)
    }

    /// Number of frames in the descriptor table.
    #[must_use]
    pub fn frame_count(&self) -> u32 {
        self.buddy.lock().table().len()
    }

    /// Free buddy blocks per order.
    #[must_use]
    pub fn free_area_counts(&self) -> [u32; MAX_ORDER + 1] {
        self.buddy.lock().free_counts()
    }

    /// Visit every free buddy block as `(head frame, order)`.
    pub fn free_blocks(&self, f: impl FnMut(FrameNumber, usize)) {
        self.buddy.lock().for_each_free_block(f);
    }

    /// Visit every free run as `(start, len)` in address order.
    pub fn runs(&self, f: impl FnMut(PhysicalAddress, u32)) {
        self.runs.lock().for_each(self.mapper, f);
    }

    /// Total bytes held by the run allocator.
    #[must_use]
    pub fn free_run_bytes(&self) -> u64 {
        self.runs.lock().free_bytes(self.mapper)
    }

    /// Count addresses in `[start, end)`, sampled every half page, that
    /// `dir` does not map to themselves.
    ///
    /// Every mismatch is logged.
    pub fn check_identity_map(&self, dir: RootPage, start: u32, end: u32) -> usize {
        let _vm = self.vm.lock();
        let vmm = self.vmm(dir);
        (start..end)
            .step_by(PAGE_SIZE as usize / 2)
            .filter(|&a| {
                let la = LinearAddress::new(a);
                match vmm.translate(la) {
                    Ok(pa) if pa.as_u32() == a => false,
                    other => {
                        log::warn!("identity map: {la} -> {other:?}");
                        true
                    }
                }
            })
            .count()
    }
}

/// Directory indices of the kernel region below the user region.
const fn kernel_entries_below() -> core::ops::Range<usize> {
    0..L2Index::from(LinearAddress::new(USER_BASE)).as_usize()
}

/// Directory indices of the kernel region above the user region, up to the
/// page-table window.
const fn kernel_entries_above() -> core::ops::Range<usize> {
    L2Index::from(LinearAddress::new(USER_END)).as_usize()
        ..L2Index::from(LinearAddress::new(PAGE_TABLE_WINDOW)).as_usize()
}

