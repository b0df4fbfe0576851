//! Reference-counting page mapper.
//!
//! Installs and removes 4 KiB mappings in one address space while keeping
//! each frame's mapcount in step:
//!
//! - a counted insert takes a reference on the frame,
//! - removing a counted entry drops it, and the last drop returns the frame
//!   to the run allocator,
//! - kernel-internal inserts take no reference; their entries carry the
//!   `uncounted` bit so removal leaves the count alone,
//! - frames of the page-table pool are never counted; whoever allocated the
//!   block frees it.
//!
//! Kernel-region slots belong to the boot directory. Other directories may
//! only fill tables they share from it, and nobody edits the page-table
//! window through this interface.
//!
//! The caller holds the mapper lock for the whole operation. The allocator
//! and run locks are taken one at a time beneath it, never together.

use crate::buddy::BuddyAllocator;
use crate::run_list::RunList;
use kernel_info::memory::{
    ENTRIES_PER_TABLE, PAGE_SHIFT, PAGE_SIZE, PAGE_TABLE_WINDOW, USER_BASE, USER_END,
    is_user_address,
};
use kernel_memory_addresses::{LinearAddress, PhysicalAddress, Size4K};
use kernel_sync::SpinLock;
use kernel_vmem::address_space::RootPage;
use kernel_vmem::page_table::pd::L2Index;
use kernel_vmem::{
    AddressSpace, PageEntryBits, PdEntry, PhysMapper, PtEntry, TranslateError, WalkError,
};

/// Why a mapping could not be installed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    #[error("address or length not page aligned")]
    NotAligned,
    #[error("linear address already mapped")]
    Exists,
    #[error("out of memory for a page table")]
    NoMemory,
    #[error("kernel-region slot not shared from the boot directory")]
    NotShared,
    #[error("linear address inside the page-table window")]
    PageTableWindow,
}

/// Why a mapping could not be removed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum UnmapError {
    #[error("address or length not page aligned")]
    NotAligned,
    #[error("linear address not mapped")]
    AlreadyFree,
    #[error("linear address inside the page-table window")]
    PageTableWindow,
}

const fn in_table_window(la: LinearAddress) -> bool {
    la.as_u32() >= PAGE_TABLE_WINDOW
}

/// Link `dir` into its own page-table window slot.
pub(crate) fn link_table_window<M: PhysMapper>(mapper: &M, dir: RootPage) {
    let slot = L2Index::from(LinearAddress::new(PAGE_TABLE_WINDOW));
    mapper
        .directory_mut(dir)
        .set(slot, PdEntry::make_table(dir, PageEntryBits::kernel_rw()));
}

impl From<WalkError> for MapError {
    fn from(value: WalkError) -> Self {
        match value {
            WalkError::NoMemory | WalkError::NoTable => Self::NoMemory,
        }
    }
}

/// Pages in `len` bytes starting at `start`, or `None` if the range is not
/// page aligned or runs past 4 GiB.
fn page_count(start: u32, len: u32) -> Option<u32> {
    if !start.is_multiple_of(PAGE_SIZE) || !len.is_multiple_of(PAGE_SIZE) {
        return None;
    }
    if u64::from(start) + u64::from(len) > 1 << 32 {
        return None;
    }
    Some(len / PAGE_SIZE)
}

/// One address space plus the frame sources its edits need.
pub(crate) struct Vmm<'a, 'm, M: PhysMapper> {
    aspace: AddressSpace<'a, M>,
    /// Owner of the kernel-region tables.
    boot: RootPage,
    mapper: &'a M,
    buddy: &'a SpinLock<BuddyAllocator<'m>>,
    runs: &'a SpinLock<RunList>,
}

impl<'a, 'm, M: PhysMapper> Vmm<'a, 'm, M> {
    pub(crate) const fn new(
        aspace: AddressSpace<'a, M>,
        boot: RootPage,
        mapper: &'a M,
        buddy: &'a SpinLock<BuddyAllocator<'m>>,
        runs: &'a SpinLock<RunList>,
    ) -> Self {
        Self {
            aspace,
            boot,
            mapper,
            buddy,
            runs,
        }
    }

    /// Map one page `la → pa` with `perm`.
    ///
    /// Unless `kernel_mapping` or the frame is a pool frame, it gains a
    /// reference.
    pub(crate) fn insert(
        &self,
        pa: PhysicalAddress,
        la: LinearAddress,
        perm: PageEntryBits,
        kernel_mapping: bool,
    ) -> Result<(), MapError> {
        if !pa.is_aligned::<Size4K>() || !la.is_aligned::<Size4K>() {
            return Err(MapError::NotAligned);
        }
        if in_table_window(la) {
            return Err(MapError::PageTableWindow);
        }
        if !is_user_address(la.as_u32())
            && self.aspace.root_page() != self.boot
            && self.aspace.table_at(L2Index::from(la)).is_none()
        {
            return Err(MapError::NotShared);
        }

        let (table, i1) = {
            let mut buddy = self.buddy.lock();
            self.aspace
                .ensure_entry(&mut *buddy, la, PageEntryBits::table_link())?
        };
        if self.aspace.table_mut(table).get(i1).is_present() {
            return Err(MapError::Exists);
        }

        let counted = !kernel_mapping && self.buddy.lock().take_mapping(pa.frame());
        let flags = perm.flags_only().with_uncounted(!counted);
        self.aspace
            .set_entry(table, i1, PtEntry::make_4k(pa.page(), flags));
        log::trace!("map {la} -> {pa} ({flags:?})");
        Ok(())
    }

    /// Remove the mapping at `la`, releasing the frame on its last reference.
    pub(crate) fn remove(&self, la: LinearAddress) -> Result<(), UnmapError> {
        if in_table_window(la) {
            return Err(UnmapError::PageTableWindow);
        }
        let (table, i1) = self
            .aspace
            .find_entry(la.page::<Size4K>().base())
            .map_err(|_| UnmapError::AlreadyFree)?;
        let Some((page, flags)) = self.aspace.table_mut(table).get(i1).page_4k() else {
            return Err(UnmapError::AlreadyFree);
        };

        self.aspace.set_entry(table, i1, PtEntry::zero());
        log::trace!("unmap {la} -> {page}");

        if !flags.uncounted() && self.buddy.lock().drop_mapping(page.frame()) {
            // SAFETY: the last mapping is gone; nobody references the frame.
            unsafe { self.runs.lock().free(self.mapper, page.base(), PAGE_SIZE) };
        }
        Ok(())
    }

    /// Map `[la, la + len)` onto `[pa, pa + len)` page by page.
    ///
    /// On failure the pages mapped so far stay mapped.
    pub(crate) fn map_range(
        &self,
        pa: PhysicalAddress,
        la: LinearAddress,
        len: u32,
        perm: PageEntryBits,
        kernel_mapping: bool,
    ) -> Result<(), MapError> {
        let pages = page_count(la.as_u32(), len).ok_or(MapError::NotAligned)?;
        page_count(pa.as_u32(), len).ok_or(MapError::NotAligned)?;

        for i in 0..pages {
            let off = i * PAGE_SIZE;
            self.insert(pa + off, la + off, perm, kernel_mapping)?;
        }
        Ok(())
    }

    /// Remove every mapping in `[la, la + len)`; the first hole is an error.
    pub(crate) fn unmap_range(&self, la: LinearAddress, len: u32) -> Result<(), UnmapError> {
        let pages = page_count(la.as_u32(), len).ok_or(UnmapError::NotAligned)?;
        for i in 0..pages {
            self.remove(la + i * PAGE_SIZE)?;
        }
        Ok(())
    }

    /// Remove every user-region mapping and release the emptied page tables.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn unmap_all_user(&self) -> Result<(), UnmapError> {
        let first = L2Index::from(LinearAddress::new(USER_BASE)).as_usize();
        let last = L2Index::from(LinearAddress::new(USER_END)).as_usize();

        for i2 in (first..last).map(|i| L2Index::new(i as u16)) {
            let Some(table) = self.aspace.table_at(i2) else {
                continue;
            };
            for i1 in 0..ENTRIES_PER_TABLE as u32 {
                let la = i2.base() + (i1 << PAGE_SHIFT);
                if self.aspace.entry(la).is_ok_and(PtEntry::is_present) {
                    self.remove(la)?;
                }
            }

            debug_assert!(self.aspace.table_mut(table).is_empty());
            if let Some(frame) = self.aspace.release_table(i2) {
                self.buddy.lock().free(frame.frame(), 0);
                log::trace!("released page table {frame} for {}", i2.base());
            }
        }
        Ok(())
    }

    pub(crate) fn translate(&self, la: LinearAddress) -> Result<PhysicalAddress, TranslateError> {
        self.aspace.translate(la)
    }
}
