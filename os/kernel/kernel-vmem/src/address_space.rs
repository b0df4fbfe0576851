//! # Address Space (i386, directory-rooted)
//!
//! Strongly-typed helpers to walk and edit a **single** two-level address
//! space rooted at a page directory.
//!
//! ## Highlights
//!
//! - [`AddressSpace::find_entry`] locates the table entry for a linear address.
//! - [`AddressSpace::ensure_entry`] does the same, creating a missing page table.
//! - [`AddressSpace::translate`] resolves a linear address to a physical one.
//! - [`AddressSpace::release_table`] unlinks a table and hands its frame back.
//! - [`AddressSpace::activate`] loads CR3 with this space's directory.
//!
//! Reference counting of mapped frames is not done here; the caller owns
//! that policy.
//!
//! ## Safety
//!
//! - Mutating active mappings requires appropriate **TLB maintenance**
//!   (`invlpg` per page or a CR3 reload).
//! - The provided `PhysMapper` must yield **writable** references to table frames.

use crate::page_table::pd::{L2Index, PageDirectory, PdEntry};
use crate::page_table::pt::{L1Index, PageTable, PtEntry};
use crate::page_table::split_indices;
use crate::{FrameAlloc, PageEntryBits, PhysMapper, TranslateError, WalkError};
use kernel_memory_addresses::{LinearAddress, PhysicalAddress, PhysicalPage, Size4K};

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalPage<Size4K>, // directory frame
    mapper: &'m M,
}

/// The directory page for an [`AddressSpace`].
pub type RootPage = PhysicalPage<Size4K>;

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// View the **currently active** address space by reading CR3.
    ///
    /// # Safety
    /// - Must run at CPL0 with paging enabled.
    /// - Assumes CR3 points at a valid page directory.
    #[cfg(all(feature = "asm", any(target_arch = "x86", target_arch = "x86_64")))]
    #[inline]
    pub unsafe fn from_current(mapper: &'m M) -> Self {
        use kernel_registers::{Cr3, LoadRegisterUnsafe};
        let cr3 = unsafe { Cr3::load_unsafe() };
        let root = PhysicalPage::<Size4K>::from_addr(cr3.directory_phys());
        Self { root, mapper }
    }

    #[inline]
    pub const fn from_root(mapper: &'m M, root: RootPage) -> Self {
        Self { root, mapper }
    }

    /// Load CR3 with this address space's directory.
    ///
    /// # Safety
    /// The code and data currently executing must be mapped identically in
    /// the target space.
    #[cfg(all(feature = "asm", any(target_arch = "x86", target_arch = "x86_64")))]
    #[inline]
    pub unsafe fn activate(&self) {
        use kernel_registers::{Cr3, StoreRegisterUnsafe};
        let cr3 = Cr3::from_directory_phys(self.root.base(), false, false);
        unsafe { cr3.store_unsafe() };
    }

    /// Physical page of the directory.
    #[inline]
    pub const fn root_page(&self) -> RootPage {
        self.root
    }

    /// Borrow the [`PageDirectory`] as a typed table.
    #[inline]
    pub fn directory_mut(&self) -> &mut PageDirectory {
        self.mapper.directory_mut(self.root)
    }

    /// Borrow a [`PageTable`] in this frame.
    #[inline]
    pub fn table_mut(&self, page: PhysicalPage<Size4K>) -> &mut PageTable {
        self.mapper.table_mut(page)
    }

    /// Clear every directory entry.
    pub fn clear(&self) {
        self.directory_mut().zero();
    }

    /// Frame of the page table linked at `i`, if any.
    #[inline]
    #[must_use]
    pub fn table_at(&self, i: L2Index) -> Option<PhysicalPage<Size4K>> {
        self.directory_mut().get(i).table()
    }

    /// Locate the table holding the entry for `la`. Never allocates.
    ///
    /// # Errors
    /// [`WalkError::NoTable`] if the directory entry is absent.
    pub fn find_entry(&self, la: LinearAddress) -> Result<(PhysicalPage<Size4K>, L1Index), WalkError> {
        let (i2, i1) = split_indices(la);
        let table = self.table_at(i2).ok_or(WalkError::NoTable)?;
        Ok((table, i1))
    }

    /// Locate the table holding the entry for `la`, creating it when absent.
    ///
    /// A new table frame comes from `alloc`, is zeroed, and is linked with
    /// `link` flags (forced present).
    ///
    /// # Errors
    /// [`WalkError::NoMemory`] if `alloc` has no frame left.
    pub fn ensure_entry<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        la: LinearAddress,
        link: PageEntryBits,
    ) -> Result<(PhysicalPage<Size4K>, L1Index), WalkError> {
        let (i2, i1) = split_indices(la);
        let dir = self.directory_mut();
        if let Some(table) = dir.get(i2).table() {
            return Ok((table, i1));
        }

        let table = alloc.alloc_4k().ok_or(WalkError::NoMemory)?;
        self.table_mut(table).zero();
        dir.set(i2, PdEntry::make_table(table, link));
        log::trace!("linked page table {table} for {}", i2.base());
        Ok((table, i1))
    }

    /// Read the table entry for `la`.
    ///
    /// # Errors
    /// [`WalkError::NoTable`] if the directory entry is absent.
    pub fn entry(&self, la: LinearAddress) -> Result<PtEntry, WalkError> {
        let (table, i1) = self.find_entry(la)?;
        Ok(self.table_mut(table).get(i1))
    }

    /// Write the table entry at a location returned by a walk.
    #[inline]
    pub fn set_entry(&self, table: PhysicalPage<Size4K>, i1: L1Index, e: PtEntry) {
        self.table_mut(table).set(i1, e);
    }

    /// Translate `la` to its physical address, keeping the in-page offset.
    ///
    /// # Errors
    /// - [`TranslateError::NoDirectoryEntry`] when no page table covers `la`.
    /// - [`TranslateError::NoTableEntry`] when the table entry is absent.
    pub fn translate(&self, la: LinearAddress) -> Result<PhysicalAddress, TranslateError> {
        let e = self
            .entry(la)
            .map_err(|_| TranslateError::NoDirectoryEntry)?;
        let (page, _) = e.page_4k().ok_or(TranslateError::NoTableEntry)?;
        Ok(page.join(la.offset::<Size4K>()))
    }

    /// Unlink the page table at `i` and return its frame for reuse.
    ///
    /// The caller must have dealt with the table's entries first.
    pub fn release_table(&self, i: L2Index) -> Option<PhysicalPage<Size4K>> {
        let dir = self.directory_mut();
        let table = dir.get(i).table()?;
        dir.set(i, PdEntry::zero());
        Some(table)
    }

    /// Copy the directory entries in `range` from `other`, sharing its tables.
    pub fn share_entries(&self, other: &Self, range: core::ops::Range<usize>) {
        if self.root == other.root {
            return;
        }
        let src = other.directory_mut();
        self.directory_mut().share_from(src, range);
    }
}
