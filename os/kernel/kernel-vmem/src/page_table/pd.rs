//! # Page Directory (PD / L2)
//!
//! The root of a two-level translation. Each of the 1024 entries either is
//! absent or links one [`PageTable`](super::pt::PageTable) covering 4 MiB of
//! linear address space. 4 MiB leaf entries (`PS=1`) are never created.

use super::ENTRIES;
use crate::PageEntryBits;
use kernel_memory_addresses::{LinearAddress, PhysicalPage, Size4K};

/// Index into the Page Directory (linear address bits `[31:22]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct L2Index(u16);

/// A single Page Directory entry (PDE).
#[doc(alias = "PDE")]
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PdEntry(PageEntryBits);

/// The Page Directory: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PdEntry; ENTRIES],
}

impl L2Index {
    #[inline]
    #[must_use]
    pub const fn from(la: LinearAddress) -> Self {
        Self(la.directory_index())
    }

    /// Construct from a raw value. Asserts `v < 1024` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < ENTRIES);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// First linear address covered by this entry.
    #[inline]
    #[must_use]
    pub const fn base(self) -> LinearAddress {
        LinearAddress::new((self.0 as u32) << 22)
    }
}

impl PdEntry {
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(PageEntryBits::new())
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0.present()
    }

    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageEntryBits {
        self.0
    }

    /// Link a page table. Forces `present=1` and `PS=0`.
    #[inline]
    #[must_use]
    pub const fn make_table(table: PhysicalPage<Size4K>, mut flags: PageEntryBits) -> Self {
        flags.set_large_page(false);
        flags.set_present(true);
        flags.set_physical_address(table.base());
        Self(flags)
    }

    /// If present, the linked page table frame.
    #[inline]
    #[must_use]
    pub fn table(self) -> Option<PhysicalPage<Size4K>> {
        if !self.is_present() {
            return None;
        }
        debug_assert!(!self.0.large_page(), "4 MiB pages are not used");
        Some(self.0.physical_page())
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0.into_bits()
    }

    #[inline]
    #[must_use]
    pub const fn from_raw(v: u32) -> Self {
        Self(PageEntryBits::from_bits(v))
    }
}

impl PageDirectory {
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PdEntry::zero(); ENTRIES],
        }
    }

    /// Clear every entry.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PdEntry::zero());
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: L2Index) -> PdEntry {
        self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, i: L2Index, e: PdEntry) {
        self.entries[i.as_usize()] = e;
    }

    /// Copy the entries in `range` from `other`, sharing its page tables.
    pub fn share_from(&mut self, other: &Self, range: core::ops::Range<usize>) {
        self.entries[range.clone()].copy_from_slice(&other.entries[range]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::PhysicalAddress;

    #[test]
    fn pde_links_table() {
        let pt = PhysicalPage::<Size4K>::from_addr(PhysicalAddress::new(0x0040_2000));
        let e = PdEntry::make_table(pt, PageEntryBits::table_link());
        assert!(e.is_present());
        assert_eq!(e.table(), Some(pt));
        assert!(e.flags().user_access());
        assert_eq!(e.raw(), 0x0040_2007);
        assert_eq!(PdEntry::from_raw(e.raw()), e);
        assert_eq!(PdEntry::zero().table(), None);
    }

    #[test]
    fn share_copies_only_range() {
        let mut a = PageDirectory::zeroed();
        let mut b = PageDirectory::zeroed();
        let pt = PhysicalPage::<Size4K>::from_addr(PhysicalAddress::new(0x1000));
        b.set(L2Index::new(1), PdEntry::make_table(pt, PageEntryBits::table_link()));
        b.set(L2Index::new(700), PdEntry::make_table(pt, PageEntryBits::table_link()));

        a.share_from(&b, 0..512);
        assert!(a.get(L2Index::new(1)).is_present());
        assert!(!a.get(L2Index::new(700)).is_present());
    }
}
