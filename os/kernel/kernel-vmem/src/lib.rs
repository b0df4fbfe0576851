//! # Virtual Memory Support
//!
//! Two-level i386 paging helpers for the kernel's memory manager.
//!
//! ## What you get
//! - An [`address space`](address_space) rooted at a page directory.
//! - The 32-bit paging entry layout [`PageEntryBits`].
//! - 4 KiB-aligned [`PageDirectory`] and [`PageTable`] wrappers and index helpers.
//! - A tiny allocator/mapper interface ([`FrameAlloc`], [`PhysMapper`]).
//!
//! ## Linear Address → Physical Address Walk
//!
//! Each 32-bit linear address is divided into three fields:
//!
//! ```text
//! | 31‒22     | 21‒12 | 11‒0   |
//! | directory | table | offset |
//! ```
//!
//! ```text
//!  CR3 → Page Directory → Page Table → 4 KiB frame
//!             │               │
//!             │               └───► PTE (maps one 4 KiB frame)
//!             └───────────────────► PDE (links one page table, spans 4 MiB)
//! ```
//!
//! | Level | Table name | Entry name | Description |
//! |:------|:-----------|:-----------|:------------|
//! | 2 | **PD** (Page Directory) | **PDE** | One per address space, referenced by CR3. Each entry links a page table. |
//! | 1 | **PT** (Page Table) | **PTE** | Each entry maps a 4 KiB physical frame. |
//!
//! Both levels hold 1024 entries of 4 bytes, so one table is exactly one frame.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod address_space;
mod page_entry_bits;
pub mod page_table;

pub use crate::address_space::AddressSpace;
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::pd::{L2Index, PageDirectory, PdEntry};
pub use crate::page_table::pt::{L1Index, PageTable, PtEntry};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Why a linear address has no translation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum TranslateError {
    #[error("no page table covers this address")]
    NoDirectoryEntry,
    #[error("page table entry not present")]
    NoTableEntry,
}

/// Why a page-table walk stopped.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum WalkError {
    #[error("no page table and creation not requested")]
    NoTable,
    #[error("out of memory for a page table")]
    NoMemory,
}

/// Minimal frame allocator used to obtain **physical** 4 KiB frames
/// for page tables.
///
/// Returns `None` on out-of-memory.
pub trait FrameAlloc {
    /// Allocate one 4 KiB *physical* frame for a page table.
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>>;
}

/// Converts physical addresses to usable references in the current address
/// space.
///
/// In the kernel the low region is identity mapped, so the pointer is the
/// physical address itself. Tests back "physical memory" with a heap buffer.
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// - `pa` must be mapped writable in the current page tables.
    /// - The mapping must stay valid for `'a`.
    /// - `T` must match the bytes at `pa`, and no other live reference may
    ///   alias them.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// Borrow the [`PageDirectory`] in `page`.
    #[inline]
    fn directory_mut(&self, page: PhysicalPage<Size4K>) -> &mut PageDirectory {
        unsafe { self.phys_to_mut::<PageDirectory>(page.base()) }
    }

    /// Borrow the [`PageTable`] in `page`.
    #[inline]
    fn table_mut(&self, page: PhysicalPage<Size4K>) -> &mut PageTable {
        unsafe { self.phys_to_mut::<PageTable>(page.base()) }
    }

    /// Borrow the raw bytes of a frame.
    #[inline]
    fn frame_mut(&self, page: PhysicalPage<Size4K>) -> &mut [u8; 4096] {
        unsafe { self.phys_to_mut::<[u8; 4096]>(page.base()) }
    }
}

/// Switch paging on for the executing processor.
///
/// Loads CR3 with `dir`, then sets PE, PG, AM, WP, NE and MP in CR0 while
/// clearing TS and EM.
///
/// # Safety
/// - Must run at CPL0, once per processor.
/// - The executing code, its stack and all data it touches must be identity
///   mapped in `dir`.
#[cfg(all(feature = "asm", any(target_arch = "x86", target_arch = "x86_64")))]
pub unsafe fn enable_paging(dir: PhysicalPage<Size4K>) {
    use kernel_registers::{Cr0, Cr3, LoadRegisterUnsafe, StoreRegisterUnsafe};
    unsafe {
        Cr3::from_directory_phys(dir.base(), false, false).store_unsafe();
        let cr0 = Cr0::load_unsafe().with_paging_enabled();
        cr0.store_unsafe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::AddressSpace;
    use kernel_memory_addresses::{LinearAddress, Size4K};

    /// A trivial **bump** allocator: always hands out the next 4 KiB frame.
    struct BumpAlloc {
        next: u32,
        end: u32,
    }

    impl BumpAlloc {
        fn new(start: u32, end: u32) -> Self {
            Self { next: start, end }
        }
    }

    impl FrameAlloc for BumpAlloc {
        fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
            if self.next + 4096 > self.end {
                return None;
            }
            let p = self.next;
            self.next += 4096;
            Some(PhysicalAddress::new(p).page())
        }
    }

    /// A 4 KiB-aligned raw frame used as "physical RAM" in tests.
    #[repr(align(4096))]
    struct Aligned4K(#[allow(dead_code)] [u8; 4096]);

    /// Physical memory as a vector of frames; physical address `pa` lives in
    /// frame `pa / 4096`.
    struct TestPhys {
        frames: Vec<Aligned4K>,
    }

    impl TestPhys {
        fn with_frames(n: usize) -> Self {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(Aligned4K([0xAA; 4096]));
            }
            Self { frames: v }
        }
    }

    impl PhysMapper for TestPhys {
        unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
            let idx = (pa.as_u32() >> 12) as usize;
            debug_assert_eq!(pa.as_u32() & 0xFFF, 0);
            let p = (&raw const self.frames[idx]).cast::<T>().cast_mut();
            unsafe { &mut *p }
        }
    }

    fn space(phys: &TestPhys, alloc: &mut BumpAlloc) -> PhysicalPage<Size4K> {
        let root = alloc.alloc_4k().unwrap();
        phys.directory_mut(root).zero();
        root
    }

    #[test]
    fn ensure_entry_creates_zeroed_table() {
        let phys = TestPhys::with_frames(16);
        let mut alloc = BumpAlloc::new(0, 16 << 12);
        let root = space(&phys, &mut alloc);
        let aspace = AddressSpace::from_root(&phys, root);

        let la = LinearAddress::new(0x8040_3000);
        assert_eq!(aspace.find_entry(la), Err(WalkError::NoTable));

        let (table, i1) = aspace
            .ensure_entry(&mut alloc, la, PageEntryBits::table_link())
            .unwrap();
        assert_eq!(table.base().as_u32(), 0x1000);
        assert_eq!(i1.as_usize(), 3);
        assert!(phys.table_mut(table).is_empty());

        let pde = phys.directory_mut(root).get(L2Index::from(la));
        assert!(pde.flags().present());
        assert!(pde.flags().writable());
        assert!(pde.flags().user_access());

        // Second walk reuses the table.
        let (again, _) = aspace
            .ensure_entry(&mut alloc, la + 0x1000, PageEntryBits::table_link())
            .unwrap();
        assert_eq!(again, table);
    }

    #[test]
    fn ensure_entry_reports_oom() {
        let phys = TestPhys::with_frames(1);
        let mut alloc = BumpAlloc::new(0, 1 << 12);
        let root = space(&phys, &mut alloc);
        let aspace = AddressSpace::from_root(&phys, root);
        let r = aspace.ensure_entry(&mut alloc, LinearAddress::new(0), PageEntryBits::table_link());
        assert_eq!(r, Err(WalkError::NoMemory));
    }

    #[test]
    fn translate_keeps_offset() {
        let phys = TestPhys::with_frames(8);
        let mut alloc = BumpAlloc::new(0, 8 << 12);
        let root = space(&phys, &mut alloc);
        let aspace = AddressSpace::from_root(&phys, root);

        let la = LinearAddress::new(0x8000_0000);
        assert_eq!(aspace.translate(la), Err(TranslateError::NoDirectoryEntry));

        let (table, i1) = aspace
            .ensure_entry(&mut alloc, la, PageEntryBits::table_link())
            .unwrap();
        assert_eq!(aspace.translate(la), Err(TranslateError::NoTableEntry));

        let pa = PhysicalAddress::new(0x0030_0000);
        aspace.set_entry(table, i1, PtEntry::make_4k(pa.page(), PageEntryBits::user_rw()));
        assert_eq!(
            aspace.translate(LinearAddress::new(0x8000_0ABC)),
            Ok(PhysicalAddress::new(0x0030_0ABC))
        );
    }

    #[test]
    fn release_table_unlinks() {
        let phys = TestPhys::with_frames(8);
        let mut alloc = BumpAlloc::new(0, 8 << 12);
        let root = space(&phys, &mut alloc);
        let aspace = AddressSpace::from_root(&phys, root);

        let la = LinearAddress::new(0x9000_0000);
        let (table, _) = aspace
            .ensure_entry(&mut alloc, la, PageEntryBits::table_link())
            .unwrap();
        assert_eq!(aspace.release_table(L2Index::from(la)), Some(table));
        assert_eq!(aspace.release_table(L2Index::from(la)), None);
        assert_eq!(aspace.find_entry(la), Err(WalkError::NoTable));
    }

    #[test]
    fn shared_entries_point_at_same_tables() {
        let phys = TestPhys::with_frames(8);
        let mut alloc = BumpAlloc::new(0, 8 << 12);
        let boot = AddressSpace::from_root(&phys, space(&phys, &mut alloc));
        let proc = AddressSpace::from_root(&phys, space(&phys, &mut alloc));

        let low = LinearAddress::new(0x0010_0000);
        let (table, _) = boot
            .ensure_entry(&mut alloc, low, PageEntryBits::table_link())
            .unwrap();
        proc.share_entries(&boot, 0..L2Index::from(LinearAddress::new(info::USER_BASE)).as_usize());
        assert_eq!(proc.table_at(L2Index::from(low)), Some(table));
    }
}
