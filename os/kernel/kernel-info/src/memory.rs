//! # Memory Layout
//!
//! The linear address space is 32 bits wide and split into a shared kernel
//! region and a per-process user region:
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  Base memory (identity, < 1 MiB)│
//! 0x0010_0000 ├─────────────────────────────────┤
//!             │  Kernel image, frame table,     │
//!             │  identity-mapped usable RAM     │
//! USER_BASE   ├─────────────────────────────────┤ 0x8000_0000
//!             │  User space (per process)       │
//! USER_END    ├─────────────────────────────────┤ 0xFEC0_0000
//!             │  Local / IO APIC MMIO window    │
//! PAGE_TABLE_ ├─────────────────────────────────┤ 0xFFC0_0000
//! WINDOW      │  This directory's page tables   │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! Everything outside `[USER_BASE, USER_END)` is the kernel region. Its
//! directory entries are copied from the boot directory into every address
//! space, so the tables backing them are shared.

/// Size of a page frame in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// log2 of [`PAGE_SIZE`].
pub const PAGE_SHIFT: u32 = 12;

/// Number of entries in a page directory or page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Bytes of linear address space covered by one directory entry.
pub const DIRECTORY_SPAN: u32 = 4 * 1024 * 1024;

/// Largest buddy order; an order-`MAX_ORDER` block spans 4 MiB.
pub const MAX_ORDER: usize = 10;

/// First linear address of the per-process user region.
pub const USER_BASE: u32 = 0x8000_0000;

/// One past the last linear address of the user region.
pub const USER_END: u32 = 0xFEC0_0000;

/// Physical base of the local / IO APIC register window.
pub const APIC_MMIO_BASE: u32 = 0xFEC0_0000;

/// Size of the APIC register window that gets identity mapped.
pub const APIC_MMIO_SIZE: u32 = 16 * 1024 * 1024;

/// Last directory slot. Every directory links itself here, so its page
/// tables appear as 4 KiB pages in `[PAGE_TABLE_WINDOW, 4 GiB)`.
pub const PAGE_TABLE_WINDOW: u32 = 0xFFC0_0000;

/// End of base memory. Frames below are never handed to an allocator.
pub const BASE_MEMORY_END: u32 = 0x0010_0000;

/// Byte pattern written over every range returned to the run allocator.
pub const JUNK_BYTE: u8 = 0x01;

/// Default number of frames reserved for the page-table pool.
pub const TABLE_POOL_PAGES: u32 = 1024;

/// Whether `addr` lies in the per-process user region.
#[inline]
#[must_use]
pub const fn is_user_address(addr: u32) -> bool {
    addr >= USER_BASE && addr < USER_END
}

const _: () = {
    assert!(PAGE_SIZE == 1 << PAGE_SHIFT);
    assert!(DIRECTORY_SPAN as usize == PAGE_SIZE as usize * ENTRIES_PER_TABLE);
    assert!(DIRECTORY_SPAN as usize == (PAGE_SIZE as usize) << MAX_ORDER);
    assert!(USER_BASE.is_multiple_of(DIRECTORY_SPAN));
    assert!(USER_END.is_multiple_of(DIRECTORY_SPAN));
    assert!(USER_BASE < USER_END);
    assert!(APIC_MMIO_BASE == USER_END);
    assert!(APIC_MMIO_SIZE.is_multiple_of(DIRECTORY_SPAN));
    assert!(APIC_MMIO_BASE + APIC_MMIO_SIZE == PAGE_TABLE_WINDOW);
    assert!(PAGE_TABLE_WINDOW as u64 + DIRECTORY_SPAN as u64 == 1 << 32);
    assert!(BASE_MEMORY_END.is_multiple_of(PAGE_SIZE));
    assert!(TABLE_POOL_PAGES > 0);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_region_bounds() {
        assert!(!is_user_address(USER_BASE - 1));
        assert!(is_user_address(USER_BASE));
        assert!(is_user_address(USER_END - 1));
        assert!(!is_user_address(USER_END));
        assert!(!is_user_address(APIC_MMIO_BASE + 0x20));
        assert!(!is_user_address(PAGE_TABLE_WINDOW));
    }
}
