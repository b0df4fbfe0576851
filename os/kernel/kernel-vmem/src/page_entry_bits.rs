use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// A single 32-bit i386 paging entry in its raw bitfield form.
///
/// Directory entries and table entries share this layout. A directory entry
/// points to a page table; a table entry maps one 4 KiB frame.
///
/// ### Bit layout
///
/// | Bits  | Name / Mnemonic | Meaning |
/// |-------|-----------------|---------|
/// | 0     | `P`             | Valid entry if set |
/// | 1     | `RW`            | Writable if set |
/// | 2     | `US`            | User-mode accessible if set |
/// | 3     | `PWT`           | Write-through caching |
/// | 4     | `PCD`           | Disable caching |
/// | 5     | `A`             | Accessed |
/// | 6     | `D`             | Dirty (table entries only) |
/// | 7     | `PS` / `PAT`    | Page size in a directory entry, PAT in a table entry |
/// | 8     | `G`             | Global |
/// | 9     | OS              | Mapping holds no frame reference |
/// | 10-11 | OS              | Free for OS use |
/// | 12-31 | `addr`          | Physical frame bits [31:12] |
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::PhysicalAddress;
/// # use kernel_vmem::PageEntryBits;
/// let e = PageEntryBits::user_rw().with_physical_address(PhysicalAddress::new(0x0012_3000));
/// assert!(e.present());
/// assert_eq!(e.into_bits(), 0x0012_3007);
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    ///
    /// Subject to CR0.WP in supervisor mode.
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on first write through a table entry.
    pub dirty: bool,

    /// Page Size (PS, bit 7) in a directory entry; PAT in a table entry.
    ///
    /// Always clear here: 4 MiB pages are not used.
    pub large_page: bool,

    /// Global (G, bit 8).
    pub global_translation: bool,

    /// OS bit 9: the mapping was installed without taking a frame
    /// reference, so removing it must not drop one either.
    pub uncounted: bool,

    /// OS-available (bits 10..=11).
    #[bits(2)]
    pub os_available: u8,

    /// Physical address bits [31:12].
    #[bits(20)]
    phys_addr_bits_31_12: u32,
}

impl PageEntryBits {
    /// Mask of the permission and status bits (everything below the frame address).
    pub const FLAGS_MASK: u32 = 0xFFF;

    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysicalAddress) {
        self.set_phys_addr_bits_31_12(phys.as_u32() >> 12);
    }

    #[inline]
    #[must_use]
    pub const fn with_physical_address(mut self, phys: PhysicalAddress) -> Self {
        self.set_physical_address(phys);
        self
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.phys_addr_bits_31_12() << 12)
    }

    #[inline]
    #[must_use]
    pub const fn physical_page(&self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_addr(self.physical_address())
    }

    /// Only the flag bits, with the address cleared.
    #[inline]
    #[must_use]
    pub const fn flags_only(self) -> Self {
        Self::from_bits(self.into_bits() & Self::FLAGS_MASK)
    }

    /// Supervisor read/write.
    #[inline]
    #[must_use]
    pub const fn kernel_rw() -> Self {
        Self::new().with_present(true).with_writable(true)
    }

    /// User read/write.
    #[inline]
    #[must_use]
    pub const fn user_rw() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(true)
    }

    /// User read-only.
    #[inline]
    #[must_use]
    pub const fn user_ro() -> Self {
        Self::new().with_present(true).with_user_access(true)
    }

    /// Flags for a directory entry linking a page table.
    ///
    /// Directory entries are maximally permissive; the table entries decide.
    #[inline]
    #[must_use]
    pub const fn table_link() -> Self {
        Self::user_rw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_positions() {
        assert_eq!(PageEntryBits::new().with_present(true).into_bits(), 0x001);
        assert_eq!(PageEntryBits::new().with_writable(true).into_bits(), 0x002);
        assert_eq!(PageEntryBits::new().with_user_access(true).into_bits(), 0x004);
        assert_eq!(PageEntryBits::new().with_dirty(true).into_bits(), 0x040);
        assert_eq!(PageEntryBits::new().with_large_page(true).into_bits(), 0x080);
        assert_eq!(PageEntryBits::new().with_global_translation(true).into_bits(), 0x100);
        assert_eq!(PageEntryBits::new().with_uncounted(true).into_bits(), 0x200);
    }

    #[test]
    fn address_round_trip() {
        let pa = PhysicalAddress::new(0xFEC0_0000);
        let e = PageEntryBits::kernel_rw().with_physical_address(pa);
        assert_eq!(e.physical_address(), pa);
        assert_eq!(e.flags_only(), PageEntryBits::kernel_rw());
    }
}
