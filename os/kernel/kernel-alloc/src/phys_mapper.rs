//! # Offset-based PhysMapper
//!
//! Physical memory is reachable at a fixed linear offset: physical address
//! `pa` lives at linear address `base + pa`.
//!
//! - In the kernel the low region is identity mapped, so the offset is 0
//!   ([`OffsetPhysMapper::identity`]).
//! - Host tests back "physical memory" with one heap buffer and use the
//!   buffer's address as the offset.
//!
//! ## Example
//! ```rust
//! use kernel_alloc::phys_mapper::OffsetPhysMapper;
//! use kernel_memory_addresses::PhysicalAddress;
//! use kernel_vmem::PhysMapper;
//!
//! #[repr(align(4096))]
//! struct Ram([u8; 8192]);
//! let mut ram = Box::new(Ram([0; 8192]));
//! let base = (&raw mut ram.0).cast::<u8>();
//! let mapper = unsafe { OffsetPhysMapper::new(base, 8192) };
//!
//! let word: &mut u32 = unsafe { mapper.phys_to_mut(PhysicalAddress::new(0x1000)) };
//! *word = 0xDEAD_BEEF;
//! assert_eq!(ram.0[0x1000], 0xEF);
//! ```

use core::ptr;
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] that adds a constant offset to every physical address.
#[derive(Debug, Copy, Clone)]
pub struct OffsetPhysMapper {
    base: usize,
    /// One past the highest reachable physical address.
    limit: u64,
}

// Safety: the mapper only hands out references; exclusivity is the caller's
// contract on `phys_to_mut`, enforced by the memory manager's locks.
unsafe impl Send for OffsetPhysMapper {}
unsafe impl Sync for OffsetPhysMapper {}

impl OffsetPhysMapper {
    /// Physical memory at `base`, `len` bytes long.
    ///
    /// # Safety
    /// `[base, base + len)` must be valid, writable memory for as long as the
    /// mapper is used.
    #[must_use]
    pub unsafe fn new(base: *mut u8, len: usize) -> Self {
        Self {
            base: base.expose_provenance(),
            limit: len as u64,
        }
    }

    /// The kernel's identity view of the whole 32-bit physical space.
    ///
    /// # Safety
    /// Every physical address dereferenced through the mapper must be
    /// identity mapped in the active page tables.
    #[must_use]
    pub const unsafe fn identity() -> Self {
        Self {
            base: 0,
            limit: 1 << 32,
        }
    }

    #[must_use]
    pub const fn offset(&self) -> usize {
        self.base
    }
}

impl PhysMapper for OffsetPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        debug_assert!(
            u64::from(pa.as_u32()) + size_of::<T>() as u64 <= self.limit,
            "{pa} outside the mapped physical window"
        );
        let va = ptr::with_exposed_provenance_mut::<T>(self.base + pa.as_u32() as usize);
        // SAFETY: caller guarantees `pa` is backed and not aliased.
        unsafe { &mut *va }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_has_no_offset() {
        let m = unsafe { OffsetPhysMapper::identity() };
        assert_eq!(m.offset(), 0);
    }
}
