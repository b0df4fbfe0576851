use crate::{LinearPage, MemoryAddress, MemoryAddressOffset, PageSize, Size4K, Size4M};
use core::fmt;
use core::ops::{Add, AddAssign};

/// Linear (paging-translated) memory address.
///
/// A thin wrapper around [`MemoryAddress`] that denotes addresses **before**
/// page-table translation. With flat segments this is the same value the
/// program sees. It only carries the *kind* of address at the type level so
/// linear and physical values are never mixed.
///
/// ### Two-level split
///
/// ```text
/// | 31‒22     | 21‒12 | 11‒0   |
/// | directory | table | offset |
/// ```
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let la = LinearAddress::new(0x8040_3123);
/// assert_eq!(la.directory_index(), 0x201);
/// assert_eq!(la.table_index(), 0x003);
/// assert_eq!(la.offset::<Size4K>().as_u32(), 0x123);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LinearAddress(pub(crate) MemoryAddress);

impl LinearAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(MemoryAddress::new(v))
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0.as_u32()
    }

    #[inline]
    #[must_use]
    pub const fn page<S: PageSize>(self) -> LinearPage<S> {
        LinearPage::<S>(self.0.page::<S>())
    }

    #[inline]
    #[must_use]
    pub const fn offset<S: PageSize>(self) -> MemoryAddressOffset<S> {
        self.0.offset::<S>()
    }

    #[inline]
    #[must_use]
    pub const fn split<S: PageSize>(self) -> (LinearPage<S>, MemoryAddressOffset<S>) {
        (self.page::<S>(), self.offset::<S>())
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned<S: PageSize>(self) -> bool {
        self.0.is_aligned::<S>()
    }

    /// Page-directory index (bits `[31:22]`), in `0..1024`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn directory_index(self) -> u16 {
        (self.as_u32() >> Size4M::SHIFT) as u16
    }

    /// Page-table index (bits `[21:12]`), in `0..1024`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn table_index(self) -> u16 {
        ((self.as_u32() >> Size4K::SHIFT) & 0x3FF) as u16
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u32) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for LinearAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LA(0x{:08X})", self.as_u32())
    }
}

impl fmt::Display for LinearAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.as_u32())
    }
}

impl From<u32> for LinearAddress {
    #[inline]
    fn from(v: u32) -> Self {
        Self::new(v)
    }
}

impl<S> From<LinearPage<S>> for LinearAddress
where
    S: PageSize,
{
    fn from(value: LinearPage<S>) -> Self {
        value.base()
    }
}

impl Add<u32> for LinearAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u32> for LinearAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u32) {
        self.0 += rhs;
    }
}
