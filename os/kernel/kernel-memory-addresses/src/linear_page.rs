use crate::{LinearAddress, MemoryAddress, MemoryAddressOffset, MemoryPage, PageSize};
use core::fmt;

/// Linear page base for size `S`.
///
/// For `Size4M` this is the span one directory entry covers; for `Size4K`
/// the span one table entry covers.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LinearPage<S: PageSize>(pub(crate) MemoryPage<S>);

impl<S: PageSize> LinearPage<S> {
    #[inline]
    #[must_use]
    pub const fn containing_address(la: LinearAddress) -> Self {
        Self(MemoryPage::from_addr(la.0))
    }

    /// The `index`-th page of size `S` counted from linear address zero.
    #[inline]
    #[must_use]
    pub const fn from_index(index: u32) -> Self {
        Self(MemoryPage::from_addr(MemoryAddress::new(index << S::SHIFT)))
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> LinearAddress {
        LinearAddress(self.0.base())
    }

    #[inline]
    #[must_use]
    pub const fn join(self, off: MemoryAddressOffset<S>) -> LinearAddress {
        LinearAddress(self.0.join(off))
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0.index()
    }
}

impl<S> fmt::Display for LinearPage<S>
where
    S: PageSize,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl<S: PageSize> fmt::Debug for LinearPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LinearPage<{}>({:#010X})",
            core::any::type_name::<S>(),
            self.0.base().as_u32()
        )
    }
}

impl<S: PageSize> TryFrom<LinearAddress> for LinearPage<S> {
    type Error = ();

    #[inline]
    fn try_from(la: LinearAddress) -> Result<Self, ()> {
        if la.is_aligned::<S>() {
            Ok(la.page())
        } else {
            Err(())
        }
    }
}
