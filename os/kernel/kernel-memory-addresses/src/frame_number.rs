use crate::{MemoryAddress, MemoryPage, PhysicalAddress, PhysicalPage, Size4K};
use core::fmt;
use core::ops::{Add, Sub};

/// Index of a 4 KiB physical frame (`physical address >> 12`).
///
/// Frame numbers index the page-frame descriptor table. Arithmetic on them
/// is plain integer arithmetic; there is no pointer offsetting involved.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FrameNumber(u32);

impl FrameNumber {
    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// The frame containing `pa`.
    #[inline]
    #[must_use]
    pub const fn containing(pa: PhysicalAddress) -> Self {
        pa.frame()
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Physical page whose base is this frame.
    #[inline]
    #[must_use]
    pub const fn page(self) -> PhysicalPage<Size4K> {
        PhysicalPage(MemoryPage::from_addr(MemoryAddress::new(self.0 << 12)))
    }

    /// Physical base address of this frame.
    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        self.page().base()
    }
}

impl fmt::Debug for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({:#X})", self.0)
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:#X}", self.0)
    }
}

impl Add<u32> for FrameNumber {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Sub for FrameNumber {
    type Output = u32;
    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}

impl From<PhysicalPage<Size4K>> for FrameNumber {
    #[inline]
    fn from(p: PhysicalPage<Size4K>) -> Self {
        p.frame()
    }
}
