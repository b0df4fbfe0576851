//! # Boot Memory Map
//!
//! The loader hands the kernel a firmware memory map (E820 style) and the
//! physical extent of the kernel image. These are plain `#[repr(C)]` values
//! so they can cross the loader/kernel boundary unchanged.

use core::fmt;

/// Kind of a firmware memory map entry.
///
/// Only two kinds matter to the memory manager; every non-usable firmware
/// type (ACPI, NVS, bad memory) is folded into [`RegionKind::Reserved`].
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegionKind {
    /// RAM the kernel may allocate.
    Usable = 1,
    /// Anything else.
    Reserved = 2,
}

impl RegionKind {
    /// Map a raw E820 type code. Unknown codes are reserved.
    #[must_use]
    pub const fn from_e820(code: u32) -> Self {
        match code {
            1 => Self::Usable,
            _ => Self::Reserved,
        }
    }
}

/// One firmware memory map entry.
///
/// Addresses are 64-bit as reported by firmware; anything above 4 GiB is
/// ignored by the 32-bit memory manager.
#[repr(C)]
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct MemoryRegion {
    pub base: u64,
    pub size: u64,
    pub kind: RegionKind,
}

impl MemoryRegion {
    #[must_use]
    pub const fn new(base: u64, size: u64, kind: RegionKind) -> Self {
        Self { base, size, kind }
    }

    #[must_use]
    pub const fn usable(base: u64, size: u64) -> Self {
        Self::new(base, size, RegionKind::Usable)
    }

    #[must_use]
    pub const fn reserved(base: u64, size: u64) -> Self {
        Self::new(base, size, RegionKind::Reserved)
    }

    /// Exclusive end address (saturating).
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    #[must_use]
    pub const fn is_usable(&self) -> bool {
        matches!(self.kind, RegionKind::Usable)
    }

    /// Whether `[start, end)` intersects this region.
    #[must_use]
    pub const fn overlaps(&self, start: u64, end: u64) -> bool {
        start < self.end() && self.base < end
    }

    /// Whether `[start, end)` lies entirely inside this region.
    #[must_use]
    pub const fn contains(&self, start: u64, end: u64) -> bool {
        self.base <= start && end <= self.end()
    }
}

impl fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:#010X}..{:#010X}) {:?}",
            self.base,
            self.end(),
            self.kind
        )
    }
}

/// Physical extent of the loaded kernel image, `[start, end)`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct KernelImage {
    pub start: u32,
    pub end: u32,
}

/// Everything the memory manager needs from the loader.
#[derive(Copy, Clone, Debug)]
pub struct BootMemoryInfo<'a> {
    /// Firmware memory map, in firmware order.
    pub regions: &'a [MemoryRegion],
    /// Where the kernel image was loaded.
    pub kernel: KernelImage,
}
