//! # Page Frame Descriptors
//!
//! One [`PageFrame`] per physical 4 KiB frame, indexed by [`FrameNumber`].
//! The buddy allocator threads its free lists through these descriptors and
//! the mapper keeps each frame's mapping count in them.

use bitfield_struct::bitfield;
use core::fmt;
use kernel_memory_addresses::FrameNumber;

/// Marks an empty free-list link.
pub(crate) const NIL: u32 = u32::MAX;

/// Per-frame state bits.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct FrameFlags {
    /// Never handed to an allocator (firmware, kernel image, base memory).
    pub reserved: bool,
    /// Heads a free buddy block of the descriptor's order.
    pub property: bool,
    /// Pinned by its owner.
    pub locked: bool,
    /// Contents modified since last written back.
    pub dirty: bool,
    /// Belongs to the buddy pool rather than the run allocator.
    pub pooled: bool,
    #[bits(27)]
    __: u32,
}

/// Descriptor of one physical frame.
#[repr(C)]
#[derive(Clone)]
pub struct PageFrame {
    flags: FrameFlags,
    /// Live counted page-table entries referencing this frame.
    mapcount: u32,
    /// Order of the free block this frame heads; meaningless otherwise.
    order: u8,
    /// Scratch value for the frame's owner.
    pub index: u32,
    pub(crate) prev: u32,
    pub(crate) next: u32,
}

impl PageFrame {
    /// A reserved, unmapped frame outside every free list.
    #[must_use]
    pub const fn reserved() -> Self {
        Self {
            flags: FrameFlags::new().with_reserved(true),
            mapcount: 0,
            order: 0,
            index: 0,
            prev: NIL,
            next: NIL,
        }
    }

    #[inline]
    #[must_use]
    pub const fn flags(&self) -> FrameFlags {
        self.flags
    }

    #[inline]
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        self.flags.reserved()
    }

    #[inline]
    #[must_use]
    pub const fn mapcount(&self) -> u32 {
        self.mapcount
    }

    #[inline]
    pub(crate) const fn set_reserved(&mut self, reserved: bool) {
        self.flags.set_reserved(reserved);
    }

    #[inline]
    #[must_use]
    pub const fn is_pooled(&self) -> bool {
        self.flags.pooled()
    }

    /// Hand the frame to the buddy pool.
    #[inline]
    pub(crate) const fn set_pooled(&mut self) {
        self.flags.set_reserved(false);
        self.flags.set_pooled(true);
    }

    /// Whether this frame heads a free block of exactly `order`.
    #[inline]
    pub(crate) const fn heads_free_block(&self, order: u8) -> bool {
        self.flags.property() && self.order == order
    }

    #[inline]
    pub(crate) const fn mark_free_head(&mut self, order: u8) {
        self.flags.set_property(true);
        self.order = order;
    }

    #[inline]
    pub(crate) const fn clear_free_head(&mut self) {
        self.flags.set_property(false);
        self.order = 0;
        self.prev = NIL;
        self.next = NIL;
    }

    /// Record one more counted mapping.
    #[inline]
    pub(crate) fn take_mapping(&mut self) {
        debug_assert!(!self.flags.property(), "mapping a free buddy block");
        self.mapcount += 1;
    }

    /// Drop one counted mapping.
    ///
    /// Returns `true` when this was the last one and the frame is not
    /// reserved, i.e. the frame is now unreferenced and must be released.
    ///
    /// # Panics
    /// If the count is already zero.
    #[inline]
    pub(crate) fn drop_mapping(&mut self) -> bool {
        assert!(self.mapcount > 0, "mapcount underflow");
        self.mapcount -= 1;
        self.mapcount == 0 && !self.is_reserved()
    }

    /// Read-only snapshot for diagnostics.
    #[must_use]
    pub const fn info(&self) -> FrameInfo {
        FrameInfo {
            flags: self.flags,
            mapcount: self.mapcount,
            order: self.order,
        }
    }
}

impl fmt::Debug for PageFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageFrame")
            .field("flags", &self.flags)
            .field("mapcount", &self.mapcount)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

/// Snapshot of a frame's descriptor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub flags: FrameFlags,
    pub mapcount: u32,
    /// Order of the free block this frame heads, if `flags.property()`.
    pub order: u8,
}

/// The descriptor array, one entry per frame from frame 0 upward.
pub struct FrameTable<'m> {
    frames: &'m mut [PageFrame],
}

impl<'m> FrameTable<'m> {
    /// Take over `frames`, resetting every descriptor to reserved.
    pub fn new(frames: &'m mut [PageFrame]) -> Self {
        frames.fill(PageFrame::reserved());
        Self { frames }
    }

    /// Number of frames described.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn len(&self) -> u32 {
        self.frames.len() as u32
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, f: FrameNumber) -> bool {
        f.as_usize() < self.frames.len()
    }

    #[inline]
    #[must_use]
    pub fn get(&self, f: FrameNumber) -> Option<&PageFrame> {
        self.frames.get(f.as_usize())
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, f: FrameNumber) -> Option<&mut PageFrame> {
        self.frames.get_mut(f.as_usize())
    }

    #[inline]
    pub(crate) fn at(&self, idx: u32) -> &PageFrame {
        &self.frames[idx as usize]
    }

    #[inline]
    pub(crate) fn at_mut(&mut self, idx: u32) -> &mut PageFrame {
        &mut self.frames[idx as usize]
    }
}
