//! # Buddy Allocator
//!
//! Power-of-two blocks of frames, orders `0..=MAX_ORDER`. A block of order
//! `k` is `2^k` contiguous frames aligned to `2^k` frames. The buddy of the
//! block at frame `i` is the block at `i ^ (1 << k)`.
//!
//! Free lists are intrusive: each free block's head descriptor carries the
//! `property` flag, its order, and the `prev`/`next` links of its list.

use crate::frame_table::{FrameInfo, FrameTable, NIL, PageFrame};
use kernel_info::memory::MAX_ORDER;
use kernel_memory_addresses::{FrameNumber, PhysicalPage, Size4K};
use kernel_vmem::FrameAlloc;

/// Head of one order's free list.
#[derive(Debug, Copy, Clone)]
struct FreeArea {
    head: u32,
    nr_free: u32,
}

impl FreeArea {
    const EMPTY: Self = Self {
        head: NIL,
        nr_free: 0,
    };
}

pub struct BuddyAllocator<'m> {
    table: FrameTable<'m>,
    free_area: [FreeArea; MAX_ORDER + 1],
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
fn check_order(order: usize) -> u8 {
    assert!(order <= MAX_ORDER, "invalid buddy order {order}");
    order as u8
}

impl<'m> BuddyAllocator<'m> {
    /// An allocator over `frames` with every list empty and every frame reserved.
    pub fn new(frames: &'m mut [PageFrame]) -> Self {
        Self {
            table: FrameTable::new(frames),
            free_area: [FreeArea::EMPTY; MAX_ORDER + 1],
        }
    }

    #[inline]
    #[must_use]
    pub const fn table(&self) -> &FrameTable<'m> {
        &self.table
    }

    #[inline]
    pub(crate) const fn table_mut(&mut self) -> &mut FrameTable<'m> {
        &mut self.table
    }

    /// Hand `[start, start + count)` to the allocator as the largest aligned
    /// blocks that fit.
    ///
    /// # Panics
    /// If the range extends past the descriptor table.
    pub fn add_range(&mut self, start: FrameNumber, count: u32) {
        let end = start.as_u32() + count;
        assert!(end <= self.table.len(), "range past the frame table");

        let mut idx = start.as_u32();
        while idx < end {
            let mut order = MAX_ORDER;
            while order > 0 && (idx % (1 << order) != 0 || idx + (1 << order) > end) {
                order -= 1;
            }
            for f in idx..idx + (1 << order) {
                self.table.at_mut(f).set_pooled();
            }
            self.free(FrameNumber::new(idx), order);
            idx += 1 << order;
        }
        log::debug!("buddy: added {count} frames at {start}");
    }

    /// Allocate a block of `2^order` frames.
    ///
    /// Takes the head of the smallest non-empty list of order `>= order` and
    /// splits it down, returning upper halves to their lists.
    ///
    /// # Panics
    /// If `order > MAX_ORDER`.
    pub fn alloc(&mut self, order: usize) -> Option<FrameNumber> {
        let order = check_order(order);
        let mut current = (order..=MAX_ORDER as u8).find(|&k| self.free_area[k as usize].head != NIL)?;

        let idx = self.free_area[current as usize].head;
        self.unlink(idx, current);
        self.table.at_mut(idx).clear_free_head();

        while current > order {
            current -= 1;
            let upper = idx + (1 << current);
            self.push(upper, current);
        }

        log::trace!("buddy: alloc order {order} -> frame {idx:#X}");
        Some(FrameNumber::new(idx))
    }

    /// Return the block of `2^order` frames at `frame`, merging with free buddies.
    ///
    /// # Panics
    /// If `order > MAX_ORDER` or `frame` is not aligned to the order.
    pub fn free(&mut self, frame: FrameNumber, order: usize) {
        let mut order = check_order(order);
        let mut idx = frame.as_u32();
        assert!(idx.is_multiple_of(1 << order), "block {frame} not aligned to order {order}");
        debug_assert!(!self.table.at(idx).flags().property(), "double free of {frame}");

        while (order as usize) < MAX_ORDER {
            let buddy = idx ^ (1 << order);
            if buddy >= self.table.len() || !self.table.at(buddy).heads_free_block(order) {
                break;
            }
            self.unlink(buddy, order);
            self.table.at_mut(buddy).clear_free_head();
            idx &= buddy;
            order += 1;
        }

        self.push(idx, order);
    }

    /// Number of free blocks per order.
    #[must_use]
    pub fn free_counts(&self) -> [u32; MAX_ORDER + 1] {
        self.free_area.map(|a| a.nr_free)
    }

    /// Total free frames across all orders.
    #[must_use]
    pub fn free_frames(&self) -> u32 {
        self.free_area
            .iter()
            .enumerate()
            .map(|(k, a)| a.nr_free << k)
            .sum()
    }

    /// Visit every free block as `(head frame, order)`, list by list.
    pub fn for_each_free_block(&self, mut f: impl FnMut(FrameNumber, usize)) {
        for (order, area) in self.free_area.iter().enumerate() {
            let mut idx = area.head;
            while idx != NIL {
                f(FrameNumber::new(idx), order);
                idx = self.table.at(idx).next;
            }
        }
    }

    /// Record a counted mapping of `frame`.
    ///
    /// Returns `false` if nothing is counted: the frame has no descriptor
    /// (MMIO) or belongs to the buddy pool, whose blocks go back through
    /// [`free`](Self::free) by whoever allocated them.
    pub(crate) fn take_mapping(&mut self, frame: FrameNumber) -> bool {
        match self.table.get_mut(frame) {
            Some(f) if !f.is_pooled() => {
                f.take_mapping();
                true
            }
            _ => false,
        }
    }

    /// Drop a counted mapping of `frame`; `true` when the frame became free.
    pub(crate) fn drop_mapping(&mut self, frame: FrameNumber) -> bool {
        self.table.get_mut(frame).is_some_and(PageFrame::drop_mapping)
    }

    #[must_use]
    pub fn frame_info(&self, frame: FrameNumber) -> Option<FrameInfo> {
        self.table.get(frame).map(PageFrame::info)
    }

    fn push(&mut self, idx: u32, order: u8) {
        let area = &mut self.free_area[order as usize];
        let old = area.head;
        area.head = idx;
        area.nr_free += 1;

        let f = self.table.at_mut(idx);
        f.mark_free_head(order);
        f.prev = NIL;
        f.next = old;
        if old != NIL {
            self.table.at_mut(old).prev = idx;
        }
    }

    fn unlink(&mut self, idx: u32, order: u8) {
        let (prev, next) = {
            let f = self.table.at(idx);
            (f.prev, f.next)
        };
        if prev == NIL {
            self.free_area[order as usize].head = next;
        } else {
            self.table.at_mut(prev).next = next;
        }
        if next != NIL {
            self.table.at_mut(next).prev = prev;
        }
        self.free_area[order as usize].nr_free -= 1;
    }
}

/// Page-table frames come from order 0.
impl FrameAlloc for BuddyAllocator<'_> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        self.alloc(0).map(FrameNumber::page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(n: usize) -> Vec<PageFrame> {
        vec![PageFrame::reserved(); n]
    }

    #[test]
    fn seed_uses_largest_aligned_blocks() {
        let mut backing = frames(4096);
        let mut b = BuddyAllocator::new(&mut backing);
        // [1021, 2050) = {1021} + [1022, 1024) + [1024, 2048) + [2048, 2050)
        b.add_range(FrameNumber::new(1021), 1029);
        let c = b.free_counts();
        assert_eq!(c[0], 1);
        assert_eq!(c[1], 2);
        assert_eq!(c[10], 1);
        assert_eq!(b.free_frames(), 1029);
    }

    #[test]
    fn order3_from_one_order10_block() {
        let mut backing = frames(1024);
        let mut b = BuddyAllocator::new(&mut backing);
        b.add_range(FrameNumber::new(0), 1024);
        assert_eq!(b.free_counts()[10], 1);

        let f = b.alloc(3).unwrap();
        assert_eq!(f.as_u32(), 0);
        // Halving leaves the upper half at every order from 9 down to 3.
        let c = b.free_counts();
        assert_eq!(&c[0..3], &[0, 0, 0]);
        for (k, n) in c.iter().enumerate().take(10).skip(3) {
            assert_eq!(*n, 1, "order {k}");
        }
        assert_eq!(c[10], 0);
        assert_eq!(b.free_frames(), 1024 - 8);

        b.free(f, 3);
        assert_eq!(b.free_counts()[10], 1);
        assert_eq!(b.free_frames(), 1024);
    }

    #[test]
    fn blocks_are_aligned() {
        let mut backing = frames(2048);
        let mut b = BuddyAllocator::new(&mut backing);
        b.add_range(FrameNumber::new(0), 2048);
        let _one = b.alloc(0).unwrap();
        for order in [2usize, 5, 1, 7, 3] {
            let f = b.alloc(order).unwrap();
            assert_eq!(f.as_u32() % (1 << order), 0, "order {order}");
        }
    }

    #[test]
    fn empty_lists_yield_none() {
        let mut backing = frames(8);
        let mut b = BuddyAllocator::new(&mut backing);
        assert!(b.alloc(0).is_none());
        b.add_range(FrameNumber::new(0), 2);
        assert!(b.alloc(2).is_none());
        assert!(b.alloc(1).is_some());
        assert!(b.alloc(0).is_none());
    }

    #[test]
    fn buddy_outside_table_stops_merge() {
        let mut backing = frames(3);
        let mut b = BuddyAllocator::new(&mut backing);
        b.add_range(FrameNumber::new(0), 3);
        assert_eq!(b.free_counts()[1], 1);
        assert_eq!(b.free_counts()[0], 1);
        let f = b.alloc(0).unwrap();
        assert_eq!(f.as_u32(), 2);
        b.free(f, 0);
        assert_eq!(b.free_frames(), 3);
    }

    #[test]
    #[should_panic(expected = "invalid buddy order")]
    fn order_out_of_range_panics() {
        let mut backing = frames(8);
        let mut b = BuddyAllocator::new(&mut backing);
        let _ = b.alloc(MAX_ORDER + 1);
    }

    #[test]
    fn free_lists_hold_disjoint_heads() {
        let mut backing = frames(1024);
        let mut b = BuddyAllocator::new(&mut backing);
        b.add_range(FrameNumber::new(0), 1024);
        let a = b.alloc(0).unwrap();
        let c = b.alloc(4).unwrap();
        b.free(a, 0);

        let mut covered = vec![false; 1024];
        b.for_each_free_block(|f, order| {
            let info = b.frame_info(f).unwrap();
            assert!(info.flags.property());
            assert_eq!(info.order as usize, order);
            assert_eq!(info.mapcount, 0);
            for i in f.as_usize()..f.as_usize() + (1 << order) {
                assert!(!covered[i], "frame {i} on two lists");
                covered[i] = true;
            }
        });
        for i in c.as_usize()..c.as_usize() + 16 {
            assert!(!covered[i], "allocated frame {i} on a free list");
        }
    }

    #[test]
    fn pool_frames_take_no_mapping_count() {
        let mut backing = frames(16);
        let mut b = BuddyAllocator::new(&mut backing);
        b.add_range(FrameNumber::new(0), 8);
        b.table_mut().at_mut(12).set_reserved(false);

        let f = b.alloc(0).unwrap();
        assert!(b.frame_info(f).unwrap().flags.pooled());
        assert!(!b.take_mapping(f));
        assert_eq!(b.frame_info(f).unwrap().mapcount, 0);

        let outside_pool = FrameNumber::new(12);
        assert!(!b.frame_info(outside_pool).unwrap().flags.pooled());
        assert!(b.take_mapping(outside_pool));
        assert!(b.drop_mapping(outside_pool));

        assert!(!b.take_mapping(FrameNumber::new(16)));
    }
}
