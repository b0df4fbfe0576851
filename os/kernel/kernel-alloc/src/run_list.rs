//! # Run Allocator
//!
//! A first-fit allocator of page-multiple byte ranges ("runs") over physical
//! memory. Every free run starts with a [`Run`] header stored in the run's
//! own first bytes:
//!
//! ```text
//! +----------------------+-------------------------------+
//! | Run { next, len }    |  rest of the free run         |
//! +----------------------+-------------------------------+
//! ^ run start            ^ run start + 8        run start + len ^
//! ```
//!
//! # Invariants
//! - Runs are sorted by address and never overlap.
//! - Runs never touch: for consecutive runs `r`, `n`: `r + r.len < n`.
//!   Adjacent ranges are coalesced on free.
//! - Every run length is a positive multiple of 4 KiB.

use kernel_info::memory::{JUNK_BYTE, PAGE_SIZE};
use kernel_memory_addresses::{PhysicalAddress, Size4K};
use kernel_vmem::PhysMapper;

/// Marks the end of the list. Runs are page aligned, so no run starts here.
const END: u32 = u32::MAX;

/// Header at the start of every free run.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
struct Run {
    /// Physical address of the next run, or [`END`].
    next: u32,
    /// Bytes in this run, including the header.
    len: u32,
}

#[track_caller]
fn check_len(len: u32, op: &str) {
    assert!(
        len > 0 && len.is_multiple_of(PAGE_SIZE),
        "{op}: length {len:#X} is not a positive multiple of the page size"
    );
}

/// Address-ordered list of free runs.
pub struct RunList {
    head: u32,
}

impl Default for RunList {
    fn default() -> Self {
        Self::new()
    }
}

impl RunList {
    #[must_use]
    pub const fn new() -> Self {
        Self { head: END }
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.head == END
    }

    fn node<M: PhysMapper>(mapper: &M, at: u32) -> &mut Run {
        unsafe { mapper.phys_to_mut::<Run>(PhysicalAddress::new(at)) }
    }

    /// Point the link that precedes a run (list head or `prev.next`) at `to`.
    fn relink<M: PhysMapper>(&mut self, mapper: &M, prev: Option<u32>, to: u32) {
        match prev {
            None => self.head = to,
            Some(p) => Self::node(mapper, p).next = to,
        }
    }

    /// Return `[pa, pa + len)` to the list.
    ///
    /// The range is checked against the free runs, filled with junk, then
    /// inserted in address order and merged with the runs it touches.
    ///
    /// # Safety
    /// The range must be RAM reachable through `mapper` and unused by anyone.
    ///
    /// # Panics
    /// - If `len` is not a positive multiple of the page size or `pa` is not
    ///   page aligned.
    /// - If the range overlaps a free run ("freeing free page").
    pub unsafe fn free<M: PhysMapper>(&mut self, mapper: &M, pa: PhysicalAddress, len: u32) {
        check_len(len, "free_run");
        assert!(pa.is_aligned::<Size4K>(), "free_run: {pa} is not page aligned");
        let p = u64::from(pa.as_u32());
        let pend = p + u64::from(len);
        assert!(pend <= 1 << 32, "free_run: range past 4 GiB");

        let mut prev: Option<u32> = None;
        let mut cur = self.head;
        while cur != END {
            let r = *Self::node(mapper, cur);
            let start = u64::from(cur);
            let rend = start + u64::from(r.len);
            assert!(
                !(p < rend && start < pend),
                "freeing free page: {pa} + {len:#X} overlaps run {cur:#010X} + {:#X}",
                r.len
            );
            if start >= pend {
                break;
            }
            prev = Some(cur);
            cur = r.next;
        }

        for i in 0..len / PAGE_SIZE {
            let page = PhysicalAddress::new(pa.as_u32() + i * PAGE_SIZE).page::<Size4K>();
            mapper.frame_mut(page).fill(JUNK_BYTE);
        }

        // `prev` ends at or before `p`; `cur` starts at or after `pend`.
        let joins_prev = prev.is_some_and(|q| u64::from(q) + u64::from(Self::node(mapper, q).len) == p);
        let joins_next = cur != END && u64::from(cur) == pend;

        match (prev, joins_prev, joins_next) {
            (Some(q), true, true) => {
                let next = *Self::node(mapper, cur);
                let r = Self::node(mapper, q);
                r.len += len + next.len;
                r.next = next.next;
            }
            (Some(q), true, false) => {
                Self::node(mapper, q).len += len;
            }
            (_, false, true) => {
                let next = *Self::node(mapper, cur);
                *Self::node(mapper, pa.as_u32()) = Run {
                    next: next.next,
                    len: len + next.len,
                };
                self.relink(mapper, prev, pa.as_u32());
            }
            _ => {
                *Self::node(mapper, pa.as_u32()) = Run { next: cur, len };
                self.relink(mapper, prev, pa.as_u32());
            }
        }
    }

    /// Take `len` bytes from the first run that can hold them.
    ///
    /// An exactly sized run is unlinked whole; a larger run gives up its
    /// tail. Returns `None` if no run is large enough.
    ///
    /// # Panics
    /// If `len` is not a positive multiple of the page size.
    pub fn alloc<M: PhysMapper>(&mut self, mapper: &M, len: u32) -> Option<PhysicalAddress> {
        check_len(len, "allocate_run");

        let mut prev: Option<u32> = None;
        let mut cur = self.head;
        while cur != END {
            let r = Self::node(mapper, cur);
            if r.len == len {
                let next = r.next;
                self.relink(mapper, prev, next);
                return Some(PhysicalAddress::new(cur));
            }
            if r.len > len {
                r.len -= len;
                return Some(PhysicalAddress::new(cur + r.len));
            }
            prev = Some(cur);
            cur = r.next;
        }
        None
    }

    /// Visit every free run as `(start, len)` in address order.
    pub fn for_each<M: PhysMapper>(&self, mapper: &M, mut f: impl FnMut(PhysicalAddress, u32)) {
        let mut cur = self.head;
        while cur != END {
            let r = *Self::node(mapper, cur);
            f(PhysicalAddress::new(cur), r.len);
            cur = r.next;
        }
    }

    /// Total free bytes.
    #[must_use]
    pub fn free_bytes<M: PhysMapper>(&self, mapper: &M) -> u64 {
        let mut total = 0;
        self.for_each(mapper, |_, len| total += u64::from(len));
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phys_mapper::OffsetPhysMapper;

    #[repr(C, align(4096))]
    #[derive(Clone)]
    struct Frame([u8; 4096]);

    struct Ram {
        frames: Vec<Frame>,
        mapper: OffsetPhysMapper,
    }

    impl Ram {
        fn new(pages: usize) -> Self {
            let mut frames = vec![Frame([0; 4096]); pages];
            let mapper = unsafe { OffsetPhysMapper::new(frames.as_mut_ptr().cast(), pages * 4096) };
            Self { frames, mapper }
        }

        fn byte(&self, pa: u32) -> u8 {
            self.frames[pa as usize / 4096].0[pa as usize % 4096]
        }
    }

    fn runs(list: &RunList, ram: &Ram) -> Vec<(u32, u32)> {
        let mut v = Vec::new();
        list.for_each(&ram.mapper, |pa, len| v.push((pa.as_u32(), len)));
        v
    }

    fn free(list: &mut RunList, ram: &Ram, pa: u32, len: u32) {
        unsafe { list.free(&ram.mapper, PhysicalAddress::new(pa), len) };
    }

    #[test]
    fn alloc_takes_tail_of_first_fit() {
        let ram = Ram::new(16);
        let mut list = RunList::new();
        free(&mut list, &ram, 0x1000, 0x8000);

        let pa = list.alloc(&ram.mapper, 0x1000).unwrap();
        assert_eq!(pa.as_u32(), 0x8000);
        assert_eq!(runs(&list, &ram), vec![(0x1000, 0x7000)]);
    }

    #[test]
    fn exact_fit_unlinks_run() {
        let ram = Ram::new(16);
        let mut list = RunList::new();
        free(&mut list, &ram, 0x2000, 0x1000);
        free(&mut list, &ram, 0x5000, 0x3000);

        assert_eq!(list.alloc(&ram.mapper, 0x3000).map(PhysicalAddress::as_u32), Some(0x5000));
        assert_eq!(runs(&list, &ram), vec![(0x2000, 0x1000)]);
        assert_eq!(list.alloc(&ram.mapper, 0x1000).map(PhysicalAddress::as_u32), Some(0x2000));
        assert!(list.is_empty());
        assert!(list.alloc(&ram.mapper, 0x1000).is_none());
    }

    #[test]
    fn free_merges_with_both_neighbours() {
        let ram = Ram::new(16);
        let mut list = RunList::new();
        free(&mut list, &ram, 0x1000, 0x1000);
        free(&mut list, &ram, 0x3000, 0x1000);
        free(&mut list, &ram, 0x6000, 0x1000);
        assert_eq!(runs(&list, &ram).len(), 3);

        free(&mut list, &ram, 0x2000, 0x1000);
        assert_eq!(runs(&list, &ram), vec![(0x1000, 0x3000), (0x6000, 0x1000)]);

        free(&mut list, &ram, 0x5000, 0x1000);
        assert_eq!(runs(&list, &ram), vec![(0x1000, 0x3000), (0x5000, 0x2000)]);

        free(&mut list, &ram, 0x4000, 0x1000);
        assert_eq!(runs(&list, &ram), vec![(0x1000, 0x6000)]);
        assert_eq!(list.free_bytes(&ram.mapper), 0x6000);
    }

    #[test]
    fn free_before_head_becomes_head() {
        let ram = Ram::new(16);
        let mut list = RunList::new();
        free(&mut list, &ram, 0x8000, 0x1000);
        free(&mut list, &ram, 0x0000, 0x2000);
        assert_eq!(runs(&list, &ram), vec![(0x0000, 0x2000), (0x8000, 0x1000)]);
    }

    #[test]
    fn freed_memory_is_filled_with_junk() {
        let ram = Ram::new(4);
        let mut list = RunList::new();
        free(&mut list, &ram, 0x1000, 0x2000);
        assert_eq!(ram.byte(0x1FFF), JUNK_BYTE);
        assert_eq!(ram.byte(0x2800), JUNK_BYTE);
        assert_eq!(ram.byte(0x0800), 0);
    }

    #[test]
    fn runs_stay_ordered_and_apart() {
        let ram = Ram::new(64);
        let mut list = RunList::new();
        for pa in (0..64u32).step_by(2) {
            free(&mut list, &ram, pa * 0x1000, 0x1000);
        }
        let mut taken = Vec::new();
        for len in [0x1000, 0x1000, 0x1000] {
            taken.push(list.alloc(&ram.mapper, len).unwrap());
        }
        for pa in (1..64u32).step_by(4) {
            free(&mut list, &ram, pa * 0x1000, 0x1000);
        }
        for pa in taken {
            free(&mut list, &ram, pa.as_u32(), 0x1000);
        }

        let v = runs(&list, &ram);
        for w in v.windows(2) {
            assert!(w[0].0 + w[0].1 < w[1].0, "{w:?}");
        }
    }

    #[test]
    #[should_panic(expected = "freeing free page")]
    fn double_free_panics() {
        let ram = Ram::new(8);
        let mut list = RunList::new();
        free(&mut list, &ram, 0x1000, 0x3000);
        free(&mut list, &ram, 0x2000, 0x1000);
    }

    #[test]
    #[should_panic(expected = "not a positive multiple of the page size")]
    fn odd_length_panics() {
        let ram = Ram::new(4);
        let mut list = RunList::new();
        let _ = list.alloc(&ram.mapper, 0x800);
    }

    #[test]
    #[should_panic(expected = "not a positive multiple of the page size")]
    fn zero_length_free_panics() {
        let ram = Ram::new(4);
        let mut list = RunList::new();
        free(&mut list, &ram, 0x1000, 0);
    }
}
