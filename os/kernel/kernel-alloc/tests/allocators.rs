mod common;

use std::collections::BTreeSet;

use common::{RAM_SIZE, Ram};
use kernel_alloc::MemoryManager;
use kernel_alloc::phys_mapper::OffsetPhysMapper;
use kernel_alloc::run_list::RunList;
use kernel_info::memory::USER_BASE;
use kernel_memory_addresses::{FrameNumber, LinearAddress, PhysicalAddress};
use kernel_vmem::PageEntryBits;

fn free_block_frames(mm: &MemoryManager<'_, OffsetPhysMapper>) -> Vec<(u32, u32)> {
    let mut v = Vec::new();
    mm.free_blocks(|f, order| v.push((f.as_u32(), f.as_u32() + (1 << order))));
    v
}

#[test]
fn buddy_blocks_are_aligned_and_disjoint() {
    let ram = Ram::new(RAM_SIZE);
    let mapper = ram.mapper();
    let mm = common::boot(&mapper);
    let before = mm.free_area_counts();

    let mut taken: Vec<(FrameNumber, usize)> = Vec::new();
    for order in [0, 3, 1, 2, 0, 4, 0, 1] {
        let f = mm.allocate_block(order).unwrap();
        assert_eq!(f.as_u32() % (1 << order), 0, "order {order} block at {f}");
        taken.push((f, order));
    }

    let mut seen = BTreeSet::new();
    for (f, order) in &taken {
        for i in 0..1u32 << order {
            assert!(seen.insert(f.as_u32() + i), "frame handed out twice");
        }
    }
    for (start, end) in free_block_frames(&mm) {
        for i in start..end {
            assert!(seen.insert(i), "free frame {i:#X} is also allocated or listed twice");
        }
    }

    for (f, order) in taken.into_iter().rev() {
        unsafe { mm.free_block(f, order) };
    }
    assert_eq!(mm.free_area_counts(), before);
}

#[test]
fn free_lists_exclude_mapped_frames() {
    let ram = Ram::new(RAM_SIZE);
    let mapper = ram.mapper();
    let mm = common::boot(&mapper);
    let dir = mm.create_address_space().unwrap();

    let pa = mm.allocate_run(4 * 4096).unwrap();
    mm.map_range(
        dir,
        pa,
        LinearAddress::new(USER_BASE),
        4 * 4096,
        PageEntryBits::user_rw(),
    )
    .unwrap();

    for (start, end) in free_block_frames(&mm) {
        for i in start..end {
            assert_eq!(mm.frame_info(FrameNumber::new(i)).unwrap().mapcount, 0);
        }
    }
    for (start, len) in common::runs(&mm) {
        for off in (0..len).step_by(4096) {
            let info = mm.frame_info(PhysicalAddress::new(start + off).frame()).unwrap();
            assert_eq!(info.mapcount, 0);
        }
    }
    assert_eq!(mm.frame_info(pa.frame()).unwrap().mapcount, 1);
}

#[test]
fn run_allocation_takes_the_tail() {
    let ram = Ram::new(0x20_0000);
    let mapper = ram.mapper();
    let mut runs = RunList::new();
    unsafe { runs.free(&mapper, PhysicalAddress::new(0x10_0000), 0x10_0000) };

    let pa = runs.alloc(&mapper, 0x1000).unwrap();
    assert_eq!(pa, PhysicalAddress::new(0x1F_F000));

    let mut v = Vec::new();
    runs.for_each(&mapper, |start, len| v.push((start.as_u32(), len)));
    assert_eq!(v, vec![(0x10_0000, 0xF_F000)]);
}

#[test]
fn run_allocation_exhaustion_is_not_fatal() {
    let ram = Ram::new(RAM_SIZE);
    let mapper = ram.mapper();
    let mm = common::boot(&mapper);

    let all = u32::try_from(mm.free_run_bytes()).unwrap();
    assert!(mm.allocate_run(all + 4096).is_none());
    let pa = mm.allocate_run(all).unwrap();
    assert!(mm.allocate_page().is_none());
    unsafe { mm.free_run(pa, all) };
    assert_eq!(mm.free_run_bytes(), u64::from(all));
}

#[test]
#[should_panic(expected = "freeing free page")]
fn freeing_a_free_run_panics() {
    let ram = Ram::new(RAM_SIZE);
    let mapper = ram.mapper();
    let mm = common::boot(&mapper);
    let pa = mm.allocate_run(2 * 4096).unwrap();
    unsafe {
        mm.free_run(pa, 2 * 4096);
        mm.free_run(pa + 4096, 4096);
    }
}

#[test]
#[should_panic(expected = "not a positive multiple of the page size")]
fn odd_run_length_panics() {
    let ram = Ram::new(RAM_SIZE);
    let mapper = ram.mapper();
    let mm = common::boot(&mapper);
    let _ = mm.allocate_run(4096 + 12);
}

#[test]
#[should_panic(expected = "invalid buddy order")]
fn buddy_order_above_ten_panics() {
    let ram = Ram::new(RAM_SIZE);
    let mapper = ram.mapper();
    let mm = common::boot(&mapper);
    let _ = mm.allocate_block(11);
}

#[test]
fn concurrent_address_spaces_leave_no_trace() {
    let ram = Ram::new(RAM_SIZE);
    let mapper = ram.mapper();
    let mm = common::boot(&mapper);

    let counts_before = mm.free_area_counts();
    let runs_before = common::runs(&mm);

    std::thread::scope(|s| {
        for t in 0..4u32 {
            let mm = &mm;
            s.spawn(move || {
                let dir = mm.create_address_space().unwrap();
                for round in 0..16u32 {
                    let la = LinearAddress::new(USER_BASE + (round % 4) * 0x40_0000 + t * 0x1000);
                    let pa = mm.allocate_run(2 * 4096).unwrap();
                    mm.map_range(dir, pa, la, 2 * 4096, PageEntryBits::user_rw())
                        .unwrap();
                    assert_eq!(mm.translate(dir, la + 0x1234), Ok(pa + 0x1234));
                    mm.unmap_range(dir, la, 2 * 4096).unwrap();
                }
                let keep = mm.allocate_page().unwrap();
                mm.map_range(
                    dir,
                    keep,
                    LinearAddress::new(USER_BASE),
                    4096,
                    PageEntryBits::user_rw(),
                )
                .unwrap();
                mm.destroy_address_space(dir).unwrap();
            });
        }
    });

    assert_eq!(mm.free_area_counts(), counts_before);
    assert_eq!(common::runs(&mm), runs_before);
}
