mod common;

use common::{BOOT_TABLE_FRAMES, POOL_PAGES, RAM_SIZE, Ram, TABLE_END};
use kernel_alloc::TranslateError;
use kernel_info::memory::{APIC_MMIO_BASE, JUNK_BYTE, USER_BASE};
use kernel_memory_addresses::{FrameNumber, LinearAddress, PhysicalAddress};

#[test]
fn frame_count_covers_highest_usable_end() {
    let ram = Ram::new(RAM_SIZE);
    let mapper = ram.mapper();
    let mm = common::boot(&mapper);
    assert_eq!(mm.frame_count() as usize, RAM_SIZE / 4096);
}

#[test]
fn reserved_frames_follow_the_memory_map() {
    let ram = Ram::new(RAM_SIZE);
    let mapper = ram.mapper();
    let mm = common::boot(&mapper);

    let reserved = |pa: u32| {
        mm.frame_info(PhysicalAddress::new(pa).frame())
            .unwrap()
            .flags
            .reserved()
    };
    // Base memory, legacy hole, kernel image, descriptor table.
    assert!(reserved(0x0000));
    assert!(reserved(0x5_0000));
    assert!(reserved(0xA_0000));
    assert!(reserved(0x10_0000));
    assert!(reserved(0x17_F000));
    assert!(reserved(TABLE_END - 0x1000));
    // Free memory.
    assert!(!reserved(TABLE_END));
    assert!(!reserved(RAM_SIZE as u32 - 0x1000));
    // The page-table pool starts right behind the descriptor table.
    let pooled = |pa: u32| {
        mm.frame_info(PhysicalAddress::new(pa).frame())
            .unwrap()
            .flags
            .pooled()
    };
    assert!(pooled(TABLE_END));
    assert!(!pooled(RAM_SIZE as u32 - 0x1000));

    assert!(mm.frame_info(FrameNumber::new(mm.frame_count())).is_none());
}

#[test]
fn pool_seeds_buddy_and_the_rest_becomes_one_run() {
    let ram = Ram::new(RAM_SIZE);
    let mapper = ram.mapper();
    let mm = common::boot(&mapper);

    assert_eq!(common::buddy_free_frames(&mm), POOL_PAGES - BOOT_TABLE_FRAMES);

    let pool_end = TABLE_END + POOL_PAGES * 4096;
    assert_eq!(common::runs(&mm), vec![(pool_end, RAM_SIZE as u32 - pool_end)]);
    assert_eq!(mm.free_run_bytes(), u64::from(RAM_SIZE as u32 - pool_end));

    // Free runs are filled with junk past their header.
    assert_eq!(ram.byte(pool_end + 0x10), JUNK_BYTE);
    assert_eq!(ram.byte(RAM_SIZE as u32 - 1), JUNK_BYTE);
}

#[test]
fn boot_directory_identity_maps_the_kernel_region() {
    let ram = Ram::new(RAM_SIZE);
    let mapper = ram.mapper();
    let mm = common::boot(&mapper);
    let dir = mm.boot_directory();

    assert_eq!(mm.check_identity_map(dir, 0, RAM_SIZE as u32), 0);
    assert_eq!(
        mm.translate(dir, LinearAddress::new(0x12_3456)),
        Ok(PhysicalAddress::new(0x12_3456))
    );
    assert_eq!(
        mm.translate(dir, LinearAddress::new(APIC_MMIO_BASE + 0x20)),
        Ok(PhysicalAddress::new(APIC_MMIO_BASE + 0x20))
    );
    assert_eq!(
        mm.translate(dir, LinearAddress::new(RAM_SIZE as u32)),
        Err(TranslateError::NoDirectoryEntry)
    );
    assert_eq!(
        mm.translate(dir, LinearAddress::new(USER_BASE)),
        Err(TranslateError::NoDirectoryEntry)
    );
}

#[test]
fn boot_mappings_take_no_references() {
    let ram = Ram::new(RAM_SIZE);
    let mapper = ram.mapper();
    let mm = common::boot(&mapper);

    for pa in [0x1000, 0x10_0000, TABLE_END, RAM_SIZE as u32 - 0x1000] {
        let info = mm.frame_info(PhysicalAddress::new(pa).frame()).unwrap();
        assert_eq!(info.mapcount, 0, "{pa:#X}");
    }
}

#[test]
fn boot_directory_cannot_be_destroyed() {
    let ram = Ram::new(RAM_SIZE);
    let mapper = ram.mapper();
    let mm = common::boot(&mapper);
    let dir = mm.boot_directory();
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _ = mm.destroy_address_space(dir);
    }));
    assert!(outcome.is_err());
}
