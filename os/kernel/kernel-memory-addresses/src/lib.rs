//! # Linear and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw 32-bit memory addresses, page bases and
//! frame numbers used by the paging and memory management code.
//!
//! ## Overview
//!
//! All higher-level memory abstractions build on a few principal types:
//!
//! | Concept | Generic | Description |
//! |----------|----------|-------------|
//! | [`MemoryAddress`] | - | A raw 32-bit address, either physical or linear. |
//! | [`MemoryPage<S>`] | [`S: PageSize`](PageSize) | A page-aligned base address of a page of size `S`. |
//! | [`MemoryAddressOffset<S>`] | [`S: PageSize`](PageSize) | An offset within a page of size `S`. |
//!
//! These are wrapped to distinguish between the two address spaces:
//!
//! | Wrapper | Meaning |
//! |----------|----------|
//! | [`LinearAddress`] / [`LinearPage<S>`] | Addresses before page-table translation. |
//! | [`PhysicalAddress`] / [`PhysicalPage<S>`] | Physical memory or MMIO. |
//! | [`FrameNumber`] | Index of a 4 KiB physical frame. |
//!
//! ## Page Sizes
//!
//! - [`Size4K`]: 4 KiB pages, the frame granularity.
//! - [`Size4M`]: the 4 MiB span of one page-directory entry.
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let la = LinearAddress::new(0x8000_1234);
//! let (page, off) = la.split::<Size4K>();
//! assert_eq!(page.base().as_u32(), 0x8000_1000);
//! assert_eq!(page.join(off), la);
//!
//! let pa = PhysicalAddress::new(0x0020_0042);
//! assert_eq!(pa.frame(), FrameNumber::new(0x200));
//! assert_eq!(pa.frame().base(), PhysicalAddress::new(0x0020_0000));
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod frame_number;
mod linear_address;
mod linear_page;
mod memory_address;
mod memory_address_offset;
mod memory_page;
mod page_size;
mod physical_address;
mod physical_page;

pub use crate::frame_number::FrameNumber;
pub use crate::linear_address::LinearAddress;
pub use crate::linear_page::LinearPage;
pub use crate::memory_address::MemoryAddress;
pub use crate::memory_address_offset::MemoryAddressOffset;
pub use crate::memory_page::MemoryPage;
pub use crate::page_size::{PageSize, Size4K, Size4M};
pub use crate::physical_address::PhysicalAddress;
pub use crate::physical_page::PhysicalPage;
