//! # Kernel Layout and Boot Interface
//!
//! Memory layout constants shared by every memory subsystem crate, and the
//! memory map the loader hands to the kernel.
//!
//! ### Memory Layout ([`memory`])
//! * **Address Space Split**: user region `[USER_BASE, USER_END)`, shared kernel region elsewhere
//! * **Buddy Limits**: page size and the largest block order
//! * **Fixed Windows**: base memory and the APIC MMIO range
//!
//! ### Boot Information ([`boot`])
//! * **Firmware Memory Map**: [`MemoryRegion`](boot::MemoryRegion) entries tagged usable or reserved
//! * **Kernel Image**: physical extent of the loaded kernel

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
