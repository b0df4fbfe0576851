//! # Memory Page Table

pub mod pd;
pub mod pt;

use crate::page_table::pd::L2Index;
use crate::page_table::pt::L1Index;
use kernel_memory_addresses::LinearAddress;

/// Entries per directory or table.
pub const ENTRIES: usize = 1024;

#[inline]
#[must_use]
pub const fn split_indices(la: LinearAddress) -> (L2Index, L1Index) {
    (L2Index::from(la), L1Index::from(la))
}
