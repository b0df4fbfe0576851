//! # Kernel synchronization primitives
//!
//! A named test-and-test-and-set spin lock with RAII guards. Every lock in
//! the memory manager carries a name so diagnostics can say which one is
//! held.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
