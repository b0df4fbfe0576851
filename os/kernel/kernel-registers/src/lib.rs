//! # Typed i386 Control Registers
//!
//! Only the registers the memory manager touches are modeled: CR0 for the
//! paging switch and CR3 for the active page directory.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "cr0")]
mod cr0;

#[cfg(feature = "cr3")]
mod cr3;

#[cfg(feature = "cr0")]
pub use cr0::Cr0;

#[cfg(feature = "cr3")]
pub use cr3::Cr3;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn store_unsafe(self);
}
