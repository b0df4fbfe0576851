use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;

/// Architectural model of CR0 in 32-bit protected mode.
///
/// Exposes the defined control bits as booleans and keeps all reserved bits
/// forced to 0.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct Cr0 {
    /// Bit 0: Protection Enable (PE).
    pub pe_protection_enable: bool,

    /// Bit 1: Monitor Coprocessor (MP).
    ///
    /// Controls interaction of WAIT/FWAIT with TS for x87.
    pub mp_monitor_coprocessor: bool,

    /// Bit 2: Emulation (EM).
    ///
    /// - 1: No x87 present; all x87 instructions fault.
    /// - 0: x87 instructions executed normally.
    pub em_emulation: bool,

    /// Bit 3: Task Switched (TS).
    pub ts_task_switched: bool,

    /// Bit 4: Extension Type (ET).
    pub et_extension_type: bool,

    /// Bit 5: Numeric Error (NE).
    ///
    /// - 1: x87 errors reported via exceptions (#MF).
    /// - 0: x87 errors signaled via external IRQ 13 (legacy).
    pub ne_numeric_error: bool,

    #[bits(10, default = 0)]
    _reserved_6_15: u16,

    /// Bit 16: Write Protect (WP).
    ///
    /// When set, supervisor code must respect read-only pages.
    pub wp_write_protect: bool,

    #[bits(default = false)]
    _reserved_17: bool,

    /// Bit 18: Alignment Mask (AM).
    pub am_alignment_mask: bool,

    #[bits(10, default = 0)]
    _reserved_19_28: u16,

    /// Bit 29: Not-Write-Through (NW).
    pub nw_not_write_through: bool,

    /// Bit 30: Cache Disable (CD).
    pub cd_cache_disable: bool,

    /// Bit 31: Paging (PG).
    ///
    /// - 0: Paging disabled.
    /// - 1: Paging enabled (requires PE=1).
    pub pg_paging: bool,
}

impl Cr0 {
    /// The value to load when switching paging on.
    ///
    /// Sets PE, PG, AM, WP, NE and MP; clears TS and EM. All other bits are
    /// kept from `self`.
    #[must_use]
    pub const fn with_paging_enabled(self) -> Self {
        self.with_pe_protection_enable(true)
            .with_pg_paging(true)
            .with_am_alignment_mask(true)
            .with_wp_write_protect(true)
            .with_ne_numeric_error(true)
            .with_mp_monitor_coprocessor(true)
            .with_ts_task_switched(false)
            .with_em_emulation(false)
    }
}

#[cfg(all(feature = "asm", any(target_arch = "x86", target_arch = "x86_64")))]
impl LoadRegisterUnsafe for Cr0 {
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn load_unsafe() -> Self {
        let mut cr0: usize;
        unsafe {
            core::arch::asm!("mov {}, cr0", out(reg) cr0, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr0 as u32)
    }
}

#[cfg(all(feature = "asm", any(target_arch = "x86", target_arch = "x86_64")))]
impl StoreRegisterUnsafe for Cr0 {
    unsafe fn store_unsafe(self) {
        let cr0 = self.into_bits() as usize;
        unsafe {
            core::arch::asm!("mov cr0, {}", in(reg) cr0, options(nostack, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_bits() {
        let before = Cr0::new()
            .with_ts_task_switched(true)
            .with_em_emulation(true)
            .with_et_extension_type(true)
            .with_cd_cache_disable(true);
        let after = before.with_paging_enabled();

        assert!(after.pe_protection_enable());
        assert!(after.pg_paging());
        assert!(after.am_alignment_mask());
        assert!(after.wp_write_protect());
        assert!(after.ne_numeric_error());
        assert!(after.mp_monitor_coprocessor());
        assert!(!after.ts_task_switched());
        assert!(!after.em_emulation());

        // Untouched bits survive.
        assert!(after.et_extension_type());
        assert!(after.cd_cache_disable());
    }

    #[test]
    fn bit_positions() {
        assert_eq!(Cr0::new().with_paging_enabled().into_bits(), 0x8005_0023);
    }
}
