use bitfield_struct::bitfield;

/// Architectural model of CR0 on a 32-bit processor.
///
/// All defined control bits are exposed as booleans; reserved bits are
/// private padding and stay zero when the value is built with `new()`.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct Cr0 {
    /// Bit 0 — Protection Enable (PE).
    ///
    /// - 0: Real mode.
    /// - 1: Protected mode (required for paging).
    pub pe_protection_enable: bool,

    /// Bit 1 — Monitor Coprocessor (MP).
    pub mp_monitor_coprocessor: bool,

    /// Bit 2 — Emulation (EM).
    ///
    /// When set, x87 instructions raise `#NM`.
    pub em_emulation: bool,

    /// Bit 3 — Task Switched (TS).
    pub ts_task_switched: bool,

    /// Bit 4 — Extension Type (ET).
    pub et_extension_type: bool,

    /// Bit 5 — Numeric Error (NE).
    pub ne_numeric_error: bool,

    /// Bits 6–15 — Reserved.
    #[bits(10)]
    _reserved_6_15: u16,

    /// Bit 16 — Write Protect (WP).
    ///
    /// When set, supervisor writes to read-only **user** pages fault.
    pub wp_write_protect: bool,

    /// Bit 17 — Reserved.
    #[bits(1)]
    _reserved_17: u8,

    /// Bit 18 — Alignment Mask (AM).
    pub am_alignment_mask: bool,

    /// Bits 19–28 — Reserved.
    #[bits(10)]
    _reserved_19_28: u16,

    /// Bit 29 — Not-Write-Through (NW).
    pub nw_not_write_through: bool,

    /// Bit 30 — Cache Disable (CD).
    ///
    /// The memory core stops populating its software TLB while this is set.
    pub cd_cache_disable: bool,

    /// Bit 31 — Paging (PG).
    pub pg_paging: bool,
}
