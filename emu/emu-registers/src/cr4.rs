use bitfield_struct::bitfield;

/// CR4 — Control Register 4 as implemented by 32-bit processors.
///
/// Only the bits defined up to the Pentium III are modelled; everything
/// above bit 10 is reserved.
#[bitfield(u32, order = Lsb)]
#[derive(PartialEq, Eq)]
pub struct Cr4 {
    /// Bit 0 — VME: Virtual-8086 Mode Extensions.
    pub vme: bool,

    /// Bit 1 — PVI: Protected-Mode Virtual Interrupts.
    pub pvi: bool,

    /// Bit 2 — TSD: Time Stamp Disable.
    pub tsd: bool,

    /// Bit 3 — DE: Debugging Extensions.
    pub de: bool,

    /// Bit 4 — PSE: Page Size Extensions (4 MiB directory entries).
    pub pse: bool,

    /// Bit 5 — PAE: Physical Address Extension. Not supported by the
    /// memory core; the bit is carried for completeness.
    pub pae: bool,

    /// Bit 6 — MCE: Machine-Check Enable.
    pub mce: bool,

    /// Bit 7 — PGE: Page Global Enable.
    pub pge: bool,

    /// Bit 8 — PCE: Performance-Monitoring Counter Enable.
    pub pce: bool,

    /// Bit 9 — OSFXSR.
    pub osfxsr: bool,

    /// Bit 10 — OSXMMEXCPT.
    pub osxmmexcpt: bool,

    /// Bits 11–31 — Reserved.
    #[bits(21)]
    _reserved_11_31: u32,
}
