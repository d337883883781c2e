use bitfield_struct::bitfield;

/// CR3 — Page-Directory Base Register (32-bit paging, no PAE).
///
/// Holds the physical base of the page directory and the cache-control
/// flags used for directory accesses.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct Cr3 {
    /// Bits 0–2 — Reserved.
    #[bits(3)]
    _reserved_0_2: u8,

    /// Bit 3 — PWT: Page-level Write-Through for the directory.
    pub pwt: bool,

    /// Bit 4 — PCD: Page-level Cache Disable for the directory.
    pub pcd: bool,

    /// Bits 5–11 — Reserved.
    #[bits(7)]
    _reserved_5_11: u8,

    /// Bits 12–31 — Page directory physical base >> 12.
    #[bits(20)]
    directory_base_4k: u32,
}

impl Cr3 {
    /// Build a `Cr3` value pointing at the page directory at `directory`.
    ///
    /// The low 12 bits of `directory` are discarded.
    #[must_use]
    pub const fn from_directory_base(directory: u32, pwt: bool, pcd: bool) -> Self {
        Self::new()
            .with_pwt(pwt)
            .with_pcd(pcd)
            .with_directory_base_4k(directory >> 12)
    }

    /// Physical address of the page directory (always 4 KiB aligned).
    #[must_use]
    pub const fn directory_base(&self) -> u32 {
        self.directory_base_4k() << 12
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_base_drops_flag_bits() {
        let cr3 = Cr3::from_bits(0x0012_3018);
        assert_eq!(cr3.directory_base(), 0x0012_3000);
        assert!(cr3.pwt());
        assert!(cr3.pcd());
    }

    #[test]
    fn from_directory_base_ignores_offset() {
        let cr3 = Cr3::from_directory_base(0x0000_1FFF, false, false);
        assert_eq!(cr3.into_bits(), 0x0000_1000);
    }
}
