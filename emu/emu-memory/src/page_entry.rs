//! # x86 32-bit Paging Structures
//!
//! Typed views of the two-level, non-PAE paging structures the walker reads
//! out of guest memory:
//!
//! - [`Pde`]: a directory entry that points at a page table (`PS=0`, or PSE off).
//! - [`Pde4M`]: a directory entry that maps a 4 MiB page (`PS=1` with CR4.PSE).
//! - [`Pte`]: a table entry mapping one 4 KiB page.
//! - [`DirectoryEntry`]: raw directory entry, decoded by [`DirectoryEntry::view`].
//!
//! ## Layout
//!
//! ```text
//! Pde:   | 31‒12 table base | 11‒9 avl | 8 ign | 7 PS=0 | 6 ign | 5 A | 4 PCD | 3 PWT | 2 U/S | 1 R/W | 0 P |
//! Pde4M: | 31‒22 page base  | 21‒13 rsvd | 12 PAT | 11‒9 avl | 8 G | 7 PS=1 | 6 D | 5 A | ... | 0 P |
//! Pte:   | 31‒12 page base  | 11‒9 avl | 8 G | 7 PAT | 6 D | 5 A | 4 PCD | 3 PWT | 2 U/S | 1 R/W | 0 P |
//! ```
//!
//! Raw constructors don't validate consistency. Software TLB maintenance after
//! editing live tables is the caller's job.

use bitfield_struct::bitfield;

/// Bit 0 of every entry.
pub const PRESENT_BIT: u32 = 1 << 0;
/// Bit 5 of every entry.
pub const ACCESSED_BIT: u32 = 1 << 5;
/// Bit 6 of leaf entries.
pub const DIRTY_BIT: u32 = 1 << 6;
/// Bit 7 of directory entries.
pub const PS_BIT: u32 = 1 << 7;
/// Bit 8 of leaf entries.
pub const GLOBAL_BIT: u32 = 1 << 8;

/// Directory entry pointing at a page table.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct Pde {
    /// Present (bit 0).
    pub present: bool,
    /// Writable (bit 1).
    pub writable: bool,
    /// User (bit 2).
    pub user: bool,
    /// Write-Through (bit 3).
    pub write_through: bool,
    /// Cache Disable (bit 4).
    pub cache_disable: bool,
    /// Accessed (bit 5).
    pub accessed: bool,
    /// Bit 6: ignored in non-leaf entries.
    #[bits(1)]
    __ignored_6: u8,
    /// PS (bit 7): 0 for a table pointer.
    #[bits(1)]
    __ps_must_be_0: u8,
    /// Bit 8: ignored in non-leaf entries.
    #[bits(1)]
    __g_ignored: u8,
    /// OS-available (bits 9..11).
    #[bits(3)]
    pub os_available: u8,
    /// Page table physical address >> 12.
    #[bits(20)]
    table_base_31_12: u32,
}

impl Pde {
    /// Physical address of the page table.
    #[inline]
    #[must_use]
    pub const fn table_base(self) -> u32 {
        self.table_base_31_12() << 12
    }

    /// Point the entry at the page table at `table` (low 12 bits dropped).
    #[inline]
    #[must_use]
    pub const fn with_table_base(self, table: u32) -> Self {
        self.with_table_base_31_12(table >> 12)
    }

    /// Physical address of the table entry mapping `linear`.
    #[inline]
    #[must_use]
    pub const fn table_entry_address(self, linear: u32) -> u32 {
        self.table_base() | ((linear >> 10) & 0xFFC)
    }
}

/// Directory entry mapping a 4 MiB page.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct Pde4M {
    /// Present (bit 0).
    pub present: bool,
    /// Writable (bit 1).
    pub writable: bool,
    /// User (bit 2).
    pub user: bool,
    /// Write-Through (bit 3).
    pub write_through: bool,
    /// Cache Disable (bit 4).
    pub cache_disable: bool,
    /// Accessed (bit 5).
    pub accessed: bool,
    /// Dirty (bit 6): set on the first write through this entry.
    pub dirty: bool,
    /// Page Size (bit 7): 1 for a 4 MiB leaf.
    #[bits(default = true)]
    pub page_size: bool,
    /// Global (bit 8): survives CR3 reloads when CR4.PGE is set.
    pub global: bool,
    /// OS-available (bits 9..11).
    #[bits(3)]
    pub os_available: u8,
    /// PAT selector (bit 12).
    pub pat: bool,
    /// Bits 13..21: physical address bits 32+ under PSE-36, reserved here.
    #[bits(9)]
    __reserved_13_21: u16,
    /// Page physical address >> 22.
    #[bits(10)]
    page_base_31_22: u16,
}

impl Pde4M {
    /// Physical address of the 4 MiB page.
    #[inline]
    #[must_use]
    pub const fn page_base(self) -> u32 {
        (self.page_base_31_22() as u32) << 22
    }

    /// Map the 4 MiB page at `page` (low 22 bits dropped).
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_page_base(self, page: u32) -> Self {
        self.with_page_base_31_22((page >> 22) as u16)
    }

    /// Physical address `linear` translates to through this entry.
    #[inline]
    #[must_use]
    pub const fn translate(self, linear: u32) -> u32 {
        self.page_base() | (linear & 0x003F_FFFF)
    }
}

/// Table entry mapping a 4 KiB page.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct Pte {
    /// Present (bit 0).
    pub present: bool,
    /// Writable (bit 1).
    pub writable: bool,
    /// User (bit 2).
    pub user: bool,
    /// Write-Through (bit 3).
    pub write_through: bool,
    /// Cache Disable (bit 4).
    pub cache_disable: bool,
    /// Accessed (bit 5).
    pub accessed: bool,
    /// Dirty (bit 6).
    pub dirty: bool,
    /// PAT selector (bit 7).
    pub pat: bool,
    /// Global (bit 8).
    pub global: bool,
    /// OS-available (bits 9..11).
    #[bits(3)]
    pub os_available: u8,
    /// Page physical address >> 12.
    #[bits(20)]
    page_base_31_12: u32,
}

impl Pte {
    /// Physical address of the 4 KiB page.
    #[inline]
    #[must_use]
    pub const fn page_base(self) -> u32 {
        self.page_base_31_12() << 12
    }

    /// Map the page at `page` (low 12 bits dropped).
    #[inline]
    #[must_use]
    pub const fn with_page_base(self, page: u32) -> Self {
        self.with_page_base_31_12(page >> 12)
    }
}

/// Physical address of the directory entry for `linear` under the directory
/// at `directory_base`.
#[inline]
#[must_use]
pub const fn directory_entry_address(directory_base: u32, linear: u32) -> u32 {
    directory_base | ((linear >> 20) & 0xFFC)
}

/// Raw directory entry as read from guest memory.
///
/// Whether bit 7 selects a 4 MiB page depends on CR4.PSE, so the typed view
/// can only be chosen with that flag at hand.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DirectoryEntry(u32);

/// Decoded directory entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DirectoryView {
    /// Points at a page table.
    Table(Pde),
    /// Maps a 4 MiB page directly.
    Leaf4M(Pde4M),
}

impl DirectoryEntry {
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn present(self) -> bool {
        self.0 & PRESENT_BIT != 0
    }

    /// Typed view chosen by the PS bit, honoured only when `pse` is on.
    #[inline]
    #[must_use]
    pub const fn view(self, pse: bool) -> DirectoryView {
        if pse && self.0 & PS_BIT != 0 {
            DirectoryView::Leaf4M(Pde4M::from_bits(self.0))
        } else {
            DirectoryView::Table(Pde::from_bits(self.0))
        }
    }
}

impl From<Pde> for DirectoryEntry {
    fn from(value: Pde) -> Self {
        Self(value.into_bits())
    }
}

impl From<Pde4M> for DirectoryEntry {
    fn from(value: Pde4M) -> Self {
        Self(value.into_bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pde_table_entry_address() {
        let pde = Pde::new()
            .with_present(true)
            .with_writable(true)
            .with_user(true)
            .with_table_base(0x2000);
        assert_eq!(pde.into_bits(), 0x2007);
        assert_eq!(pde.table_entry_address(0x0040_0000), 0x2000);
        assert_eq!(pde.table_entry_address(0x0040_1000), 0x2004);
        assert_eq!(pde.table_entry_address(0x007F_F000), 0x2FFC);
    }

    #[test]
    fn directory_entry_address_uses_top_ten_bits() {
        assert_eq!(directory_entry_address(0x1000, 0x0040_0000), 0x1004);
        assert_eq!(directory_entry_address(0x1000, 0xFFC0_0000), 0x1FFC);
        assert_eq!(directory_entry_address(0x1000, 0x003F_FFFF), 0x1000);
    }

    #[test]
    fn pde_4m_translates_low_22_bits() {
        let pde = Pde4M::new().with_present(true).with_page_base(0x0C00_0000);
        assert!(pde.page_size());
        assert_eq!(pde.into_bits(), 0x0C00_0081);
        assert_eq!(pde.translate(0x0012_3456), 0x0C12_3456);
    }

    #[test]
    fn ps_bit_only_counts_with_pse() {
        let raw = DirectoryEntry::from_bits(0x0040_0083);
        assert!(matches!(raw.view(true), DirectoryView::Leaf4M(p) if p.page_base() == 0x0040_0000));
        assert!(matches!(raw.view(false), DirectoryView::Table(p) if p.table_base() == 0x0040_0000));
    }

    #[test]
    fn pte_flag_positions() {
        let pte = Pte::from_bits(0x3000 | GLOBAL_BIT | DIRTY_BIT | ACCESSED_BIT | PRESENT_BIT);
        assert!(pte.present() && pte.accessed() && pte.dirty() && pte.global());
        assert!(!pte.writable() && !pte.user());
        assert_eq!(pte.page_base(), 0x3000);
    }
}
