//! # Linear Address Space
//!
//! The paging unit. Linear addresses are translated through the 32-bit
//! two-level page tables held in physical memory; resolved blocks are cached
//! in a software TLB per `[access][privilege]` pair.
//!
//! ## Translation
//!
//! 1. Paging disabled: identity mapped onto the physical layer, nothing is
//!    cached.
//! 2. Cache hit in the table for the current privilege and access type:
//!    return the cached block.
//! 3. Otherwise walk the tables, check permissions, set accessed/dirty bits,
//!    and, with the page cache enabled, cache the result (all 1024 slots of a
//!    4 MiB page at once). Faults are returned, never cached.
//!
//! ## Invalidation
//!
//! | trigger                         | effect                                     |
//! |---------------------------------|--------------------------------------------|
//! | paging, PSE, PGE or cache toggle| full flush                                 |
//! | base address (CR3) load         | non-global entries only, if PGE; else full |
//! | `invalidate_tlb_entry`          | one page (4 KiB or 4 MiB)                  |
//! | WP enabled                      | the supervisor-write cache                 |
//! | `physical_mut`                  | full flush                                 |

mod tlb;
mod walk;

use crate::block::{
    AddressLayer, BlockRef, ExecuteError, ExecutionMode, Processor, read_spanning, write_spanning,
};
use crate::linear::tlb::{LARGE_PAGE_SLOTS, SoftTlb};
use crate::linear::walk::{PageSize, Update, walk};
use crate::page_fault::{AccessType, PageFault, Privilege};
use crate::physical::PhysicalAddressSpace;
use crate::snapshot::{SnapshotError, SnapshotReader, SnapshotWriter};
use crate::{BLOCK_MASK, BLOCK_SHIFT, BLOCK_SIZE, block_index};
use emu_registers::{Cr0, Cr3, Cr4};
use log::{debug, trace};

/// Paging configuration, as driven by CR0, CR3 and CR4.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct PagingState {
    pub paging: bool,
    pub pse: bool,
    pub global_pages: bool,
    pub write_protect: bool,
    pub page_cache: bool,
    /// Page directory base (CR3 bits 31..12).
    pub base: u32,
    pub privilege: Privilege,
}

/// The paging unit in front of a [`PhysicalAddressSpace`].
pub struct LinearAddressSpace {
    physical: PhysicalAddressSpace,
    state: PagingState,
    page_cache_at_reset: bool,
    last_address: u32,
    tlb: SoftTlb,
}

impl LinearAddressSpace {
    /// Paging unit over `physical`, with paging disabled, supervisor
    /// context and the page cache enabled.
    #[must_use]
    pub fn new(physical: PhysicalAddressSpace) -> Self {
        Self {
            physical,
            state: PagingState {
                page_cache: true,
                ..PagingState::default()
            },
            page_cache_at_reset: true,
            last_address: 0,
            tlb: SoftTlb::new(),
        }
    }

    /// Page cache state restored by [`reset`](Self::reset); also applied now.
    #[must_use]
    pub fn with_page_cache_at_reset(mut self, enabled: bool) -> Self {
        self.page_cache_at_reset = enabled;
        self.set_page_cache_enabled(enabled);
        self
    }

    #[inline]
    #[must_use]
    pub const fn physical(&self) -> &PhysicalAddressSpace {
        &self.physical
    }

    /// Mutable access to the physical layer. Flushes the software TLB.
    pub fn physical_mut(&mut self) -> &mut PhysicalAddressSpace {
        self.tlb.flush();
        &mut self.physical
    }

    pub fn set_gate_a20_state(&mut self, enabled: bool) {
        self.physical_mut().set_gate_a20_state(enabled);
    }

    #[inline]
    #[must_use]
    pub const fn is_paging_enabled(&self) -> bool {
        self.state.paging
    }

    #[inline]
    #[must_use]
    pub const fn is_page_cache_enabled(&self) -> bool {
        self.state.page_cache
    }

    #[inline]
    #[must_use]
    pub const fn is_page_size_extension_enabled(&self) -> bool {
        self.state.pse
    }

    #[inline]
    #[must_use]
    pub const fn is_global_pages_enabled(&self) -> bool {
        self.state.global_pages
    }

    #[inline]
    #[must_use]
    pub const fn is_write_protect_user_pages(&self) -> bool {
        self.state.write_protect
    }

    /// Page directory base address (CR3 without the flag bits).
    #[inline]
    #[must_use]
    pub const fn page_directory_base_address(&self) -> u32 {
        self.state.base
    }

    #[inline]
    #[must_use]
    pub const fn privilege(&self) -> Privilege {
        self.state.privilege
    }

    #[inline]
    #[must_use]
    pub const fn is_supervisor(&self) -> bool {
        matches!(self.state.privilege, Privilege::Supervisor)
    }

    /// Linear address of the most recent table walk.
    #[inline]
    #[must_use]
    pub const fn last_walked_address(&self) -> u32 {
        self.last_address
    }

    pub fn set_paging_enabled(&mut self, enabled: bool) {
        debug!("Paging {}", if enabled { "enabled" } else { "disabled" });
        self.state.paging = enabled;
        self.flush();
    }

    pub fn set_page_cache_enabled(&mut self, enabled: bool) {
        debug!("Page cache {}", if enabled { "enabled" } else { "disabled" });
        self.state.page_cache = enabled;
        self.flush();
    }

    pub fn set_page_size_extensions_enabled(&mut self, enabled: bool) {
        debug!("PSE {}", if enabled { "enabled" } else { "disabled" });
        self.state.pse = enabled;
        self.flush();
    }

    pub fn set_global_pages_enabled(&mut self, enabled: bool) {
        debug!("Global pages {}", if enabled { "enabled" } else { "disabled" });
        self.state.global_pages = enabled;
        self.flush();
    }

    /// Enabling drops cached supervisor writes, which may now fault.
    pub fn set_write_protect_user_pages(&mut self, enabled: bool) {
        debug!("Supervisor write protection {}", if enabled { "enabled" } else { "disabled" });
        if enabled {
            self.tlb.clear_table(AccessType::Write, Privilege::Supervisor);
        }
        self.state.write_protect = enabled;
    }

    /// Load the page directory base. The low 12 bits are ignored.
    pub fn set_page_directory_base_address(&mut self, address: u32) {
        self.state.base = address & !BLOCK_MASK;
        self.partial_flush();
    }

    /// Switch privilege context. Both contexts keep their caches.
    #[inline]
    pub const fn set_privilege(&mut self, privilege: Privilege) {
        self.state.privilege = privilege;
    }

    #[inline]
    pub const fn set_supervisor(&mut self, supervisor: bool) {
        self.state.privilege = if supervisor {
            Privilege::Supervisor
        } else {
            Privilege::User
        };
    }

    /// Drop every cached translation.
    pub fn flush(&mut self) {
        self.tlb.flush();
    }

    /// Drop non-global translations if global pages are enabled, otherwise
    /// everything.
    pub fn partial_flush(&mut self) {
        if self.state.global_pages {
            self.tlb.flush_non_global();
        } else {
            self.tlb.flush();
        }
    }

    /// Drop the cached translation of the page containing `address`, in all
    /// four caches.
    pub fn invalidate_tlb_entry(&mut self, address: u32) {
        self.tlb.invalidate(block_index(address));
    }

    /// Apply a CR0 write.
    pub fn load_cr0(&mut self, cr0: Cr0) {
        if cr0.pg_paging() != self.state.paging {
            self.set_paging_enabled(cr0.pg_paging());
        }
        if cr0.wp_write_protect() != self.state.write_protect {
            self.set_write_protect_user_pages(cr0.wp_write_protect());
        }
        if cr0.cd_cache_disable() == self.state.page_cache {
            self.set_page_cache_enabled(!cr0.cd_cache_disable());
        }
    }

    /// Apply a CR3 write. Every load flushes non-global translations, even
    /// when the value is unchanged.
    pub fn load_cr3(&mut self, cr3: Cr3) {
        self.set_page_directory_base_address(cr3.directory_base());
    }

    /// Apply a CR4 write.
    pub fn load_cr4(&mut self, cr4: Cr4) {
        if cr4.pse() != self.state.pse {
            self.set_page_size_extensions_enabled(cr4.pse());
        }
        if cr4.pge() != self.state.global_pages {
            self.set_global_pages_enabled(cr4.pge());
        }
    }

    /// Reset the physical layer and return to the power-on paging state.
    pub fn reset(&mut self) {
        debug!("Resetting linear address space");
        self.physical.reset();
        self.state = PagingState {
            page_cache: self.page_cache_at_reset,
            ..PagingState::default()
        };
        self.last_address = 0;
        self.tlb.flush();
    }

    /// Resolve the block holding `address` for `access` in the current
    /// privilege context.
    ///
    /// # Errors
    /// The [`PageFault`] the access raises.
    #[inline]
    pub fn resolve(&mut self, address: u32, access: AccessType) -> Result<BlockRef, PageFault> {
        if !self.state.paging {
            return Ok(self.physical.block_at(address).clone());
        }
        if let Some(block) = self.tlb.get(access, self.state.privilege, block_index(address)) {
            return Ok(block.clone());
        }
        self.walk_and_cache(address, access)
    }

    fn walk_and_cache(&mut self, address: u32, access: AccessType) -> Result<BlockRef, PageFault> {
        self.last_address = address;
        let translation = walk(&self.physical, &self.state, address, access, Update::Commit)
            .inspect_err(|fault| trace!("{fault}"))?;
        let block = self.physical.block_at(translation.physical).clone();
        if !self.state.page_cache {
            return Ok(block);
        }

        let privilege = self.state.privilege;
        let index = block_index(address);
        match translation.size {
            PageSize::Size4K => {
                self.tlb
                    .insert(access, privilege, index, block.clone(), translation.global, false);
            }
            PageSize::Size4M => {
                let first = index & !(LARGE_PAGE_SLOTS - 1);
                let base = translation.physical & !((LARGE_PAGE_SLOTS << BLOCK_SHIFT) - 1);
                for i in 0..LARGE_PAGE_SLOTS {
                    let page = self.physical.block_at(base + (i << BLOCK_SHIFT)).clone();
                    self.tlb
                        .insert(access, privilege, first + i, page, translation.global, true);
                }
            }
        }
        Ok(block)
    }

    /// Translate `address` to a physical address without side effects: no
    /// accessed/dirty updates, no caching, last-walked address untouched.
    ///
    /// # Errors
    /// The [`PageFault`] the access would raise.
    pub fn probe(&self, address: u32, access: AccessType) -> Result<u32, PageFault> {
        if !self.state.paging {
            return Ok(address);
        }
        walk(&self.physical, &self.state, address, access, Update::DryRun).map(|t| t.physical)
    }

    /// Whether the current privilege context holds a cached translation of
    /// `address` for `access`.
    #[must_use]
    pub fn is_cached(&self, address: u32, access: AccessType) -> bool {
        self.tlb
            .get(access, self.state.privilege, block_index(address))
            .is_some()
    }

    /// Both blocks of an access that starts in one page and ends in the
    /// next. The second page is translated before anything is touched.
    fn resolve_pair(&mut self, address: u32, access: AccessType) -> Result<(BlockRef, BlockRef), PageFault> {
        let low = self.resolve(address, access)?;
        let high = self.resolve((address | BLOCK_MASK).wrapping_add(1), access)?;
        Ok((low, high))
    }

    #[inline(always)]
    const fn within_block(address: u32, n: u32) -> bool {
        address & BLOCK_MASK <= BLOCK_SIZE - n
    }

    fn read<const N: usize>(&mut self, address: u32) -> Result<[u8; N], PageFault> {
        let (low, high) = self.resolve_pair(address, AccessType::Read)?;
        let mut bytes = [0; N];
        read_spanning(low.as_ref(), high.as_ref(), address & BLOCK_MASK, &mut bytes);
        Ok(bytes)
    }

    fn write<const N: usize>(&mut self, address: u32, bytes: [u8; N]) -> Result<(), PageFault> {
        let (low, high) = self.resolve_pair(address, AccessType::Write)?;
        write_spanning(low.as_ref(), high.as_ref(), address & BLOCK_MASK, &bytes);
        Ok(())
    }

    /// # Errors
    /// The [`PageFault`] the access raises.
    #[inline]
    pub fn get_byte(&mut self, address: u32) -> Result<u8, PageFault> {
        Ok(self.resolve(address, AccessType::Read)?.get_byte(address & BLOCK_MASK))
    }

    /// # Errors
    /// The [`PageFault`] the access raises.
    #[inline]
    pub fn get_word(&mut self, address: u32) -> Result<u16, PageFault> {
        if Self::within_block(address, 2) {
            Ok(self.resolve(address, AccessType::Read)?.get_word(address & BLOCK_MASK))
        } else {
            self.read(address).map(u16::from_le_bytes)
        }
    }

    /// # Errors
    /// The [`PageFault`] the access raises.
    #[inline]
    pub fn get_double_word(&mut self, address: u32) -> Result<u32, PageFault> {
        if Self::within_block(address, 4) {
            Ok(self
                .resolve(address, AccessType::Read)?
                .get_double_word(address & BLOCK_MASK))
        } else {
            self.read(address).map(u32::from_le_bytes)
        }
    }

    /// # Errors
    /// The [`PageFault`] the access raises.
    #[inline]
    pub fn get_quad_word(&mut self, address: u32) -> Result<u64, PageFault> {
        if Self::within_block(address, 8) {
            Ok(self
                .resolve(address, AccessType::Read)?
                .get_quad_word(address & BLOCK_MASK))
        } else {
            self.read(address).map(u64::from_le_bytes)
        }
    }

    /// # Errors
    /// The [`PageFault`] the access raises.
    #[inline]
    pub fn set_byte(&mut self, address: u32, value: u8) -> Result<(), PageFault> {
        self.resolve(address, AccessType::Write)?
            .set_byte(address & BLOCK_MASK, value);
        Ok(())
    }

    /// # Errors
    /// The [`PageFault`] the access raises. Nothing is written on a fault.
    #[inline]
    pub fn set_word(&mut self, address: u32, value: u16) -> Result<(), PageFault> {
        if Self::within_block(address, 2) {
            self.resolve(address, AccessType::Write)?
                .set_word(address & BLOCK_MASK, value);
            Ok(())
        } else {
            self.write(address, value.to_le_bytes())
        }
    }

    /// # Errors
    /// The [`PageFault`] the access raises. Nothing is written on a fault.
    #[inline]
    pub fn set_double_word(&mut self, address: u32, value: u32) -> Result<(), PageFault> {
        if Self::within_block(address, 4) {
            self.resolve(address, AccessType::Write)?
                .set_double_word(address & BLOCK_MASK, value);
            Ok(())
        } else {
            self.write(address, value.to_le_bytes())
        }
    }

    /// # Errors
    /// The [`PageFault`] the access raises. Nothing is written on a fault.
    #[inline]
    pub fn set_quad_word(&mut self, address: u32, value: u64) -> Result<(), PageFault> {
        if Self::within_block(address, 8) {
            self.resolve(address, AccessType::Write)?
                .set_quad_word(address & BLOCK_MASK, value);
            Ok(())
        } else {
            self.write(address, value.to_le_bytes())
        }
    }

    /// Fill `buffer` from consecutive linear addresses, translating page by
    /// page.
    ///
    /// # Errors
    /// The first [`PageFault`]; `buffer` is partially filled up to it.
    pub fn copy_contents_into_array(&mut self, address: u32, buffer: &mut [u8]) -> Result<(), PageFault> {
        let mut address = address;
        let mut rest = buffer;
        while !rest.is_empty() {
            let offset = address & BLOCK_MASK;
            let n = rest.len().min((BLOCK_SIZE - offset) as usize);
            let (chunk, tail) = rest.split_at_mut(n);
            self.resolve(address, AccessType::Read)?
                .copy_contents_into_array(offset, chunk);
            #[allow(clippy::cast_possible_truncation)]
            {
                address = address.wrapping_add(n as u32);
            }
            rest = tail;
        }
        Ok(())
    }

    /// Store `buffer` at consecutive linear addresses, translating page by
    /// page.
    ///
    /// # Errors
    /// The first [`PageFault`]; pages before it have been written.
    pub fn copy_array_into_contents(&mut self, address: u32, buffer: &[u8]) -> Result<(), PageFault> {
        let mut address = address;
        let mut rest = buffer;
        while !rest.is_empty() {
            let offset = address & BLOCK_MASK;
            let n = rest.len().min((BLOCK_SIZE - offset) as usize);
            let (chunk, tail) = rest.split_at(n);
            self.resolve(address, AccessType::Write)?
                .copy_array_into_contents(offset, chunk);
            #[allow(clippy::cast_possible_truncation)]
            {
                address = address.wrapping_add(n as u32);
            }
            rest = tail;
        }
        Ok(())
    }

    /// Dispatch protected or virtual-8086 execution at `address`.
    ///
    /// # Errors
    /// A page fault fetching the code page, [`ExecuteError::IllegalMode`] for
    /// real mode (which runs on the physical layer), or whatever the block
    /// reports.
    pub fn execute(
        &mut self,
        mode: ExecutionMode,
        cpu: &mut dyn Processor,
        address: u32,
    ) -> Result<usize, ExecuteError> {
        if mode == ExecutionMode::Real {
            return Err(ExecuteError::IllegalMode {
                mode,
                layer: AddressLayer::Linear,
            });
        }
        let block = self.resolve(address, AccessType::Read)?;
        block.execute(mode, cpu, address & BLOCK_MASK)
    }

    /// Write the paging state, the physical layer and the software TLB.
    ///
    /// # Errors
    /// Whatever the writer reports.
    pub fn save_state(&self, out: &mut dyn SnapshotWriter) -> Result<(), SnapshotError> {
        trace!("Saving linear address space");
        let state = &self.state;
        out.write_bool(state.paging)?;
        out.write_bool(state.pse)?;
        out.write_bool(state.global_pages)?;
        out.write_bool(state.write_protect)?;
        out.write_bool(state.page_cache)?;
        out.write_bool(self.page_cache_at_reset)?;
        out.write_u32(state.base)?;
        out.write_bool(matches!(state.privilege, Privilege::Supervisor))?;
        out.write_u32(self.last_address)?;
        self.physical.save_state(out)?;
        self.tlb.save(out)
    }

    /// Restore state written by [`save_state`](Self::save_state).
    ///
    /// # Errors
    /// A malformed or mismatched stream, or whatever the reader reports.
    /// Nothing is changed on error.
    pub fn load_state(&mut self, input: &mut dyn SnapshotReader) -> Result<(), SnapshotError> {
        trace!("Loading linear address space");
        let paging = input.read_bool()?;
        let pse = input.read_bool()?;
        let global_pages = input.read_bool()?;
        let write_protect = input.read_bool()?;
        let page_cache = input.read_bool()?;
        let page_cache_at_reset = input.read_bool()?;
        let base = input.read_u32()?;
        if base & BLOCK_MASK != 0 {
            return Err(SnapshotError::Corrupt("page directory base not 4 KiB aligned"));
        }
        let supervisor = input.read_bool()?;
        let last_address = input.read_u32()?;
        let physical = self.physical.read_state(input)?;
        let tlb = SoftTlb::load(input)?;

        self.physical.commit_state(physical);
        self.state = PagingState {
            paging,
            pse,
            global_pages,
            write_protect,
            page_cache,
            base,
            privilege: if supervisor {
                Privilege::Supervisor
            } else {
                Privilege::User
            },
        };
        self.page_cache_at_reset = page_cache_at_reset;
        self.last_address = last_address;
        self.tlb = tlb;
        Ok(())
    }
}

impl core::fmt::Debug for LinearAddressSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LinearAddressSpace")
            .field("state", &self.state)
            .field("last_address", &self.last_address)
            .field("physical", &self.physical)
            .finish_non_exhaustive()
    }
}
