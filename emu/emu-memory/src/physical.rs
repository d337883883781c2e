//! # Physical Address Space
//!
//! The flat 4 GiB physical bus. Every block-aligned 4 KiB slot resolves to
//! exactly one [`BlockRef`]; slots nothing has claimed resolve to the
//! [`UnconnectedMemoryBlock`] sentinel.
//!
//! ## A20
//!
//! Two complete indices are maintained side by side:
//!
//! - the *unmasked* index maps every slot as claimed;
//! - the *masked* index additionally aliases `addr | 0x10_0000` onto `addr`,
//!   emulating the 8086 wraparound with address line 20 held low.
//!
//! Every mapping call updates both, so toggling the gate only selects the
//! other index.

mod shadow;

use crate::block::{
    AddressLayer, BlockRef, ExecuteError, ExecutionMode, Processor, read_spanning, write_spanning,
};
use crate::map_wrapper::MapWrapper;
use crate::physical::shadow::ShadowIndex;
use crate::ram::RamBlock;
use crate::snapshot::{SnapshotError, SnapshotReader, SnapshotWriter};
use crate::unconnected::UnconnectedMemoryBlock;
use crate::{BLOCK_MASK, BLOCK_SHIFT, BLOCK_SIZE, block_index, is_block_aligned};
use log::{debug, trace};
use std::rc::Rc;

/// Block-index bit corresponding to address bit 20.
const A20_INDEX_BIT: u32 = 1 << (20 - BLOCK_SHIFT);

const MASKED: usize = 0;
const UNMASKED: usize = 1;

/// Size of the physical address space.
const ADDRESS_SPACE_SIZE: u64 = 1 << 32;

/// Rejected mapping request. These indicate a machine-configuration bug and
/// are not retryable.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("address {0:#010x} is not 4 KiB aligned")]
    Misaligned(u32),
    #[error("length {0:#x} is not a multiple of 4 KiB")]
    MisalignedLength(u64),
    #[error("block size {0:#x} is not 4 KiB")]
    BlockSize(u64),
    #[error("resource of {available:#x} bytes cannot back {requested:#x} bytes")]
    ResourceTooSmall { available: u64, requested: u64 },
    #[error("region {address:#010x}+{length:#x} extends past 4 GiB")]
    OutOfRange { address: u32, length: u64 },
    #[error("RAM size {0:#x} must be non-zero and 4 KiB aligned")]
    InvalidRamSize(u32),
}

/// The physical memory bus.
pub struct PhysicalAddressSpace {
    ram_size: u32,
    gate_a20: bool,
    gate_a20_at_reset: bool,
    /// Indexed by [`MASKED`] / [`UNMASKED`].
    shadows: [ShadowIndex; 2],
    active: usize,
    unconnected: BlockRef,
}

/// A physical layer read from a snapshot, not yet committed.
pub(crate) struct StagedState {
    gate_a20: bool,
    shadows: [ShadowIndex; 2],
}

impl PhysicalAddressSpace {
    /// Empty bus for a machine with `ram_size` bytes of RAM.
    ///
    /// No RAM is mapped yet; see [`populate_ram`](Self::populate_ram). The
    /// A20 gate starts masked.
    ///
    /// # Errors
    /// [`MappingError::InvalidRamSize`] unless `ram_size` is a non-zero
    /// multiple of 4 KiB.
    pub fn new(ram_size: u32) -> Result<Self, MappingError> {
        if ram_size == 0 || !is_block_aligned(u64::from(ram_size)) {
            return Err(MappingError::InvalidRamSize(ram_size));
        }

        let quick_len = (ram_size >> BLOCK_SHIFT) as usize;
        let unconnected: BlockRef = Rc::new(UnconnectedMemoryBlock);
        Ok(Self {
            ram_size,
            gate_a20: false,
            gate_a20_at_reset: false,
            shadows: [
                ShadowIndex::new(quick_len, &unconnected),
                ShadowIndex::new(quick_len, &unconnected),
            ],
            active: MASKED,
            unconnected,
        })
    }

    /// Gate A20 state restored by [`reset`](Self::reset); also applied now.
    #[must_use]
    pub fn with_gate_a20_at_reset(mut self, enabled: bool) -> Self {
        self.gate_a20_at_reset = enabled;
        self.set_gate_a20_state(enabled);
        self
    }

    #[inline]
    #[must_use]
    pub const fn ram_size(&self) -> u32 {
        self.ram_size
    }

    /// Map one fresh [`RamBlock`] at every 4 KiB offset below the RAM size.
    pub fn populate_ram(&mut self) {
        debug!("Populating {:#x} bytes of RAM", self.ram_size);
        for index in 0..self.ram_size >> BLOCK_SHIFT {
            self.install(index, Rc::new(RamBlock::new(BLOCK_SIZE as usize)));
        }
    }

    /// Claim the 4 KiB slot at `address` for `block`.
    ///
    /// # Errors
    /// If `address` is not block aligned or `block` is not exactly 4 KiB.
    pub fn map_memory(&mut self, address: u32, block: BlockRef) -> Result<(), MappingError> {
        if !is_block_aligned(u64::from(address)) {
            return Err(MappingError::Misaligned(address));
        }
        if block.size() != u64::from(BLOCK_SIZE) {
            return Err(MappingError::BlockSize(block.size()));
        }

        debug!("Mapping {block:?} at {address:#010x}");
        self.install(block_index(address), block);
        Ok(())
    }

    /// Claim `[address, address + length)` for `resource`, one
    /// [`MapWrapper`] window per 4 KiB.
    ///
    /// # Errors
    /// Misaligned address or length, a region past 4 GiB, or a resource
    /// shorter than `length`.
    pub fn map_memory_region(
        &mut self,
        resource: &BlockRef,
        address: u32,
        length: u64,
    ) -> Result<(), MappingError> {
        Self::check_region(address, length)?;
        if resource.size() < length {
            return Err(MappingError::ResourceTooSmall {
                available: resource.size(),
                requested: length,
            });
        }

        debug!("Mapping {resource:?} at {address:#010x}+{length:#x}");
        for (index, base) in Self::region_blocks(address, length) {
            self.install(index, Rc::new(MapWrapper::new(resource.clone(), base)));
        }
        Ok(())
    }

    /// Return `[address, address + length)` to the unconnected state.
    ///
    /// # Errors
    /// Misaligned address or length, or a region past 4 GiB.
    pub fn unmap(&mut self, address: u32, length: u64) -> Result<(), MappingError> {
        Self::check_region(address, length)?;

        debug!("Unmapping {address:#010x}+{length:#x}");
        for (index, _) in Self::region_blocks(address, length) {
            self.install(index, self.unconnected.clone());
        }
        Ok(())
    }

    fn check_region(address: u32, length: u64) -> Result<(), MappingError> {
        if !is_block_aligned(u64::from(address)) {
            return Err(MappingError::Misaligned(address));
        }
        if !is_block_aligned(length) {
            return Err(MappingError::MisalignedLength(length));
        }
        if u64::from(address) + length > ADDRESS_SPACE_SIZE {
            return Err(MappingError::OutOfRange { address, length });
        }
        Ok(())
    }

    /// `(block index, offset into the region)` for every block of a checked
    /// region.
    #[allow(clippy::cast_possible_truncation)]
    fn region_blocks(address: u32, length: u64) -> impl Iterator<Item = (u32, u32)> {
        let first = block_index(address);
        let count = (length >> BLOCK_SHIFT) as u32;
        (0..count).map(move |i| (first + i, i << BLOCK_SHIFT))
    }

    /// Update both indices for block `index`.
    fn install(&mut self, index: u32, block: BlockRef) {
        if index & A20_INDEX_BIT == 0 {
            let masked = &mut self.shadows[MASKED];
            masked.set(index, block.clone());
            masked.set(index | A20_INDEX_BIT, block.clone());
        }
        self.shadows[UNMASKED].set(index, block);
    }

    /// Enable (`true`) or mask (`false`) address line 20.
    pub fn set_gate_a20_state(&mut self, enabled: bool) {
        if self.gate_a20 != enabled {
            debug!("Gate A20 {}", if enabled { "enabled" } else { "masked" });
        }
        self.gate_a20 = enabled;
        self.active = if enabled { UNMASKED } else { MASKED };
    }

    #[inline]
    #[must_use]
    pub const fn gate_a20_state(&self) -> bool {
        self.gate_a20
    }

    /// The block currently answering for `address`.
    #[inline(always)]
    #[must_use]
    pub fn block_at(&self, address: u32) -> &BlockRef {
        self.shadows[self.active].get(block_index(address))
    }

    #[inline]
    fn read<const N: usize>(&self, address: u32) -> [u8; N] {
        let mut bytes = [0; N];
        let next = (address | BLOCK_MASK).wrapping_add(1);
        read_spanning(
            self.block_at(address).as_ref(),
            self.block_at(next).as_ref(),
            address & BLOCK_MASK,
            &mut bytes,
        );
        bytes
    }

    #[inline]
    fn write<const N: usize>(&self, address: u32, bytes: [u8; N]) {
        let next = (address | BLOCK_MASK).wrapping_add(1);
        write_spanning(
            self.block_at(address).as_ref(),
            self.block_at(next).as_ref(),
            address & BLOCK_MASK,
            &bytes,
        );
    }

    /// Whether an `n`-byte access at `address` stays within one block.
    #[inline(always)]
    const fn within_block(address: u32, n: u32) -> bool {
        address & BLOCK_MASK <= BLOCK_SIZE - n
    }

    #[inline]
    #[must_use]
    pub fn get_byte(&self, address: u32) -> u8 {
        self.block_at(address).get_byte(address & BLOCK_MASK)
    }

    #[inline]
    #[must_use]
    pub fn get_word(&self, address: u32) -> u16 {
        if Self::within_block(address, 2) {
            self.block_at(address).get_word(address & BLOCK_MASK)
        } else {
            u16::from_le_bytes(self.read(address))
        }
    }

    #[inline]
    #[must_use]
    pub fn get_double_word(&self, address: u32) -> u32 {
        if Self::within_block(address, 4) {
            self.block_at(address).get_double_word(address & BLOCK_MASK)
        } else {
            u32::from_le_bytes(self.read(address))
        }
    }

    #[inline]
    #[must_use]
    pub fn get_quad_word(&self, address: u32) -> u64 {
        if Self::within_block(address, 8) {
            self.block_at(address).get_quad_word(address & BLOCK_MASK)
        } else {
            u64::from_le_bytes(self.read(address))
        }
    }

    #[inline]
    pub fn set_byte(&self, address: u32, value: u8) {
        self.block_at(address).set_byte(address & BLOCK_MASK, value);
    }

    #[inline]
    pub fn set_word(&self, address: u32, value: u16) {
        if Self::within_block(address, 2) {
            self.block_at(address).set_word(address & BLOCK_MASK, value);
        } else {
            self.write(address, value.to_le_bytes());
        }
    }

    #[inline]
    pub fn set_double_word(&self, address: u32, value: u32) {
        if Self::within_block(address, 4) {
            self.block_at(address).set_double_word(address & BLOCK_MASK, value);
        } else {
            self.write(address, value.to_le_bytes());
        }
    }

    #[inline]
    pub fn set_quad_word(&self, address: u32, value: u64) {
        if Self::within_block(address, 8) {
            self.block_at(address).set_quad_word(address & BLOCK_MASK, value);
        } else {
            self.write(address, value.to_le_bytes());
        }
    }

    /// Fill `buffer` from consecutive physical addresses starting at
    /// `address`, wrapping at 4 GiB.
    pub fn copy_contents_into_array(&self, address: u32, buffer: &mut [u8]) {
        let mut address = address;
        let mut rest = buffer;
        while !rest.is_empty() {
            let offset = address & BLOCK_MASK;
            let n = rest.len().min((BLOCK_SIZE - offset) as usize);
            let (chunk, tail) = rest.split_at_mut(n);
            self.block_at(address).copy_contents_into_array(offset, chunk);
            #[allow(clippy::cast_possible_truncation)]
            {
                address = address.wrapping_add(n as u32);
            }
            rest = tail;
        }
    }

    /// Store `buffer` at consecutive physical addresses starting at
    /// `address`, wrapping at 4 GiB.
    pub fn copy_array_into_contents(&self, address: u32, buffer: &[u8]) {
        let mut address = address;
        let mut rest = buffer;
        while !rest.is_empty() {
            let offset = address & BLOCK_MASK;
            let n = rest.len().min((BLOCK_SIZE - offset) as usize);
            let (chunk, tail) = rest.split_at(n);
            self.block_at(address).copy_array_into_contents(offset, chunk);
            #[allow(clippy::cast_possible_truncation)]
            {
                address = address.wrapping_add(n as u32);
            }
            rest = tail;
        }
    }

    /// Dispatch real-mode execution at `address`.
    ///
    /// # Errors
    /// [`ExecuteError::IllegalMode`] for any mode other than real mode, which
    /// always routes through the linear address space; otherwise whatever the
    /// block reports.
    pub fn execute(
        &self,
        mode: ExecutionMode,
        cpu: &mut dyn Processor,
        address: u32,
    ) -> Result<usize, ExecuteError> {
        if mode != ExecutionMode::Real {
            return Err(ExecuteError::IllegalMode {
                mode,
                layer: AddressLayer::Physical,
            });
        }
        self.block_at(address).execute(mode, cpu, address & BLOCK_MASK)
    }

    /// Zero every mapped block and restore the reset A20 state.
    pub fn reset(&mut self) {
        debug!("Resetting physical address space");
        for block in self.shadows[UNMASKED].mapped() {
            if block.is_allocated() {
                block.clear();
            }
        }
        self.set_gate_a20_state(self.gate_a20_at_reset);
    }

    /// Write the RAM size, A20 state and both indices.
    ///
    /// # Errors
    /// Whatever the writer reports.
    pub fn save_state(&self, out: &mut dyn SnapshotWriter) -> Result<(), SnapshotError> {
        trace!("Saving physical address space");
        out.write_u32(self.ram_size)?;
        out.write_bool(self.gate_a20)?;
        for shadow in &self.shadows {
            shadow.save(out)?;
        }
        Ok(())
    }

    /// Restore state written by [`save_state`](Self::save_state).
    ///
    /// # Errors
    /// A stream recorded with a different RAM size, truncation, or whatever
    /// the reader reports. Nothing is changed on error.
    pub fn load_state(&mut self, input: &mut dyn SnapshotReader) -> Result<(), SnapshotError> {
        let staged = self.read_state(input)?;
        self.commit_state(staged);
        Ok(())
    }

    /// Read a saved physical layer without touching the live one.
    pub(crate) fn read_state(
        &self,
        input: &mut dyn SnapshotReader,
    ) -> Result<StagedState, SnapshotError> {
        trace!("Loading physical address space");
        let ram_size = input.read_u32()?;
        if ram_size != self.ram_size {
            return Err(SnapshotError::Mismatch {
                what: "RAM size",
                expected: u64::from(self.ram_size),
                found: u64::from(ram_size),
            });
        }
        let gate_a20 = input.read_bool()?;

        let quick_len = (self.ram_size >> BLOCK_SHIFT) as usize;
        let mut shadows = [
            ShadowIndex::new(quick_len, &self.unconnected),
            ShadowIndex::new(quick_len, &self.unconnected),
        ];
        for shadow in &mut shadows {
            shadow.load(input)?;
        }
        Ok(StagedState { gate_a20, shadows })
    }

    pub(crate) fn commit_state(&mut self, staged: StagedState) {
        self.shadows = staged.shadows;
        self.set_gate_a20_state(staged.gate_a20);
    }
}

impl core::fmt::Debug for PhysicalAddressSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PhysicalAddressSpace")
            .field("ram_size", &self.ram_size)
            .field("gate_a20", &self.gate_a20)
            .finish_non_exhaustive()
    }
}
