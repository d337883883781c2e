//! # PC Memory Core
//!
//! The memory-addressing heart of an x86 PC emulator: the 4 GiB physical
//! address bus and the 32-bit paging unit that sits in front of it.
//!
//! ## Layers
//!
//! ```text
//!   processor ──► LinearAddressSpace ──► PhysicalAddressSpace ──► MemoryBlock
//!                 (paging, software TLB,  (flat 4 GiB bus, A20      (RAM, ROM,
//!                  page faults)            wraparound, sparse map)   MMIO, ...)
//! ```
//!
//! - A [`MemoryBlock`] is a 4 KiB unit of guest memory. RAM is a
//!   [`RamBlock`]; unmapped space is the [`UnconnectedMemoryBlock`]; a
//!   [`MapWrapper`] slices a larger resource (e.g. video RAM) into 4 KiB
//!   windows.
//! - The [`PhysicalAddressSpace`] answers "which block owns physical byte X".
//!   It keeps an A20-masked and an unmasked index in lockstep so toggling the
//!   gate is a single index swap.
//! - The [`LinearAddressSpace`] walks 32-bit page tables (4 KiB and, with
//!   PSE, 4 MiB pages), enforces the user/supervisor and read/write rules,
//!   maintains accessed/dirty bits and caches resolved blocks per
//!   privilege context and access type. A failed translation yields a typed
//!   [`PageFault`] that the processor turns into `#PF`.
//!
//! ## x86 32-bit Linear Address Walk
//!
//! ```text
//! | 31‒22     | 21‒12 | 11‒0   |
//! | Directory | Table | Offset |
//! ```
//!
//! The directory entry lives at `CR3 | ((addr >> 20) & 0xFFC)`, the table entry
//! at `PDE.base | ((addr >> 10) & 0xFFC)`. A directory entry with `PS=1` (and
//! CR4.PSE set) maps a 4 MiB page directly.
//!
//! ## Threading
//!
//! Everything here is single-threaded and synchronous. Blocks are shared via
//! [`BlockRef`] (`Rc<dyn MemoryBlock>`) and mutate their contents through
//! interior mutability; the address spaces themselves are plain owned values
//! driven by the thread executing guest instructions.

#![allow(clippy::inline_always)]

mod block;
mod config;
mod linear;
mod map_wrapper;
pub mod page_entry;
mod page_fault;
mod physical;
mod ram;
pub mod snapshot;
mod unconnected;

pub use crate::block::{
    AddressLayer, BlockRef, ExecuteError, ExecutionMode, MemoryBlock, Processor, same_block,
};
pub use crate::config::MemoryConfig;
pub use crate::linear::LinearAddressSpace;
pub use crate::map_wrapper::MapWrapper;
pub use crate::page_fault::{
    AccessType, FaultKind, PAGE_FAULT_VECTOR, PageFault, PageFaultErrorCode, Privilege,
};
pub use crate::physical::{MappingError, PhysicalAddressSpace};
pub use crate::ram::RamBlock;
pub use crate::snapshot::{SnapshotError, SnapshotReader, SnapshotWriter};
pub use crate::unconnected::{FLOATING_HIGH, UnconnectedMemoryBlock};

/// Size of one block in bytes; the granularity of mapping and caching.
pub const BLOCK_SIZE: u32 = 4096;

/// log2([`BLOCK_SIZE`]).
pub const BLOCK_SHIFT: u32 = 12;

/// Mask selecting the in-block offset of an address.
pub const BLOCK_MASK: u32 = BLOCK_SIZE - 1;

/// Number of blocks in the 32-bit address space.
pub const BLOCK_COUNT: usize = 1 << (32 - BLOCK_SHIFT);

/// Index of the block containing `addr`.
#[inline(always)]
#[must_use]
pub const fn block_index(addr: u32) -> u32 {
    addr >> BLOCK_SHIFT
}

/// Whether `value` is a multiple of [`BLOCK_SIZE`].
///
/// ```rust
/// # use emu_memory::is_block_aligned;
/// assert!(is_block_aligned(0));
/// assert!(is_block_aligned(0x1000));
/// assert!(!is_block_aligned(0x1001));
/// ```
#[inline(always)]
#[must_use]
pub const fn is_block_aligned(value: u64) -> bool {
    value & (BLOCK_SIZE as u64 - 1) == 0
}
