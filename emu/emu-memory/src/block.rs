//! The [`MemoryBlock`] capability and the execution-dispatch seam.
//!
//! A block is a fixed window of guest memory. Address spaces never own block
//! contents; they hold [`BlockRef`]s and forward every access with the
//! in-block offset. Multi-byte accessors are little-endian and composed from
//! byte accessors unless a block overrides them (MMIO blocks commonly do).

use crate::BLOCK_SIZE;
use crate::page_fault::PageFault;
use core::fmt;
use std::rc::Rc;

/// Shared handle to a block. The same block may be mapped at several
/// addresses and cached by the paging layer at the same time.
pub type BlockRef = Rc<dyn MemoryBlock>;

/// Processor operating mode used to select the instruction decoder.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ExecutionMode {
    /// Real-address mode; dispatched on the physical layer.
    Real,
    /// Protected mode; dispatched on the linear layer.
    Protected,
    /// Virtual-8086 mode; dispatched on the linear layer.
    Virtual8086,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Real => "real-mode",
            Self::Protected => "protected-mode",
            Self::Virtual8086 => "virtual-8086",
        })
    }
}

/// The address space an execution request was issued against.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AddressLayer {
    Physical,
    Linear,
}

impl fmt::Display for AddressLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Physical => "physical",
            Self::Linear => "linear",
        })
    }
}

/// The emulated processor, as far as the memory core is concerned.
///
/// Blocks hand themselves to the processor to decode and run code; the
/// memory core never interprets instructions.
pub trait Processor {
    /// Run guest code in `mode` starting `offset` bytes into `block`.
    ///
    /// Returns the number of instructions retired.
    ///
    /// # Errors
    /// Whatever stopped execution abnormally, typically a [`PageFault`].
    fn run_block(
        &mut self,
        mode: ExecutionMode,
        block: &dyn MemoryBlock,
        offset: u32,
    ) -> Result<usize, ExecuteError>;
}

/// Failure to dispatch guest code.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecuteError {
    /// Fetching the code page faulted; deliver `#PF` to the guest.
    #[error(transparent)]
    PageFault(#[from] PageFault),
    /// Control reached a region no device or RAM claims.
    #[error("cannot execute from unconnected memory (block offset {0:#05x})")]
    Unconnected(u32),
    /// Internal consistency error: the mode is never dispatched on this layer.
    #[error("{mode} execution cannot be dispatched through the {layer} address space")]
    IllegalMode {
        mode: ExecutionMode,
        layer: AddressLayer,
    },
}

/// A unit of guest memory.
///
/// Offsets are relative to the start of the block and must be smaller than
/// [`size`](Self::size); implementations may panic otherwise.
pub trait MemoryBlock: fmt::Debug {
    /// Size of the block in bytes.
    fn size(&self) -> u64;

    /// Whether backing storage exists. Lazily allocated blocks report
    /// `false` until the first write.
    fn is_allocated(&self) -> bool;

    fn get_byte(&self, offset: u32) -> u8;

    fn set_byte(&self, offset: u32, value: u8);

    fn get_word(&self, offset: u32) -> u16 {
        u16::from_le_bytes([self.get_byte(offset), self.get_byte(offset + 1)])
    }

    fn get_double_word(&self, offset: u32) -> u32 {
        u32::from(self.get_word(offset)) | (u32::from(self.get_word(offset + 2)) << 16)
    }

    fn get_quad_word(&self, offset: u32) -> u64 {
        u64::from(self.get_double_word(offset))
            | (u64::from(self.get_double_word(offset + 4)) << 32)
    }

    fn set_word(&self, offset: u32, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.set_byte(offset, lo);
        self.set_byte(offset + 1, hi);
    }

    #[allow(clippy::cast_possible_truncation)]
    fn set_double_word(&self, offset: u32, value: u32) {
        self.set_word(offset, value as u16);
        self.set_word(offset + 2, (value >> 16) as u16);
    }

    #[allow(clippy::cast_possible_truncation)]
    fn set_quad_word(&self, offset: u32, value: u64) {
        self.set_double_word(offset, value as u32);
        self.set_double_word(offset + 4, (value >> 32) as u32);
    }

    /// Copy `buffer.len()` bytes starting at `offset` into `buffer`.
    fn copy_contents_into_array(&self, offset: u32, buffer: &mut [u8]) {
        for (byte, at) in buffer.iter_mut().zip(offset..) {
            *byte = self.get_byte(at);
        }
    }

    /// Copy `buffer` into the block starting at `offset`.
    fn copy_array_into_contents(&self, offset: u32, buffer: &[u8]) {
        for (&byte, at) in buffer.iter().zip(offset..) {
            self.set_byte(at, byte);
        }
    }

    /// Zero the whole block.
    fn clear(&self) {
        let mut at = 0u64;
        while at < self.size() {
            #[allow(clippy::cast_possible_truncation)]
            self.set_byte(at as u32, 0);
            at += 1;
        }
    }

    /// Block-local execution entry point.
    ///
    /// # Errors
    /// See [`ExecuteError`].
    fn execute(
        &self,
        mode: ExecutionMode,
        cpu: &mut dyn Processor,
        offset: u32,
    ) -> Result<usize, ExecuteError>;
}

/// Identity comparison of two block handles (ignores vtable pointers).
#[inline]
#[must_use]
pub fn same_block(a: &BlockRef, b: &BlockRef) -> bool {
    core::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

/// Fill `out` from a value that starts at `offset` in `low` and runs over
/// the block boundary into `high`.
pub(crate) fn read_spanning(low: &dyn MemoryBlock, high: &dyn MemoryBlock, offset: u32, out: &mut [u8]) {
    let split = ((BLOCK_SIZE - offset) as usize).min(out.len());
    let (head, tail) = out.split_at_mut(split);
    for (byte, at) in head.iter_mut().zip(offset..) {
        *byte = low.get_byte(at);
    }
    for (byte, at) in tail.iter_mut().zip(0u32..) {
        *byte = high.get_byte(at);
    }
}

/// Counterpart of [`read_spanning`] for stores.
pub(crate) fn write_spanning(low: &dyn MemoryBlock, high: &dyn MemoryBlock, offset: u32, bytes: &[u8]) {
    let split = ((BLOCK_SIZE - offset) as usize).min(bytes.len());
    let (head, tail) = bytes.split_at(split);
    for (&byte, at) in head.iter().zip(offset..) {
        low.set_byte(at, byte);
    }
    for (&byte, at) in tail.iter().zip(0u32..) {
        high.set_byte(at, byte);
    }
}
