use crate::block::{ExecuteError, ExecutionMode, MemoryBlock, Processor};
use core::cell::{Cell, OnceCell};
use core::fmt;

/// Guest RAM with lazily allocated backing storage.
///
/// A freshly constructed block reads as zero and owns no storage; the first
/// store allocates it. Most of a guest's RAM is never touched, so a 16 MiB
/// machine typically allocates only a fraction of its blocks.
pub struct RamBlock {
    size: usize,
    contents: OnceCell<Box<[Cell<u8>]>>,
}

impl RamBlock {
    /// Create a zero-filled block of `size` bytes without allocating.
    #[must_use]
    pub const fn new(size: usize) -> Self {
        Self {
            size,
            contents: OnceCell::new(),
        }
    }

    #[inline]
    fn contents(&self) -> &[Cell<u8>] {
        self.contents
            .get_or_init(|| (0..self.size).map(|_| Cell::new(0)).collect())
    }

    #[inline]
    fn cell(&self, offset: u32) -> Option<&Cell<u8>> {
        assert!(
            (offset as usize) < self.size,
            "offset {offset:#x} outside a {:#x} byte RAM block",
            self.size
        );
        self.contents.get().map(|cells| &cells[offset as usize])
    }
}

impl MemoryBlock for RamBlock {
    fn size(&self) -> u64 {
        self.size as u64
    }

    fn is_allocated(&self) -> bool {
        self.contents.get().is_some()
    }

    /// # Panics
    /// If `offset` lies outside the block.
    fn get_byte(&self, offset: u32) -> u8 {
        self.cell(offset).map_or(0, Cell::get)
    }

    /// # Panics
    /// If `offset` lies outside the block.
    fn set_byte(&self, offset: u32, value: u8) {
        if self.cell(offset).is_none() && value == 0 {
            // Storing zero into untouched RAM changes nothing.
            return;
        }
        self.contents()[offset as usize].set(value);
    }

    fn copy_contents_into_array(&self, offset: u32, buffer: &mut [u8]) {
        let start = offset as usize;
        let end = start + buffer.len();
        match self.contents.get() {
            Some(cells) => {
                for (byte, cell) in buffer.iter_mut().zip(&cells[start..end]) {
                    *byte = cell.get();
                }
            }
            None => {
                assert!(end <= self.size, "copy outside RAM block");
                buffer.fill(0);
            }
        }
    }

    fn copy_array_into_contents(&self, offset: u32, buffer: &[u8]) {
        let start = offset as usize;
        for (cell, &byte) in self.contents()[start..start + buffer.len()].iter().zip(buffer) {
            cell.set(byte);
        }
    }

    /// Zeroes the contents. Storage, once allocated, is kept.
    fn clear(&self) {
        if let Some(cells) = self.contents.get() {
            cells.iter().for_each(|cell| cell.set(0));
        }
    }

    fn execute(
        &self,
        mode: ExecutionMode,
        cpu: &mut dyn Processor,
        offset: u32,
    ) -> Result<usize, ExecuteError> {
        cpu.run_block(mode, self, offset)
    }
}

impl fmt::Debug for RamBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RamBlock")
            .field("size", &self.size)
            .field("allocated", &self.is_allocated())
            .finish()
    }
}
