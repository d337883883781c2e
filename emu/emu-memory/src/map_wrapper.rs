use crate::BLOCK_SIZE;
use crate::block::{BlockRef, ExecuteError, ExecutionMode, MemoryBlock, Processor};

/// A 4 KiB window into a larger shared resource.
///
/// `PhysicalAddressSpace::map_memory_region` tiles a region with one wrapper
/// per block, each offset `base` bytes into the same resource, so a device
/// can expose e.g. 128 KiB of video RAM as a single object.
#[derive(Debug, Clone)]
pub struct MapWrapper {
    memory: BlockRef,
    base: u32,
}

impl MapWrapper {
    /// View `[base, base + 4096)` of `memory`.
    #[must_use]
    pub fn new(memory: BlockRef, base: u32) -> Self {
        debug_assert!(
            u64::from(base) + u64::from(BLOCK_SIZE) <= memory.size(),
            "window {base:#x} lies outside the wrapped resource"
        );
        Self { memory, base }
    }

    /// The wrapped resource.
    #[must_use]
    pub const fn memory(&self) -> &BlockRef {
        &self.memory
    }

    /// Offset of this window within the resource.
    #[must_use]
    pub const fn base(&self) -> u32 {
        self.base
    }
}

impl MemoryBlock for MapWrapper {
    fn size(&self) -> u64 {
        u64::from(BLOCK_SIZE)
    }

    fn is_allocated(&self) -> bool {
        self.memory.is_allocated()
    }

    fn get_byte(&self, offset: u32) -> u8 {
        self.memory.get_byte(self.base + offset)
    }

    fn set_byte(&self, offset: u32, value: u8) {
        self.memory.set_byte(self.base + offset, value);
    }

    fn get_word(&self, offset: u32) -> u16 {
        self.memory.get_word(self.base + offset)
    }

    fn get_double_word(&self, offset: u32) -> u32 {
        self.memory.get_double_word(self.base + offset)
    }

    fn get_quad_word(&self, offset: u32) -> u64 {
        self.memory.get_quad_word(self.base + offset)
    }

    fn set_word(&self, offset: u32, value: u16) {
        self.memory.set_word(self.base + offset, value);
    }

    fn set_double_word(&self, offset: u32, value: u32) {
        self.memory.set_double_word(self.base + offset, value);
    }

    fn set_quad_word(&self, offset: u32, value: u64) {
        self.memory.set_quad_word(self.base + offset, value);
    }

    fn copy_contents_into_array(&self, offset: u32, buffer: &mut [u8]) {
        self.memory.copy_contents_into_array(self.base + offset, buffer);
    }

    fn copy_array_into_contents(&self, offset: u32, buffer: &[u8]) {
        self.memory.copy_array_into_contents(self.base + offset, buffer);
    }

    /// Zeroes this window only; the rest of the resource is untouched.
    fn clear(&self) {
        self.memory
            .copy_array_into_contents(self.base, &[0; BLOCK_SIZE as usize]);
    }

    fn execute(
        &self,
        mode: ExecutionMode,
        cpu: &mut dyn Processor,
        offset: u32,
    ) -> Result<usize, ExecuteError> {
        self.memory.execute(mode, cpu, self.base + offset)
    }
}
