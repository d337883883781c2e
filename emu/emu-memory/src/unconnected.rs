use crate::BLOCK_SIZE;
use crate::block::{ExecuteError, ExecutionMode, MemoryBlock, Processor};

/// Byte value read from addresses no device drives: the data lines float
/// high.
pub const FLOATING_HIGH: u8 = 0xFF;

/// Sentinel for physical blocks nothing has claimed.
///
/// Reads return [`FLOATING_HIGH`] in every byte lane, writes are discarded
/// and execution is refused.
#[derive(Debug, Default, Copy, Clone)]
pub struct UnconnectedMemoryBlock;

impl MemoryBlock for UnconnectedMemoryBlock {
    fn size(&self) -> u64 {
        u64::from(BLOCK_SIZE)
    }

    fn is_allocated(&self) -> bool {
        false
    }

    fn get_byte(&self, _offset: u32) -> u8 {
        FLOATING_HIGH
    }

    fn set_byte(&self, _offset: u32, _value: u8) {}

    fn get_word(&self, _offset: u32) -> u16 {
        u16::MAX
    }

    fn get_double_word(&self, _offset: u32) -> u32 {
        u32::MAX
    }

    fn get_quad_word(&self, _offset: u32) -> u64 {
        u64::MAX
    }

    fn set_word(&self, _offset: u32, _value: u16) {}

    fn set_double_word(&self, _offset: u32, _value: u32) {}

    fn set_quad_word(&self, _offset: u32, _value: u64) {}

    fn copy_contents_into_array(&self, _offset: u32, buffer: &mut [u8]) {
        buffer.fill(FLOATING_HIGH);
    }

    fn copy_array_into_contents(&self, _offset: u32, _buffer: &[u8]) {}

    fn clear(&self) {}

    fn execute(
        &self,
        _mode: ExecutionMode,
        _cpu: &mut dyn Processor,
        offset: u32,
    ) -> Result<usize, ExecuteError> {
        Err(ExecuteError::Unconnected(offset))
    }
}
