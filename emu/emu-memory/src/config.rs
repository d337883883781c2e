use crate::linear::LinearAddressSpace;
use crate::physical::{MappingError, PhysicalAddressSpace};
use log::debug;
use utils_accessors_derive::Accessors;

/// Machine memory configuration.
///
/// ```rust
/// # use emu_memory::MemoryConfig;
/// let memory = MemoryConfig::default()
///     .with_ram_size(32 << 20)
///     .build()
///     .unwrap();
/// assert_eq!(memory.physical().ram_size(), 32 << 20);
/// assert!(!memory.is_paging_enabled());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Accessors)]
pub struct MemoryConfig {
    /// Bytes of RAM; non-zero and a multiple of 4 KiB.
    ram_size: u32,
    /// Whether address line 20 is enabled after reset.
    gate_a20_at_reset: bool,
    /// Whether the software TLB is enabled after reset.
    page_cache_at_reset: bool,
    /// Whether [`build`](Self::build) maps RAM blocks below `ram_size`.
    populate_ram: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            ram_size: 16 << 20,
            gate_a20_at_reset: false,
            page_cache_at_reset: true,
            populate_ram: true,
        }
    }
}

impl MemoryConfig {
    /// Assemble the physical and linear address spaces.
    ///
    /// # Errors
    /// [`MappingError::InvalidRamSize`] for a zero or unaligned RAM size.
    pub fn build(self) -> Result<LinearAddressSpace, MappingError> {
        debug!("Building memory: {self:?}");
        let mut physical =
            PhysicalAddressSpace::new(self.ram_size)?.with_gate_a20_at_reset(self.gate_a20_at_reset);
        if self.populate_ram {
            physical.populate_ram();
        }
        Ok(LinearAddressSpace::new(physical).with_page_cache_at_reset(self.page_cache_at_reset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unconnected::FLOATING_HIGH;

    #[test]
    fn defaults() {
        let config = MemoryConfig::default();
        assert_eq!(config.ram_size(), 0x100_0000);
        assert!(!config.gate_a20_at_reset());
        assert!(config.page_cache_at_reset());
        assert!(config.populate_ram());
    }

    #[test]
    fn unpopulated_ram_floats() {
        let memory = MemoryConfig::default()
            .with_ram_size(0x10_0000)
            .with_populate_ram(false)
            .build()
            .unwrap();
        assert_eq!(memory.physical().get_byte(0), FLOATING_HIGH);
    }

    #[test]
    fn reset_states_are_applied() {
        let memory = MemoryConfig::default()
            .with_gate_a20_at_reset(true)
            .with_page_cache_at_reset(false)
            .build()
            .unwrap();
        assert!(memory.physical().gate_a20_state());
        assert!(!memory.is_page_cache_enabled());
    }

    #[test]
    fn bad_ram_size() {
        assert_eq!(
            MemoryConfig::default().with_ram_size(0x1800).build().unwrap_err(),
            MappingError::InvalidRamSize(0x1800)
        );
    }
}
