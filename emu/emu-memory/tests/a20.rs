use emu_memory::{
    BlockRef, FLOATING_HIGH, MemoryBlock, PhysicalAddressSpace, RamBlock, same_block,
};
use proptest::prelude::*;
use std::rc::Rc;

/// 2 MiB of RAM so both halves of every A20 alias pair are backed.
fn machine() -> PhysicalAddressSpace {
    let mut physical = PhysicalAddressSpace::new(0x20_0000).unwrap();
    physical.populate_ram();
    physical
}

fn block_aligned() -> impl Strategy<Value = u32> {
    any::<u32>().prop_map(|a| a & !0xFFF)
}

proptest! {
    #[test]
    fn masked_gate_aliases_bit_20(address in 0u32..0x20_0000, value: u8) {
        let physical = machine();
        physical.set_byte(address, value);
        prop_assert_eq!(physical.get_byte(address), physical.get_byte(address ^ 0x10_0000));
    }

    #[test]
    fn open_gate_separates_bit_20(address in 0u32..0x10_0000, low: u8, high: u8) {
        let mut physical = machine();
        physical.set_gate_a20_state(true);
        physical.set_byte(address, low);
        physical.set_byte(address | 0x10_0000, high);
        prop_assert_eq!(physical.get_byte(address), low);
        prop_assert_eq!(physical.get_byte(address | 0x10_0000), high);

        // Masking again shows the low megabyte in both halves.
        physical.set_gate_a20_state(false);
        prop_assert_eq!(physical.get_byte(address | 0x10_0000), low);
    }

    #[test]
    fn mapped_block_answers_for_its_whole_range(base in block_aligned(), offset in 0u32..0x1000, value: u32) {
        let mut physical = PhysicalAddressSpace::new(0x1000).unwrap().with_gate_a20_at_reset(true);
        let block: BlockRef = Rc::new(RamBlock::new(4096));
        physical.map_memory(base, block.clone()).unwrap();

        prop_assert!(same_block(physical.block_at(base + offset), &block));
        let offset = offset & !3;
        physical.set_double_word(base + offset, value);
        prop_assert_eq!(block.get_double_word(offset), value);
    }

    #[test]
    fn unmapped_range_floats_high(base in block_aligned(), offset in 0u32..0x1000, value: u8) {
        let mut physical = PhysicalAddressSpace::new(0x1000).unwrap().with_gate_a20_at_reset(true);
        physical.map_memory(base, Rc::new(RamBlock::new(4096))).unwrap();
        physical.unmap(base, 0x1000).unwrap();

        physical.set_byte(base + offset, value);
        prop_assert_eq!(physical.get_byte(base + offset), FLOATING_HIGH);
    }
}

#[test]
fn masked_mapping_covers_both_halves() {
    let mut physical = PhysicalAddressSpace::new(0x1000).unwrap();
    let rom: BlockRef = Rc::new(RamBlock::new(4096));
    physical.map_memory(0xF_0000, rom.clone()).unwrap();

    assert!(same_block(physical.block_at(0xF_0000), &rom));
    assert!(same_block(physical.block_at(0x1F_0000), &rom));

    physical.set_gate_a20_state(true);
    assert!(same_block(physical.block_at(0xF_0000), &rom));
    assert_eq!(physical.get_byte(0x1F_0000), FLOATING_HIGH);
}

#[test]
fn reset_restores_the_configured_gate() {
    let mut physical = machine().with_gate_a20_at_reset(true);
    physical.set_gate_a20_state(false);
    physical.reset();
    assert!(physical.gate_a20_state());
}
