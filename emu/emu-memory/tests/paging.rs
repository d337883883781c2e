use emu_memory::page_entry::{Pde, Pde4M, Pte};
use emu_memory::{AccessType, LinearAddressSpace, MemoryConfig, Privilege};

const DIRECTORY: u32 = 0x1000;

fn machine() -> LinearAddressSpace {
    MemoryConfig::default()
        .with_ram_size(0x100_0000)
        .build()
        .expect("16 MiB is a valid RAM size")
}

/// Point the directory slot for `linear` at the table at `table` and map the
/// page through `pte`.
fn map_4k(memory: &LinearAddressSpace, linear: u32, table: u32, pte: Pte) {
    let physical = memory.physical();
    let pde = Pde::new()
        .with_present(true)
        .with_writable(true)
        .with_user(true)
        .with_table_base(table);
    physical.set_double_word(DIRECTORY | ((linear >> 20) & 0xFFC), pde.into_bits());
    physical.set_double_word(pde.table_entry_address(linear), pte.into_bits());
}

#[test_log::test]
fn write_through_page_tables_lands_in_physical_memory() {
    let mut memory = machine();

    // PDE for linear 0x400000 at 0x1004 -> table at 0x2000; PTE -> page 0x3000.
    memory.physical().set_double_word(0x1004, 0x2007);
    memory.physical().set_double_word(0x2000, 0x3007);

    memory.set_paging_enabled(true);
    memory.set_page_directory_base_address(DIRECTORY);
    memory.set_supervisor(false);

    memory.set_byte(0x0040_0000, 0xAB).expect("page is user-writable");

    memory.set_paging_enabled(false);
    assert_eq!(memory.physical().get_byte(0x3000), 0xAB);

    // Accessed and dirty were recorded on the way.
    assert_eq!(memory.physical().get_double_word(0x2000), 0x3067);
    assert_eq!(memory.physical().get_double_word(0x1004), 0x2027);
}

#[test_log::test]
fn global_pages_survive_base_reload() {
    let mut memory = machine();
    map_4k(&memory, 0x0040_0000, 0x2000, Pte::new().with_present(true).with_global(true).with_page_base(0x5000));
    map_4k(&memory, 0x0040_1000, 0x2000, Pte::new().with_present(true).with_page_base(0x6000));
    memory.set_page_directory_base_address(DIRECTORY);
    memory.set_global_pages_enabled(true);
    memory.set_paging_enabled(true);

    memory.get_byte(0x0040_0000).unwrap();
    memory.get_byte(0x0040_1000).unwrap();
    assert!(memory.is_cached(0x0040_0000, AccessType::Read));
    assert!(memory.is_cached(0x0040_1000, AccessType::Read));

    // Retarget both PTEs. The global page must keep its cached translation
    // and not re-walk; the other one picks up the new mapping.
    memory.physical().set_byte(0x5000, 0x55);
    memory.physical().set_byte(0x6000, 0x66);
    memory.physical().set_byte(0x7000, 0x77);
    memory.physical().set_double_word(0x2000, Pte::new().with_present(true).with_page_base(0x7000).into_bits());
    memory.physical().set_double_word(0x2004, Pte::new().with_present(true).with_page_base(0x7000).into_bits());
    memory.set_page_directory_base_address(DIRECTORY);

    assert!(memory.is_cached(0x0040_0000, AccessType::Read));
    assert!(!memory.is_cached(0x0040_1000, AccessType::Read));
    assert_eq!(memory.get_byte(0x0040_0000), Ok(0x55));
    assert_eq!(memory.get_byte(0x0040_1000), Ok(0x77));
}

#[test]
fn base_reload_without_pge_flushes_everything() {
    let mut memory = machine();
    map_4k(&memory, 0x0040_0000, 0x2000, Pte::new().with_present(true).with_global(true).with_page_base(0x5000));
    memory.set_page_directory_base_address(DIRECTORY);
    memory.set_paging_enabled(true);

    memory.get_byte(0x0040_0000).unwrap();
    memory.set_page_directory_base_address(DIRECTORY);
    assert!(!memory.is_cached(0x0040_0000, AccessType::Read));
}

#[test]
fn invalidating_a_small_page_spares_its_siblings() {
    let mut memory = machine();
    for (linear, page) in [(0x0040_0000, 0x5000), (0x0040_1000, 0x6000), (0x0040_2000, 0x7000)] {
        map_4k(&memory, linear, 0x2000, Pte::new().with_present(true).with_writable(true).with_page_base(page));
    }
    memory.set_page_directory_base_address(DIRECTORY);
    memory.set_paging_enabled(true);

    for linear in [0x0040_0000, 0x0040_1000, 0x0040_2000] {
        memory.set_byte(linear, 1).unwrap();
        memory.get_byte(linear).unwrap();
    }

    memory.invalidate_tlb_entry(0x0040_1234);
    for access in [AccessType::Read, AccessType::Write] {
        assert!(memory.is_cached(0x0040_0000, access));
        assert!(!memory.is_cached(0x0040_1000, access));
        assert!(memory.is_cached(0x0040_2000, access));
    }
}

#[test]
fn invalidating_inside_a_large_page_drops_all_of_it() {
    let mut memory = machine();
    let pde = Pde4M::new()
        .with_present(true)
        .with_writable(true)
        .with_user(true)
        .with_page_base(0x0040_0000);
    memory.physical().set_double_word(DIRECTORY | 0x004, pde.into_bits());
    map_4k(
        &memory,
        0x0080_0000,
        0x2000,
        Pte::new().with_present(true).with_user(true).with_page_base(0x3000),
    );

    memory.set_page_directory_base_address(DIRECTORY);
    memory.set_page_size_extensions_enabled(true);
    memory.set_paging_enabled(true);
    memory.set_privilege(Privilege::User);

    memory.get_byte(0x0040_0000).unwrap();
    memory.get_byte(0x0080_0000).unwrap();
    assert!((0x0040_0000..0x0080_0000).step_by(0x1000).all(|a| memory.is_cached(a, AccessType::Read)));

    memory.invalidate_tlb_entry(0x0055_5555);
    assert!((0x0040_0000..0x0080_0000).step_by(0x1000).all(|a| !memory.is_cached(a, AccessType::Read)));
    assert!(memory.is_cached(0x0080_0000, AccessType::Read));
}

/// Touch linear 0x400000 and report whether it ended up cached.
fn cached(memory: &mut LinearAddressSpace) -> bool {
    memory.get_byte(0x0040_0000).unwrap();
    memory.is_cached(0x0040_0000, AccessType::Read)
}

#[test]
fn toggles_flush_the_cache() {
    let mut memory = machine();
    map_4k(&memory, 0x0040_0000, 0x2000, Pte::new().with_present(true).with_page_base(0x5000));
    memory.set_page_directory_base_address(DIRECTORY);
    memory.set_paging_enabled(true);

    assert!(cached(&mut memory));
    memory.set_page_size_extensions_enabled(true);
    assert!(!memory.is_cached(0x0040_0000, AccessType::Read));

    assert!(cached(&mut memory));
    memory.set_global_pages_enabled(true);
    assert!(!memory.is_cached(0x0040_0000, AccessType::Read));

    assert!(cached(&mut memory));
    memory.set_gate_a20_state(true);
    assert!(!memory.is_cached(0x0040_0000, AccessType::Read));

    assert!(cached(&mut memory));
    memory.flush();
    assert!(!memory.is_cached(0x0040_0000, AccessType::Read));
}

#[test]
fn switching_privilege_keeps_both_caches() {
    let mut memory = machine();
    map_4k(
        &memory,
        0x0040_0000,
        0x2000,
        Pte::new().with_present(true).with_user(true).with_page_base(0x5000),
    );
    memory.set_page_directory_base_address(DIRECTORY);
    memory.set_paging_enabled(true);

    memory.get_byte(0x0040_0000).unwrap();
    memory.set_privilege(Privilege::User);
    memory.get_byte(0x0040_0000).unwrap();
    assert!(memory.is_cached(0x0040_0000, AccessType::Read));

    memory.set_privilege(Privilege::Supervisor);
    assert!(memory.is_cached(0x0040_0000, AccessType::Read));
}
