use emu_memory::page_entry::{Pde, Pde4M, Pte};
use emu_memory::{AccessType, FaultKind, LinearAddressSpace, MemoryConfig, Privilege};
use proptest::prelude::*;

const DIRECTORY: u32 = 0x1000;
const TABLE: u32 = 0x2000;
const LINEAR: u32 = 0x0040_0000;

/// The combined user/supervisor and read/write rules, spelled out case by
/// case.
fn expected(requester: Privilege, user_page: bool, read_only: bool, access: AccessType, wp: bool) -> bool {
    match (requester, user_page, access) {
        (Privilege::User, false, _) => false,
        (_, _, AccessType::Read) => true,
        (Privilege::Supervisor, false, AccessType::Write) => true,
        (Privilege::Supervisor, true, AccessType::Write) => !(wp && read_only),
        (Privilege::User, true, AccessType::Write) => !read_only,
    }
}

fn machine() -> LinearAddressSpace {
    let mut memory = MemoryConfig::default().with_ram_size(0x80_0000).build().unwrap();
    memory.set_page_directory_base_address(DIRECTORY);
    memory
}

fn access_once(memory: &mut LinearAddressSpace, access: AccessType) -> Result<(), emu_memory::PageFault> {
    match access {
        AccessType::Read => memory.get_byte(LINEAR).map(drop),
        AccessType::Write => memory.set_byte(LINEAR, 0x5A),
    }
}

#[test]
fn two_level_truth_table() {
    for bits in 0u32..128 {
        let bit = |n: u32| bits & (1 << n) != 0;
        let (pde_user, pde_rw, pte_user, pte_rw, wp) = (bit(0), bit(1), bit(2), bit(3), bit(4));
        let requester = if bit(5) { Privilege::User } else { Privilege::Supervisor };
        let access = if bit(6) { AccessType::Write } else { AccessType::Read };

        let mut memory = machine();
        let pde = Pde::new()
            .with_present(true)
            .with_user(pde_user)
            .with_writable(pde_rw)
            .with_table_base(TABLE);
        let pte = Pte::new()
            .with_present(true)
            .with_user(pte_user)
            .with_writable(pte_rw)
            .with_page_base(0x3000);
        memory.physical().set_double_word(DIRECTORY + 4, pde.into_bits());
        memory.physical().set_double_word(TABLE, pte.into_bits());
        memory.set_write_protect_user_pages(wp);
        memory.set_paging_enabled(true);
        memory.set_privilege(requester);

        let allowed = expected(requester, pde_user && pte_user, !(pde_rw && pte_rw), access, wp);
        let outcome = access_once(&mut memory, access);
        assert_eq!(
            outcome.is_ok(),
            allowed,
            "{requester} {access}: pde u={pde_user} rw={pde_rw}, pte u={pte_user} rw={pte_rw}, wp={wp}"
        );

        if let Err(fault) = outcome {
            assert_eq!(fault.kind, FaultKind::ProtectionViolation);
            assert_eq!(fault.access, access);
            assert_eq!(fault.privilege, requester);
            // A refused access must not leave accessed/dirty marks behind.
            assert_eq!(memory.physical().get_double_word(TABLE), pte.into_bits());
        }
    }
}

#[test]
fn user_context_survives_a_fault_and_retries() {
    let mut memory = machine();
    let pde = Pde::new()
        .with_present(true)
        .with_user(true)
        .with_writable(true)
        .with_table_base(TABLE);
    memory.physical().set_double_word(DIRECTORY + 4, pde.into_bits());
    memory
        .physical()
        .set_double_word(TABLE, Pte::new().with_present(true).with_page_base(0x3000).into_bits());
    memory.set_paging_enabled(true);
    memory.set_supervisor(false);

    assert!(memory.get_byte(LINEAR).is_err());

    // The guest fixes its tables; nothing stale may have been cached.
    memory.physical().set_double_word(
        TABLE,
        Pte::new()
            .with_present(true)
            .with_user(true)
            .with_page_base(0x3000)
            .into_bits(),
    );
    assert_eq!(memory.get_byte(LINEAR), Ok(0));
}

proptest! {
    #[test]
    fn large_pages_follow_the_same_rules(
        user_page: bool,
        writable: bool,
        wp: bool,
        user: bool,
        write: bool,
        offset in 0u32..0x40_0000,
    ) {
        let mut memory = machine();
        let pde = Pde4M::new()
            .with_present(true)
            .with_user(user_page)
            .with_writable(writable)
            .with_page_base(0x0040_0000);
        memory.physical().set_double_word(DIRECTORY + 4, pde.into_bits());
        memory.set_page_size_extensions_enabled(true);
        memory.set_write_protect_user_pages(wp);
        memory.set_paging_enabled(true);

        let requester = if user { Privilege::User } else { Privilege::Supervisor };
        let access = if write { AccessType::Write } else { AccessType::Read };
        memory.set_privilege(requester);

        let outcome = match access {
            AccessType::Read => memory.get_byte(LINEAR + offset).map(drop),
            AccessType::Write => memory.set_byte(LINEAR + offset, 1),
        };
        prop_assert_eq!(outcome.is_ok(), expected(requester, user_page, !writable, access, wp));
        if let Err(fault) = outcome {
            prop_assert_eq!(fault.address, LINEAR + offset);
        }
    }
}
