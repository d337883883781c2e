//! The two-level page-table walk and the permission rules.

use crate::BLOCK_MASK;
use crate::linear::PagingState;
use crate::page_entry::{DirectoryEntry, DirectoryView, Pte, directory_entry_address};
use crate::page_fault::{AccessType, FaultKind, PageFault, Privilege};
use crate::physical::PhysicalAddressSpace;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) enum PageSize {
    Size4K,
    Size4M,
}

/// Outcome of a successful walk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) struct Translation {
    pub physical: u32,
    pub size: PageSize,
    pub global: bool,
}

/// Whether the walk writes accessed/dirty bits back into the tables.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) enum Update {
    Commit,
    DryRun,
}

/// Whether `requester` may perform `access` on a page owned by `owner`.
///
/// | requester  | owner      | read | write                        |
/// |------------|------------|------|------------------------------|
/// | user       | supervisor | no   | no                           |
/// | user       | user       | yes  | unless read-only             |
/// | supervisor | supervisor | yes  | yes                          |
/// | supervisor | user       | yes  | unless WP and read-only      |
pub(super) const fn permitted(
    requester: Privilege,
    owner: Privilege,
    access: AccessType,
    read_only: bool,
    write_protect: bool,
) -> bool {
    match (requester, owner, access) {
        (Privilege::User, Privilege::Supervisor, _) => false,
        (_, _, AccessType::Read) | (Privilege::Supervisor, Privilege::Supervisor, AccessType::Write) => true,
        (Privilege::Supervisor, Privilege::User, AccessType::Write) => !(write_protect && read_only),
        (Privilege::User, Privilege::User, AccessType::Write) => !read_only,
    }
}

const fn owner(user: bool) -> Privilege {
    if user { Privilege::User } else { Privilege::Supervisor }
}

/// Translate `linear` for `access` in the privilege context of `state`.
///
/// Permissions are checked before any accessed/dirty bit is touched, so a
/// faulting access leaves the tables unchanged.
pub(super) fn walk(
    physical: &PhysicalAddressSpace,
    state: &PagingState,
    linear: u32,
    access: AccessType,
    update: Update,
) -> Result<Translation, PageFault> {
    let fault = |kind| PageFault::new(kind, access, state.privilege, linear);
    let check = |user: bool, read_only: bool| {
        if permitted(state.privilege, owner(user), access, read_only, state.write_protect) {
            Ok(())
        } else {
            Err(fault(FaultKind::ProtectionViolation))
        }
    };
    let is_write = access == AccessType::Write;

    let pde_address = directory_entry_address(state.base, linear);
    let directory = DirectoryEntry::from_bits(physical.get_double_word(pde_address));
    if !directory.present() {
        return Err(fault(FaultKind::NotPresent));
    }

    match directory.view(state.pse) {
        DirectoryView::Leaf4M(pde) => {
            check(pde.user(), !pde.writable())?;

            if update == Update::Commit {
                let updated = pde.with_accessed(true).with_dirty(pde.dirty() || is_write);
                if updated != pde {
                    physical.set_double_word(pde_address, updated.into_bits());
                }
            }

            Ok(Translation {
                physical: pde.translate(linear),
                size: PageSize::Size4M,
                global: pde.global(),
            })
        }
        DirectoryView::Table(pde) => {
            let pte_address = pde.table_entry_address(linear);
            let pte = Pte::from_bits(physical.get_double_word(pte_address));
            if !pte.present() {
                return Err(fault(FaultKind::NotPresent));
            }

            let read_only = !(pde.writable() && pte.writable());
            check(pde.user() && pte.user(), read_only)?;

            if update == Update::Commit {
                if !pde.accessed() {
                    physical.set_double_word(pde_address, pde.with_accessed(true).into_bits());
                }
                let updated = pte.with_accessed(true).with_dirty(pte.dirty() || is_write);
                if updated != pte {
                    physical.set_double_word(pte_address, updated.into_bits());
                }
            }

            Ok(Translation {
                physical: pte.page_base() | (linear & BLOCK_MASK),
                size: PageSize::Size4K,
                global: pte.global(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_entry::{ACCESSED_BIT, DIRTY_BIT, Pde, Pde4M};

    const DIRECTORY: u32 = 0x1000;
    const TABLE: u32 = 0x2000;
    const PAGE: u32 = 0x3000;
    const LINEAR: u32 = 0x0040_0123;

    fn space() -> PhysicalAddressSpace {
        let mut space = PhysicalAddressSpace::new(0x80_0000).unwrap();
        space.populate_ram();
        space
    }

    fn state(privilege: Privilege) -> PagingState {
        PagingState {
            paging: true,
            base: DIRECTORY,
            privilege,
            ..PagingState::default()
        }
    }

    fn map_4k(space: &PhysicalAddressSpace, pde: Pde, pte: Pte) {
        space.set_double_word(DIRECTORY + 4, pde.with_present(true).with_table_base(TABLE).into_bits());
        space.set_double_word(TABLE, pte.with_present(true).with_page_base(PAGE).into_bits());
    }

    #[test]
    fn permission_truth_table() {
        use AccessType::{Read, Write};
        use Privilege::{Supervisor, User};

        let expected = [
            // requester, owner, access, read_only, write_protect, permitted
            (User, Supervisor, Read, false, false, false),
            (User, Supervisor, Read, true, true, false),
            (User, Supervisor, Write, false, false, false),
            (User, Supervisor, Write, true, true, false),
            (User, User, Read, true, true, true),
            (User, User, Write, false, false, true),
            (User, User, Write, false, true, true),
            (User, User, Write, true, false, false),
            (User, User, Write, true, true, false),
            (Supervisor, Supervisor, Read, true, true, true),
            (Supervisor, Supervisor, Write, true, false, true),
            (Supervisor, Supervisor, Write, true, true, true),
            (Supervisor, User, Read, true, true, true),
            (Supervisor, User, Write, false, true, true),
            (Supervisor, User, Write, true, false, true),
            (Supervisor, User, Write, true, true, false),
        ];
        for (requester, page_owner, access, read_only, wp, allowed) in expected {
            assert_eq!(
                permitted(requester, page_owner, access, read_only, wp),
                allowed,
                "{requester} {access} on {page_owner} page, read_only={read_only}, wp={wp}"
            );
        }
    }

    #[test]
    fn owner_needs_both_user_bits() {
        let space = space();
        map_4k(&space, Pde::new().with_writable(true), Pte::new().with_user(true).with_writable(true));
        let err = walk(&space, &state(Privilege::User), LINEAR, AccessType::Read, Update::Commit).unwrap_err();
        assert_eq!(err.kind, FaultKind::ProtectionViolation);
        assert_eq!(err.address, LINEAR);
    }

    #[test]
    fn read_only_from_either_level() {
        let space = space();
        map_4k(&space, Pde::new().with_user(true), Pte::new().with_user(true).with_writable(true));
        let user = state(Privilege::User);
        assert!(walk(&space, &user, LINEAR, AccessType::Read, Update::Commit).is_ok());
        assert!(walk(&space, &user, LINEAR, AccessType::Write, Update::Commit).is_err());
    }

    #[test]
    fn not_present_directory_and_table() {
        let space = space();
        let err = walk(&space, &state(Privilege::Supervisor), LINEAR, AccessType::Write, Update::Commit).unwrap_err();
        assert_eq!(err.kind, FaultKind::NotPresent);

        space.set_double_word(DIRECTORY + 4, Pde::new().with_present(true).with_table_base(TABLE).into_bits());
        let err = walk(&space, &state(Privilege::Supervisor), LINEAR, AccessType::Read, Update::Commit).unwrap_err();
        assert_eq!(err.kind, FaultKind::NotPresent);
        assert_eq!(err.access, AccessType::Read);
    }

    #[test]
    fn accessed_and_dirty_bits() {
        let space = space();
        map_4k(&space, Pde::new().with_writable(true), Pte::new().with_writable(true));
        let sv = state(Privilege::Supervisor);

        let t = walk(&space, &sv, LINEAR, AccessType::Read, Update::Commit).unwrap();
        assert_eq!(t.physical, PAGE | 0x123);
        assert_eq!(t.size, PageSize::Size4K);
        assert_eq!(space.get_double_word(TABLE) & (ACCESSED_BIT | DIRTY_BIT), ACCESSED_BIT);
        assert_eq!(space.get_double_word(DIRECTORY + 4) & ACCESSED_BIT, ACCESSED_BIT);

        walk(&space, &sv, LINEAR, AccessType::Write, Update::Commit).unwrap();
        assert_eq!(
            space.get_double_word(TABLE) & (ACCESSED_BIT | DIRTY_BIT),
            ACCESSED_BIT | DIRTY_BIT
        );
    }

    #[test]
    fn faults_and_dry_runs_leave_tables_alone() {
        let space = space();
        map_4k(&space, Pde::new(), Pte::new());
        let before = space.get_double_word(TABLE);

        assert!(walk(&space, &state(Privilege::User), LINEAR, AccessType::Read, Update::Commit).is_err());
        walk(&space, &state(Privilege::Supervisor), LINEAR, AccessType::Write, Update::DryRun).unwrap();
        assert_eq!(space.get_double_word(TABLE), before);
        assert_eq!(space.get_double_word(DIRECTORY + 4) & ACCESSED_BIT, 0);
    }

    #[test]
    fn large_pages_need_pse() {
        let space = space();
        let pde = Pde4M::new()
            .with_present(true)
            .with_writable(true)
            .with_global(true)
            .with_page_base(0x0040_0000);
        space.set_double_word(DIRECTORY + 4, pde.into_bits());

        let mut with_pse = state(Privilege::Supervisor);
        with_pse.pse = true;
        let t = walk(&space, &with_pse, LINEAR, AccessType::Write, Update::Commit).unwrap();
        assert_eq!(t.physical, 0x0040_0123);
        assert_eq!(t.size, PageSize::Size4M);
        assert!(t.global);
        assert_eq!(
            space.get_double_word(DIRECTORY + 4) & (ACCESSED_BIT | DIRTY_BIT),
            ACCESSED_BIT | DIRTY_BIT
        );

        // Without PSE the same entry points at a page table at 0x400000.
        let t = walk(&space, &state(Privilege::Supervisor), LINEAR, AccessType::Read, Update::DryRun);
        assert_eq!(t.unwrap_err().kind, FaultKind::NotPresent);
    }
}
