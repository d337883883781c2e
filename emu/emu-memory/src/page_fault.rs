//! Guest page faults.
//!
//! A failed translation is a [`PageFault`] value. It travels up through
//! `Result` to the instruction-dispatch loop, which delivers `#PF`
//! ([`PAGE_FAULT_VECTOR`]) with CR2 set to [`PageFault::address`] and the
//! error code from [`PageFault::error_code`].

use bitfield_struct::bitfield;
use core::fmt;

/// Interrupt vector of `#PF`.
pub const PAGE_FAULT_VECTOR: u8 = 0x0E; // 14

/// Kind of memory access being translated.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AccessType {
    Read,
    Write,
}

impl AccessType {
    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Read => 0,
            Self::Write => 1,
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
        })
    }
}

/// Privilege context of the requester: CPL 0‒2 or CPL 3.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum Privilege {
    #[default]
    Supervisor,
    User,
}

impl Privilege {
    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Supervisor => 0,
            Self::User => 1,
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Supervisor => "supervisor",
            Self::User => "user",
        })
    }
}

/// Why a translation failed.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FaultKind {
    /// A directory or table entry had P=0.
    NotPresent,
    /// The page exists but the access is not permitted.
    ProtectionViolation,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotPresent => "not-present",
            Self::ProtectionViolation => "protection-violation",
        })
    }
}

/// A page fault raised by the paging unit.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{kind} page fault on {privilege} {access} at {address:#010x}")]
pub struct PageFault {
    pub kind: FaultKind,
    pub access: AccessType,
    pub privilege: Privilege,
    /// The faulting linear address (what the guest sees in CR2).
    pub address: u32,
}

impl PageFault {
    #[must_use]
    pub const fn new(kind: FaultKind, access: AccessType, privilege: Privilege, address: u32) -> Self {
        Self {
            kind,
            access,
            privilege,
            address,
        }
    }

    /// The error code pushed with `#PF`.
    #[must_use]
    pub const fn error_code(&self) -> PageFaultErrorCode {
        PageFaultErrorCode::new()
            .with_present(matches!(self.kind, FaultKind::ProtectionViolation))
            .with_write(matches!(self.access, AccessType::Write))
            .with_user(matches!(self.privilege, Privilege::User))
    }
}

/// Page-fault error code layout (32-bit, no PKE/CET).
///
/// Reference: Intel SDM Vol. 3A, §6.15 “Page-Fault Exception (#PF)”.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageFaultErrorCode {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read or execute.
    /// 1 = write access.
    pub write: bool, // bit 1

    /// 0 = supervisor (CPL 0–2).
    /// 1 = user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = caused by reserved bit set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch.
    pub instruction_fetch: bool, // bit 4

    #[bits(27)]
    __: u32,
}

impl PageFaultErrorCode {
    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if !self.present() {
            "Non-present page (page not mapped or swapped out)"
        } else if self.instruction_fetch() {
            if self.user() {
                "User-mode instruction fetch on protected page"
            } else {
                "Supervisor instruction fetch on protected page"
            }
        } else if self.write() {
            "Write access to protected page"
        } else {
            "Read access to protected page"
        }
    }
}
