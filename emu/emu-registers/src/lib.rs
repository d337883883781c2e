//! # Typed x86 Control Registers (32-bit)
//!
//! Bit-exact models of the control registers the memory core reacts to.
//! The emulated processor keeps the raw register values; whenever the guest
//! executes `mov crN, r32` the new value is wrapped in one of these types and
//! handed to the paging layer, which only cares about a handful of bits:
//!
//! | Register | Bit | Effect on the memory core |
//! |:---------|:----|:--------------------------|
//! | [`Cr0`](cr0::Cr0) | `PG` (31) | Paging on/off |
//! | [`Cr0`](cr0::Cr0) | `WP` (16) | Supervisor writes honour read-only user pages |
//! | [`Cr0`](cr0::Cr0) | `CD` (30) | Software TLB population on/off |
//! | [`Cr3`](cr3::Cr3) | `31:12` | Page-directory base, reload flushes non-global pages |
//! | [`Cr4`](cr4::Cr4) | `PSE` (4) | 4 MiB directory entries |
//! | [`Cr4`](cr4::Cr4) | `PGE` (7) | Global pages survive CR3 reloads |
//!
//! Unlike a kernel, an emulator never executes the real `mov` instructions,
//! so these types are pure values: construct them from the guest's raw `u32`
//! with `from_bits` and read them back with `into_bits`.

#![cfg_attr(not(any(test, doctest)), no_std)]

#[cfg(feature = "cr0")]
pub mod cr0;

#[cfg(feature = "cr3")]
pub mod cr3;

#[cfg(feature = "cr4")]
pub mod cr4;

#[cfg(feature = "cr0")]
pub use cr0::Cr0;

#[cfg(feature = "cr3")]
pub use cr3::Cr3;

#[cfg(feature = "cr4")]
pub use cr4::Cr4;
