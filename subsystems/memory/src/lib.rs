//! # Tern Memory Subsystem
//!
//! The memory subsystem provides:
//! - A coremap that owns every physical frame after bootstrap
//! - Per-process address spaces (regions, page table, stack, heap)
//! - Demand paging with lazy stack and heap growth
//! - Swap to a backing store when physical memory runs out
//! - Translation cache (TLB) management
//!
//! ## Key Principle
//!
//! Hardware is reached only through the [`tern_hal::Machine`] traits and the
//! backing store only through [`swap::BackingStoreProvider`], so the whole
//! subsystem runs unchanged on the simulated machine.
//!
//! Everything is driven through [`Vm`]. One lock (the coremap lock) guards
//! all frame, address-space and swap bookkeeping; each operation takes it
//! once and runs to completion.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod config;
pub mod physical;
pub mod protection;
pub mod swap;
pub mod virtual_memory;

mod vm;

#[cfg(test)]
mod tests;

pub use config::{VictimPolicy, VmConfig};
pub use physical::{FrameDescriptor, FrameState};
pub use protection::ProtectionFlags;
pub use virtual_memory::fault::FaultKind;
pub use virtual_memory::tlb::TlbShootdown;
pub use virtual_memory::{AddressSpaceId, AddressSpaceInfo, PageTableEntry, Residency};
pub use vm::Vm;

use core::fmt;

/// errno reported for a bad user address
pub const EFAULT: i32 = 6;

/// errno reported for an invalid argument
pub const EINVAL: i32 = 8;

/// errno reported when memory runs out
pub const ENOMEM: i32 = 3;

/// Memory subsystem result type
pub type MemResult<T> = Result<T, MemError>;

/// Memory subsystem errors
///
/// These are the recoverable failures. Exhaustion, swap I/O failure and
/// internal inconsistencies panic instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    /// Invalid argument (bad fault code, bad size)
    InvalidArgument,
    /// Address is not valid in the faulting address space
    AccessFault,
    /// Address space id does not name a live address space
    NoSuchAddressSpace,
    /// Out of memory
    OutOfMemory,
}

impl MemError {
    /// Kernel errno value for this error
    pub const fn errno(self) -> i32 {
        match self {
            Self::InvalidArgument | Self::NoSuchAddressSpace => EINVAL,
            Self::AccessFault => EFAULT,
            Self::OutOfMemory => ENOMEM,
        }
    }
}

impl fmt::Display for MemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::AccessFault => write!(f, "bad memory reference"),
            Self::NoSuchAddressSpace => write!(f, "no such address space"),
            Self::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

/// Memory statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmStats {
    /// Frames managed by the coremap
    pub total_frames: usize,
    /// Free frames
    pub free_frames: usize,
    /// Frames holding user pages
    pub dirty_frames: usize,
    /// Frames holding kernel pages (the coremap itself included)
    pub fixed_frames: usize,
    /// Frames stolen before bootstrap
    pub stolen_pages: usize,
    /// Faults handled
    pub faults: u64,
    /// Pages written out to swap
    pub evictions: u64,
    /// Pages read back from swap
    pub swap_ins: u64,
    /// Swap slots currently holding a page
    pub swap_slots_in_use: usize,
    /// Swap capacity in pages (0 until the device is opened)
    pub swap_capacity: usize,
    /// Live address spaces
    pub address_spaces: usize,
}

impl VmStats {
    /// Bytes of physical memory held by user pages
    pub fn user_bytes(&self) -> u64 {
        self.dirty_frames as u64 * tern_hal::PAGE_SIZE
    }
}
