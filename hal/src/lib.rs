//! # Tern HAL - Hardware Abstraction Layer
//!
//! This crate defines the hardware primitives the virtual memory subsystem
//! is built on: physical RAM, the software-refilled translation cache (TLB)
//! and interrupt priority levels.
//!
//! ## Design Philosophy
//!
//! The HAL models a single-CPU machine with a MIPS-style memory layout:
//! - **Direct-mapped kernel segment**: physical memory is reachable at
//!   `KSEG0 + paddr` without any translation
//! - **Software-managed TLB**: every translation miss traps into the kernel,
//!   which programs a TLB slot itself
//! - **Priority levels**: the kernel raises the interrupt priority level while
//!   it reprograms the TLB
//!
//! A simulated machine ([`sim::SimMachine`]) implements every trait so the
//! memory subsystem can run and be tested on a host.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod interrupts;
pub mod mmu;
pub mod ram;
pub mod sim;

use core::fmt;
use static_assertions::const_assert;

/// Size of a page (and of a physical frame) in bytes
pub const PAGE_SIZE: u64 = 4096;

/// Mask selecting the page-frame portion of an address
pub const PAGE_FRAME: u64 = !(PAGE_SIZE - 1);

/// Base of the direct-mapped kernel segment
pub const KSEG0: u64 = 0x8000_0000;

/// Top of every user stack (the first address above user space)
pub const USERSTACK: u64 = KSEG0;

const_assert!(PAGE_SIZE.is_power_of_two());
const_assert!(KSEG0 % PAGE_SIZE == 0);

/// Result type for HAL operations
pub type HalResult<T> = Result<T, HalError>;

/// Errors that can occur in HAL operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// Address is invalid or outside physical memory
    InvalidAddress,
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAddress => write!(f, "invalid physical address"),
        }
    }
}

/// The machine trait that platform implementations must provide
///
/// This trait aggregates all sub-traits the virtual memory subsystem needs.
pub trait Machine: Send + Sync + 'static {
    /// The physical RAM type
    type Ram: ram::PhysicalMemory;

    /// The translation cache type
    type Tlb: mmu::TranslationCache;

    /// The interrupt priority control type
    type Interrupts: interrupts::InterruptControl;

    /// Get the physical RAM
    fn ram(&self) -> &Self::Ram;

    /// Get the translation cache
    fn tlb(&self) -> &Self::Tlb;

    /// Get the interrupt priority control
    fn interrupts(&self) -> &Self::Interrupts;
}

/// Convert a physical address into its direct-mapped kernel virtual address
#[inline]
pub const fn paddr_to_kvaddr(paddr: PhysAddr) -> VirtAddr {
    VirtAddr::new(paddr.as_u64() + KSEG0)
}

/// Convert a direct-mapped kernel virtual address back into a physical address
#[inline]
pub const fn kvaddr_to_paddr(vaddr: VirtAddr) -> PhysAddr {
    PhysAddr::new(vaddr.as_u64() - KSEG0)
}

/// Physical address type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysAddr(u64);

impl PhysAddr {
    /// Create a new physical address
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Get the raw address value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Check if the address is aligned to the given alignment
    #[inline]
    pub const fn is_aligned(self, align: u64) -> bool {
        self.0 % align == 0
    }

    /// Align the address up to the given alignment
    #[inline]
    pub const fn align_up(self, align: u64) -> Self {
        Self((self.0 + align - 1) & !(align - 1))
    }

    /// Add an offset to the address
    #[inline]
    pub const fn add(self, offset: u64) -> Self {
        Self(self.0 + offset)
    }

    /// Subtract an offset from the address
    #[inline]
    pub const fn sub(self, offset: u64) -> Self {
        Self(self.0 - offset)
    }

    /// Offset of the address within its frame
    #[inline]
    pub const fn page_offset(self) -> u64 {
        self.0 & !PAGE_FRAME
    }
}

impl fmt::LowerHex for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Virtual address type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtAddr(u64);

impl VirtAddr {
    /// Create a new virtual address
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Get the raw address value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Check if the address is aligned to the given alignment
    #[inline]
    pub const fn is_aligned(self, align: u64) -> bool {
        self.0 % align == 0
    }

    /// Align the address up to the given alignment
    #[inline]
    pub const fn align_up(self, align: u64) -> Self {
        Self((self.0 + align - 1) & !(align - 1))
    }

    /// Add an offset to the address
    #[inline]
    pub const fn add(self, offset: u64) -> Self {
        Self(self.0 + offset)
    }

    /// Subtract an offset from the address
    #[inline]
    pub const fn sub(self, offset: u64) -> Self {
        Self(self.0 - offset)
    }

    /// The page containing this address
    #[inline]
    pub const fn page(self) -> Self {
        Self(self.0 & PAGE_FRAME)
    }

    /// Offset of the address within its page
    #[inline]
    pub const fn page_offset(self) -> u64 {
        self.0 & !PAGE_FRAME
    }
}

impl fmt::LowerHex for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}
