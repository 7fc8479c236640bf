//! # Translation Cache Abstraction
//!
//! This module defines the software-refilled TLB the kernel programs on every
//! translation miss.

use crate::{PhysAddr, VirtAddr, KSEG0, PAGE_FRAME, PAGE_SIZE};
use bitflags::bitflags;

bitflags! {
    /// Flags carried in the low word of a TLB entry
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryLo: u64 {
        /// Entry is valid
        const VALID = 1 << 9;
        /// Page is writable ("dirty" in MIPS terms)
        const DIRTY = 1 << 10;
    }
}

/// One translation cache slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    /// Virtual page number portion (page-aligned virtual address)
    pub hi: VirtAddr,
    /// Physical frame portion ORed with [`EntryLo`] flags
    pub lo: u64,
}

impl TlbEntry {
    /// Create a valid entry mapping `vaddr`'s page to `paddr`'s frame
    pub const fn new(vaddr: VirtAddr, paddr: PhysAddr, flags: EntryLo) -> Self {
        Self {
            hi: vaddr.page(),
            lo: (paddr.as_u64() & PAGE_FRAME) | flags.bits(),
        }
    }

    /// The canonical invalid entry for `slot`
    ///
    /// Each slot gets a distinct kernel-segment page so that no two slots
    /// ever hold the same virtual page.
    pub const fn invalid(slot: usize) -> Self {
        Self {
            hi: VirtAddr::new(KSEG0 + slot as u64 * PAGE_SIZE),
            lo: 0,
        }
    }

    /// Physical frame this entry points at
    #[inline]
    pub const fn frame(&self) -> PhysAddr {
        PhysAddr::new(self.lo & PAGE_FRAME)
    }

    /// Flags of this entry
    #[inline]
    pub const fn flags(&self) -> EntryLo {
        EntryLo::from_bits_truncate(self.lo)
    }

    /// Check if the entry is valid
    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.lo & EntryLo::VALID.bits() != 0
    }
}

/// Translation cache abstraction trait
///
/// Slot numbers run from `0` to `slot_count() - 1`. Callers are expected to
/// hold interrupts at high priority while calling any of the writers.
pub trait TranslationCache: Send + Sync {
    /// Number of hardware slots
    fn slot_count(&self) -> usize;

    /// Read one slot
    fn read(&self, slot: usize) -> TlbEntry;

    /// Overwrite one slot
    fn write(&self, slot: usize, entry: TlbEntry);

    /// Write `entry` into a hardware-chosen slot
    ///
    /// Returns the slot that was written.
    fn write_random(&self, entry: TlbEntry) -> usize;

    /// Find the slot holding a valid mapping for `vaddr`'s page
    fn probe(&self, vaddr: VirtAddr) -> Option<usize> {
        let page = vaddr.page();
        (0..self.slot_count()).find(|&slot| {
            let entry = self.read(slot);
            entry.is_valid() && entry.hi == page
        })
    }
}
