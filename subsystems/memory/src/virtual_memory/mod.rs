//! # Virtual Memory Management
//!
//! Address spaces, their page tables, the fault handler and the translation
//! cache manager.

pub mod address_space;
pub mod fault;
pub mod tlb;

pub use address_space::AddressSpace;

use crate::protection::ProtectionFlags;
use core::sync::atomic::{AtomicU64, Ordering};
use tern_hal::{PhysAddr, VirtAddr, PAGE_SIZE};

/// Address space identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AddressSpaceId(u64);

impl AddressSpaceId {
    /// Create a new ID
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for AddressSpaceId {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a page's contents currently live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// In a physical frame
    InMemory(PhysAddr),
    /// In a swap slot
    OnDisk(usize),
}

/// Page-table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry {
    /// Page-aligned virtual address
    pub vaddr: VirtAddr,
    /// Current location of the page
    pub residency: Residency,
}

impl PageTableEntry {
    /// A resident entry
    pub fn resident(vaddr: VirtAddr, frame: PhysAddr) -> Self {
        Self {
            vaddr: vaddr.page(),
            residency: Residency::InMemory(frame),
        }
    }

    /// Backing frame, if resident
    pub fn frame(&self) -> Option<PhysAddr> {
        match self.residency {
            Residency::InMemory(frame) => Some(frame),
            Residency::OnDisk(_) => None,
        }
    }

    /// Swap slot, if swapped out
    pub fn slot(&self) -> Option<usize> {
        match self.residency {
            Residency::OnDisk(slot) => Some(slot),
            Residency::InMemory(_) => None,
        }
    }

    /// Check if the page is resident
    pub fn is_resident(&self) -> bool {
        matches!(self.residency, Residency::InMemory(_))
    }
}

/// Virtual memory region
///
/// One program segment as declared by the loader. Immutable once defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Page-aligned start address
    pub base: VirtAddr,
    /// Length in pages
    pub pages: usize,
    /// Declared permissions
    pub protection: ProtectionFlags,
}

impl Region {
    /// Get end address
    pub fn end(&self) -> VirtAddr {
        self.base.add(self.pages as u64 * PAGE_SIZE)
    }

    /// Check if contains address
    pub fn contains(&self, addr: VirtAddr) -> bool {
        addr >= self.base && addr < self.end()
    }
}

/// Snapshot of an address space's layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSpaceInfo {
    /// Address space id
    pub id: AddressSpaceId,
    /// Number of regions
    pub regions: usize,
    /// Number of page-table entries
    pub pages: usize,
    /// Number of resident page-table entries
    pub resident_pages: usize,
    /// Lowest stack page
    pub stack_base: VirtAddr,
    /// First address above the stack
    pub stack_top: VirtAddr,
    /// Start of the heap
    pub heap_start: VirtAddr,
    /// Current break
    pub heap_end: VirtAddr,
    /// Heap pages materialised so far
    pub heap_pages: usize,
}
