//! # Swap Store
//!
//! Page-sized slots on a backing device. Slot `n` lives at byte offset
//! `n * PAGE_SIZE`. The device is opened once, the first time paging needs
//! it, and stays open.
//!
//! Every failure in here is fatal: a page that cannot be written out or read
//! back cannot be recovered by the faulting process.

pub mod backing;

pub use backing::{
    BackingStore, BackingStoreProvider, MemoryBackingStore, MemoryStoreProvider, StoreError,
};
#[cfg(any(test, feature = "std"))]
pub use backing::{FileBackingStore, FileStoreProvider};

use crate::virtual_memory::tlb;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use tern_hal::ram::PhysicalMemory;
use tern_hal::{Machine, PhysAddr, PAGE_SIZE};

/// Swap slot allocator
///
/// Hands out slots from a counter. Released slots go on a free list that is
/// drained before the counter advances; with reclaiming disabled, released
/// slots are dropped instead.
#[derive(Debug, Clone)]
pub struct SlotAllocator {
    next: usize,
    free: Vec<usize>,
    capacity: usize,
    in_use: usize,
    reclaim: bool,
}

impl SlotAllocator {
    /// Create an allocator over `capacity` slots
    pub fn new(capacity: usize, reclaim: bool) -> Self {
        Self {
            next: 0,
            free: Vec::new(),
            capacity,
            in_use: 0,
            reclaim,
        }
    }

    /// Take a slot
    pub fn allocate(&mut self) -> Option<usize> {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None if self.next < self.capacity => {
                self.next += 1;
                self.next - 1
            }
            None => return None,
        };
        self.in_use += 1;
        Some(slot)
    }

    /// Give a slot back
    pub fn release(&mut self, slot: usize) {
        debug_assert!(slot < self.next, "releasing a slot never handed out");
        self.in_use -= 1;
        if self.reclaim {
            self.free.push(slot);
        }
    }

    /// Slots currently holding a page
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Total slots on the device
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// An open swap device
pub struct SwapStore {
    device: String,
    store: Box<dyn BackingStore>,
    slots: SlotAllocator,
}

impl core::fmt::Debug for SwapStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SwapStore")
            .field("device", &self.device)
            .field("slots", &self.slots)
            .finish()
    }
}

impl SwapStore {
    /// Open `device` through `provider`
    ///
    /// # Panics
    ///
    /// Panics if the device cannot be opened.
    pub fn open(provider: &dyn BackingStoreProvider, device: &str, reclaim: bool) -> Self {
        let store = provider
            .open(device)
            .unwrap_or_else(|err| panic!("vm: cannot open swap device {}: {}", device, err));
        let capacity = (store.size() / PAGE_SIZE) as usize;
        log::info!("vm: swap device {} opened, {} slots", device, capacity);

        Self {
            device: String::from(device),
            store,
            slots: SlotAllocator::new(capacity, reclaim),
        }
    }

    /// Device name
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Total slots on the device
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Slots currently holding a page
    pub fn slots_in_use(&self) -> usize {
        self.slots.in_use()
    }

    /// Take a free slot
    ///
    /// # Panics
    ///
    /// Panics when the device is full.
    pub fn allocate_slot(&mut self) -> usize {
        self.slots
            .allocate()
            .unwrap_or_else(|| panic!("vm: swap device {} is full", self.device))
    }

    /// Give a slot back
    pub fn release_slot(&mut self, slot: usize) {
        self.slots.release(slot);
    }

    /// Write frame `frame` to `slot`, then drop every translation to it
    pub fn write_page<M: Machine>(&mut self, machine: &M, slot: usize, frame: PhysAddr) {
        let mut page = [0u8; PAGE_SIZE as usize];
        machine
            .ram()
            .read(frame, &mut page)
            .unwrap_or_else(|err| panic!("vm: cannot read frame 0x{:x}: {}", frame, err));
        self.store
            .write_at(slot as u64 * PAGE_SIZE, &page)
            .unwrap_or_else(|err| panic!("vm: swap write of slot {} failed: {}", slot, err));
        log::trace!("vm: frame 0x{:x} -> slot {}", frame, slot);

        tlb::invalidate(machine, frame);
    }

    /// Read `slot` into frame `frame`
    pub fn read_page<M: Machine>(&mut self, machine: &M, slot: usize, frame: PhysAddr) {
        let mut page = [0u8; PAGE_SIZE as usize];
        self.store
            .read_at(slot as u64 * PAGE_SIZE, &mut page)
            .unwrap_or_else(|err| panic!("vm: swap read of slot {} failed: {}", slot, err));
        machine
            .ram()
            .write(frame, &page)
            .unwrap_or_else(|err| panic!("vm: cannot write frame 0x{:x}: {}", frame, err));
        log::trace!("vm: slot {} -> frame 0x{:x}", slot, frame);
    }
}
