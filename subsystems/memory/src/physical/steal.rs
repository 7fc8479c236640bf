//! # Bootstrap Page Stealing
//!
//! Before the coremap exists, kernel pages come straight off the bottom of
//! free RAM. Stolen pages are never given back.

use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;
use tern_hal::ram::PhysicalMemory;
use tern_hal::PhysAddr;

/// Early-boot page allocator
#[derive(Debug, Default)]
pub struct StealAllocator {
    /// Serialises steals
    lock: Mutex<()>,
    /// Pages handed out so far
    stolen: AtomicUsize,
}

impl StealAllocator {
    /// Create a new steal allocator
    pub const fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            stolen: AtomicUsize::new(0),
        }
    }

    /// Steal `npages` contiguous pages
    pub fn steal<R: PhysicalMemory + ?Sized>(&self, ram: &R, npages: usize) -> Option<PhysAddr> {
        let _guard = self.lock.lock();
        let paddr = ram.steal(npages)?;
        self.stolen.fetch_add(npages, Ordering::Relaxed);
        log::trace!("vm: stole {} page(s) at 0x{:x}", npages, paddr);
        Some(paddr)
    }

    /// Pages stolen so far
    pub fn stolen(&self) -> usize {
        self.stolen.load(Ordering::Relaxed)
    }
}
