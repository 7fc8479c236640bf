//! # Simulated Machine
//!
//! A host implementation of every HAL trait: byte-array RAM, a software TLB
//! and an interrupt priority register. The memory subsystem runs unchanged
//! on top of it.

use crate::interrupts::{InterruptControl, Spl};
use crate::mmu::{TlbEntry, TranslationCache};
use crate::ram::PhysicalMemory;
use crate::{HalError, HalResult, Machine, PhysAddr, PAGE_SIZE};
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use spin::Mutex;

/// Number of TLB slots on the simulated processor
pub const NUM_TLB: usize = 64;

/// Simulated machine configuration
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Bytes of physical RAM
    pub ram_size: u64,
    /// Bytes at the bottom of RAM occupied by the kernel image
    pub kernel_reserved: u64,
    /// Number of TLB slots
    pub tlb_slots: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            ram_size: 512 * 1024,
            kernel_reserved: 16 * PAGE_SIZE,
            tlb_slots: NUM_TLB,
        }
    }
}

impl SimConfig {
    /// Configuration with `frames` usable frames after the kernel image
    pub fn with_frames(frames: u64) -> Self {
        let kernel_reserved = 4 * PAGE_SIZE;
        Self {
            ram_size: kernel_reserved + frames * PAGE_SIZE,
            kernel_reserved,
            tlb_slots: NUM_TLB,
        }
    }

    /// Check if configuration is valid
    pub fn is_valid(&self) -> bool {
        self.ram_size % PAGE_SIZE == 0
            && self.kernel_reserved % PAGE_SIZE == 0
            && self.kernel_reserved < self.ram_size
            && self.tlb_slots > 0
    }
}

/// Simulated single-CPU machine
pub struct SimMachine {
    ram: SimRam,
    tlb: SoftTlb,
    interrupts: SoftInterrupts,
}

impl SimMachine {
    /// Create a new simulated machine
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid.
    pub fn new(config: SimConfig) -> Self {
        assert!(config.is_valid(), "invalid simulated machine configuration");
        log::info!(
            "sim: {} KiB RAM, {} KiB kernel image, {} TLB slots",
            config.ram_size / 1024,
            config.kernel_reserved / 1024,
            config.tlb_slots
        );
        Self {
            ram: SimRam::new(config.ram_size, config.kernel_reserved),
            tlb: SoftTlb::new(config.tlb_slots),
            interrupts: SoftInterrupts::new(),
        }
    }
}

impl Default for SimMachine {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl core::fmt::Debug for SimMachine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimMachine")
            .field("ram_size", &self.ram.size)
            .field("tlb_slots", &self.tlb.slot_count())
            .finish()
    }
}

impl Machine for SimMachine {
    type Ram = SimRam;
    type Tlb = SoftTlb;
    type Interrupts = SoftInterrupts;

    fn ram(&self) -> &Self::Ram {
        &self.ram
    }

    fn tlb(&self) -> &Self::Tlb {
        &self.tlb
    }

    fn interrupts(&self) -> &Self::Interrupts {
        &self.interrupts
    }
}

// =============================================================================
// RAM
// =============================================================================

/// Byte-array physical memory
#[derive(Debug)]
pub struct SimRam {
    bytes: Mutex<Vec<u8>>,
    size: u64,
    first_free: AtomicU64,
}

impl SimRam {
    fn new(size: u64, kernel_reserved: u64) -> Self {
        Self {
            bytes: Mutex::new(vec![0u8; size as usize]),
            size,
            first_free: AtomicU64::new(kernel_reserved),
        }
    }

    fn range(&self, paddr: PhysAddr, len: usize) -> HalResult<core::ops::Range<usize>> {
        let start = paddr.as_u64();
        let end = start
            .checked_add(len as u64)
            .ok_or(HalError::InvalidAddress)?;
        if end > self.size {
            return Err(HalError::InvalidAddress);
        }
        Ok(start as usize..end as usize)
    }
}

impl PhysicalMemory for SimRam {
    fn getsize(&self) -> (PhysAddr, PhysAddr) {
        (
            PhysAddr::new(self.first_free.load(Ordering::SeqCst)),
            PhysAddr::new(self.size),
        )
    }

    fn steal(&self, npages: usize) -> Option<PhysAddr> {
        let bytes = npages as u64 * PAGE_SIZE;
        let mut current = self.first_free.load(Ordering::SeqCst);
        loop {
            if current + bytes > self.size {
                return None;
            }
            match self.first_free.compare_exchange(
                current,
                current + bytes,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Some(PhysAddr::new(current)),
                Err(actual) => current = actual,
            }
        }
    }

    fn zero(&self, paddr: PhysAddr, len: usize) -> HalResult<()> {
        let range = self.range(paddr, len)?;
        self.bytes.lock()[range].fill(0);
        Ok(())
    }

    fn read(&self, paddr: PhysAddr, dest: &mut [u8]) -> HalResult<()> {
        let range = self.range(paddr, dest.len())?;
        dest.copy_from_slice(&self.bytes.lock()[range]);
        Ok(())
    }

    fn write(&self, paddr: PhysAddr, src: &[u8]) -> HalResult<()> {
        let range = self.range(paddr, src.len())?;
        self.bytes.lock()[range].copy_from_slice(src);
        Ok(())
    }

    fn copy(&self, src: PhysAddr, dst: PhysAddr, len: usize) -> HalResult<()> {
        let from = self.range(src, len)?;
        let to = self.range(dst, len)?;
        self.bytes.lock().copy_within(from, to.start);
        Ok(())
    }
}

// =============================================================================
// TLB
// =============================================================================

/// Software TLB with a MIPS-style Random register
#[derive(Debug)]
pub struct SoftTlb {
    slots: Mutex<Vec<TlbEntry>>,
    random: AtomicUsize,
    writes: AtomicU64,
}

impl SoftTlb {
    fn new(count: usize) -> Self {
        Self {
            slots: Mutex::new((0..count).map(TlbEntry::invalid).collect()),
            random: AtomicUsize::new(count - 1),
            writes: AtomicU64::new(0),
        }
    }

    /// Total number of slot writes performed so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Number of currently valid slots
    pub fn valid_count(&self) -> usize {
        self.slots.lock().iter().filter(|e| e.is_valid()).count()
    }
}

impl TranslationCache for SoftTlb {
    fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }

    fn read(&self, slot: usize) -> TlbEntry {
        self.slots.lock()[slot]
    }

    fn write(&self, slot: usize, entry: TlbEntry) {
        self.slots.lock()[slot] = entry;
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn write_random(&self, entry: TlbEntry) -> usize {
        let count = self.slot_count();
        // The Random register counts down and wraps, like the hardware one
        let slot = self
            .random
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |r| {
                Some(if r == 0 { count - 1 } else { r - 1 })
            })
            .unwrap_or(0)
            % count;
        self.write(slot, entry);
        slot
    }
}

// =============================================================================
// Interrupts
// =============================================================================

/// Interrupt priority register
#[derive(Debug)]
pub struct SoftInterrupts {
    level: AtomicU8,
    raises: AtomicU64,
}

impl SoftInterrupts {
    fn new() -> Self {
        Self {
            level: AtomicU8::new(Spl::LOW.0),
            raises: AtomicU64::new(0),
        }
    }

    /// Number of times the level has been raised to high
    pub fn raise_count(&self) -> u64 {
        self.raises.load(Ordering::Relaxed)
    }
}

impl InterruptControl for SoftInterrupts {
    fn current(&self) -> Spl {
        Spl(self.level.load(Ordering::SeqCst))
    }

    fn splhigh(&self) -> Spl {
        self.raises.fetch_add(1, Ordering::Relaxed);
        Spl(self.level.swap(Spl::HIGH.0, Ordering::SeqCst))
    }

    fn splx(&self, old: Spl) {
        self.level.store(old.0, Ordering::SeqCst);
    }
}
