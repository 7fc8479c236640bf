//! # Translation Cache Management
//!
//! Every write to the TLB happens with interrupts raised to high priority.

use crate::vm::Vm;
use tern_hal::interrupts::SplGuard;
use tern_hal::mmu::{EntryLo, TlbEntry, TranslationCache};
use tern_hal::{Machine, PhysAddr, VirtAddr, PAGE_FRAME};

/// Cross-CPU invalidation request
///
/// Only ever produced on multiprocessors; this kernel runs on one CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbShootdown {
    /// Frame whose translations must go
    pub frame: PhysAddr,
}

/// Drop every translation to `frame`
pub fn invalidate<M: Machine>(machine: &M, frame: PhysAddr) {
    let tlb = machine.tlb();
    let frame = PhysAddr::new(frame.as_u64() & PAGE_FRAME);
    let _spl = SplGuard::raise(machine.interrupts());

    for slot in 0..tlb.slot_count() {
        let entry = tlb.read(slot);
        if entry.is_valid() && entry.frame() == frame {
            tlb.write(slot, TlbEntry::invalid(slot));
            log::trace!("vm: tlb slot {} dropped (frame 0x{:x})", slot, frame);
        }
    }
}

/// Drop every translation
pub fn invalidate_all<M: Machine>(machine: &M) {
    let tlb = machine.tlb();
    let _spl = SplGuard::raise(machine.interrupts());

    for slot in 0..tlb.slot_count() {
        tlb.write(slot, TlbEntry::invalid(slot));
    }
}

/// Map `vaddr`'s page to `frame`
///
/// A slot already caching the page is overwritten in place so no page is
/// ever cached twice; otherwise the hardware picks the slot. Returns the
/// slot written.
pub fn install<M: Machine>(machine: &M, vaddr: VirtAddr, frame: PhysAddr, writable: bool) -> usize {
    let tlb = machine.tlb();
    let mut flags = EntryLo::VALID;
    if writable {
        flags |= EntryLo::DIRTY;
    }
    let entry = TlbEntry::new(vaddr, frame, flags);

    let _spl = SplGuard::raise(machine.interrupts());
    let slot = match tlb.probe(vaddr) {
        Some(slot) => {
            tlb.write(slot, entry);
            slot
        }
        None => tlb.write_random(entry),
    };
    log::trace!("vm: tlb slot {}: 0x{:x} -> 0x{:x}", slot, vaddr.page(), frame);
    slot
}

impl<M: Machine> Vm<M> {
    /// Flush every CPU's TLB
    ///
    /// # Panics
    ///
    /// Always; there is no other CPU to send the request to.
    pub fn vm_tlbshootdown_all(&self) -> ! {
        panic!("vm: tried to do tlb shootdown on a single-CPU system");
    }

    /// Flush one translation on every CPU
    ///
    /// # Panics
    ///
    /// Always; there is no other CPU to send the request to.
    pub fn vm_tlbshootdown(&self, shootdown: &TlbShootdown) -> ! {
        panic!(
            "vm: tried to do tlb shootdown of frame 0x{:x} on a single-CPU system",
            shootdown.frame
        );
    }
}
