//! # Page Fault Handling
//!
//! A TLB miss lands here. The faulting page is resolved in this order:
//!
//! 1. the page already has an entry: swap it in if needed
//! 2. the address is inside a region: map a fresh zeroed page
//! 3. the address is the page just below the stack: grow the stack
//! 4. the address is inside the heap: materialise heap pages up to it
//! 5. anything else is a bad reference
//!
//! The resolved translation is then installed writable, but only when the
//! faulting address space is the running one: the TLB carries no
//! address-space tag.

use super::{tlb, AddressSpaceId, PageTableEntry};
use crate::vm::{Vm, VmState};
use crate::{MemError, MemResult};
use tern_hal::{Machine, PhysAddr, VirtAddr, PAGE_SIZE};

/// Kind of access that faulted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Read of an unmapped page
    Read,
    /// Write to an unmapped page
    Write,
    /// Write to a page mapped read-only
    ReadOnly,
}

impl FaultKind {
    /// Decode the trap handler's fault code
    pub fn from_raw(code: u32) -> MemResult<Self> {
        match code {
            0 => Ok(Self::Read),
            1 => Ok(Self::Write),
            2 => Ok(Self::ReadOnly),
            _ => Err(MemError::InvalidArgument),
        }
    }

    /// The trap handler's fault code
    pub const fn as_raw(self) -> u32 {
        match self {
            Self::Read => 0,
            Self::Write => 1,
            Self::ReadOnly => 2,
        }
    }
}

impl<M: Machine> Vm<M> {
    /// Handle a fault in the current address space
    ///
    /// # Panics
    ///
    /// Panics on a read-only fault; every page is installed writable so one
    /// can only come from a kernel bug.
    pub fn vm_fault(&self, fault_type: u32, fault_address: VirtAddr) -> MemResult<()> {
        let kind = FaultKind::from_raw(fault_type).map_err(|err| {
            log::warn!("vm: unknown fault type {} at 0x{:x}", fault_type, fault_address);
            err
        })?;
        let id = self.current().ok_or(MemError::AccessFault)?;
        self.handle_fault(id, kind, fault_address)
    }

    /// Handle a fault in address space `id`
    ///
    /// The page is resolved in any address space; the TLB is only loaded
    /// when `id` is current.
    pub fn handle_fault(
        &self,
        id: AddressSpaceId,
        kind: FaultKind,
        fault_address: VirtAddr,
    ) -> MemResult<()> {
        log::debug!("vm: fault: 0x{:x} ({:?})", fault_address, kind);
        if kind == FaultKind::ReadOnly {
            panic!("vm: got read-only fault at 0x{:x}", fault_address);
        }

        let mut state = self.state.lock();
        if state.coremap.is_none() {
            panic!("vm: fault at 0x{:x} before bootstrap", fault_address);
        }
        if !state.spaces.contains_key(&id) {
            return Err(MemError::NoSuchAddressSpace);
        }
        state.counters.faults += 1;
        // The swap device is opened on the first fault
        self.swap_store(&mut state);

        let page = fault_address.page();
        let frame = self.resolve(&mut state, id, fault_address)?;

        if state.current == Some(id) {
            tlb::install(&self.machine, page, frame, true);
        } else {
            log::trace!("vm: address space {} not current, tlb untouched", id.as_u64());
        }
        let now = state.counters.faults;
        let coremap = Self::coremap(&mut state);
        if let Some(idx) = coremap.index_of(frame) {
            coremap.touch(idx, now);
        }
        log::debug!("vm: 0x{:x} -> 0x{:x}", page, frame);
        Ok(())
    }

    fn resolve(
        &self,
        state: &mut VmState,
        id: AddressSpaceId,
        fault_address: VirtAddr,
    ) -> MemResult<PhysAddr> {
        let page = fault_address.page();
        let space = state
            .spaces
            .get(&id)
            .ok_or(MemError::NoSuchAddressSpace)?;

        if space.entry(page).is_some() {
            return Ok(self.make_resident(state, id, page));
        }

        if space.region_at(fault_address).is_some() {
            return Ok(self.map_new_page(state, id, page));
        }

        if space.is_below_stack(fault_address) {
            if !space.can_grow_stack(self.config.max_stack_pages) {
                log::warn!(
                    "vm: refusing to grow stack of address space {} to 0x{:x}",
                    id.as_u64(),
                    page
                );
                return Err(MemError::AccessFault);
            }
            let frame = self.map_new_page(state, id, page);
            if let Some(space) = state.spaces.get_mut(&id) {
                space.grow_stack();
            }
            return Ok(frame);
        }

        if space.in_heap(fault_address) {
            return Ok(self.grow_heap(state, id, fault_address));
        }

        log::warn!(
            "vm: bad reference to 0x{:x} in address space {}",
            fault_address,
            id.as_u64()
        );
        Err(MemError::AccessFault)
    }

    /// Materialise every heap page up to and including `fault_address`'s
    fn grow_heap(&self, state: &mut VmState, id: AddressSpaceId, fault_address: VirtAddr) -> PhysAddr {
        let page = fault_address.page();
        let (heap_start, current, target) = match state.spaces.get(&id) {
            Some(space) => (
                space.heap_start(),
                space.heap_pages(),
                space.heap_pages_to(fault_address),
            ),
            None => panic!("vm: address space {} vanished", id.as_u64()),
        };

        for n in current..target {
            let heap_page = heap_start.add(n as u64 * PAGE_SIZE);
            let mapped = state
                .spaces
                .get(&id)
                .is_some_and(|space| space.entry(heap_page).is_some());
            if !mapped {
                self.map_new_page(state, id, heap_page);
            }
        }
        if let Some(space) = state.spaces.get_mut(&id) {
            space.set_heap_pages(target);
        }
        log::trace!(
            "vm: heap of address space {} now {} pages",
            id.as_u64(),
            current.max(target)
        );

        // Earlier pages of a long run may have pushed this one out already
        let mapped = state
            .spaces
            .get(&id)
            .is_some_and(|space| space.entry(page).is_some());
        if mapped {
            self.make_resident(state, id, page)
        } else {
            self.map_new_page(state, id, page)
        }
    }

    /// Give `page` a fresh zeroed frame and a resident entry
    pub(crate) fn map_new_page(&self, state: &mut VmState, id: AddressSpaceId, page: VirtAddr) -> PhysAddr {
        let frame = self.allocate_user_frame(state, Some(id), page);
        match state.spaces.get_mut(&id) {
            Some(space) => space.insert_entry(PageTableEntry::resident(page, frame)),
            None => panic!("vm: address space {} vanished", id.as_u64()),
        }
        frame
    }
}
