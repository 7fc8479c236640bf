//! # VM Core
//!
//! [`Vm`] ties the coremap, the address-space arena, the swap store and the
//! eviction policy together behind the coremap lock.

use crate::config::VmConfig;
use crate::physical::eviction::{selector_for, VictimSelector};
use crate::physical::steal::StealAllocator;
use crate::physical::{Coremap, FrameDescriptor, FrameState};
use crate::swap::{BackingStoreProvider, SwapStore};
use crate::virtual_memory::{tlb, AddressSpace, AddressSpaceId, PageTableEntry, Residency};
use crate::{MemError, MemResult, VmStats};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;
use tern_hal::ram::PhysicalMemory;
use tern_hal::{kvaddr_to_paddr, paddr_to_kvaddr, Machine, PhysAddr, VirtAddr, KSEG0, PAGE_SIZE};

/// Event counters
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    pub(crate) faults: u64,
    pub(crate) evictions: u64,
    pub(crate) swap_ins: u64,
}

/// Everything guarded by the coremap lock
pub(crate) struct VmState {
    /// `None` until bootstrap
    pub(crate) coremap: Option<Coremap>,
    /// Address-space arena
    pub(crate) spaces: BTreeMap<AddressSpaceId, AddressSpace>,
    /// `None` until the device is first needed
    pub(crate) swap: Option<SwapStore>,
    pub(crate) victims: Box<dyn VictimSelector>,
    /// Address space of the running thread
    pub(crate) current: Option<AddressSpaceId>,
    pub(crate) counters: Counters,
}

/// The virtual memory subsystem
pub struct Vm<M: Machine> {
    pub(crate) machine: M,
    pub(crate) config: VmConfig,
    provider: Box<dyn BackingStoreProvider>,
    steal: StealAllocator,
    bootstrapped: AtomicBool,
    pub(crate) state: Mutex<VmState>,
}

impl<M: Machine> Vm<M> {
    /// Create the subsystem on `machine`
    ///
    /// Until [`Vm::bootstrap`] runs, kernel pages are stolen straight from
    /// RAM and nothing else works.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid.
    pub fn new(machine: M, config: VmConfig, provider: Box<dyn BackingStoreProvider>) -> Self {
        assert!(config.is_valid(), "vm: invalid configuration");
        let victims = selector_for(&config);
        log::debug!("vm: using {} eviction", victims.name());

        Self {
            machine,
            config,
            provider,
            steal: StealAllocator::new(),
            bootstrapped: AtomicBool::new(false),
            state: Mutex::new(VmState {
                coremap: None,
                spaces: BTreeMap::new(),
                swap: None,
                victims,
                current: None,
                counters: Counters::default(),
            }),
        }
    }

    /// Get the machine
    pub fn machine(&self) -> &M {
        &self.machine
    }

    /// Get the configuration
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Take over every frame not stolen so far
    pub fn bootstrap(&self) {
        let mut state = self.state.lock();
        if state.coremap.is_some() {
            log::warn!("vm: bootstrap called twice");
            return;
        }

        let (first, last) = self.machine.ram().getsize();
        let coremap = Coremap::new(first, last);
        log::info!(
            "vm: coremap at 0x{:x}: {} frames, {} reserved, {} stolen before bootstrap",
            coremap.base(),
            coremap.frame_count(),
            coremap.reserved_frames(),
            self.steal.stolen()
        );

        state.coremap = Some(coremap);
        self.bootstrapped.store(true, Ordering::Release);
    }

    /// Check if [`Vm::bootstrap`] has run
    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped.load(Ordering::Acquire)
    }

    // =========================================================================
    // Kernel pages
    // =========================================================================

    /// Allocate `npages` contiguous zeroed kernel pages
    ///
    /// Returns the kernel virtual address of the first page.
    ///
    /// # Panics
    ///
    /// Panics after bootstrap if no run of free frames is long enough and
    /// eviction cannot help.
    pub fn alloc_kpages(&self, npages: usize) -> MemResult<VirtAddr> {
        if npages == 0 {
            return Err(MemError::InvalidArgument);
        }

        if !self.is_bootstrapped() {
            let paddr = self
                .steal
                .steal(self.machine.ram(), npages)
                .ok_or(MemError::OutOfMemory)?;
            return Ok(paddr_to_kvaddr(paddr));
        }

        let mut state = self.state.lock();
        let run = Self::coremap(&mut state).find_run(npages);
        let start = match run {
            Some(start) => start,
            // Only a single page can be made by evicting
            None if npages == 1 => self.evict(&mut state),
            None => panic!("vm: no run of {} free frames for the kernel", npages),
        };

        let coremap = Self::coremap(&mut state);
        coremap.assign_kernel(start, npages);
        let paddr = coremap.address_of(start);
        self.zero(paddr, npages);
        log::trace!("vm: kernel pages 0x{:x}+{}", paddr, npages);
        Ok(paddr_to_kvaddr(paddr))
    }

    /// Free a run returned by [`Vm::alloc_kpages`]
    ///
    /// Pages stolen before bootstrap, and addresses inside a run, are
    /// ignored.
    pub fn free_kpages(&self, kvaddr: VirtAddr) {
        if !self.is_bootstrapped() || kvaddr.as_u64() < KSEG0 {
            log::trace!("vm: leaking kernel page 0x{:x}", kvaddr);
            return;
        }
        let paddr = kvaddr_to_paddr(kvaddr);

        let mut state = self.state.lock();
        let coremap = Self::coremap(&mut state);
        let freed = match coremap.index_of(paddr) {
            Some(idx) => coremap.release_run(idx),
            None => 0,
        };
        if freed == 0 {
            log::warn!("vm: free_kpages(0x{:x}) does not start a run", kvaddr);
        } else {
            log::trace!("vm: freed kernel pages 0x{:x}+{}", paddr, freed);
        }
    }

    // =========================================================================
    // User pages
    // =========================================================================

    /// Allocate a zeroed frame for `owner`'s page at `vaddr`
    ///
    /// Evicts another user page when no frame is free. A frame given an
    /// owner becomes an eviction candidate, so the owner's page table must
    /// map `vaddr` to it before the next allocation.
    pub fn alloc_upage(&self, owner: Option<AddressSpaceId>, vaddr: VirtAddr) -> PhysAddr {
        let mut state = self.state.lock();
        self.allocate_user_frame(&mut state, owner, vaddr)
    }

    /// Free a frame returned by [`Vm::alloc_upage`]
    ///
    /// # Panics
    ///
    /// Panics if `paddr` is not a user frame in use.
    pub fn free_upage(&self, paddr: PhysAddr) {
        let mut state = self.state.lock();
        self.release_user_frame(&mut state, paddr);
    }

    pub(crate) fn allocate_user_frame(
        &self,
        state: &mut VmState,
        owner: Option<AddressSpaceId>,
        vaddr: VirtAddr,
    ) -> PhysAddr {
        let free = Self::coremap(state).find_free();
        let idx = match free {
            Some(idx) => idx,
            None => self.evict(state),
        };

        let coremap = Self::coremap(state);
        coremap.assign_user(idx, owner, vaddr);
        let paddr = coremap.address_of(idx);
        self.zero(paddr, 1);
        log::trace!("vm: user frame 0x{:x} for 0x{:x}", paddr, vaddr.page());
        paddr
    }

    pub(crate) fn release_user_frame(&self, state: &mut VmState, paddr: PhysAddr) {
        let coremap = Self::coremap(state);
        let idx = coremap
            .index_of(paddr)
            .unwrap_or_else(|| panic!("vm: could not free frame 0x{:x}", paddr));
        if coremap.descriptor(idx).state == FrameState::Fixed {
            panic!("vm: frame 0x{:x} belongs to the kernel", paddr);
        }
        coremap.release(idx);
        tlb::invalidate(&self.machine, paddr);
    }

    /// Write a victim out to swap and hand back its frame index
    ///
    /// The victim's entry goes on disk. The frame keeps its old descriptor
    /// until the caller reassigns it.
    fn evict(&self, state: &mut VmState) -> usize {
        let VmState {
            coremap,
            spaces,
            swap,
            victims,
            counters,
            ..
        } = state;
        let coremap = coremap
            .as_mut()
            .unwrap_or_else(|| panic!("vm: coremap used before bootstrap"));

        let idx = victims
            .select(coremap.frames_mut())
            .unwrap_or_else(|| panic!("vm: out of memory, no page to evict"));
        let victim = *coremap.descriptor(idx);
        let frame = coremap.address_of(idx);
        let owner = victim
            .owner
            .unwrap_or_else(|| panic!("vm: victim frame 0x{:x} has no owner", frame));

        let entry = spaces
            .get_mut(&owner)
            .and_then(|space| space.entry_mut(victim.vaddr))
            .filter(|entry| entry.frame() == Some(frame))
            .unwrap_or_else(|| panic!("vm: victim frame 0x{:x} has no page-table entry", frame));

        let swap = swap.get_or_insert_with(|| self.open_swap());
        let slot = swap.allocate_slot();
        swap.write_page(&self.machine, slot, frame);
        entry.residency = Residency::OnDisk(slot);
        counters.evictions += 1;

        log::debug!(
            "vm: evicted 0x{:x} of address space {} from 0x{:x} to slot {}",
            victim.vaddr,
            owner.as_u64(),
            frame,
            slot
        );
        idx
    }

    /// Bring `page` of `id` back into memory if it is on disk
    pub(crate) fn make_resident(&self, state: &mut VmState, id: AddressSpaceId, page: VirtAddr) -> PhysAddr {
        let entry = state
            .spaces
            .get(&id)
            .and_then(|space| space.entry(page))
            .copied()
            .unwrap_or_else(|| panic!("vm: no entry for 0x{:x}", page));
        let slot = match entry.residency {
            Residency::InMemory(frame) => return frame,
            Residency::OnDisk(slot) => slot,
        };

        let frame = self.allocate_user_frame(state, Some(id), page);
        let swap = self.swap_store(state);
        swap.read_page(&self.machine, slot, frame);
        swap.release_slot(slot);
        if let Some(entry) = state.spaces.get_mut(&id).and_then(|space| space.entry_mut(page)) {
            entry.residency = Residency::InMemory(frame);
        }
        state.counters.swap_ins += 1;
        log::debug!("vm: swapped 0x{:x} in from slot {} to 0x{:x}", page, slot, frame);
        frame
    }

    /// The swap store, opened on first use
    pub(crate) fn swap_store<'s>(&self, state: &'s mut VmState) -> &'s mut SwapStore {
        state.swap.get_or_insert_with(|| self.open_swap())
    }

    fn open_swap(&self) -> SwapStore {
        SwapStore::open(
            &*self.provider,
            &self.config.swap_device,
            self.config.reclaim_swap_slots,
        )
    }

    pub(crate) fn coremap(state: &mut VmState) -> &mut Coremap {
        state
            .coremap
            .as_mut()
            .unwrap_or_else(|| panic!("vm: coremap used before bootstrap"))
    }

    fn zero(&self, paddr: PhysAddr, npages: usize) {
        self.machine
            .ram()
            .zero(paddr, npages * PAGE_SIZE as usize)
            .unwrap_or_else(|err| panic!("vm: cannot zero 0x{:x}: {}", paddr, err));
    }

    // =========================================================================
    // Current address space
    // =========================================================================

    /// Record the running thread's address space
    pub fn set_current(&self, id: Option<AddressSpaceId>) {
        self.state.lock().current = id;
    }

    /// The running thread's address space
    pub fn current(&self) -> Option<AddressSpaceId> {
        self.state.lock().current
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// State of the frame holding `paddr`
    pub fn frame_state(&self, paddr: PhysAddr) -> Option<FrameState> {
        self.frame(paddr).map(|frame| frame.state)
    }

    /// Descriptor of the frame holding `paddr`
    pub fn frame(&self, paddr: PhysAddr) -> Option<FrameDescriptor> {
        let state = self.state.lock();
        let coremap = state.coremap.as_ref()?;
        coremap.index_of(paddr).map(|idx| *coremap.descriptor(idx))
    }

    /// Page-table entry for `vaddr`'s page in `id`
    pub fn page_entry(&self, id: AddressSpaceId, vaddr: VirtAddr) -> Option<PageTableEntry> {
        self.state
            .lock()
            .spaces
            .get(&id)
            .and_then(|space| space.entry(vaddr))
            .copied()
    }

    /// Physical address backing `vaddr` in `id`, if resident
    pub fn translate(&self, id: AddressSpaceId, vaddr: VirtAddr) -> Option<PhysAddr> {
        self.page_entry(id, vaddr)
            .and_then(|entry| entry.frame())
            .map(|frame| frame.add(vaddr.page_offset()))
    }

    /// Statistics snapshot
    pub fn stats(&self) -> VmStats {
        let state = self.state.lock();
        let mut stats = VmStats {
            stolen_pages: self.steal.stolen(),
            faults: state.counters.faults,
            evictions: state.counters.evictions,
            swap_ins: state.counters.swap_ins,
            address_spaces: state.spaces.len(),
            ..VmStats::default()
        };
        if let Some(coremap) = state.coremap.as_ref() {
            stats.total_frames = coremap.frame_count();
            stats.free_frames = coremap.free_frames();
            stats.dirty_frames = coremap.count(FrameState::Dirty);
            stats.fixed_frames = coremap.count(FrameState::Fixed);
        }
        if let Some(swap) = state.swap.as_ref() {
            stats.swap_slots_in_use = swap.slots_in_use();
            stats.swap_capacity = swap.capacity();
        }
        stats
    }
}

impl<M: Machine + core::fmt::Debug> core::fmt::Debug for Vm<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Vm")
            .field("machine", &self.machine)
            .field("config", &self.config)
            .field("bootstrapped", &self.is_bootstrapped())
            .finish()
    }
}
