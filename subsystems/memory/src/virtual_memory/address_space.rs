//! # Address Space Management
//!
//! An address space is a set of regions, a page table, a stack that grows
//! down from the configured top one page at a time and a heap that starts
//! right after the last region defined.
//!
//! [`AddressSpace`] is pure bookkeeping. The lifecycle operations that touch
//! frames, swap or the TLB are methods on [`Vm`].

use super::{tlb, AddressSpaceId, AddressSpaceInfo, PageTableEntry, Region, Residency};
use crate::protection::ProtectionFlags;
use crate::vm::Vm;
use crate::{MemError, MemResult};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use tern_hal::ram::PhysicalMemory;
use tern_hal::{Machine, VirtAddr, PAGE_SIZE};

/// Address space
#[derive(Debug, Clone)]
pub struct AddressSpace {
    /// Address space ID
    id: AddressSpaceId,
    /// Regions, keyed by base
    regions: BTreeMap<VirtAddr, Region>,
    /// Page table, keyed by page
    pages: BTreeMap<VirtAddr, PageTableEntry>,
    /// Lowest stack page
    stack_base: VirtAddr,
    /// First address above the stack
    stack_top: VirtAddr,
    /// Start of the heap
    heap_start: VirtAddr,
    /// Current break
    heap_end: VirtAddr,
    /// Heap pages materialised so far
    heap_pages: usize,
}

impl AddressSpace {
    /// Create an empty address space
    pub fn new(id: AddressSpaceId) -> Self {
        Self {
            id,
            regions: BTreeMap::new(),
            pages: BTreeMap::new(),
            stack_base: VirtAddr::new(0),
            stack_top: VirtAddr::new(0),
            heap_start: VirtAddr::new(0),
            heap_end: VirtAddr::new(0),
            heap_pages: 0,
        }
    }

    /// Same regions, stack and heap under a new id, with an empty page table
    pub fn fork_layout(&self, id: AddressSpaceId) -> Self {
        Self {
            id,
            pages: BTreeMap::new(),
            ..self.clone()
        }
    }

    /// Add a region covering `[base, base + size)` rounded out to pages
    ///
    /// The heap is moved to start right after the new region.
    pub fn define_region(
        &mut self,
        base: VirtAddr,
        size: u64,
        protection: ProtectionFlags,
    ) -> MemResult<Region> {
        let size = size
            .checked_add(base.page_offset())
            .ok_or(MemError::InvalidArgument)?;
        let base = base.page();
        let size = size
            .checked_add(PAGE_SIZE - 1)
            .ok_or(MemError::InvalidArgument)?
            & !(PAGE_SIZE - 1);
        base.as_u64()
            .checked_add(size)
            .ok_or(MemError::InvalidArgument)?;

        let region = Region {
            base,
            pages: (size / PAGE_SIZE) as usize,
            protection,
        };
        self.regions
            .entry(base)
            .and_modify(|existing| {
                if region.pages > existing.pages {
                    *existing = region;
                }
            })
            .or_insert(region);

        // The heap follows the region just defined, even if a larger one
        // at the same base stays in the map
        self.heap_start = region.end();
        self.heap_end = region.end();
        self.heap_pages = 0;
        Ok(region)
    }

    /// Place the (empty) stack just below `top`
    ///
    /// Returns the initial stack pointer.
    pub fn define_stack(&mut self, top: VirtAddr) -> VirtAddr {
        self.stack_top = top;
        self.stack_base = top;
        top
    }

    /// Find region containing address
    pub fn region_at(&self, addr: VirtAddr) -> Option<&Region> {
        self.regions
            .range(..=addr)
            .rev()
            .map(|(_, region)| region)
            .find(|region| region.contains(addr))
    }

    /// All regions, lowest first
    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    /// Page-table entry for `addr`'s page
    pub fn entry(&self, addr: VirtAddr) -> Option<&PageTableEntry> {
        self.pages.get(&addr.page())
    }

    /// Mutable page-table entry for `addr`'s page
    pub fn entry_mut(&mut self, addr: VirtAddr) -> Option<&mut PageTableEntry> {
        self.pages.get_mut(&addr.page())
    }

    /// Add a page-table entry
    ///
    /// # Panics
    ///
    /// Panics if the page already has one.
    pub fn insert_entry(&mut self, entry: PageTableEntry) {
        if self.pages.insert(entry.vaddr, entry).is_some() {
            panic!("vm: page 0x{:x} mapped twice", entry.vaddr);
        }
    }

    /// All page-table entries, lowest page first
    pub fn entries(&self) -> impl Iterator<Item = &PageTableEntry> {
        self.pages.values()
    }

    /// Lowest stack page
    pub fn stack_base(&self) -> VirtAddr {
        self.stack_base
    }

    /// Number of stack pages
    pub fn stack_pages(&self) -> usize {
        ((self.stack_top.as_u64() - self.stack_base.as_u64()) / PAGE_SIZE) as usize
    }

    /// Check if `addr` lies in the page just below the stack
    pub fn is_below_stack(&self, addr: VirtAddr) -> bool {
        self.stack_top.as_u64() != 0
            && addr < self.stack_base
            && addr.as_u64() >= self.stack_base.as_u64().saturating_sub(PAGE_SIZE)
    }

    /// Check if the stack may grow by one page
    ///
    /// Growth is refused past `max_pages`, or when the new page would land
    /// on a region or on the heap.
    pub fn can_grow_stack(&self, max_pages: Option<usize>) -> bool {
        if max_pages.is_some_and(|max| self.stack_pages() >= max) {
            return false;
        }
        if self.stack_base.as_u64() < PAGE_SIZE {
            return false;
        }
        let page = self.stack_base.sub(PAGE_SIZE);
        if self.region_at(page).is_some() {
            return false;
        }
        !(self.has_heap() && page >= self.heap_start && page <= self.heap_limit())
    }

    /// Move the stack base down one page
    pub(crate) fn grow_stack(&mut self) -> VirtAddr {
        self.stack_base = self.stack_base.sub(PAGE_SIZE);
        self.stack_base
    }

    /// Start of the heap
    pub fn heap_start(&self) -> VirtAddr {
        self.heap_start
    }

    /// Current break
    pub fn heap_end(&self) -> VirtAddr {
        self.heap_end
    }

    /// Heap pages materialised so far
    pub fn heap_pages(&self) -> usize {
        self.heap_pages
    }

    fn has_heap(&self) -> bool {
        !self.regions.is_empty()
    }

    /// Highest heap address, counting pages materialised past the break
    fn heap_limit(&self) -> VirtAddr {
        let materialised = self.heap_start.add(self.heap_pages as u64 * PAGE_SIZE);
        core::cmp::max(self.heap_end, materialised)
    }

    /// Check if `addr` lies in `[heap_start, heap_end]`
    pub fn in_heap(&self, addr: VirtAddr) -> bool {
        self.has_heap() && addr >= self.heap_start && addr <= self.heap_end
    }

    /// Number of heap pages needed to cover `addr`
    pub fn heap_pages_to(&self, addr: VirtAddr) -> usize {
        ((addr.page().as_u64() - self.heap_start.as_u64()) / PAGE_SIZE) as usize + 1
    }

    /// Record that `pages` heap pages now exist; never shrinks
    pub(crate) fn set_heap_pages(&mut self, pages: usize) {
        self.heap_pages = self.heap_pages.max(pages);
    }

    /// Move the break up by `delta` bytes, returning the old break
    pub fn sbrk(&mut self, delta: i64) -> MemResult<VirtAddr> {
        if delta < 0 || !self.has_heap() {
            return Err(MemError::InvalidArgument);
        }
        let old = self.heap_end;
        let new = old
            .as_u64()
            .checked_add(delta as u64)
            .ok_or(MemError::InvalidArgument)?;
        if self.stack_top.as_u64() != 0 && new >= self.stack_base.as_u64().saturating_sub(PAGE_SIZE) {
            return Err(MemError::OutOfMemory);
        }
        self.heap_end = VirtAddr::new(new);
        Ok(old)
    }

    /// Layout snapshot
    pub fn info(&self) -> AddressSpaceInfo {
        AddressSpaceInfo {
            id: self.id,
            regions: self.regions.len(),
            pages: self.pages.len(),
            resident_pages: self.pages.values().filter(|e| e.is_resident()).count(),
            stack_base: self.stack_base,
            stack_top: self.stack_top,
            heap_start: self.heap_start,
            heap_end: self.heap_end,
            heap_pages: self.heap_pages,
        }
    }
}

impl<M: Machine> Vm<M> {
    /// Create an empty address space
    pub fn as_create(&self) -> AddressSpaceId {
        let id = AddressSpaceId::new();
        self.state.lock().spaces.insert(id, AddressSpace::new(id));
        log::debug!("vm: created address space {}", id.as_u64());
        id
    }

    /// Destroy an address space, freeing its frames and swap slots
    ///
    /// Destroying an id that no longer exists does nothing.
    pub fn as_destroy(&self, id: AddressSpaceId) {
        let mut state = self.state.lock();
        let Some(space) = state.spaces.remove(&id) else {
            log::debug!("vm: address space {} already destroyed", id.as_u64());
            return;
        };
        if state.current == Some(id) {
            state.current = None;
        }

        for entry in space.entries() {
            match entry.residency {
                Residency::InMemory(frame) => self.release_user_frame(&mut state, frame),
                Residency::OnDisk(slot) => {
                    if let Some(swap) = state.swap.as_mut() {
                        swap.release_slot(slot);
                    }
                }
            }
        }
        log::debug!(
            "vm: destroyed address space {} ({} pages)",
            id.as_u64(),
            space.entries().count()
        );
    }

    /// Make an address space current on this CPU
    ///
    /// Translations carry no address-space tag, so the whole TLB goes.
    pub fn as_activate(&self, id: AddressSpaceId) {
        log::trace!("vm: activating address space {}", id.as_u64());
        tlb::invalidate_all(&self.machine);
    }

    /// Declare a region of the program image
    pub fn as_define_region(
        &self,
        id: AddressSpaceId,
        base: VirtAddr,
        size: u64,
        readable: bool,
        writeable: bool,
        executable: bool,
    ) -> MemResult<()> {
        let mut state = self.state.lock();
        let space = state
            .spaces
            .get_mut(&id)
            .ok_or(MemError::NoSuchAddressSpace)?;
        let protection = ProtectionFlags::from_rwx(readable, writeable, executable);
        let region = space.define_region(base, size, protection)?;
        log::debug!(
            "vm: region 0x{:x}+{} pages ({:?}) in address space {}",
            region.base,
            region.pages,
            protection,
            id.as_u64()
        );
        Ok(())
    }

    /// Set up the user stack and return the initial stack pointer
    pub fn as_define_stack(&self, id: AddressSpaceId) -> MemResult<VirtAddr> {
        let mut state = self.state.lock();
        let space = state
            .spaces
            .get_mut(&id)
            .ok_or(MemError::NoSuchAddressSpace)?;
        Ok(space.define_stack(self.config.user_stack_top))
    }

    /// Called by the loader before it copies segments in
    ///
    /// Pages are materialised by faults as the loader touches them, so there
    /// is nothing to prepare.
    pub fn as_prepare_load(&self, id: AddressSpaceId) -> MemResult<()> {
        self.check_exists(id)
    }

    /// Called by the loader once every segment is in place
    pub fn as_complete_load(&self, id: AddressSpaceId) -> MemResult<()> {
        self.check_exists(id)
    }

    /// Duplicate an address space for fork
    ///
    /// Every page of the parent, resident or swapped out, gets a resident
    /// copy in the child.
    pub fn as_copy(&self, id: AddressSpaceId) -> MemResult<AddressSpaceId> {
        let mut state = self.state.lock();
        let parent = state.spaces.get(&id).ok_or(MemError::NoSuchAddressSpace)?;

        let child_id = AddressSpaceId::new();
        let child = parent.fork_layout(child_id);
        let pages: Vec<VirtAddr> = parent.entries().map(|entry| entry.vaddr).collect();
        state.spaces.insert(child_id, child);

        for page in pages {
            let frame = self.allocate_user_frame(&mut state, Some(child_id), page);
            // The allocation above may have evicted the parent's copy
            let residency = state
                .spaces
                .get(&id)
                .and_then(|space| space.entry(page))
                .map(|entry| entry.residency)
                .unwrap_or_else(|| panic!("vm: page 0x{:x} vanished during copy", page));

            match residency {
                Residency::InMemory(source) => self
                    .machine
                    .ram()
                    .copy(source, frame, PAGE_SIZE as usize)
                    .unwrap_or_else(|err| panic!("vm: copy of frame 0x{:x} failed: {}", source, err)),
                Residency::OnDisk(slot) => {
                    self.swap_store(&mut state).read_page(&self.machine, slot, frame);
                }
            }

            if let Some(child) = state.spaces.get_mut(&child_id) {
                child.insert_entry(PageTableEntry::resident(page, frame));
            }
        }

        log::debug!("vm: copied address space {} to {}", id.as_u64(), child_id.as_u64());
        Ok(child_id)
    }

    /// Move the heap break up by `delta` bytes, returning the old break
    ///
    /// Heap pages are still materialised on first touch.
    pub fn as_sbrk(&self, id: AddressSpaceId, delta: i64) -> MemResult<VirtAddr> {
        let mut state = self.state.lock();
        let space = state
            .spaces
            .get_mut(&id)
            .ok_or(MemError::NoSuchAddressSpace)?;
        space.sbrk(delta)
    }

    /// Layout snapshot of an address space
    pub fn address_space_info(&self, id: AddressSpaceId) -> Option<AddressSpaceInfo> {
        self.state.lock().spaces.get(&id).map(AddressSpace::info)
    }

    fn check_exists(&self, id: AddressSpaceId) -> MemResult<()> {
        if self.state.lock().spaces.contains_key(&id) {
            Ok(())
        } else {
            Err(MemError::NoSuchAddressSpace)
        }
    }
}
