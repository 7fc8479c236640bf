//! # Tern Memory - Test Suite
//!
//! End-to-end paging scenarios on the simulated machine.

use crate::config::{VictimPolicy, VmConfig, DEFAULT_SWAP_DEVICE};
use crate::physical::FrameState;
use crate::swap::MemoryStoreProvider;
use crate::virtual_memory::{AddressSpaceId, Residency};
use crate::{FaultKind, MemError, Vm, EFAULT};
use alloc::boxed::Box;
use alloc::collections::BTreeSet;
use alloc::vec;
use alloc::vec::Vec;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tern_hal::mmu::{EntryLo, TranslationCache};
use tern_hal::ram::PhysicalMemory;
use tern_hal::sim::{SimConfig, SimMachine};
use tern_hal::{kvaddr_to_paddr, Machine, PhysAddr, VirtAddr, KSEG0, PAGE_SIZE};

const CODE: u64 = 0x40_0000;
const SWAP_PAGES: usize = 64;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn unbooted(frames: u64, config: VmConfig) -> Vm<SimMachine> {
    init_logging();
    let machine = SimMachine::new(SimConfig::with_frames(frames));
    let provider = MemoryStoreProvider::new(DEFAULT_SWAP_DEVICE, SWAP_PAGES * PAGE_SIZE as usize);
    Vm::new(machine, config, Box::new(provider))
}

fn vm_with(frames: u64, config: VmConfig) -> Vm<SimMachine> {
    let vm = unbooted(frames, config);
    vm.bootstrap();
    vm
}

fn setup(frames: u64) -> Vm<SimMachine> {
    vm_with(frames, VmConfig::default())
}

/// Address space with one writable region of `pages` pages at `CODE`
fn new_space(vm: &Vm<SimMachine>, pages: u64) -> AddressSpaceId {
    let id = vm.as_create();
    vm.as_define_region(id, VirtAddr::new(CODE), pages * PAGE_SIZE, true, true, false)
        .unwrap();
    id
}

fn page(n: u64) -> VirtAddr {
    VirtAddr::new(CODE + n * PAGE_SIZE)
}

fn frame_of(vm: &Vm<SimMachine>, id: AddressSpaceId, vaddr: VirtAddr) -> PhysAddr {
    vm.page_entry(id, vaddr)
        .and_then(|entry| entry.frame())
        .expect("page is not resident")
}

fn read_frame(vm: &Vm<SimMachine>, frame: PhysAddr) -> Vec<u8> {
    let mut buf = vec![0u8; PAGE_SIZE as usize];
    vm.machine().ram().read(frame, &mut buf).unwrap();
    buf
}

fn fill_frame(vm: &Vm<SimMachine>, frame: PhysAddr, byte: u8) {
    vm.machine()
        .ram()
        .write(frame, &vec![byte; PAGE_SIZE as usize])
        .unwrap();
}

/// Fault page `n` in and stamp it with `n + 1`
fn touch(vm: &Vm<SimMachine>, id: AddressSpaceId, n: u64) -> PhysAddr {
    vm.handle_fault(id, FaultKind::Write, page(n)).unwrap();
    let frame = frame_of(vm, id, page(n));
    fill_frame(vm, frame, n as u8 + 1);
    frame
}

/// Pages of `id` among `0..pages` that are on disk
fn swapped_out(vm: &Vm<SimMachine>, id: AddressSpaceId, pages: u64) -> Vec<u64> {
    (0..pages)
        .filter(|&n| vm.page_entry(id, page(n)).is_some_and(|e| !e.is_resident()))
        .collect()
}

fn assert_exclusive(vm: &Vm<SimMachine>, spaces: &[(AddressSpaceId, u64)]) {
    let mut seen = BTreeSet::new();
    for &(id, pages) in spaces {
        for n in 0..pages {
            let Some(frame) = vm.page_entry(id, page(n)).and_then(|e| e.frame()) else {
                continue;
            };
            assert!(seen.insert(frame), "frame 0x{:x} mapped twice", frame);
            let desc = vm.frame(frame).unwrap();
            assert_eq!(desc.state, FrameState::Dirty);
            assert_eq!(desc.owner, Some(id));
            assert_eq!(desc.vaddr, page(n));
        }
    }
}

// =========================================================================
// Fault resolution
// =========================================================================

#[test]
fn test_region_fault_refault_destroy() {
    let vm = setup(16);
    let id = new_space(&vm, 2);
    vm.set_current(Some(id));
    let free = vm.stats().free_frames;

    vm.handle_fault(id, FaultKind::Read, page(0).add(0x10)).unwrap();
    let first = frame_of(&vm, id, page(0));
    assert!(read_frame(&vm, first).iter().all(|&b| b == 0));
    assert_eq!(vm.frame_state(first), Some(FrameState::Dirty));

    let slot = vm.machine().tlb().probe(page(0)).expect("translation installed");
    let entry = vm.machine().tlb().read(slot);
    assert_eq!(entry.frame(), first);
    assert!(entry.flags().contains(EntryLo::DIRTY | EntryLo::VALID));

    // Faulting again reuses the frame
    vm.handle_fault(id, FaultKind::Read, page(0)).unwrap();
    assert_eq!(frame_of(&vm, id, page(0)), first);
    assert_eq!(vm.stats().free_frames, free - 1);

    vm.handle_fault(id, FaultKind::Write, page(1)).unwrap();
    let second = frame_of(&vm, id, page(1));
    assert_ne!(first, second);
    assert_eq!(vm.stats().user_bytes(), 2 * PAGE_SIZE);

    vm.as_destroy(id);
    assert_eq!(vm.frame_state(first), Some(FrameState::Free));
    assert_eq!(vm.frame_state(second), Some(FrameState::Free));
    assert_eq!(vm.stats().free_frames, free);
    assert_eq!(vm.machine().tlb().probe(page(0)), None);
}

#[test]
fn test_fault_through_current_address_space() {
    let vm = setup(16);
    let id = new_space(&vm, 1);

    assert_eq!(vm.vm_fault(0, page(0)), Err(MemError::AccessFault));
    vm.set_current(Some(id));
    vm.as_activate(id);
    assert_eq!(vm.vm_fault(1, page(0).add(4)), Ok(()));
    assert_eq!(vm.translate(id, page(0).add(4)), Some(frame_of(&vm, id, page(0)).add(4)));
}

#[test]
fn test_bad_fault_code() {
    let vm = setup(16);
    let id = new_space(&vm, 1);
    vm.set_current(Some(id));
    assert_eq!(vm.vm_fault(7, page(0)), Err(MemError::InvalidArgument));
}

#[test]
#[should_panic(expected = "read-only fault")]
fn test_readonly_fault_panics() {
    let vm = setup(16);
    let id = new_space(&vm, 1);
    vm.set_current(Some(id));
    let _ = vm.vm_fault(2, page(0));
}

#[test]
fn test_bad_reference() {
    let vm = setup(16);
    let id = new_space(&vm, 1);
    let err = vm.handle_fault(id, FaultKind::Read, VirtAddr::new(0x10)).unwrap_err();
    assert_eq!(err, MemError::AccessFault);
    assert_eq!(err.errno(), EFAULT);
    assert!(vm.page_entry(id, VirtAddr::new(0x10)).is_none());
}

#[test]
fn test_region_containment() {
    let vm = setup(32);
    let id = vm.as_create();
    vm.as_define_region(id, VirtAddr::new(0x40_0000), 3 * PAGE_SIZE, true, false, true)
        .unwrap();
    vm.as_define_region(id, VirtAddr::new(0x60_0800), 2 * PAGE_SIZE, true, true, false)
        .unwrap();

    let regions = [(0x40_0000u64, 0x40_3000u64), (0x60_0000, 0x60_3000)];
    let mut rng = SmallRng::seed_from_u64(3);
    for _ in 0..32 {
        let (base, end) = regions[rng.gen_range(0..regions.len())];
        let addr = VirtAddr::new(rng.gen_range(base..end));
        vm.handle_fault(id, FaultKind::Read, addr).unwrap();
        let entry = vm.page_entry(id, addr).unwrap();
        assert!(entry.vaddr.as_u64() >= base && entry.vaddr.as_u64() < end);
        assert!(entry.vaddr.is_aligned(PAGE_SIZE));
    }
    assert_eq!(vm.handle_fault(id, FaultKind::Read, VirtAddr::new(0x40_3000)), Err(MemError::AccessFault));
}

#[test]
fn test_unknown_address_space() {
    let vm = setup(16);
    let id = new_space(&vm, 1);
    vm.as_destroy(id);
    assert_eq!(
        vm.handle_fault(id, FaultKind::Read, page(0)),
        Err(MemError::NoSuchAddressSpace)
    );
    assert_eq!(vm.as_copy(id), Err(MemError::NoSuchAddressSpace));
    assert_eq!(vm.as_prepare_load(id), Err(MemError::NoSuchAddressSpace));
}

// =========================================================================
// Stack and heap
// =========================================================================

#[test]
fn test_stack_grows_one_page() {
    let vm = setup(16);
    let id = new_space(&vm, 1);
    let sp = vm.as_define_stack(id).unwrap();
    assert_eq!(sp, VirtAddr::new(KSEG0));

    vm.handle_fault(id, FaultKind::Write, sp.sub(4)).unwrap();
    let info = vm.address_space_info(id).unwrap();
    assert_eq!(info.stack_base, sp.sub(PAGE_SIZE));
    assert!(vm.page_entry(id, info.stack_base).unwrap().is_resident());

    // Two pages below the base is not stack
    assert_eq!(
        vm.handle_fault(id, FaultKind::Write, sp.sub(3 * PAGE_SIZE)),
        Err(MemError::AccessFault)
    );

    vm.handle_fault(id, FaultKind::Write, sp.sub(PAGE_SIZE + 8)).unwrap();
    let info = vm.address_space_info(id).unwrap();
    assert_eq!(info.stack_base, sp.sub(2 * PAGE_SIZE));
}

#[test]
fn test_stack_bound() {
    let vm = vm_with(
        16,
        VmConfig {
            max_stack_pages: Some(2),
            ..VmConfig::default()
        },
    );
    let id = new_space(&vm, 1);
    let sp = vm.as_define_stack(id).unwrap();

    vm.handle_fault(id, FaultKind::Write, sp.sub(PAGE_SIZE)).unwrap();
    vm.handle_fault(id, FaultKind::Write, sp.sub(2 * PAGE_SIZE)).unwrap();
    assert_eq!(
        vm.handle_fault(id, FaultKind::Write, sp.sub(3 * PAGE_SIZE)),
        Err(MemError::AccessFault)
    );
    assert_eq!(vm.address_space_info(id).unwrap().stack_base, sp.sub(2 * PAGE_SIZE));
}

#[test]
fn test_stack_refuses_to_grow_into_heap() {
    let vm = setup(16);
    let id = vm.as_create();
    // Region ends one page below the stack top; the heap sits right there
    vm.as_define_region(id, VirtAddr::new(KSEG0 - 2 * PAGE_SIZE), PAGE_SIZE, true, true, false)
        .unwrap();
    let sp = vm.as_define_stack(id).unwrap();
    assert_eq!(
        vm.handle_fault(id, FaultKind::Write, sp.sub(4)),
        Err(MemError::AccessFault)
    );
    assert_eq!(vm.address_space_info(id).unwrap().stack_base, sp);
}

#[test]
fn test_heap_grows_monotonically() {
    let vm = setup(16);
    let id = new_space(&vm, 1);
    let start = vm.address_space_info(id).unwrap().heap_start;
    assert_eq!(start, page(1));

    assert_eq!(vm.as_sbrk(id, 3 * PAGE_SIZE as i64), Ok(start));
    vm.handle_fault(id, FaultKind::Write, start.add(2 * PAGE_SIZE + 8)).unwrap();
    let info = vm.address_space_info(id).unwrap();
    assert_eq!(info.heap_pages, 3);
    for n in 0..3 {
        assert!(vm.page_entry(id, start.add(n * PAGE_SIZE)).unwrap().is_resident());
    }

    // A lower heap page does not shrink the count
    vm.handle_fault(id, FaultKind::Read, start).unwrap();
    assert_eq!(vm.address_space_info(id).unwrap().heap_pages, 3);

    // The break itself is still heap
    vm.handle_fault(id, FaultKind::Read, start.add(3 * PAGE_SIZE)).unwrap();
    assert_eq!(vm.address_space_info(id).unwrap().heap_pages, 4);

    assert_eq!(
        vm.handle_fault(id, FaultKind::Read, start.add(4 * PAGE_SIZE)),
        Err(MemError::AccessFault)
    );
    assert_eq!(vm.as_sbrk(id, -4), Err(MemError::InvalidArgument));
}

#[test]
fn test_heap_start_without_sbrk() {
    let vm = setup(16);
    let id = new_space(&vm, 2);
    let start = vm.address_space_info(id).unwrap().heap_start;
    vm.handle_fault(id, FaultKind::Write, start).unwrap();
    assert_eq!(vm.address_space_info(id).unwrap().heap_pages, 1);
    assert_eq!(
        vm.handle_fault(id, FaultKind::Write, start.add(PAGE_SIZE)),
        Err(MemError::AccessFault)
    );
}

// =========================================================================
// Eviction and swap
// =========================================================================

#[test]
fn test_exhaustion_evicts_to_swap() {
    let vm = setup(8);
    let id = new_space(&vm, 32);
    let free = vm.stats().free_frames as u64;
    assert_eq!(vm.stats().swap_capacity, 0);

    let frames: Vec<PhysAddr> = (0..free).map(|n| touch(&vm, id, n)).collect();
    assert_eq!(vm.stats().free_frames, 0);
    assert_eq!(vm.stats().swap_capacity, SWAP_PAGES);
    assert_eq!(vm.stats().evictions, 0);

    vm.handle_fault(id, FaultKind::Write, page(free)).unwrap();
    assert_eq!(vm.stats().evictions, 1);

    let victims = swapped_out(&vm, id, free);
    assert_eq!(victims.len(), 1);
    let victim = victims[0];
    let entry = vm.page_entry(id, page(victim)).unwrap();
    assert!(matches!(entry.residency, Residency::OnDisk(_)));
    assert_eq!(vm.stats().swap_slots_in_use, 1);

    // The victim's frame went to the new page, zeroed
    let reused = frame_of(&vm, id, page(free));
    assert_eq!(reused, frames[victim as usize]);
    assert!(read_frame(&vm, reused).iter().all(|&b| b == 0));
    let desc = vm.frame(reused).unwrap();
    assert_eq!(desc.owner, Some(id));
    assert_eq!(desc.vaddr, page(free));
    assert_exclusive(&vm, &[(id, free + 1)]);
}

#[test]
fn test_swap_round_trip() {
    let vm = setup(8);
    let id = new_space(&vm, 32);
    let free = vm.stats().free_frames as u64;
    for n in 0..=free {
        touch(&vm, id, n);
    }
    let victim = swapped_out(&vm, id, free)[0];

    vm.handle_fault(id, FaultKind::Read, page(victim)).unwrap();
    assert_eq!(vm.stats().swap_ins, 1);
    assert_eq!(vm.stats().evictions, 2);
    let frame = frame_of(&vm, id, page(victim));
    assert!(read_frame(&vm, frame).iter().all(|&b| b == victim as u8 + 1));
    // The slot was given back; only the second victim holds one
    assert_eq!(vm.stats().swap_slots_in_use, 1);
}

#[test]
fn test_random_workload_keeps_frames_exclusive() {
    let vm = setup(10);
    let a = new_space(&vm, 12);
    let b = new_space(&vm, 12);
    let spaces = [(a, 12u64), (b, 12u64)];
    let mut rng = SmallRng::seed_from_u64(11);
    let mut stamped: BTreeSet<(usize, u64)> = BTreeSet::new();

    for _ in 0..200 {
        let which = rng.gen_range(0..spaces.len());
        let (id, pages) = spaces[which];
        let n = rng.gen_range(0..pages);
        vm.handle_fault(id, FaultKind::Write, page(n)).unwrap();
        let frame = frame_of(&vm, id, page(n));

        let mut tag = [0u8; 2];
        vm.machine().ram().read(frame, &mut tag).unwrap();
        if stamped.insert((which, n)) {
            assert_eq!(tag, [0, 0]);
            vm.machine().ram().write(frame, &[which as u8 + 1, n as u8]).unwrap();
        } else {
            assert_eq!(tag, [which as u8 + 1, n as u8]);
        }
        assert_exclusive(&vm, &spaces);
    }
    assert!(vm.stats().evictions > 0);
    assert!(vm.stats().swap_ins > 0);
}

#[test]
fn test_clock_policy_round_trip() {
    let vm = vm_with(
        8,
        VmConfig {
            victim_policy: VictimPolicy::Clock,
            ..VmConfig::default()
        },
    );
    let id = new_space(&vm, 32);
    let free = vm.stats().free_frames as u64;
    for n in 0..free + 4 {
        touch(&vm, id, n);
    }
    assert_eq!(vm.stats().evictions, 4);
    for n in 0..free + 4 {
        vm.handle_fault(id, FaultKind::Read, page(n)).unwrap();
        let frame = frame_of(&vm, id, page(n));
        assert_eq!(read_frame(&vm, frame)[0], n as u8 + 1);
    }
}

/// Returns the slot held by the only swapped-out page after three evictions
fn third_eviction_slot(reclaim: bool) -> usize {
    let vm = vm_with(
        8,
        VmConfig {
            reclaim_swap_slots: reclaim,
            ..VmConfig::default()
        },
    );
    let id = new_space(&vm, 32);
    let free = vm.stats().free_frames as u64;
    for n in 0..=free {
        touch(&vm, id, n);
    }
    let first = swapped_out(&vm, id, free + 1)[0];
    vm.handle_fault(id, FaultKind::Read, page(first)).unwrap();
    let second = swapped_out(&vm, id, free + 1)[0];
    vm.handle_fault(id, FaultKind::Read, page(second)).unwrap();

    let third = swapped_out(&vm, id, free + 1);
    assert_eq!(third.len(), 1);
    vm.page_entry(id, page(third[0])).unwrap().slot().unwrap()
}

#[test]
fn test_slot_reclaim_switch() {
    assert_eq!(third_eviction_slot(true), 0);
    assert_eq!(third_eviction_slot(false), 2);
}

// =========================================================================
// Address-space lifecycle
// =========================================================================

#[test]
fn test_destroy_with_swapped_pages() {
    let vm = setup(8);
    let free = vm.stats().free_frames;
    let id = new_space(&vm, 32);
    for n in 0..free as u64 + 3 {
        touch(&vm, id, n);
    }
    assert_eq!(vm.stats().swap_slots_in_use, 3);

    vm.set_current(Some(id));
    vm.as_destroy(id);
    let stats = vm.stats();
    assert_eq!(stats.free_frames, free);
    assert_eq!(stats.dirty_frames, 0);
    assert_eq!(stats.swap_slots_in_use, 0);
    assert_eq!(stats.address_spaces, 0);
    assert_eq!(vm.current(), None);

    // Already gone
    vm.as_destroy(id);
    assert_eq!(vm.stats().free_frames, free);
}

#[test]
fn test_copy_includes_swapped_pages() {
    let vm = setup(8);
    let parent = new_space(&vm, 32);
    let free = vm.stats().free_frames as u64;
    let pages = free + 2;
    for n in 0..pages {
        touch(&vm, parent, n);
    }
    assert_eq!(swapped_out(&vm, parent, pages).len(), 2);

    let child = vm.as_copy(parent).unwrap();
    assert_ne!(child, parent);
    let info = vm.address_space_info(child).unwrap();
    assert_eq!(info.pages, pages as usize);
    assert_eq!(info.heap_start, vm.address_space_info(parent).unwrap().heap_start);

    for n in 0..pages {
        for id in [child, parent] {
            vm.handle_fault(id, FaultKind::Read, page(n)).unwrap();
            let frame = frame_of(&vm, id, page(n));
            assert!(read_frame(&vm, frame).iter().all(|&b| b == n as u8 + 1));
        }
    }
    assert_exclusive(&vm, &[(parent, pages), (child, pages)]);

    // The copy is independent of the parent
    vm.handle_fault(child, FaultKind::Write, page(0)).unwrap();
    fill_frame(&vm, frame_of(&vm, child, page(0)), 0xee);
    vm.handle_fault(parent, FaultKind::Read, page(0)).unwrap();
    assert_eq!(read_frame(&vm, frame_of(&vm, parent, page(0)))[0], 1);
    vm.handle_fault(child, FaultKind::Read, page(0)).unwrap();
    assert_eq!(read_frame(&vm, frame_of(&vm, child, page(0)))[0], 0xee);
}

#[test]
fn test_activate_flushes_tlb() {
    let vm = setup(16);
    let id = new_space(&vm, 2);
    vm.set_current(Some(id));
    vm.handle_fault(id, FaultKind::Read, page(0)).unwrap();
    vm.handle_fault(id, FaultKind::Read, page(1)).unwrap();
    assert_eq!(vm.machine().tlb().valid_count(), 2);
    vm.as_activate(id);
    assert_eq!(vm.machine().tlb().valid_count(), 0);
    assert!(!tern_hal::interrupts::InterruptControl::interrupts_masked(
        vm.machine().interrupts()
    ));
}

#[test]
fn test_fault_in_other_space_leaves_tlb_alone() {
    let vm = setup(16);
    let running = new_space(&vm, 1);
    let other = new_space(&vm, 1);
    vm.set_current(Some(running));
    vm.as_activate(running);

    vm.handle_fault(running, FaultKind::Read, page(0)).unwrap();
    let mine = frame_of(&vm, running, page(0));
    let writes = vm.machine().tlb().write_count();

    vm.handle_fault(other, FaultKind::Read, page(0)).unwrap();
    let theirs = frame_of(&vm, other, page(0));
    assert_ne!(mine, theirs);
    assert_eq!(vm.machine().tlb().write_count(), writes);

    let slot = vm.machine().tlb().probe(page(0)).expect("translation installed");
    assert_eq!(vm.machine().tlb().read(slot).frame(), mine);
    assert_eq!(vm.machine().tlb().valid_count(), 1);
}

#[test]
fn test_load_hooks() {
    let vm = setup(16);
    let id = new_space(&vm, 1);
    assert_eq!(vm.as_prepare_load(id), Ok(()));
    assert_eq!(vm.as_complete_load(id), Ok(()));
}

// =========================================================================
// Kernel and raw user pages
// =========================================================================

#[test]
fn test_kernel_pages_before_and_after_bootstrap() {
    let vm = unbooted(16, VmConfig::default());
    let stolen = vm.alloc_kpages(2).unwrap();
    assert!(stolen.as_u64() >= KSEG0);
    assert_eq!(vm.stats().stolen_pages, 2);
    assert_eq!(vm.frame_state(kvaddr_to_paddr(stolen)), None);

    vm.bootstrap();
    let before = vm.stats();
    assert_eq!(before.total_frames, 14);

    let run = vm.alloc_kpages(3).unwrap();
    let start = kvaddr_to_paddr(run);
    assert_eq!(vm.frame(start).unwrap().run_length, 3);
    assert_eq!(vm.frame_state(start.add(2 * PAGE_SIZE)), Some(FrameState::Fixed));
    assert_eq!(vm.stats().fixed_frames, before.fixed_frames + 3);

    // Not the start of a run, or stolen: ignored
    vm.free_kpages(run.add(PAGE_SIZE));
    vm.free_kpages(stolen);
    assert_eq!(vm.stats().fixed_frames, before.fixed_frames + 3);

    vm.free_kpages(run);
    assert_eq!(vm.stats(), before);
    assert_eq!(vm.alloc_kpages(0), Err(MemError::InvalidArgument));
}

#[test]
fn test_kernel_page_by_eviction() {
    let vm = setup(8);
    let id = new_space(&vm, 32);
    let free = vm.stats().free_frames as u64;
    for n in 0..free {
        touch(&vm, id, n);
    }

    let kpage = vm.alloc_kpages(1).unwrap();
    let frame = kvaddr_to_paddr(kpage);
    assert_eq!(vm.stats().evictions, 1);
    assert_eq!(vm.frame_state(frame), Some(FrameState::Fixed));
    assert_eq!(vm.frame(frame).unwrap().owner, None);
    assert!(read_frame(&vm, frame).iter().all(|&b| b == 0));
    assert_eq!(swapped_out(&vm, id, free).len(), 1);
}

#[test]
#[should_panic(expected = "no run of 2 free frames")]
fn test_kernel_run_exhaustion_panics() {
    let vm = setup(8);
    let id = new_space(&vm, 32);
    for n in 0..vm.stats().free_frames as u64 {
        touch(&vm, id, n);
    }
    let _ = vm.alloc_kpages(2);
}

#[test]
fn test_user_page_zeroed_on_reuse() {
    let vm = setup(8);
    let frame = vm.alloc_upage(None, page(0));
    fill_frame(&vm, frame, 0xaa);
    vm.free_upage(frame);
    assert_eq!(vm.frame_state(frame), Some(FrameState::Free));

    let again = vm.alloc_upage(None, page(1));
    assert_eq!(again, frame);
    assert!(read_frame(&vm, again).iter().all(|&b| b == 0));
    assert_eq!(vm.frame(again).unwrap().vaddr, page(1));
}

#[test]
#[should_panic(expected = "could not free")]
fn test_free_unknown_frame_panics() {
    let vm = setup(8);
    vm.free_upage(PhysAddr::new(0));
}

#[test]
#[should_panic(expected = "out of memory")]
fn test_exhaustion_without_victims_panics() {
    let vm = setup(4);
    loop {
        // Frames with no owner can never be evicted
        vm.alloc_upage(None, page(0));
    }
}

#[test]
#[should_panic(expected = "tlb shootdown")]
fn test_shootdown_all_panics() {
    let vm = setup(4);
    vm.vm_tlbshootdown_all();
}

#[test]
#[should_panic(expected = "tlb shootdown")]
fn test_shootdown_panics() {
    let vm = setup(4);
    vm.vm_tlbshootdown(&crate::TlbShootdown {
        frame: PhysAddr::new(0x5000),
    });
}
