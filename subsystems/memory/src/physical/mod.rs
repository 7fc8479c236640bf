//! # Physical Memory Management
//!
//! The coremap: one descriptor per physical frame between the first free
//! address reported at bootstrap and the end of RAM.
//!
//! Frames are in one of four states:
//! - `Free`: available
//! - `Dirty`: holds a user page, eligible for eviction
//! - `Fixed`: holds kernel pages (or the coremap itself), never evicted
//! - `Clean`: reserved for a page known to match its swap copy; nothing
//!   produces it yet
//!
//! The coremap is bookkeeping only. Zero-filling, swap I/O and TLB
//! maintenance happen in the callers that hold the machine.

pub mod bitmap;
pub mod eviction;
pub mod steal;

use crate::virtual_memory::AddressSpaceId;
use alloc::vec::Vec;
use bitmap::FrameBitmap;
use core::mem;
use static_assertions::const_assert;
use tern_hal::{PhysAddr, VirtAddr, PAGE_SIZE};

/// State of one physical frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Available for allocation
    Free,
    /// Holds a user page
    Dirty,
    /// Holds a kernel page
    Fixed,
    /// Holds a user page identical to its swap copy
    Clean,
}

/// Frame descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    /// Owning address space (user frames only)
    pub owner: Option<AddressSpaceId>,
    /// User page mapped to this frame (zero for kernel frames)
    pub vaddr: VirtAddr,
    /// Current state
    pub state: FrameState,
    /// Length of the kernel run starting here (zero elsewhere)
    pub run_length: usize,
    /// Set when a translation is installed, cleared by the clock hand
    pub referenced: bool,
    /// Fault counter value at the last installation
    pub timestamp: u64,
}

impl FrameDescriptor {
    /// A free frame
    pub const FREE: Self = Self {
        owner: None,
        vaddr: VirtAddr::new(0),
        state: FrameState::Free,
        run_length: 0,
        referenced: false,
        timestamp: 0,
    };

    /// Check if this frame may be chosen as an eviction victim
    #[inline]
    pub fn is_evictable(&self) -> bool {
        self.state == FrameState::Dirty && self.owner.is_some()
    }
}

const_assert!(mem::size_of::<FrameDescriptor>() <= PAGE_SIZE as usize);

/// Coremap - tracks every frame handed over at bootstrap
#[derive(Debug)]
pub struct Coremap {
    /// Physical address of frame 0
    base: PhysAddr,
    /// One descriptor per frame
    frames: Vec<FrameDescriptor>,
    /// In-use frames
    used: FrameBitmap,
    /// Frames holding the coremap itself
    reserved: usize,
}

impl Coremap {
    /// Build the coremap over `[first, last)`
    ///
    /// The frames that the descriptor array itself would occupy at the
    /// bottom of the range are marked `Fixed` for good.
    pub fn new(first: PhysAddr, last: PhysAddr) -> Self {
        let base = first.align_up(PAGE_SIZE);
        let count = last.as_u64().saturating_sub(base.as_u64()) / PAGE_SIZE;
        let count = count as usize;

        let bytes = count * mem::size_of::<FrameDescriptor>();
        let reserved = (bytes as u64).div_ceil(PAGE_SIZE) as usize;
        let reserved = reserved.min(count);

        let mut frames = alloc::vec![FrameDescriptor::FREE; count];
        let mut used = FrameBitmap::new(count);
        for (idx, frame) in frames.iter_mut().enumerate().take(reserved) {
            frame.state = FrameState::Fixed;
            used.set_used(idx);
        }

        Self {
            base,
            frames,
            used,
            reserved,
        }
    }

    /// Physical address of frame 0
    pub fn base(&self) -> PhysAddr {
        self.base
    }

    /// Number of frames managed
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Number of frames holding the coremap
    pub fn reserved_frames(&self) -> usize {
        self.reserved
    }

    /// Number of free frames
    pub fn free_frames(&self) -> usize {
        self.frames.len() - self.used.used()
    }

    /// Count of frames in `state`
    pub fn count(&self, state: FrameState) -> usize {
        self.frames.iter().filter(|f| f.state == state).count()
    }

    /// Frame index for a physical address
    pub fn index_of(&self, paddr: PhysAddr) -> Option<usize> {
        if paddr < self.base {
            return None;
        }
        let idx = ((paddr.as_u64() - self.base.as_u64()) / PAGE_SIZE) as usize;
        (idx < self.frames.len()).then_some(idx)
    }

    /// Physical address of frame `idx`
    pub fn address_of(&self, idx: usize) -> PhysAddr {
        self.base.add(idx as u64 * PAGE_SIZE)
    }

    /// Descriptor of frame `idx`
    pub fn descriptor(&self, idx: usize) -> &FrameDescriptor {
        &self.frames[idx]
    }

    /// Mutable view of every descriptor, for victim selection
    pub fn frames_mut(&mut self) -> &mut [FrameDescriptor] {
        &mut self.frames
    }

    /// First free frame
    pub fn find_free(&self) -> Option<usize> {
        self.used.find_free()
    }

    /// First run of `count` free frames
    pub fn find_run(&self, count: usize) -> Option<usize> {
        self.used.find_contiguous(count)
    }

    /// Hand frame `idx` to a user page
    ///
    /// Also used to re-home an evicted frame, so the frame may already be
    /// in use.
    pub fn assign_user(&mut self, idx: usize, owner: Option<AddressSpaceId>, vaddr: VirtAddr) {
        self.frames[idx] = FrameDescriptor {
            owner,
            vaddr: vaddr.page(),
            state: FrameState::Dirty,
            ..FrameDescriptor::FREE
        };
        self.used.set_used(idx);
    }

    /// Hand `count` frames starting at `start` to the kernel
    pub fn assign_kernel(&mut self, start: usize, count: usize) {
        for idx in start..start + count {
            self.frames[idx] = FrameDescriptor {
                state: FrameState::Fixed,
                ..FrameDescriptor::FREE
            };
            self.used.set_used(idx);
        }
        self.frames[start].run_length = count;
    }

    /// Return frame `idx` to the free pool
    ///
    /// # Panics
    ///
    /// Panics if the frame is already free.
    pub fn release(&mut self, idx: usize) {
        if self.frames[idx].state == FrameState::Free {
            panic!("vm: double free of frame 0x{:x}", self.address_of(idx));
        }
        self.frames[idx] = FrameDescriptor::FREE;
        self.used.set_free(idx);
    }

    /// Free the kernel run starting at `start`
    ///
    /// Returns the number of frames released; zero if `start` does not begin
    /// a run.
    pub fn release_run(&mut self, start: usize) -> usize {
        let count = self.frames[start].run_length;
        if self.frames[start].state != FrameState::Fixed {
            return 0;
        }
        for idx in start..start + count {
            self.release(idx);
        }
        count
    }

    /// Note that a translation for frame `idx` was just installed
    pub fn touch(&mut self, idx: usize, now: u64) {
        let frame = &mut self.frames[idx];
        frame.referenced = true;
        frame.timestamp = now;
    }
}
