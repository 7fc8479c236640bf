//! # VM Configuration

use alloc::string::String;
use tern_hal::{VirtAddr, PAGE_SIZE, USERSTACK};

/// Name of the raw disk the swap store opens by default
pub const DEFAULT_SWAP_DEVICE: &str = "lhd0raw:";

/// Eviction policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VictimPolicy {
    /// Uniformly random over frames holding user pages
    #[default]
    Random,
    /// Second-chance sweep using the referenced bit
    Clock,
}

/// VM subsystem configuration
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Backing store name handed to the provider
    pub swap_device: String,
    /// First address above every user stack
    pub user_stack_top: VirtAddr,
    /// Upper bound on stack pages; `None` lets the stack grow until it
    /// collides with the heap or a region
    pub max_stack_pages: Option<usize>,
    /// Eviction policy
    pub victim_policy: VictimPolicy,
    /// Seed for the random policy
    pub rng_seed: u64,
    /// Return swap slots to a free list on swap-in and destruction; when
    /// false slots are handed out once and never reused
    pub reclaim_swap_slots: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            swap_device: String::from(DEFAULT_SWAP_DEVICE),
            user_stack_top: VirtAddr::new(USERSTACK),
            max_stack_pages: Some(1024),
            victim_policy: VictimPolicy::Random,
            rng_seed: 0x7e51_a11c,
            reclaim_swap_slots: true,
        }
    }
}

impl VmConfig {
    /// Check if configuration is valid
    pub fn is_valid(&self) -> bool {
        !self.swap_device.is_empty()
            && self.user_stack_top.is_aligned(PAGE_SIZE)
            && self.user_stack_top.as_u64() > 0
            && self.max_stack_pages.map_or(true, |pages| pages > 0)
    }
}
