//! # Victim Selection
//!
//! Picks the frame to evict when the coremap has no free frame left. Only
//! frames holding an owned user page are candidates; the caller writes the
//! victim out and re-homes the frame.

use super::FrameDescriptor;
use crate::config::{VictimPolicy, VmConfig};
use alloc::boxed::Box;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Eviction policy
pub trait VictimSelector: Send {
    /// Get policy name
    fn name(&self) -> &'static str;

    /// Choose a victim among `frames`
    ///
    /// Returns `None` if no frame is evictable. Policies may update
    /// bookkeeping bits (such as `referenced`) while scanning.
    fn select(&mut self, frames: &mut [FrameDescriptor]) -> Option<usize>;
}

/// Build the selector named by the configuration
pub fn selector_for(config: &VmConfig) -> Box<dyn VictimSelector> {
    match config.victim_policy {
        VictimPolicy::Random => Box::new(RandomVictim::new(config.rng_seed)),
        VictimPolicy::Clock => Box::new(ClockVictim::new()),
    }
}

/// Uniformly random choice over evictable frames
#[derive(Debug)]
pub struct RandomVictim {
    rng: SmallRng,
}

impl RandomVictim {
    /// Create a selector with a fixed seed
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl VictimSelector for RandomVictim {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select(&mut self, frames: &mut [FrameDescriptor]) -> Option<usize> {
        let candidates = frames.iter().filter(|f| f.is_evictable()).count();
        if candidates == 0 {
            return None;
        }
        let pick = self.rng.gen_range(0..candidates);
        frames
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_evictable())
            .nth(pick)
            .map(|(idx, _)| idx)
    }
}

/// Second-chance clock over evictable frames
#[derive(Debug, Default)]
pub struct ClockVictim {
    hand: usize,
}

impl ClockVictim {
    /// Create a selector with the hand at frame 0
    pub fn new() -> Self {
        Self { hand: 0 }
    }
}

impl VictimSelector for ClockVictim {
    fn name(&self) -> &'static str {
        "clock"
    }

    fn select(&mut self, frames: &mut [FrameDescriptor]) -> Option<usize> {
        let count = frames.len();
        if count == 0 {
            return None;
        }
        self.hand %= count;

        // Two sweeps: the first may only clear referenced bits
        for _ in 0..2 * count {
            let idx = self.hand;
            self.hand = (self.hand + 1) % count;

            let frame = &mut frames[idx];
            if !frame.is_evictable() {
                continue;
            }
            if frame.referenced {
                frame.referenced = false;
            } else {
                return Some(idx);
            }
        }
        None
    }
}
