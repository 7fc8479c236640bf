//! # Frame Bitmap
//!
//! In-use bitmap over the coremap's frames. Lets the allocator find a free
//! frame or a contiguous free run without walking every descriptor.

use alloc::vec;
use alloc::vec::Vec;

/// Bitmap of frames (1 = used, 0 = free)
#[derive(Debug, Clone)]
pub struct FrameBitmap {
    /// Bitmap data
    words: Vec<u64>,
    /// Total number of frames
    total_frames: usize,
    /// Number of set bits
    used: usize,
}

impl FrameBitmap {
    /// Create a bitmap with every frame free
    pub fn new(total_frames: usize) -> Self {
        Self {
            words: vec![0; total_frames.div_ceil(64)],
            total_frames,
            used: 0,
        }
    }

    /// Number of used frames
    pub fn used(&self) -> usize {
        self.used
    }

    /// Check if a frame is used
    pub fn is_used(&self, frame_idx: usize) -> bool {
        self.words[frame_idx / 64] & (1 << (frame_idx % 64)) != 0
    }

    /// Find first free frame
    pub fn find_free(&self) -> Option<usize> {
        for (word_idx, &word) in self.words.iter().enumerate() {
            if word != u64::MAX {
                // Find the first zero bit
                let bit = (!word).trailing_zeros() as usize;
                let frame_idx = word_idx * 64 + bit;
                if frame_idx < self.total_frames {
                    return Some(frame_idx);
                }
            }
        }
        None
    }

    /// Find the first run of `count` contiguous free frames
    pub fn find_contiguous(&self, count: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }

        let mut start = 0;
        let mut found = 0;

        for frame_idx in 0..self.total_frames {
            if !self.is_used(frame_idx) {
                if found == 0 {
                    start = frame_idx;
                }
                found += 1;
                if found >= count {
                    return Some(start);
                }
            } else {
                // start re-counting
                found = 0;
            }
        }

        None
    }

    /// Set frame as used
    pub fn set_used(&mut self, frame_idx: usize) {
        if !self.is_used(frame_idx) {
            self.words[frame_idx / 64] |= 1 << (frame_idx % 64);
            self.used += 1;
        }
    }

    /// Set frame as free
    pub fn set_free(&mut self, frame_idx: usize) {
        if self.is_used(frame_idx) {
            self.words[frame_idx / 64] &= !(1 << (frame_idx % 64));
            self.used -= 1;
        }
    }
}
