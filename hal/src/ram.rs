//! # Physical RAM Abstraction
//!
//! Physical memory as seen by the kernel through the direct-mapped segment.

use crate::{HalResult, PhysAddr};

/// Physical memory abstraction trait
///
/// All byte accessors take physical addresses; the caller guarantees that
/// the range lies inside RAM.
pub trait PhysicalMemory: Send + Sync {
    /// Report `(first_free, last)`: the first physical address not yet handed
    /// out by [`PhysicalMemory::steal`] and the end of RAM
    fn getsize(&self) -> (PhysAddr, PhysAddr);

    /// Hand out `npages` contiguous pages from the bottom of free RAM
    ///
    /// Only meaningful before the coremap takes ownership of physical memory.
    fn steal(&self, npages: usize) -> Option<PhysAddr>;

    /// Fill `len` bytes at `paddr` with zeroes
    fn zero(&self, paddr: PhysAddr, len: usize) -> HalResult<()>;

    /// Copy `dest.len()` bytes from `paddr` into `dest`
    fn read(&self, paddr: PhysAddr, dest: &mut [u8]) -> HalResult<()>;

    /// Copy `src` to `paddr`
    fn write(&self, paddr: PhysAddr, src: &[u8]) -> HalResult<()>;

    /// Copy `len` bytes from `src` to `dst`
    fn copy(&self, src: PhysAddr, dst: PhysAddr, len: usize) -> HalResult<()>;
}
