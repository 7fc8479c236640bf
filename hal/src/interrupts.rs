//! # Interrupt Priority Levels
//!
//! The kernel raises the interrupt priority level ("spl") while it performs
//! short hardware sequences that an interrupt must not observe half done,
//! such as reprogramming the TLB.

/// Interrupt priority level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Spl(pub u8);

impl Spl {
    /// All interrupts enabled
    pub const LOW: Self = Self(0);

    /// All interrupts masked
    pub const HIGH: Self = Self(15);
}

/// Interrupt priority control
pub trait InterruptControl: Send + Sync {
    /// Current priority level
    fn current(&self) -> Spl;

    /// Raise to [`Spl::HIGH`] and return the previous level
    fn splhigh(&self) -> Spl;

    /// Restore a level previously returned by [`InterruptControl::splhigh`]
    fn splx(&self, old: Spl);

    /// Check if interrupts are currently masked
    fn interrupts_masked(&self) -> bool {
        self.current() == Spl::HIGH
    }
}

/// RAII guard that keeps interrupts masked until dropped
#[derive(Debug)]
pub struct SplGuard<'a, I: InterruptControl + ?Sized> {
    control: &'a I,
    previous: Spl,
}

impl<'a, I: InterruptControl + ?Sized> SplGuard<'a, I> {
    /// Raise to high priority
    pub fn raise(control: &'a I) -> Self {
        let previous = control.splhigh();
        Self { control, previous }
    }

    /// Level that will be restored on drop
    pub fn previous(&self) -> Spl {
        self.previous
    }
}

impl<I: InterruptControl + ?Sized> Drop for SplGuard<'_, I> {
    fn drop(&mut self) {
        self.control.splx(self.previous);
    }
}
