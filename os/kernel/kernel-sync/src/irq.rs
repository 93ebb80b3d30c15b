//! Interrupt masking.
//!
//! The TLB is per-processor state written through a handful of coprocessor
//! registers; an interrupt arriving halfway through such a write could observe
//! (or clobber) a torn translation. Code that touches the TLB therefore raises
//! the interrupt priority level for the duration of the write.
//!
//! The platform provides the actual priority control by implementing
//! [`InterruptMask`] (on MIPS this toggles `IEc` in the status register).
//! [`IrqGuard`] turns it into a scope.

use core::sync::atomic::{AtomicBool, Ordering};

/// Processor interrupt priority control.
pub trait InterruptMask {
    /// Disables interrupts and reports whether they were enabled before.
    fn disable(&self) -> bool;

    /// Restores the state returned by a matching [`disable`](Self::disable).
    fn restore(&self, were_enabled: bool);
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// Guards nest: an inner guard sees interrupts already off and leaves them
/// off when it goes away.
///
/// # Examples
///
/// ```
/// use kernel_sync::{AtomicInterruptMask, IrqGuard};
///
/// let cpu = AtomicInterruptMask::new(true);
/// {
///     let _outer = IrqGuard::new(&cpu);
///     assert!(!cpu.enabled());
///     {
///         let _inner = IrqGuard::new(&cpu);
///     }
///     assert!(!cpu.enabled());
/// }
/// assert!(cpu.enabled());
/// ```
pub struct IrqGuard<'a, I: InterruptMask + ?Sized> {
    mask: &'a I,
    /// Whether interrupts were enabled when the guard was created.
    were_enabled: bool,
}

impl<'a, I: InterruptMask + ?Sized> IrqGuard<'a, I> {
    #[inline]
    #[must_use]
    pub fn new(mask: &'a I) -> Self {
        let were_enabled = mask.disable();
        Self { mask, were_enabled }
    }
}

impl<I: InterruptMask + ?Sized> Drop for IrqGuard<'_, I> {
    fn drop(&mut self) {
        self.mask.restore(self.were_enabled);
    }
}

/// Interrupt state kept in an atomic flag.
///
/// Stands in for the status register where there is no real interrupt
/// controller: on the host and in a uniprocessor simulator.
#[derive(Debug)]
pub struct AtomicInterruptMask {
    enabled: AtomicBool,
}

impl AtomicInterruptMask {
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

impl Default for AtomicInterruptMask {
    fn default() -> Self {
        Self::new(true)
    }
}

impl InterruptMask for AtomicInterruptMask {
    fn disable(&self) -> bool {
        self.enabled.swap(false, Ordering::AcqRel)
    }

    fn restore(&self, were_enabled: bool) {
        if were_enabled {
            self.enabled.store(true, Ordering::Release);
        }
    }
}
