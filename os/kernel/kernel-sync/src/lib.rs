//! # Kernel synchronization primitives
//!
//! The VM core needs three things from this crate: short-held spin locks for
//! the frame table and the page tables, a write-once cell for state created at
//! boot, and a way to mask interrupts while it rewrites per-processor TLB
//! registers.
//!
//! Lock order used by the VM: a page table's [`SpinLock`] is always taken
//! before the frame table's [`SpinMutex`], never the other way around.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod mutex;
mod raw_spin;
mod spin_lock;
mod sync_once_cell;

pub use irq::{AtomicInterruptMask, InterruptMask, IrqGuard};
pub use mutex::{Mutex, MutexGuard};
pub use raw_spin::RawSpin;
pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;

pub type SpinMutex<T> = Mutex<T, RawSpin>;

impl<T> SpinMutex<T> {
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawSpin::new(), value)
    }
}

/// A raw lock word without any protected data.
pub trait RawLock {
    fn raw_lock(&self);
    fn raw_try_lock(&self) -> bool;
    fn raw_is_locked(&self) -> bool;

    /// # Safety
    /// Only the current holder of the lock may release it.
    unsafe fn raw_unlock(&self);
}
