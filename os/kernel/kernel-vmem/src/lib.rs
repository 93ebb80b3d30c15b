//! # Virtual Memory Support
//!
//! Per-process virtual memory for a 32-bit machine with a software-managed
//! TLB. There is no hardware page walker: every user access that misses the
//! TLB traps into the kernel, which looks the page up in a software
//! [`PageTable`] and writes a translation into one of the TLB slots.
//!
//! ## What you get
//! - An [`AddressSpace`] made of [`Segment`]s (text/data regions, heap, stack)
//!   that owns one [`PageTable`].
//! - A two-level sparse [`PageTable`] whose entries are declared eagerly and
//!   backed by physical frames lazily, on first touch.
//! - The TLB register encoding ([`tlb::EntryHi`], [`tlb::EntryLo`]) and a
//!   [`Tlb`](tlb::Tlb) trait for the per-processor translation cache.
//! - A tiny allocator/mapper interface ([`FrameAlloc`], [`PhysMapper`]) that
//!   the frame allocator implements.
//!
//! ## 32-bit Virtual Address → Page Table Walk
//!
//! ```text
//! | 31‒22 | 21‒12  | 11‒0   |
//! | first | second | Offset |
//! ```
//!
//! The first ten bits of the virtual page number pick a slot in the top-level
//! array; the next ten pick an entry in the lazily allocated second-level
//! array. Each level therefore has 1024 slots.
//!
//! ## Entry lifecycle
//!
//! ```text
//! unmapped ──allocate_page──► mapped, unbacked ──first fault──► mapped, backed
//!    ▲                                                               │
//!    └──────────────────── free_page / table drop ◄──────────────────┘
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod address_space;
mod asid;
pub mod page_table;
pub mod tlb;

extern crate alloc;

pub use crate::address_space::{AddressSpace, AddressSpaceError, Permissions, Segment};
pub use crate::asid::AddressSpaceId;
pub use crate::page_table::{PageTable, PageTableEntry, PageTableError};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage, VirtualPage};

/// Failure modes of the physical frame allocator.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("no free physical frame")]
    OutOfMemory,
    #[error("no run of {frames} free contiguous frames")]
    NoContiguousRun { frames: u32 },
    #[error("zero frames requested")]
    ZeroFrames,
    #[error("address is not frame aligned")]
    Unaligned,
    #[error("address is outside managed RAM")]
    Unmanaged,
    #[error("frame is not allocated")]
    NotAllocated,
    #[error("frame belongs to another owner")]
    NotOwner,
    #[error("frame is not writable")]
    NotWritable,
    #[error("frame is not the start of an allocation")]
    NotRunStart,
}

/// Source of **physical** 4 KiB frames for user pages.
///
/// Implemented by the coremap. Every frame handed out is tagged with the
/// address space that asked for it; only that address space may give it
/// back.
///
/// Methods take `&self`: implementations serialize internally, so a page
/// table can call them while holding its own lock.
pub trait FrameAlloc {
    /// Allocate one zeroed frame owned by `owner` and remember that it backs
    /// `page`.
    ///
    /// # Errors
    /// [`FrameError::OutOfMemory`] when every frame is in use.
    fn alloc_user_page(
        &self,
        owner: AddressSpaceId,
        page: VirtualPage,
    ) -> Result<PhysicalPage, FrameError>;

    /// Return a frame previously obtained through
    /// [`alloc_user_page`](Self::alloc_user_page) by the same `owner`.
    ///
    /// # Errors
    /// Rejects unmanaged, free, or foreign frames without changing anything.
    fn free_user_page(&self, owner: AddressSpaceId, frame: PhysicalPage)
    -> Result<(), FrameError>;

    /// Duplicate the contents of `src` into `dst`.
    ///
    /// # Errors
    /// Both frames must be managed; `dst` must be allocated and writable.
    fn copy_page(&self, src: PhysicalPage, dst: PhysicalPage) -> Result<(), FrameError>;
}

/// Converts physical addresses to *temporarily* usable pointers in the current
/// virtual address space.
///
/// Typical patterns:
/// - **Kernel**: RAM is reachable through the cached KSEG0 window; add the
///   window base before returning a pointer.
/// - **Host tests**: physical memory is a leaked heap buffer; add the
///   buffer's address instead.
///
/// # Safety
/// - You must ensure `pa` is backed by memory that is writable through the
///   returned reference.
/// - Lifetime `'a` is purely borrow-checked; the mapping must remain valid
///   for `'a`.
/// - Type `T` must match the bytes at `pa` (no aliasing UB).
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// See the trait documentation.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// The bytes of one frame.
    ///
    /// # Safety
    /// Same contract as [`phys_to_mut`](Self::phys_to_mut); the caller must
    /// also hold whatever lock makes it the frame's only accessor.
    #[inline]
    unsafe fn frame_bytes<'a>(&self, frame: PhysicalPage) -> &'a mut [u8; PAGE_SIZE as usize] {
        unsafe { self.phys_to_mut(frame.base()) }
    }
}
