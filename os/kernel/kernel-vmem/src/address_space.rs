//! # Address Space
//!
//! One user process's view of memory: a [`PageTable`] plus the list of
//! [`Segment`]s the process is allowed to touch.
//!
//! ## Highlights
//!
//! - [`AddressSpace::define_region`] declares every page of a segment up
//!   front; frames arrive lazily through the fault path.
//! - [`AddressSpace::define_stack`] places the fixed-size stack right below
//!   the user/kernel split and returns the initial stack pointer.
//! - [`AddressSpace::define_heap`] and [`AddressSpace::sbrk`] manage a
//!   growable heap segment.
//! - [`AddressSpace::copy`] duplicates everything eagerly for `fork`.
//! - Dropping an address space releases every frame it owns.
//!
//! ## Segment slots
//!
//! Segments sit in a slot array that starts with four slots and grows by one
//! when no slot is free. The heap and the stack are ordinary slots that the
//! address space also remembers by index.

mod segment;

pub use segment::{Permissions, Segment};

use crate::{AddressSpaceId, FrameAlloc, FrameError, PageTable, PageTableError};
use alloc::vec::Vec;
use kernel_info::errno::{EFAULT, EINVAL, ENOMEM};
use kernel_info::memory::{USER_STACK_BASE, USER_STACK_SIZE, USER_STACK_TOP, USERSPACE_TOP};
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress, VirtualPage};
use log::{debug, warn};

const INITIAL_SEGMENT_SLOTS: usize = 4;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AddressSpaceError {
    #[error("region reaches into kernel space")]
    KernelAddress,
    #[error("region overlaps an existing segment")]
    Overlap,
    #[error("region is empty")]
    EmptyRegion,
    #[error("stack is already defined")]
    StackExists,
    #[error("heap is already defined")]
    HeapExists,
    #[error("no heap is defined")]
    NoHeap,
    #[error("heap cannot shrink below its start")]
    HeapUnderflow,
    #[error("segment table cannot grow")]
    OutOfMemory,
    #[error(transparent)]
    PageTable(#[from] PageTableError),
}

impl AddressSpaceError {
    /// Error number reported to user space.
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            Self::KernelAddress => EFAULT,
            Self::OutOfMemory
            | Self::PageTable(PageTableError::Frame(FrameError::OutOfMemory)) => ENOMEM,
            _ => EINVAL,
        }
    }
}

pub struct AddressSpace<'f, A: FrameAlloc + ?Sized> {
    page_table: PageTable<'f, A>,
    segments: Vec<Option<Segment>>,
    heap: Option<usize>,
    stack: Option<usize>,
}

impl<'f, A: FrameAlloc + ?Sized> AddressSpace<'f, A> {
    /// An empty address space drawing frames from `frames`.
    ///
    /// # Errors
    /// [`AddressSpaceError::OutOfMemory`] or a page table error if the kernel
    /// heap cannot hold the empty structures.
    pub fn create(frames: &'f A) -> Result<Self, AddressSpaceError> {
        let id = AddressSpaceId::next();
        let page_table = PageTable::new(id, frames)?;

        let mut segments = Vec::new();
        segments
            .try_reserve_exact(INITIAL_SEGMENT_SLOTS)
            .map_err(|_| AddressSpaceError::OutOfMemory)?;
        segments.resize(INITIAL_SEGMENT_SLOTS, None);

        debug!("{id}: created");
        Ok(Self {
            page_table,
            segments,
            heap: None,
            stack: None,
        })
    }

    #[inline]
    #[must_use]
    pub const fn id(&self) -> AddressSpaceId {
        self.page_table.owner()
    }

    #[inline]
    #[must_use]
    pub const fn page_table(&self) -> &PageTable<'f, A> {
        &self.page_table
    }

    /// All defined segments, in slot order.
    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().flatten()
    }

    /// Number of segment slots, used or free.
    #[must_use]
    pub fn segment_slots(&self) -> usize {
        self.segments.len()
    }

    /// The segment `va` falls into, if any.
    #[must_use]
    pub fn segment_containing(&self, va: VirtualAddress) -> Option<&Segment> {
        self.segments().find(|s| s.contains(va))
    }

    #[must_use]
    pub fn heap(&self) -> Option<&Segment> {
        self.heap.and_then(|i| self.segments[i].as_ref())
    }

    #[must_use]
    pub fn stack(&self) -> Option<&Segment> {
        self.stack.and_then(|i| self.segments[i].as_ref())
    }

    /// Declare a segment covering `[vaddr, vaddr + size)`, widened to whole
    /// pages.
    ///
    /// Every page of the segment is declared in the page table; none is
    /// backed. `permissions` are recorded only.
    ///
    /// # Errors
    /// - [`AddressSpaceError::KernelAddress`] if the region is not entirely
    ///   below the user/kernel split.
    /// - [`AddressSpaceError::EmptyRegion`] if `size` is zero.
    /// - [`AddressSpaceError::Overlap`] if it intersects another segment.
    /// - [`AddressSpaceError::OutOfMemory`] and page table errors on
    ///   allocation failure. Nothing is left declared in that case.
    pub fn define_region(
        &mut self,
        vaddr: VirtualAddress,
        size: u32,
        permissions: Permissions,
    ) -> Result<(), AddressSpaceError> {
        if vaddr.as_u32() >= USERSPACE_TOP {
            return Err(AddressSpaceError::KernelAddress);
        }
        if size == 0 {
            return Err(AddressSpaceError::EmptyRegion);
        }

        let (page, offset) = vaddr.split();
        let span = u64::from(offset.as_u32()) + u64::from(size);
        let pages = u32::try_from(span.div_ceil(u64::from(PAGE_SIZE)))
            .map_err(|_| AddressSpaceError::KernelAddress)?;

        let segment = Segment::new(page, pages, permissions);
        self.check_free(segment.start(), segment.end())?;
        self.add_segment(segment)?;
        Ok(())
    }

    /// Declare the user stack and return the initial stack pointer.
    ///
    /// # Errors
    /// [`AddressSpaceError::StackExists`] on a second call; otherwise as
    /// [`define_region`](Self::define_region).
    pub fn define_stack(&mut self) -> Result<VirtualAddress, AddressSpaceError> {
        if self.stack.is_some() {
            return Err(AddressSpaceError::StackExists);
        }

        let base = VirtualPage::containing_address(VirtualAddress::new(USER_STACK_BASE));
        let segment = Segment::new(base, USER_STACK_SIZE / PAGE_SIZE, Permissions::RW);
        self.check_free(segment.start(), segment.end())?;
        self.stack = Some(self.add_segment(segment)?);
        Ok(VirtualAddress::new(USER_STACK_TOP))
    }

    /// Declare an empty heap starting at the first page boundary at or above
    /// `vaddr`.
    ///
    /// # Errors
    /// - [`AddressSpaceError::HeapExists`] on a second call.
    /// - [`AddressSpaceError::KernelAddress`] if the start is not user space.
    /// - [`AddressSpaceError::Overlap`] if the start lies inside a segment.
    pub fn define_heap(&mut self, vaddr: VirtualAddress) -> Result<(), AddressSpaceError> {
        if self.heap.is_some() {
            return Err(AddressSpaceError::HeapExists);
        }
        let start = vaddr
            .align_up()
            .filter(|s| s.as_u32() < USERSPACE_TOP)
            .ok_or(AddressSpaceError::KernelAddress)?;
        if self.segment_containing(start).is_some() {
            return Err(AddressSpaceError::Overlap);
        }

        let segment = Segment::new(VirtualPage::containing_address(start), 0, Permissions::RW);
        self.heap = Some(self.insert_segment(segment)?);
        debug!("{}: heap at {start}", self.id());
        Ok(())
    }

    /// Move the heap break by `delta_pages` and return the old break.
    ///
    /// Growing declares the new pages; shrinking frees the pages past the new
    /// break together with their frames. Cached TLB translations of freed
    /// pages are not touched; the MMU's `sbrk` drops them first.
    ///
    /// # Errors
    /// - [`AddressSpaceError::NoHeap`] before [`define_heap`](Self::define_heap).
    /// - [`AddressSpaceError::HeapUnderflow`] when shrinking past the heap
    ///   start.
    /// - [`AddressSpaceError::KernelAddress`] / [`AddressSpaceError::Overlap`]
    ///   when growing into kernel space or another segment.
    pub fn sbrk(&mut self, delta_pages: i32) -> Result<VirtualAddress, AddressSpaceError> {
        let index = self.heap.ok_or(AddressSpaceError::NoHeap)?;
        let heap = self.segments[index].ok_or(AddressSpaceError::NoHeap)?;
        let old_break = heap.page_base(heap.pages());
        let delta = delta_pages.unsigned_abs();

        if delta_pages > 0 {
            let end = heap.end() + u64::from(delta) * u64::from(PAGE_SIZE);
            self.check_free(old_break, end)?;
            self.declare_pages(old_break, delta)?;
            self.resize_segment(index, heap.pages() + delta);
        } else if delta_pages < 0 {
            if delta > heap.pages() {
                return Err(AddressSpaceError::HeapUnderflow);
            }
            for page in (heap.pages() - delta..heap.pages()).rev() {
                self.page_table.free_page(heap.page_base(page))?;
                self.resize_segment(index, page);
            }
        }

        Ok(old_break)
    }

    /// Eagerly duplicate this address space for a child process.
    ///
    /// # Errors
    /// Any allocation failure; everything the copy had obtained is released
    /// before returning.
    pub fn copy(&self) -> Result<Self, AddressSpaceError> {
        let id = AddressSpaceId::next();
        let page_table = self.page_table.copy(id)?;

        let mut segments = Vec::new();
        segments
            .try_reserve_exact(self.segments.len())
            .map_err(|_| AddressSpaceError::OutOfMemory)?;
        segments.extend_from_slice(&self.segments);

        debug!(
            "{}: copied into {id} ({} pages)",
            self.id(),
            page_table.mapped_pages()
        );
        Ok(Self {
            page_table,
            segments,
            heap: self.heap,
            stack: self.stack,
        })
    }

    /// Rejects `[start, end)` if it leaves user space or meets a segment.
    fn check_free(&self, start: VirtualAddress, end: u64) -> Result<(), AddressSpaceError> {
        if end > u64::from(USERSPACE_TOP) {
            return Err(AddressSpaceError::KernelAddress);
        }
        let start = u64::from(start.as_u32());
        if self.segments().any(|s| s.overlaps(start, end)) {
            return Err(AddressSpaceError::Overlap);
        }
        Ok(())
    }

    /// Puts `segment` into the first free slot, growing the slot array if
    /// needed.
    fn insert_segment(&mut self, segment: Segment) -> Result<usize, AddressSpaceError> {
        if let Some(index) = self.segments.iter().position(Option::is_none) {
            self.segments[index] = Some(segment);
            return Ok(index);
        }
        self.segments
            .try_reserve(1)
            .map_err(|_| AddressSpaceError::OutOfMemory)?;
        self.segments.push(Some(segment));
        Ok(self.segments.len() - 1)
    }

    fn add_segment(&mut self, segment: Segment) -> Result<usize, AddressSpaceError> {
        let index = self.insert_segment(segment)?;
        if let Err(e) = self.declare_pages(segment.start(), segment.pages()) {
            self.segments[index] = None;
            return Err(e);
        }
        debug!(
            "{}: segment {} at {} ({} pages)",
            self.id(),
            index,
            segment.start(),
            segment.pages()
        );
        Ok(index)
    }

    /// Declares `count` pages from `start`; on failure frees the ones
    /// already declared.
    fn declare_pages(&self, start: VirtualAddress, count: u32) -> Result<(), AddressSpaceError> {
        for i in 0..count {
            if let Err(e) = self.page_table.allocate_page(start + i * PAGE_SIZE) {
                for j in 0..i {
                    if let Err(undo) = self.page_table.free_page(start + j * PAGE_SIZE) {
                        warn!("{}: cannot undo declaration: {undo}", self.id());
                    }
                }
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn resize_segment(&mut self, index: usize, pages: u32) {
        if let Some(segment) = self.segments[index].as_mut() {
            segment.set_pages(pages);
        }
    }
}

impl<A: FrameAlloc + ?Sized> Drop for AddressSpace<'_, A> {
    fn drop(&mut self) {
        debug!(
            "{}: destroyed ({} pages)",
            self.id(),
            self.page_table.mapped_pages()
        );
    }
}
