//! # Two-level Page Table
//!
//! A sparse map from user virtual pages to (optional) physical frames.
//!
//! ```text
//!  first[vpn >> 10] ──► second[vpn & 0x3FF] ──► PageTableEntry { page, backing }
//! ```
//!
//! The top-level array is allocated with the table; each second-level array
//! only once a page in its 4 MiB range is declared. Declaring a page never
//! touches physical memory: the backing frame is requested from the
//! [`FrameAlloc`] when the page is first faulted on.
//!
//! ## Locking
//!
//! Both levels live behind one [`SpinLock`]. Paths that also need the frame
//! allocator (backing a page, copying, freeing) call into it while holding
//! the table lock, never the other way round.

use crate::{AddressSpaceId, FrameAlloc, FrameError};
use alloc::boxed::Box;
use alloc::vec::Vec;
use kernel_memory_addresses::{PhysicalPage, VirtualAddress, VirtualPage};
use kernel_sync::SpinLock;
use log::{trace, warn};

/// Slots per table level.
pub const TABLE_ENTRIES: usize = 1024;

const SECOND_LEVEL_BITS: u32 = 10;
const SECOND_LEVEL_MASK: u32 = (1 << SECOND_LEVEL_BITS) - 1;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PageTableError {
    #[error("virtual address is not page aligned")]
    Unaligned,
    #[error("page is already declared")]
    AlreadyMapped,
    #[error("page is not declared")]
    NotMapped,
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// One declared virtual page.
///
/// `backing` is `None` until the page is first touched.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PageTableEntry {
    page: VirtualPage,
    backing: Option<PhysicalPage>,
}

impl PageTableEntry {
    const fn declared(page: VirtualPage) -> Self {
        Self {
            page,
            backing: None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn page(&self) -> VirtualPage {
        self.page
    }

    #[inline]
    #[must_use]
    pub const fn backing(&self) -> Option<PhysicalPage> {
        self.backing
    }

    #[inline]
    #[must_use]
    pub const fn is_backed(&self) -> bool {
        self.backing.is_some()
    }
}

type SecondLevel = Box<[Option<PageTableEntry>]>;

#[inline]
const fn split_indices(page: VirtualPage) -> (usize, usize) {
    let vpn = page.number();
    (
        (vpn >> SECOND_LEVEL_BITS) as usize,
        (vpn & SECOND_LEVEL_MASK) as usize,
    )
}

/// A table of [`TABLE_ENTRIES`] empty slots, or `FrameError::OutOfMemory`
/// if the kernel heap cannot hold it.
fn empty_level<T: Clone>() -> Result<Box<[Option<T>]>, PageTableError> {
    let mut slots = Vec::new();
    slots
        .try_reserve_exact(TABLE_ENTRIES)
        .map_err(|_| FrameError::OutOfMemory)?;
    slots.resize(TABLE_ENTRIES, None);
    Ok(slots.into_boxed_slice())
}

struct Levels {
    first: Box<[Option<SecondLevel>]>,
    /// Number of declared entries across all second-level arrays.
    mapped: usize,
}

impl Levels {
    fn new() -> Result<Self, PageTableError> {
        Ok(Self {
            first: empty_level()?,
            mapped: 0,
        })
    }

    fn slot(&self, page: VirtualPage) -> Option<&PageTableEntry> {
        let (i1, i2) = split_indices(page);
        self.first[i1].as_ref()?[i2].as_ref()
    }

    fn slot_mut(&mut self, page: VirtualPage) -> Option<&mut Option<PageTableEntry>> {
        let (i1, i2) = split_indices(page);
        Some(&mut self.first[i1].as_mut()?[i2])
    }

    fn declare(&mut self, page: VirtualPage) -> Result<&mut PageTableEntry, PageTableError> {
        let (i1, i2) = split_indices(page);
        let second = match &mut self.first[i1] {
            Some(second) => second,
            empty @ None => empty.insert(empty_level()?),
        };
        let slot = &mut second[i2];
        if slot.is_some() {
            return Err(PageTableError::AlreadyMapped);
        }
        self.mapped += 1;
        Ok(slot.insert(PageTableEntry::declared(page)))
    }

    fn entries(&self) -> impl Iterator<Item = &PageTableEntry> {
        self.first
            .iter()
            .flatten()
            .flat_map(|second| second.iter().flatten())
    }
}

/// Page table of one address space.
///
/// Dropping the table returns every backing frame to the allocator.
pub struct PageTable<'f, A: FrameAlloc + ?Sized> {
    owner: AddressSpaceId,
    frames: &'f A,
    levels: SpinLock<Levels>,
}

impl<'f, A: FrameAlloc + ?Sized> PageTable<'f, A> {
    /// An empty table whose frames will be owned by `owner`.
    ///
    /// # Errors
    /// Fails if the top-level array cannot be allocated.
    pub fn new(owner: AddressSpaceId, frames: &'f A) -> Result<Self, PageTableError> {
        Ok(Self {
            owner,
            frames,
            levels: SpinLock::new(Levels::new()?),
        })
    }

    #[inline]
    #[must_use]
    pub const fn owner(&self) -> AddressSpaceId {
        self.owner
    }

    #[inline]
    #[must_use]
    pub const fn frames(&self) -> &'f A {
        self.frames
    }

    /// Number of declared pages, backed or not.
    #[must_use]
    pub fn mapped_pages(&self) -> usize {
        self.levels.with_lock(|l| l.mapped)
    }

    /// Number of declared pages that have a frame behind them.
    #[must_use]
    pub fn backed_pages(&self) -> usize {
        self.levels
            .with_lock(|l| l.entries().filter(|e| e.is_backed()).count())
    }

    /// Declare the page starting at `va` without backing it.
    ///
    /// # Errors
    /// - [`PageTableError::Unaligned`] if `va` is not a page base.
    /// - [`PageTableError::AlreadyMapped`] if the page is already declared.
    /// - [`PageTableError::Frame`] if a second-level array cannot be allocated.
    pub fn allocate_page(&self, va: VirtualAddress) -> Result<(), PageTableError> {
        let page = VirtualPage::try_from(va).map_err(|()| PageTableError::Unaligned)?;
        self.levels.lock().declare(page)?;
        trace!("{}: declared {page}", self.owner);
        Ok(())
    }

    /// Forget the page starting at `va` and release its frame, if any.
    ///
    /// Freeing a page that is not declared succeeds and does nothing.
    ///
    /// # Errors
    /// - [`PageTableError::Unaligned`] if `va` is not a page base.
    /// - [`PageTableError::Frame`] if the allocator refuses the frame; the
    ///   entry is kept in that case.
    pub fn free_page(&self, va: VirtualAddress) -> Result<(), PageTableError> {
        let page = VirtualPage::try_from(va).map_err(|()| PageTableError::Unaligned)?;
        let mut levels = self.levels.lock();
        let Some(slot) = levels.slot_mut(page) else {
            return Ok(());
        };
        let Some(entry) = *slot else {
            return Ok(());
        };
        if let Some(frame) = entry.backing {
            self.frames.free_user_page(self.owner, frame)?;
        }
        *slot = None;
        levels.mapped -= 1;
        trace!("{}: freed {page}", self.owner);
        Ok(())
    }

    /// The entry for the page containing `va`, if declared.
    #[must_use]
    pub fn get_entry(&self, va: VirtualAddress) -> Option<PageTableEntry> {
        let page = VirtualPage::containing_address(va);
        self.levels.with_lock(|l| l.slot(page).copied())
    }

    /// Make sure the page containing `va` has a frame behind it and return
    /// that frame.
    ///
    /// A page that is already backed keeps its frame.
    ///
    /// # Errors
    /// - [`PageTableError::NotMapped`] if the page was never declared.
    /// - [`PageTableError::Frame`] with [`FrameError::OutOfMemory`] if no
    ///   frame is left; the entry stays unbacked.
    pub fn back_page(&self, va: VirtualAddress) -> Result<PhysicalPage, PageTableError> {
        let page = VirtualPage::containing_address(va);
        let mut levels = self.levels.lock();
        let entry = levels
            .slot_mut(page)
            .and_then(Option::as_mut)
            .ok_or(PageTableError::NotMapped)?;
        if let Some(frame) = entry.backing {
            return Ok(frame);
        }
        let frame = self.frames.alloc_user_page(self.owner, page)?;
        entry.backing = Some(frame);
        trace!("{}: backed {page} with {frame}", self.owner);
        Ok(frame)
    }

    /// Visit every declared entry in ascending page order.
    pub fn for_each_entry(&self, mut f: impl FnMut(&PageTableEntry)) {
        let levels = self.levels.lock();
        for entry in levels.entries() {
            f(entry);
        }
    }

    /// Eagerly duplicate this table for `new_owner`.
    ///
    /// Every declared page is declared in the copy; every backed page gets a
    /// fresh frame owned by `new_owner` holding a byte copy of the original.
    ///
    /// # Errors
    /// Any allocation failure. The partially built copy is dropped, which
    /// releases every frame it had already obtained.
    pub fn copy(&self, new_owner: AddressSpaceId) -> Result<Self, PageTableError> {
        let mut copy = Self::new(new_owner, self.frames)?;
        let source = self.levels.lock();
        let dest = copy.levels.get_mut();

        for entry in source.entries() {
            let new_entry = dest.declare(entry.page)?;
            if let Some(src_frame) = entry.backing {
                let dst_frame = self.frames.alloc_user_page(new_owner, entry.page)?;
                new_entry.backing = Some(dst_frame);
                self.frames.copy_page(src_frame, dst_frame)?;
            }
        }

        drop(source);
        Ok(copy)
    }
}

impl<A: FrameAlloc + ?Sized> Drop for PageTable<'_, A> {
    fn drop(&mut self) {
        let owner = self.owner;
        let frames = self.frames;
        let levels = self.levels.get_mut();

        for second in levels.first.iter_mut().flatten() {
            for slot in second.iter_mut() {
                let Some(entry) = slot.take() else {
                    continue;
                };
                if let Some(frame) = entry.backing
                    && let Err(e) = frames.free_user_page(owner, frame)
                {
                    warn!("{owner}: cannot release {frame} backing {}: {e}", entry.page);
                    panic!("page table frame bookkeeping is corrupt");
                }
                levels.mapped -= 1;
            }
        }

        assert_eq!(levels.mapped, 0, "page table counter out of sync");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CountingFrames;

    fn va(v: u32) -> VirtualAddress {
        VirtualAddress::new(v)
    }

    #[test]
    fn indices_split_the_page_number() {
        let page = VirtualPage::containing_address(va(0x7FFF_F123));
        assert_eq!(split_indices(page), (0x1FF, 0x3FF));
        let page = VirtualPage::containing_address(va(0x0040_1000));
        assert_eq!(split_indices(page), (1, 1));
    }

    #[test]
    fn declared_pages_start_unbacked() {
        let frames = CountingFrames::with_limit(8);
        let pt = PageTable::new(AddressSpaceId::next(), &frames).unwrap();

        pt.allocate_page(va(0x1000)).unwrap();
        let e = pt.get_entry(va(0x1abc)).unwrap();
        assert_eq!(e.page().base(), va(0x1000));
        assert!(!e.is_backed());
        assert_eq!(pt.mapped_pages(), 1);
        assert_eq!(frames.live(), 0);
    }

    #[test]
    fn double_declaration_is_rejected() {
        let frames = CountingFrames::with_limit(8);
        let pt = PageTable::new(AddressSpaceId::next(), &frames).unwrap();
        pt.allocate_page(va(0x2000)).unwrap();
        assert_eq!(
            pt.allocate_page(va(0x2000)),
            Err(PageTableError::AlreadyMapped)
        );
        assert_eq!(pt.mapped_pages(), 1);
    }

    #[test]
    fn unaligned_declaration_is_rejected() {
        let frames = CountingFrames::with_limit(8);
        let pt = PageTable::new(AddressSpaceId::next(), &frames).unwrap();
        assert_eq!(pt.allocate_page(va(0x2004)), Err(PageTableError::Unaligned));
        assert_eq!(pt.mapped_pages(), 0);
    }

    #[test]
    fn backing_is_lazy_and_sticky() {
        let frames = CountingFrames::with_limit(8);
        let id = AddressSpaceId::next();
        let pt = PageTable::new(id, &frames).unwrap();
        pt.allocate_page(va(0x3000)).unwrap();

        let frame = pt.back_page(va(0x3010)).unwrap();
        assert_eq!(frames.owner_of(frame), Some(id));

        assert_eq!(pt.back_page(va(0x3ff0)), Ok(frame));
        assert_eq!(frames.live(), 1);
        assert_eq!(pt.get_entry(va(0x3000)).unwrap().backing(), Some(frame));
    }

    #[test]
    fn backing_an_undeclared_page_fails() {
        let frames = CountingFrames::with_limit(8);
        let pt = PageTable::new(AddressSpaceId::next(), &frames).unwrap();
        assert_eq!(pt.back_page(va(0x5000)), Err(PageTableError::NotMapped));
    }

    #[test]
    fn out_of_frames_leaves_entry_unbacked() {
        let frames = CountingFrames::with_limit(0);
        let pt = PageTable::new(AddressSpaceId::next(), &frames).unwrap();
        pt.allocate_page(va(0x4000)).unwrap();
        assert_eq!(
            pt.back_page(va(0x4000)),
            Err(PageTableError::Frame(FrameError::OutOfMemory))
        );
        assert!(!pt.get_entry(va(0x4000)).unwrap().is_backed());
    }

    #[test]
    fn free_page_releases_frame_and_is_idempotent() {
        let frames = CountingFrames::with_limit(8);
        let pt = PageTable::new(AddressSpaceId::next(), &frames).unwrap();
        pt.allocate_page(va(0x6000)).unwrap();
        pt.back_page(va(0x6000)).unwrap();

        pt.free_page(va(0x6000)).unwrap();
        assert_eq!(pt.get_entry(va(0x6000)), None);
        assert_eq!(pt.mapped_pages(), 0);
        assert_eq!(frames.live(), 0);

        assert_eq!(pt.free_page(va(0x6000)), Ok(()));
        assert_eq!(pt.free_page(va(0x0900_0000)), Ok(()));
    }

    #[test]
    fn copy_duplicates_backed_pages_for_new_owner() {
        let frames = CountingFrames::with_limit(16);
        let a = AddressSpaceId::next();
        let b = AddressSpaceId::next();
        let pt = PageTable::new(a, &frames).unwrap();
        for v in [0x1000, 0x2000, 0x0080_0000] {
            pt.allocate_page(va(v)).unwrap();
        }
        pt.back_page(va(0x1000)).unwrap();
        pt.back_page(va(0x0080_0000)).unwrap();

        let copy = pt.copy(b).unwrap();
        assert_eq!(copy.mapped_pages(), 3);
        assert_eq!(copy.backed_pages(), 2);
        assert!(!copy.get_entry(va(0x2000)).unwrap().is_backed());

        let orig = pt.get_entry(va(0x1000)).unwrap().backing().unwrap();
        let dup = copy.get_entry(va(0x1000)).unwrap().backing().unwrap();
        assert_ne!(orig, dup);
        assert_eq!(frames.owner_of(dup), Some(b));
        assert!(
            frames
                .copies
                .lock()
                .unwrap()
                .contains(&(orig.number(), dup.number()))
        );
    }

    #[test]
    fn failed_copy_releases_partial_frames() {
        let frames = CountingFrames::with_limit(3);
        let pt = PageTable::new(AddressSpaceId::next(), &frames).unwrap();
        for v in [0x1000, 0x2000] {
            pt.allocate_page(va(v)).unwrap();
            pt.back_page(va(v)).unwrap();
        }

        let err = pt.copy(AddressSpaceId::next()).err();
        assert_eq!(err, Some(PageTableError::Frame(FrameError::OutOfMemory)));
        assert_eq!(frames.live(), 2);
    }

    #[test]
    fn drop_returns_every_frame() {
        let frames = CountingFrames::with_limit(8);
        {
            let pt = PageTable::new(AddressSpaceId::next(), &frames).unwrap();
            for v in [0x1000, 0x2000, 0x3000] {
                pt.allocate_page(va(v)).unwrap();
                pt.back_page(va(v)).unwrap();
            }
            pt.allocate_page(va(0x4000)).unwrap();
            assert_eq!(frames.live(), 3);
        }
        assert_eq!(frames.live(), 0);
    }

    #[test]
    fn entries_are_visited_in_page_order() {
        let frames = CountingFrames::with_limit(8);
        let pt = PageTable::new(AddressSpaceId::next(), &frames).unwrap();
        for v in [0x0080_0000, 0x1000, 0x3000] {
            pt.allocate_page(va(v)).unwrap();
        }
        let mut seen = Vec::new();
        pt.for_each_entry(|e| seen.push(e.page().base().as_u32()));
        assert_eq!(seen, vec![0x1000, 0x3000, 0x0080_0000]);
    }
}
