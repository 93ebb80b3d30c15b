//! # Coremap
//!
//! The frame table: one [`FrameEntry`] per physical frame the kernel manages.
//!
//! ## Layout
//!
//! ```text
//! first_free                                                        end
//! │ entry array (bookkeeping frames) │ frame 0 │ frame 1 │ ... │ frame n-1 │
//!                                    ▲
//!                                    first managed frame
//! ```
//!
//! The entry array lives in the first free frames of RAM; those frames are
//! not managed. Frame `i` of the table is the physical page
//! `first managed + i`.
//!
//! ## Contiguous runs
//!
//! Kernel allocations may span several frames and are freed by their first
//! address alone. The first frame of a run has `contiguous` clear; every
//! following frame of the same run has it set. Freeing walks forward from the
//! start until a frame is free or starts a new allocation.
//!
//! All scans and updates happen under one [`SpinMutex`].

use core::fmt;
use core::slice;

use bitfield_struct::bitfield;
use kernel_info::boot::RamInfo;
use kernel_info::memory::{KSEG0_SIZE, kvaddr_to_paddr, paddr_to_kvaddr};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage};
use kernel_sync::SpinMutex;
use kernel_vmem::{AddressSpaceId, FrameAlloc, FrameError, PhysMapper};
use log::{info, trace, warn};

/// Packed per-frame state word.
///
/// | Bits  | Field         |
/// |-------|---------------|
/// | 0     | `allocated`   |
/// | 1     | `contiguous`  |
/// | 2     | `writable`    |
/// | 3‒11  | unused        |
/// | 12‒31 | `page_number` |
#[bitfield(u32)]
#[derive(Eq, PartialEq)]
pub struct FrameStatus {
    pub allocated: bool,
    /// Continues the allocation that started at an earlier frame.
    pub contiguous: bool,
    pub writable: bool,
    #[bits(9)]
    __: u16,
    /// Physical page number; fixed at boot.
    #[bits(20)]
    pub page_number: u32,
}

/// One frame table entry.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct FrameEntry {
    /// `None` for kernel frames and free frames.
    owner: Option<AddressSpaceId>,
    /// Virtual address the frame was last handed out for.
    vaddr: VirtualAddress,
    status: FrameStatus,
}

impl FrameEntry {
    const fn free(frame: PhysicalPage) -> Self {
        Self {
            owner: None,
            vaddr: VirtualAddress::new(0),
            status: FrameStatus::new().with_page_number(frame.number()),
        }
    }

    const fn frame(&self) -> PhysicalPage {
        PhysicalPage::from_number(self.status.page_number())
    }

    const fn is_free(&self) -> bool {
        !self.status.allocated()
    }

    const fn claim(&mut self, owner: Option<AddressSpaceId>, vaddr: VirtualAddress, contiguous: bool) {
        self.owner = owner;
        self.vaddr = vaddr;
        self.status = self
            .status
            .with_allocated(true)
            .with_contiguous(contiguous)
            .with_writable(true);
    }

    const fn release(&mut self) {
        self.owner = None;
        self.vaddr = VirtualAddress::new(0);
        self.status = self
            .status
            .with_allocated(false)
            .with_contiguous(false)
            .with_writable(false);
    }
}

/// Snapshot of one frame's bookkeeping.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrameInfo {
    pub frame: PhysicalPage,
    pub owner: Option<AddressSpaceId>,
    pub vaddr: VirtualAddress,
    pub allocated: bool,
    pub contiguous: bool,
    pub writable: bool,
}

impl From<&FrameEntry> for FrameInfo {
    fn from(e: &FrameEntry) -> Self {
        Self {
            frame: e.frame(),
            owner: e.owner,
            vaddr: e.vaddr,
            allocated: e.status.allocated(),
            contiguous: e.status.contiguous(),
            writable: e.status.writable(),
        }
    }
}

struct Table {
    entries: &'static mut [FrameEntry],
    free: u32,
}

impl Table {
    /// Index of the first run of `n` free frames.
    fn find_run(&self, n: usize) -> Option<usize> {
        let mut run = 0;
        for (i, e) in self.entries.iter().enumerate() {
            if e.is_free() {
                run += 1;
                if run == n {
                    return Some(i + 1 - n);
                }
            } else {
                run = 0;
            }
        }
        None
    }

    /// Frees the run starting at `start`, returning the number of frames
    /// released.
    fn free_run(&mut self, start: usize) -> u32 {
        self.entries[start].release();
        let mut freed = 1;
        for e in &mut self.entries[start + 1..] {
            if e.is_free() || !e.status.contiguous() {
                break;
            }
            e.release();
            freed += 1;
        }
        self.free += freed;
        freed
    }
}

/// Frame geometry derived from the boot handoff.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Geometry {
    /// First byte of the entry array.
    pub table: PhysicalAddress,
    /// Frames holding the entry array.
    pub bookkeeping_frames: u32,
    /// First frame handed out by the allocator.
    pub first_managed: PhysicalPage,
    /// Frames handed out by the allocator.
    pub managed_frames: u32,
}

impl Geometry {
    /// Splits `[first_free, end)` into bookkeeping and managed frames.
    ///
    /// The entry array is sized for every free frame and rounded up to whole
    /// frames; the frames it covers are then taken away from management.
    ///
    /// RAM past the end of the KSEG0 direct map is ignored: the kernel could
    /// not address it.
    #[must_use]
    pub fn for_ram(ram: &RamInfo) -> Self {
        let ram = &Self::within_direct_map(ram);
        let table = ram.first_free.align_up().unwrap_or(ram.end);
        let frames = ram.free_frames();
        let bytes = u64::from(frames) * size_of::<FrameEntry>() as u64;
        let bookkeeping = u32::try_from(bytes.div_ceil(u64::from(PAGE_SIZE)))
            .unwrap_or(u32::MAX)
            .min(frames);
        let managed = frames - bookkeeping;
        let first_managed = PhysicalPage::from_addr(table).checked_add_pages(bookkeeping);
        Self {
            table,
            bookkeeping_frames: bookkeeping,
            first_managed: first_managed.unwrap_or(PhysicalPage::from_addr(table)),
            managed_frames: if first_managed.is_some() { managed } else { 0 },
        }
    }

    fn within_direct_map(ram: &RamInfo) -> RamInfo {
        if ram.end.as_u32() <= KSEG0_SIZE {
            return *ram;
        }
        warn!(
            "coremap: ignoring {:#x} bytes of RAM above the direct map",
            ram.end.as_u32().saturating_sub(KSEG0_SIZE.max(ram.first_free.as_u32()))
        );
        RamInfo::new(ram.first_free, PhysicalAddress::new(KSEG0_SIZE))
    }
}

/// The physical frame allocator.
pub struct Coremap<M: PhysMapper> {
    mapper: M,
    geometry: Geometry,
    table: SpinMutex<Table>,
}

impl<M: PhysMapper> Coremap<M> {
    /// Builds the frame table inside the RAM described by `ram`.
    ///
    /// # Safety
    /// - `mapper` must map all of `[ram.first_free, ram.end)` writable for
    ///   the rest of the program.
    /// - Nothing else may use that range afterwards except through this
    ///   coremap.
    pub unsafe fn bootstrap(mapper: M, ram: RamInfo) -> Self {
        let geometry = Geometry::for_ram(&ram);
        let count = geometry.managed_frames as usize;

        let entries: &'static mut [FrameEntry] = if count == 0 {
            &mut []
        } else {
            unsafe {
                let first: &'static mut FrameEntry = mapper.phys_to_mut(geometry.table);
                slice::from_raw_parts_mut(core::ptr::from_mut(first), count)
            }
        };

        let mut frame = geometry.first_managed;
        for entry in entries.iter_mut() {
            *entry = FrameEntry::free(frame);
            frame = frame.checked_add_pages(1).unwrap_or(frame);
        }

        info!(
            "coremap: {} frames managed from {}, {} bookkeeping frames at {}",
            geometry.managed_frames,
            geometry.first_managed,
            geometry.bookkeeping_frames,
            geometry.table
        );

        Self {
            mapper,
            geometry,
            table: SpinMutex::new(Table {
                entries,
                free: geometry.managed_frames,
            }),
        }
    }

    #[inline]
    #[must_use]
    pub const fn geometry(&self) -> Geometry {
        self.geometry
    }

    #[inline]
    #[must_use]
    pub const fn total_frames(&self) -> u32 {
        self.geometry.managed_frames
    }

    #[must_use]
    pub fn free_frames(&self) -> u32 {
        self.table.lock().free
    }

    /// Bytes of managed memory currently allocated.
    ///
    /// A snapshot; concurrent allocations may change it immediately.
    #[must_use]
    pub fn used_bytes(&self) -> u32 {
        (self.total_frames() - self.free_frames()) * PAGE_SIZE
    }

    /// Table index of the frame at `pa`.
    ///
    /// # Errors
    /// [`FrameError::Unaligned`] or [`FrameError::Unmanaged`].
    pub fn frame_index(&self, pa: PhysicalAddress) -> Result<usize, FrameError> {
        if !pa.is_page_aligned() {
            return Err(FrameError::Unaligned);
        }
        let first = self.geometry.first_managed.number();
        let index = pa
            .page()
            .number()
            .checked_sub(first)
            .filter(|&i| i < self.geometry.managed_frames)
            .ok_or(FrameError::Unmanaged)?;
        Ok(index as usize)
    }

    #[must_use]
    pub fn frame_info(&self, pa: PhysicalAddress) -> Option<FrameInfo> {
        let index = self.frame_index(pa).ok()?;
        Some(FrameInfo::from(&self.table.lock().entries[index]))
    }

    /// Allocates `n` physically contiguous frames for the kernel and returns
    /// the KSEG0 address of the first one.
    ///
    /// Nothing is changed on failure.
    ///
    /// # Errors
    /// - [`FrameError::ZeroFrames`] for `n == 0`.
    /// - [`FrameError::NoContiguousRun`] if no run of `n` free frames exists.
    pub fn allocate_contiguous(&self, n: u32) -> Result<VirtualAddress, FrameError> {
        if n == 0 {
            return Err(FrameError::ZeroFrames);
        }

        let mut table = self.table.lock();
        let start = (table.free >= n)
            .then(|| table.find_run(n as usize))
            .flatten()
            .ok_or(FrameError::NoContiguousRun { frames: n })
            .inspect_err(|e| warn!("coremap: {e}"))?;

        let base = table.entries[start].frame().base();
        let kva = paddr_to_kvaddr(base);
        for (i, entry) in table.entries[start..start + n as usize].iter_mut().enumerate() {
            let pa = entry.frame().base();
            entry.claim(None, paddr_to_kvaddr(pa), i != 0);
        }
        table.free -= n;
        trace!("coremap: {n} kernel frames at {base}");
        Ok(kva)
    }

    /// Releases the kernel allocation starting at table index `index` and
    /// returns the number of frames freed.
    ///
    /// # Errors
    /// Rejects out-of-range indices, free frames, frames in the middle of a
    /// run, and user frames; nothing is changed then.
    pub fn free_contiguous(&self, index: usize) -> Result<u32, FrameError> {
        let mut table = self.table.lock();
        let entry = table.entries.get(index).ok_or(FrameError::Unmanaged)?;
        if entry.is_free() {
            return Err(FrameError::NotAllocated);
        }
        if entry.status.contiguous() {
            return Err(FrameError::NotRunStart);
        }
        if entry.owner.is_some() {
            return Err(FrameError::NotOwner);
        }
        let freed = table.free_run(index);
        trace!("coremap: released {freed} kernel frames at index {index}");
        Ok(freed)
    }

    /// Releases a kernel allocation by its KSEG0 address.
    ///
    /// # Errors
    /// As [`free_contiguous`](Self::free_contiguous), plus
    /// [`FrameError::Unmanaged`] for addresses outside KSEG0 and
    /// [`FrameError::Unaligned`].
    pub fn free_kernel_pages(&self, kva: VirtualAddress) -> Result<u32, FrameError> {
        let pa = kvaddr_to_paddr(kva).ok_or(FrameError::Unmanaged)?;
        let index = self.frame_index(pa)?;
        self.free_contiguous(index)
            .inspect_err(|e| warn!("coremap: refusing to free {kva}: {e}"))
    }

    /// Allocates one zeroed frame for `owner`, first fit.
    ///
    /// # Errors
    /// [`FrameError::OutOfMemory`] when every frame is in use.
    pub fn allocate_user_page(
        &self,
        owner: AddressSpaceId,
        page: VirtualPage,
    ) -> Result<PhysicalPage, FrameError> {
        let frame = {
            let mut table = self.table.lock();
            let entry = table
                .entries
                .iter_mut()
                .find(|e| e.is_free())
                .ok_or(FrameError::OutOfMemory)?;
            entry.claim(Some(owner), page.base(), false);
            let frame = entry.frame();
            table.free -= 1;
            frame
        };

        // SAFETY: the frame was just claimed; nobody else references it.
        unsafe { self.mapper.frame_bytes(frame) }.fill(0);
        trace!("coremap: {frame} -> {owner} at {page}");
        Ok(frame)
    }

    /// Returns a user frame.
    ///
    /// # Errors
    /// [`FrameError::NotOwner`] if `owner` does not own the frame, plus the
    /// errors of [`frame_index`](Self::frame_index) and
    /// [`FrameError::NotAllocated`].
    pub fn free_user_page(
        &self,
        owner: AddressSpaceId,
        frame: PhysicalPage,
    ) -> Result<(), FrameError> {
        let index = self.frame_index(frame.base())?;
        let mut table = self.table.lock();
        let entry = &mut table.entries[index];
        if entry.is_free() {
            warn!("coremap: {owner} frees free frame {frame}");
            return Err(FrameError::NotAllocated);
        }
        if entry.owner != Some(owner) {
            warn!("coremap: {owner} frees {frame} owned by {:?}", entry.owner);
            return Err(FrameError::NotOwner);
        }
        entry.release();
        table.free += 1;
        trace!("coremap: {frame} <- {owner}");
        Ok(())
    }

    /// Copies the contents of `src` into `dst`.
    ///
    /// # Errors
    /// Either frame unmanaged; `dst` free ([`FrameError::NotAllocated`]) or
    /// read-only ([`FrameError::NotWritable`]).
    pub fn copy_page(&self, src: PhysicalPage, dst: PhysicalPage) -> Result<(), FrameError> {
        self.frame_index(src.base())?;
        let dst_index = self.frame_index(dst.base())?;

        let table = self.table.lock();
        let status = table.entries[dst_index].status;
        if !status.allocated() {
            return Err(FrameError::NotAllocated);
        }
        if !status.writable() {
            return Err(FrameError::NotWritable);
        }
        if src == dst {
            return Ok(());
        }

        // SAFETY: both frames are managed and distinct; the table lock keeps
        // them from being released mid-copy.
        unsafe {
            let from: &[u8; PAGE_SIZE as usize] = self.mapper.frame_bytes(src);
            self.mapper.frame_bytes(dst).copy_from_slice(from);
        }
        drop(table);
        Ok(())
    }
}

impl<M: PhysMapper> FrameAlloc for Coremap<M> {
    fn alloc_user_page(
        &self,
        owner: AddressSpaceId,
        page: VirtualPage,
    ) -> Result<PhysicalPage, FrameError> {
        self.allocate_user_page(owner, page)
    }

    fn free_user_page(
        &self,
        owner: AddressSpaceId,
        frame: PhysicalPage,
    ) -> Result<(), FrameError> {
        Self::free_user_page(self, owner, frame)
    }

    fn copy_page(&self, src: PhysicalPage, dst: PhysicalPage) -> Result<(), FrameError> {
        Self::copy_page(self, src, dst)
    }
}

impl<M: PhysMapper> fmt::Debug for Coremap<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coremap")
            .field("geometry", &self.geometry)
            .field("free", &self.free_frames())
            .finish_non_exhaustive()
    }
}
