use bitfield_struct::bitfield;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress, VirtualPage};

/// Access rights requested for a segment.
///
/// Recorded with the segment but not enforced: every page is mapped
/// read-write in the TLB.
#[bitfield(u8)]
#[derive(Eq, PartialEq)]
pub struct Permissions {
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    #[bits(5)]
    __: u8,
}

impl Permissions {
    /// Read + write, as used for the stack and the heap.
    pub const RW: Self = Self::new().with_readable(true).with_writable(true);

    /// Read + execute, the usual text segment.
    pub const RX: Self = Self::new().with_readable(true).with_executable(true);
}

/// A page-aligned virtual range a process may touch.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Segment {
    start: VirtualPage,
    pages: u32,
    permissions: Permissions,
}

impl Segment {
    pub(crate) const fn new(start: VirtualPage, pages: u32, permissions: Permissions) -> Self {
        Self {
            start,
            pages,
            permissions,
        }
    }

    #[inline]
    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.start.base()
    }

    #[inline]
    #[must_use]
    pub const fn pages(&self) -> u32 {
        self.pages
    }

    #[inline]
    #[must_use]
    pub const fn permissions(&self) -> Permissions {
        self.permissions
    }

    /// One past the last byte, as a plain number (may equal 2³¹ for the
    /// stack).
    #[inline]
    #[must_use]
    pub fn end(&self) -> u64 {
        self.start_u64() + u64::from(self.pages) * u64::from(PAGE_SIZE)
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, va: VirtualAddress) -> bool {
        let v = u64::from(va.as_u32());
        v >= self.start_u64() && v < self.end()
    }

    /// Whether `[start, end)` intersects this segment. An empty segment
    /// intersects nothing.
    #[inline]
    #[must_use]
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        self.pages != 0 && start < self.end() && self.start_u64() < end
    }

    fn start_u64(&self) -> u64 {
        u64::from(self.start.base().as_u32())
    }

    /// Base address of the `index`-th page.
    pub(crate) const fn page_base(&self, index: u32) -> VirtualAddress {
        VirtualAddress::new(self.start.base().as_u32() + index * PAGE_SIZE)
    }

    pub(crate) const fn set_pages(&mut self, pages: u32) {
        self.pages = pages;
    }
}
