use crate::{MemoryAddress, PAGE_FRAME, PAGE_SHIFT, PAGE_SIZE};
use core::fmt;
use core::ops::Add;

/// A page base address (lower [`PAGE_SHIFT`] bits are zero).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MemoryPage(u32);

impl MemoryPage {
    /// Create from a raw address, aligning down to the page boundary.
    #[inline]
    #[must_use]
    pub const fn from_addr(addr: MemoryAddress) -> Self {
        Self(addr.as_u32() & PAGE_FRAME)
    }

    /// Create from a raw value that must already be aligned.
    /// Panics in debug if unaligned (no runtime cost in release).
    #[inline]
    #[must_use]
    pub fn new_aligned(addr: MemoryAddress) -> Self {
        debug_assert!(addr.is_page_aligned(), "unaligned page address");
        Self(addr.as_u32())
    }

    /// Page with the given page number (the address shifted right by [`PAGE_SHIFT`]).
    #[inline]
    #[must_use]
    pub const fn from_number(number: u32) -> Self {
        Self(number << PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn number(self) -> u32 {
        self.0 >> PAGE_SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> MemoryAddress {
        MemoryAddress::new(self.0)
    }

    /// Combine with an offset to form a full address.
    #[inline]
    #[must_use]
    pub const fn join(self, off: PageOffset) -> MemoryAddress {
        MemoryAddress::new(self.0 | off.as_u32())
    }

    /// The page `n` pages above this one, `None` past the end of the address space.
    #[inline]
    #[must_use]
    pub const fn checked_add_pages(self, n: u32) -> Option<Self> {
        match self.number().checked_add(n) {
            Some(number) if number <= (u32::MAX >> PAGE_SHIFT) => Some(Self::from_number(number)),
            _ => None,
        }
    }
}

impl fmt::Display for MemoryPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}/4K", self.0)
    }
}

impl fmt::Debug for MemoryPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryPage(0x{:08X})", self.0)
    }
}

impl From<MemoryAddress> for MemoryPage {
    #[inline]
    fn from(addr: MemoryAddress) -> Self {
        Self::from_addr(addr)
    }
}

impl From<MemoryPage> for MemoryAddress {
    fn from(value: MemoryPage) -> Self {
        value.base()
    }
}

/// The offset within a page (`0..PAGE_SIZE`).
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PageOffset(u32);

impl PageOffset {
    /// Create from a raw value, asserting it is < [`PAGE_SIZE`] in debug.
    #[inline]
    #[must_use]
    pub fn new(value: u32) -> Self {
        debug_assert!(value < PAGE_SIZE, "offset must be < page size");
        Self(value & (PAGE_SIZE - 1))
    }

    /// Construct from a full address's offset bits.
    #[inline]
    #[must_use]
    pub const fn from_addr(addr: MemoryAddress) -> Self {
        Self(addr.as_u32() & (PAGE_SIZE - 1))
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for PageOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageOffset({:#X})", self.0)
    }
}

impl Add<PageOffset> for MemoryPage {
    type Output = MemoryAddress;
    #[inline]
    fn add(self, rhs: PageOffset) -> Self::Output {
        self.join(rhs)
    }
}
