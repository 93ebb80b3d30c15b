//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for the 32-bit addresses and page bases used by the
//! virtual memory subsystem.
//!
//! ## Overview
//!
//! The machine has a 32-bit address space split in half: the lower 2 GiB are
//! translated through the software-managed TLB on behalf of user processes,
//! the upper half is kernel space. Physical memory is addressed with the same
//! width. Pages are always 4 KiB; there are no huge pages.
//!
//! | Concept | Description |
//! |----------|-------------|
//! | [`MemoryAddress`] | A raw 32-bit address, either physical or virtual. |
//! | [`MemoryPage`] | A page-aligned base address. |
//! | [`PageOffset`] | An offset within a page (`0..PAGE_SIZE`). |
//!
//! These are then wrapped to distinguish between virtual and physical spaces:
//!
//! | Wrapper | Meaning |
//! |----------|----------|
//! | [`VirtualAddress`] / [`VirtualPage`] | Addresses translated by the TLB. |
//! | [`PhysicalAddress`] / [`PhysicalPage`] | Addresses of RAM frames. |
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x0040_1234);
//!
//! // Split it into a page base and an in-page offset
//! let (page, off) = va.split();
//! assert_eq!(page.base().as_u32(), 0x0040_1000);
//! assert_eq!(off.as_u32(), 0x234);
//!
//! // Join them back to the same address
//! assert_eq!(page.join(off), va);
//!
//! // Page numbers are what the coremap and the TLB deal in
//! let pp = PhysicalPage::from_number(0x1F3);
//! assert_eq!(pp.base().as_u32(), 0x001F_3000);
//! ```
//!
//! ## Design Notes
//!
//! - The types are `#[repr(transparent)]` and implement `Copy`, `Eq`, `Ord`, and
//!   `Hash`, making them suitable as map keys or for storage in raw frame tables.
//! - All alignment and offset calculations are `const fn`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod memory_address;
mod memory_page;
mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use memory_address::MemoryAddress;
pub use memory_page::{MemoryPage, PageOffset};
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;

/// Size of a page (and of a physical frame) in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// log2([`PAGE_SIZE`]), i.e. the number of low bits used for the offset.
pub const PAGE_SHIFT: u32 = 12;

/// Mask selecting the page-number bits of an address.
pub const PAGE_FRAME: u32 = !(PAGE_SIZE - 1);

/// Number of whole pages needed to hold `bytes` bytes.
#[inline]
#[must_use]
pub const fn pages_for(bytes: u32) -> u32 {
    bytes.div_ceil(PAGE_SIZE)
}

const _: () = {
    assert!(PAGE_SIZE == 1 << PAGE_SHIFT);
    assert!(PAGE_FRAME & (PAGE_SIZE - 1) == 0);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_join() {
        let a = MemoryAddress::new(0x1234_5678);
        let (p, o) = a.split();
        assert_eq!(p.base().as_u32(), 0x1234_5000);
        assert_eq!(o.as_u32(), 0x678);
        assert_eq!(p.join(o), a);
    }

    #[test]
    fn virtual_vs_physical_wrappers() {
        let va = VirtualAddress::new(0x7FFF_F123);
        let (vp, vo) = va.split();
        assert_eq!(vp.base().as_u32(), 0x7FFF_F000);
        assert_eq!(vo.as_u32(), 0x123);
        assert_eq!(vp.join(vo), va);

        let pa = PhysicalAddress::new(0x0020_0042);
        let (pp, po) = pa.split();
        assert_eq!(pp.base().as_u32(), 0x0020_0000);
        assert_eq!(po.as_u32(), 0x42);
        assert_eq!(pp.join(po), pa);
    }

    #[test]
    fn alignment_helpers() {
        let a = MemoryAddress::new(0x12345);
        assert_eq!(a.align_down().as_u32(), 0x12000);
        assert_eq!(a.align_up().map(MemoryAddress::as_u32), Some(0x13000));
        assert!(!a.is_page_aligned());
        assert!(MemoryAddress::new(0x13000).is_page_aligned());
        assert_eq!(MemoryAddress::new(0xFFFF_F001).align_up(), None);
    }

    #[test]
    fn page_numbers_round_trip() {
        let vp = VirtualPage::containing_address(VirtualAddress::new(0x0040_0FFF));
        assert_eq!(vp.number(), 0x400);
        assert_eq!(VirtualPage::from_number(0x400), vp);
        assert_eq!(vp.checked_add_pages(2).map(VirtualPage::number), Some(0x402));
        assert_eq!(VirtualPage::from_number(0xF_FFFF).checked_add_pages(1), None);
    }

    #[test]
    fn pages_for_rounds_up() {
        assert_eq!(pages_for(0), 0);
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(PAGE_SIZE), 1);
        assert_eq!(pages_for(PAGE_SIZE + 1), 2);
    }

    #[test]
    fn try_from_rejects_unaligned() {
        assert!(VirtualPage::try_from(VirtualAddress::new(0x1001)).is_err());
        assert!(PhysicalPage::try_from(PhysicalAddress::new(0x2000)).is_ok());
    }
}
