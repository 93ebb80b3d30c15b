//! # Software-managed TLB
//!
//! The processor holds [`NUM_TLB`](kernel_info::memory::NUM_TLB) translations
//! in a fully associative cache that the kernel fills by hand. Each slot is a
//! pair of 32-bit registers:
//!
//! ```text
//! EntryHi  | 31‒12 VPN | 11‒6 ASID | 5‒0 — |
//! EntryLo  | 31‒12 PFN | 11 N | 10 D | 9 V | 8 G | 7‒0 — |
//! ```
//!
//! - `V` (valid): the slot takes part in lookups.
//! - `D` (dirty): on this architecture it means *writable*; a store through a
//!   translation without `D` raises a read-only fault.
//! - `N`: bypass the cache. `G`: match regardless of ASID.
//!
//! The VM does not use address-space identifiers: it flushes the whole TLB on
//! every address-space switch instead.

use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalPage, VirtualPage};

/// High half of a TLB slot: the tag.
#[bitfield(u32)]
#[derive(Eq, PartialEq)]
pub struct EntryHi {
    #[bits(6)]
    __: u8,
    /// Address-space identifier; always zero here.
    #[bits(6)]
    pub asid: u8,
    /// Virtual page number.
    #[bits(20)]
    pub vpn: u32,
}

/// Low half of a TLB slot: the translation.
#[bitfield(u32)]
#[derive(Eq, PartialEq)]
pub struct EntryLo {
    #[bits(8)]
    __: u8,
    pub global: bool,
    pub valid: bool,
    pub dirty: bool,
    pub no_cache: bool,
    /// Physical frame number.
    #[bits(20)]
    pub pfn: u32,
}

/// The contents of one TLB slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TlbEntry {
    pub hi: EntryHi,
    pub lo: EntryLo,
}

impl TlbEntry {
    /// A valid, writable translation `page → frame`.
    #[must_use]
    pub const fn new(page: VirtualPage, frame: PhysicalPage) -> Self {
        Self {
            hi: EntryHi::new().with_vpn(page.number()),
            lo: EntryLo::new()
                .with_pfn(frame.number())
                .with_valid(true)
                .with_dirty(true),
        }
    }

    /// The invalid entry parked in `slot`.
    ///
    /// Each slot gets a distinct tag in the unmapped kernel window so no two
    /// slots ever match the same address, which the hardware treats as a
    /// fatal condition.
    #[must_use]
    pub const fn invalid(slot: usize) -> Self {
        // KSEG0 starts at VPN 0x80000; slot < NUM_TLB keeps the sum in range
        #[allow(clippy::cast_possible_truncation)]
        let vpn = 0x8_0000 + slot as u32;
        Self {
            hi: EntryHi::new().with_vpn(vpn),
            lo: EntryLo::new(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.lo.valid()
    }

    #[inline]
    #[must_use]
    pub const fn page(&self) -> VirtualPage {
        VirtualPage::from_number(self.hi.vpn())
    }

    #[inline]
    #[must_use]
    pub const fn frame(&self) -> PhysicalPage {
        PhysicalPage::from_number(self.lo.pfn())
    }

    /// Whether this is a live translation for `page`.
    #[inline]
    #[must_use]
    pub const fn translates(&self, page: VirtualPage) -> bool {
        self.is_valid() && self.hi.vpn() == page.number()
    }
}

/// The per-processor TLB.
///
/// Implementations write the coprocessor registers directly. Callers are
/// responsible for masking interrupts around writes.
pub trait Tlb {
    /// Number of slots.
    fn slots(&self) -> usize;

    /// Read slot `index`.
    fn read(&self, index: usize) -> TlbEntry;

    /// Overwrite slot `index`.
    fn write(&mut self, index: usize, entry: TlbEntry);

    /// Slot holding a valid translation for `page`, if any.
    fn probe(&self, page: VirtualPage) -> Option<usize> {
        (0..self.slots()).find(|&i| self.read(i).translates(page))
    }

    /// Invalidate every slot.
    fn invalidate_all(&mut self) {
        for i in 0..self.slots() {
            self.write(i, TlbEntry::invalid(i));
        }
    }
}
