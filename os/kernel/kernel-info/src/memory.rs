//! # Memory Layout

use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};

/// End of the user VA range; kernel space begins here.
pub const USERSPACE_TOP: u32 = 0x8000_0000;

/// Base of the cached direct map of physical memory.
pub const KSEG0_BASE: u32 = 0x8000_0000;

/// End of the direct map (start of the uncached KSEG1 window).
pub const KSEG1_BASE: u32 = 0xA000_0000;

/// Largest amount of RAM reachable through KSEG0.
pub const KSEG0_SIZE: u32 = KSEG1_BASE - KSEG0_BASE;

/// Initial user stack pointer; the stack grows down from here.
pub const USER_STACK_TOP: u32 = USERSPACE_TOP;

/// Size of the user stack segment (2 MiB).
pub const USER_STACK_SIZE: u32 = 2 * 1024 * 1024;

/// Lowest address of the user stack segment.
pub const USER_STACK_BASE: u32 = USER_STACK_TOP - USER_STACK_SIZE;

/// Number of slots in the per-processor TLB.
pub const NUM_TLB: usize = 64;

const _: () = {
    assert!(USER_STACK_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(USER_STACK_BASE.is_multiple_of(PAGE_SIZE));
    assert!(USER_STACK_TOP <= USERSPACE_TOP);
    assert!(KSEG0_BASE == USERSPACE_TOP);
};

/// Kernel virtual address of physical address `pa` in the direct map.
///
/// Only meaningful for `pa < KSEG0_SIZE`. The coremap never manages frames
/// past the direct map.
#[inline]
#[must_use]
pub const fn paddr_to_kvaddr(pa: PhysicalAddress) -> VirtualAddress {
    debug_assert!(pa.as_u32() < KSEG0_SIZE, "physical address outside KSEG0");
    VirtualAddress::new(pa.as_u32() + KSEG0_BASE)
}

/// Physical address behind a direct-mapped kernel virtual address.
///
/// Returns `None` for addresses outside KSEG0.
#[inline]
#[must_use]
pub const fn kvaddr_to_paddr(va: VirtualAddress) -> Option<PhysicalAddress> {
    let v = va.as_u32();
    if v >= KSEG0_BASE && v < KSEG1_BASE {
        Some(PhysicalAddress::new(v - KSEG0_BASE))
    } else {
        None
    }
}

/// Whether `va` lies in the user (TLB-translated) part of the address space.
#[inline]
#[must_use]
pub const fn is_user_address(va: VirtualAddress) -> bool {
    va.as_u32() < USERSPACE_TOP
}
