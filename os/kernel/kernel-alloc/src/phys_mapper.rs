//! # Offset-based PhysMapper
//!
//! Physical memory is reachable at a fixed virtual offset:
//!
//! - In the kernel, RAM is mapped (cached, untranslated) at
//!   [`KSEG0_BASE`] + `pa`.
//! - In host tests, a leaked heap buffer plays RAM and the offset is the
//!   buffer's address (`host::HostRam` with the `host-ram` feature).
//!
//! ## Example
//! ```rust
//! use kernel_alloc::phys_mapper::OffsetPhysMapper;
//! use kernel_memory_addresses::PhysicalAddress;
//! use kernel_vmem::PhysMapper;
//!
//! let mut word = 0u32;
//! let mapper = OffsetPhysMapper::new(core::ptr::from_mut(&mut word) as usize);
//! unsafe {
//!     let w: &mut u32 = mapper.phys_to_mut(PhysicalAddress::new(0));
//!     *w = 7;
//! }
//! assert_eq!(word, 7);
//! ```

use kernel_info::memory::KSEG0_BASE;
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] that adds a constant to every physical address.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct OffsetPhysMapper {
    offset: usize,
}

impl OffsetPhysMapper {
    #[must_use]
    pub const fn new(offset: usize) -> Self {
        Self { offset }
    }

    /// The kernel's direct map.
    #[must_use]
    pub const fn kseg0() -> Self {
        Self::new(KSEG0_BASE as usize)
    }

    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }
}

impl PhysMapper for OffsetPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = (self.offset + pa.as_usize()) as *mut T;
        // SAFETY: Caller must ensure the physical address is valid and mapped at this offset.
        unsafe { &mut *va }
    }
}
