//! # Boot handoff

use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};

/// Physical memory reported by the platform at boot.
///
/// Everything in `[first_free, end)` is RAM not used by the kernel image and
/// is handed to the frame allocator.
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RamInfo {
    /// First physical address not occupied by the kernel's load image.
    pub first_free: PhysicalAddress,
    /// One past the last physical address of RAM.
    pub end: PhysicalAddress,
}

impl RamInfo {
    #[must_use]
    pub const fn new(first_free: PhysicalAddress, end: PhysicalAddress) -> Self {
        Self { first_free, end }
    }

    /// Number of whole frames in `[first_free, end)`.
    ///
    /// A `first_free` that is not page aligned loses its partial frame.
    #[must_use]
    pub const fn free_frames(&self) -> u32 {
        let Some(start) = self.first_free.align_up() else {
            return 0;
        };
        let end = self.end.as_u32() & !(PAGE_SIZE - 1);
        if end <= start.as_u32() {
            0
        } else {
            (end - start.as_u32()) / PAGE_SIZE
        }
    }
}
