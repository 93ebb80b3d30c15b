//! # Host RAM
//!
//! Lets the frame allocator run as an ordinary process: a zeroed heap buffer
//! is leaked and treated as physical memory starting at physical address 0.

use crate::phys_mapper::OffsetPhysMapper;
use alloc::boxed::Box;
use alloc::vec;
use kernel_info::boot::RamInfo;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};

/// A leaked buffer posing as physical RAM.
#[derive(Debug, Copy, Clone)]
pub struct HostRam {
    /// Maps physical addresses into the buffer.
    pub mapper: OffsetPhysMapper,
    /// Boot handoff describing the buffer.
    pub info: RamInfo,
}

impl HostRam {
    /// `frames` frames of RAM; the first `kernel_frames` pretend to hold the
    /// kernel image and are not reported as free.
    ///
    /// The buffer is never freed.
    #[must_use]
    pub fn leak(frames: u32, kernel_frames: u32) -> Self {
        let bytes = frames as usize * PAGE_SIZE as usize;
        let buffer: &'static mut [u64] =
            Box::leak(vec![0u64; bytes / size_of::<u64>()].into_boxed_slice());

        Self {
            mapper: OffsetPhysMapper::new(buffer.as_mut_ptr() as usize),
            info: RamInfo::new(
                PhysicalAddress::new(kernel_frames.min(frames) * PAGE_SIZE),
                PhysicalAddress::new(frames * PAGE_SIZE),
            ),
        }
    }
}
