//! # Physical Memory Allocation
//!
//! The kernel's physical frame allocator and the glue that lets it touch the
//! frames it hands out.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │          kernel-vmem: PageTable / AddressSpace      │
//! │    • asks for user frames through `FrameAlloc`      │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │                    Coremap                          │
//! │    • one entry per managed frame                    │
//! │    • first-fit single frames for user pages         │
//! │    • first-fit contiguous runs for the kernel       │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Physical Mapper                        │
//! │    • KSEG0 direct map in the kernel                 │
//! │    • leaked heap buffer on the host                 │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use kernel_alloc::{Coremap, OffsetPhysMapper};
//! use kernel_info::boot::RamInfo;
//! use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
//! use kernel_vmem::{AddressSpace, Permissions};
//!
//! // 64 frames of "RAM"; the first four hold the kernel image
//! let ram: &'static mut [u64] = Box::leak(vec![0u64; 64 * 512].into_boxed_slice());
//! let mapper = OffsetPhysMapper::new(ram.as_mut_ptr() as usize);
//! let info = RamInfo::new(PhysicalAddress::new(0x4000), PhysicalAddress::new(0x4_0000));
//! let coremap = unsafe { Coremap::bootstrap(mapper, info) };
//!
//! let mut aspace = AddressSpace::create(&coremap).unwrap();
//! aspace.define_region(VirtualAddress::new(0x0040_0000), 0x3000, Permissions::RX).unwrap();
//! assert_eq!(coremap.free_frames(), coremap.total_frames());
//! ```
//!
//! With the `host-ram` feature, `host::HostRam` packages the buffer setup.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod coremap;
#[cfg(any(test, feature = "host-ram"))]
pub mod host;
pub mod phys_mapper;

pub use crate::coremap::{Coremap, FrameInfo, Geometry};
pub use crate::phys_mapper::OffsetPhysMapper;
