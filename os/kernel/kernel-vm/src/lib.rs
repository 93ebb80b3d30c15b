//! # Kernel VM
//!
//! The machine-dependent layer that ties the frame allocator, the software
//! page tables and the TLB together.
//!
//! - [`vm_bootstrap`] builds the global coremap once, early in boot.
//! - [`alloc_kernel_pages`] / [`free_kernel_pages`] serve the kernel heap
//!   from it.
//! - [`Mmu`] owns the per-processor TLB and installs translations.
//! - [`handle_fault`] resolves a TLB miss against the current
//!   [`AddressSpace`](kernel_vmem::AddressSpace).
//!
//! ## Fault path
//!
//! ```text
//! TLB miss ─► handle_fault ─► PageTable::back_page ─► Coremap (first touch)
//!                  │
//!                  └──────────► Mmu::install ─► TLB slot
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod fault;
pub mod mmu;
mod vm;

pub use crate::fault::{FaultError, FaultKind, handle_fault};
pub use crate::mmu::Mmu;
pub use crate::vm::{
    KernelAddressSpace, KernelCoremap, TlbShootdown, alloc_kernel_pages, coremap,
    free_kernel_pages, tlb_shootdown, used_bytes, vm_bootstrap,
};
