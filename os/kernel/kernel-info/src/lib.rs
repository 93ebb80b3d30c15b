//! # Platform Configuration and Boot Interface
//!
//! This crate holds the compile-time description of the machine the virtual
//! memory subsystem runs on, plus the small record the platform hands over at
//! boot. Every other VM crate reads its layout constants from here so there is
//! a single source of truth.
//!
//! ## Virtual Memory Architecture
//!
//! A 32-bit MIPS-style address space with a software-managed TLB:
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │   User Space (kuseg)            │
//!             │   translated by the TLB         │
//!             │                                 │
//! STACK BASE  ├─────────────────────────────────┤ USER_STACK_TOP - USER_STACK_SIZE
//!             │   User stack (fixed size)       │
//! USERSPACE_TOP ──────────────────────────────────┤ 0x8000_0000
//!             │   KSEG0: direct map of RAM      │
//!             │   (cached, never in the TLB)    │
//! KSEG1_BASE  ├─────────────────────────────────┤ 0xA000_0000
//!             │   KSEG1 / KSEG2 (devices, ...)  │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! The kernel reaches physical frame `pa` at kernel virtual address
//! `KSEG0_BASE + pa`; see [`memory::paddr_to_kvaddr`].
//!
//! ## Boot Protocol
//!
//! The platform layer reports the end of RAM and the first physical address
//! not used by the kernel image in a [`boot::RamInfo`]. The frame allocator
//! consumes it exactly once.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod errno;
pub mod memory;
