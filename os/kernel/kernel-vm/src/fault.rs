//! # TLB fault handling
//!
//! Every user access without a TLB translation traps here. The handler
//! checks that the address belongs to a declared page, backs the page with a
//! frame on first touch and installs the translation.

use crate::mmu::Mmu;
use kernel_info::errno::{EFAULT, EINVAL, ENOMEM};
use kernel_memory_addresses::{VirtualAddress, VirtualPage};
use kernel_sync::InterruptMask;
use kernel_vmem::tlb::Tlb;
use kernel_vmem::{AddressSpace, FrameAlloc, FrameError, PageTableError};
use log::{trace, warn};

/// Fault codes passed in by the trap handler.
pub const VM_FAULT_READ: u32 = 0;
pub const VM_FAULT_WRITE: u32 = 1;
pub const VM_FAULT_READONLY: u32 = 2;

/// What kind of access missed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FaultKind {
    /// Load with no translation.
    Read,
    /// Store with no translation.
    Write,
    /// Store through a translation without the dirty bit.
    ReadOnly,
}

impl FaultKind {
    #[must_use]
    pub const fn explain(self) -> &'static str {
        match self {
            Self::Read => "Read from a page not in the TLB",
            Self::Write => "Write to a page not in the TLB",
            Self::ReadOnly => "Write through a read-only translation",
        }
    }
}

impl TryFrom<u32> for FaultKind {
    type Error = FaultError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            VM_FAULT_READ => Ok(Self::Read),
            VM_FAULT_WRITE => Ok(Self::Write),
            VM_FAULT_READONLY => Ok(Self::ReadOnly),
            other => Err(FaultError::UnknownFaultType(other)),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FaultError {
    #[error("unknown fault type {0}")]
    UnknownFaultType(u32),
    #[error("access to undeclared address {0}")]
    Segmentation(VirtualAddress),
    #[error("no frame left to back the page")]
    OutOfMemory,
}

impl FaultError {
    /// Error number reported to the trap handler.
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            Self::UnknownFaultType(_) => EINVAL,
            Self::Segmentation(_) => EFAULT,
            Self::OutOfMemory => ENOMEM,
        }
    }
}

/// Resolves a TLB miss at `addr` in `aspace`.
///
/// On success the page is backed and its translation sits in the TLB, so
/// the faulting instruction can be restarted.
///
/// # Errors
/// - [`FaultError::UnknownFaultType`] for an unrecognized `fault_type`.
/// - [`FaultError::Segmentation`] if `addr` lies in no declared page.
/// - [`FaultError::OutOfMemory`] if the page needs a frame and none is free.
///
/// # Panics
/// On a read-only fault, since every translation is installed writable, and
/// on a fault with no current address space, which means the kernel itself
/// touched an unmapped user address.
pub fn handle_fault<A, T, I>(
    aspace: Option<&AddressSpace<'_, A>>,
    mmu: &mut Mmu<T, I>,
    fault_type: u32,
    addr: VirtualAddress,
) -> Result<(), FaultError>
where
    A: FrameAlloc + ?Sized,
    T: Tlb,
    I: InterruptMask,
{
    let kind = FaultKind::try_from(fault_type)
        .inspect_err(|e| warn!("vm fault at {addr}: {e}"))?;
    if kind == FaultKind::ReadOnly {
        panic!("vm fault at {addr}: {}", kind.explain());
    }
    let Some(aspace) = aspace else {
        panic!("vm fault at {addr} with no address space: {}", kind.explain());
    };

    let frame = aspace
        .page_table()
        .back_page(addr)
        .map_err(|e| match e {
            PageTableError::Frame(FrameError::OutOfMemory) => FaultError::OutOfMemory,
            _ => FaultError::Segmentation(addr),
        })
        .inspect_err(|e| warn!("{}: {e}", aspace.id()))?;

    let page = VirtualPage::containing_address(addr);
    let slot = mmu.install(page, frame);
    trace!("{}: {kind:?} fault at {addr} resolved in slot {slot}", aspace.id());
    Ok(())
}
