use kernel_alloc::{Coremap, OffsetPhysMapper};
use kernel_info::boot::RamInfo;
use kernel_memory_addresses::{VirtualAddress, VirtualPage};
use kernel_sync::SyncOnceCell;
use kernel_vmem::{AddressSpace, FrameError};
use log::{debug, warn};

pub type KernelCoremap = Coremap<OffsetPhysMapper>;

/// An address space drawing its frames from the global coremap.
pub type KernelAddressSpace = AddressSpace<'static, KernelCoremap>;

static COREMAP: SyncOnceCell<KernelCoremap> = SyncOnceCell::new();

/// Builds the global coremap over the RAM left after the kernel image.
///
/// Only the first call has an effect; later calls return the existing
/// coremap and ignore their arguments.
///
/// # Safety
/// As [`Coremap::bootstrap`]: `mapper` must reach all of `ram` for the rest
/// of the program and nothing else may touch that memory.
#[must_use]
pub unsafe fn vm_bootstrap(mapper: OffsetPhysMapper, ram: RamInfo) -> &'static KernelCoremap {
    COREMAP.get_or_init(|| unsafe { Coremap::bootstrap(mapper, ram) })
}

/// The global coremap, once [`vm_bootstrap`] has run.
#[inline]
#[must_use]
pub fn coremap() -> Option<&'static KernelCoremap> {
    COREMAP.get()
}

/// Allocates `n` contiguous frames for the kernel and returns their KSEG0
/// address.
///
/// # Errors
/// [`FrameError::OutOfMemory`] before [`vm_bootstrap`]; otherwise as
/// [`Coremap::allocate_contiguous`].
pub fn alloc_kernel_pages(n: u32) -> Result<VirtualAddress, FrameError> {
    let Some(coremap) = COREMAP.get() else {
        warn!("vm: {n} kernel pages requested before bootstrap");
        return Err(FrameError::OutOfMemory);
    };
    coremap.allocate_contiguous(n)
}

/// Releases an allocation made by [`alloc_kernel_pages`].
///
/// # Errors
/// [`FrameError::Unmanaged`] before [`vm_bootstrap`]; otherwise as
/// [`Coremap::free_kernel_pages`].
pub fn free_kernel_pages(kva: VirtualAddress) -> Result<(), FrameError> {
    let coremap = COREMAP.get().ok_or(FrameError::Unmanaged)?;
    coremap.free_kernel_pages(kva).map(|_| ())
}

/// Bytes of managed memory in use, zero before [`vm_bootstrap`].
#[must_use]
pub fn used_bytes() -> u32 {
    COREMAP.get().map_or(0, Coremap::used_bytes)
}

/// A request from another processor to drop cached translations.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TlbShootdown {
    /// The page to drop, or every translation if `None`.
    pub page: Option<VirtualPage>,
}

/// Handles a TLB shootdown.
///
/// The VM runs on a single processor, so there is never a remote TLB to
/// flush.
pub fn tlb_shootdown(request: &TlbShootdown) {
    debug!("vm: ignoring TLB shootdown {request:?}");
}
