//! # MMU
//!
//! The kernel's handle on one processor's TLB. All TLB writes happen here
//! with interrupts masked.
//!
//! There are no address-space identifiers in use: switching address spaces
//! invalidates the whole TLB, so translations never leak across processes.

use kernel_memory_addresses::{PhysicalPage, VirtualAddress, VirtualPage};
use kernel_sync::{InterruptMask, IrqGuard};
use kernel_vmem::tlb::{Tlb, TlbEntry};
use kernel_vmem::{AddressSpace, AddressSpaceError, FrameAlloc};
use log::trace;

pub struct Mmu<T: Tlb, I: InterruptMask> {
    tlb: T,
    irq: I,
    next_victim: usize,
}

impl<T: Tlb, I: InterruptMask> Mmu<T, I> {
    #[must_use]
    pub fn new(tlb: T, irq: I) -> Self {
        debug_assert!(tlb.slots() > 0, "TLB without slots");
        Self {
            tlb,
            irq,
            next_victim: 0,
        }
    }

    #[inline]
    #[must_use]
    pub const fn tlb(&self) -> &T {
        &self.tlb
    }

    #[inline]
    #[must_use]
    pub const fn interrupts(&self) -> &I {
        &self.irq
    }

    /// Writes the translation `page → frame` and returns the slot used.
    ///
    /// A slot already translating `page` is overwritten in place; otherwise
    /// slots are replaced round-robin.
    pub fn install(&mut self, page: VirtualPage, frame: PhysicalPage) -> usize {
        let _irq = IrqGuard::new(&self.irq);

        let slot = self.tlb.probe(page).unwrap_or_else(|| {
            let victim = self.next_victim % self.tlb.slots();
            self.next_victim = (victim + 1) % self.tlb.slots();
            victim
        });
        self.tlb.write(slot, TlbEntry::new(page, frame));
        trace!("tlb[{slot}]: {page} -> {frame}");
        slot
    }

    /// Drops the translation for `page`, if one is cached. Returns whether a
    /// slot was cleared.
    pub fn invalidate(&mut self, page: VirtualPage) -> bool {
        let _irq = IrqGuard::new(&self.irq);
        let Some(slot) = self.tlb.probe(page) else {
            return false;
        };
        self.tlb.write(slot, TlbEntry::invalid(slot));
        trace!("tlb[{slot}]: dropped {page}");
        true
    }

    /// Moves the heap break of the current address space `aspace`.
    ///
    /// Pages released by a shrink lose their translations before their
    /// frames go back to the allocator.
    ///
    /// # Errors
    /// As [`AddressSpace::sbrk`].
    pub fn sbrk<A: FrameAlloc + ?Sized>(
        &mut self,
        aspace: &mut AddressSpace<'_, A>,
        delta_pages: i32,
    ) -> Result<VirtualAddress, AddressSpaceError> {
        if delta_pages < 0
            && let Some(heap) = aspace.heap()
        {
            let release = delta_pages.unsigned_abs();
            if release <= heap.pages() {
                let first = VirtualPage::containing_address(heap.start());
                for index in heap.pages() - release..heap.pages() {
                    if let Some(page) = first.checked_add_pages(index) {
                        self.invalidate(page);
                    }
                }
            }
        }
        aspace.sbrk(delta_pages)
    }

    /// Invalidates every slot.
    pub fn flush(&mut self) {
        let _irq = IrqGuard::new(&self.irq);
        self.tlb.invalidate_all();
    }

    /// Makes `aspace` the current address space.
    ///
    /// Kernel threads have no address space; for them the TLB is left
    /// untouched.
    pub fn activate<A: FrameAlloc + ?Sized>(&mut self, aspace: Option<&AddressSpace<'_, A>>) {
        if let Some(aspace) = aspace {
            trace!("{}: activated", aspace.id());
            self.flush();
        }
    }

    /// Called when the current address space is switched away from.
    ///
    /// Nothing to do: the next [`activate`](Self::activate) flushes.
    pub const fn deactivate<A: FrameAlloc + ?Sized>(&mut self, _aspace: &AddressSpace<'_, A>) {}

    /// Called before an executable is loaded into `aspace`.
    ///
    /// Permissions are not enforced, so loading needs no special mode.
    pub const fn prepare_load<A: FrameAlloc + ?Sized>(&mut self, _aspace: &AddressSpace<'_, A>) {}

    /// Called once loading into `aspace` is done.
    pub fn complete_load<A: FrameAlloc + ?Sized>(&mut self, aspace: &AddressSpace<'_, A>) {
        trace!("{}: load complete", aspace.id());
        self.flush();
    }
}
