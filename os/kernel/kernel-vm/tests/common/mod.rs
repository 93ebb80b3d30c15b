#![allow(dead_code)]

use kernel_alloc::host::HostRam;
use kernel_alloc::{Coremap, OffsetPhysMapper};
use kernel_info::memory::NUM_TLB;
use kernel_sync::AtomicInterruptMask;
use kernel_vm::Mmu;
use kernel_vmem::tlb::{Tlb, TlbEntry};

/// A TLB held in ordinary memory.
pub struct SoftTlb {
    pub slots: Vec<TlbEntry>,
    pub writes: usize,
}

impl SoftTlb {
    pub fn new() -> Self {
        Self {
            slots: (0..NUM_TLB).map(TlbEntry::invalid).collect(),
            writes: 0,
        }
    }

    pub fn valid(&self) -> usize {
        self.slots.iter().filter(|e| e.is_valid()).count()
    }
}

impl Tlb for SoftTlb {
    fn slots(&self) -> usize {
        self.slots.len()
    }

    fn read(&self, index: usize) -> TlbEntry {
        self.slots[index]
    }

    fn write(&mut self, index: usize, entry: TlbEntry) {
        self.writes += 1;
        self.slots[index] = entry;
    }
}

pub type TestMmu = Mmu<SoftTlb, AtomicInterruptMask>;

pub fn mmu() -> TestMmu {
    Mmu::new(SoftTlb::new(), AtomicInterruptMask::default())
}

/// A private coremap over `managed` frames, plus the RAM behind it.
///
/// One frame is reserved for the kernel image and one for the frame table.
pub fn coremap(managed: u32) -> (&'static Coremap<OffsetPhysMapper>, HostRam) {
    let ram = HostRam::leak(managed + 2, 1);
    let coremap = Box::leak(Box::new(unsafe { Coremap::bootstrap(ram.mapper, ram.info) }));
    assert_eq!(coremap.total_frames(), managed);
    (coremap, ram)
}
