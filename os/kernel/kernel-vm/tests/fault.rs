mod common;

use common::{SoftTlb, coremap, mmu};
use kernel_info::errno::{EFAULT, EINVAL, ENOMEM};
use kernel_info::memory::NUM_TLB;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalPage, VirtualAddress, VirtualPage};
use kernel_sync::AtomicInterruptMask;
use kernel_vm::fault::{VM_FAULT_READ, VM_FAULT_READONLY, VM_FAULT_WRITE};
use kernel_vm::{FaultError, FaultKind, KernelCoremap, Mmu, handle_fault};
use kernel_vmem::tlb::{Tlb, TlbEntry};
use kernel_vmem::{AddressSpace, PhysMapper, Permissions};

fn va(v: u32) -> VirtualAddress {
    VirtualAddress::new(v)
}

#[test]
fn fault_codes() {
    assert_eq!(FaultKind::try_from(0), Ok(FaultKind::Read));
    assert_eq!(FaultKind::try_from(1), Ok(FaultKind::Write));
    assert_eq!(FaultKind::try_from(2), Ok(FaultKind::ReadOnly));
    assert_eq!(FaultKind::try_from(7), Err(FaultError::UnknownFaultType(7)));
}

#[test]
fn first_touch_backs_the_page() {
    let (coremap, _ram) = coremap(8);
    let mut mmu = mmu();
    let mut aspace = AddressSpace::create(coremap).unwrap();
    aspace.define_region(va(0x1000), PAGE_SIZE, Permissions::RW).unwrap();

    let before = coremap.free_frames();
    assert!(!aspace.page_table().get_entry(va(0x1000)).unwrap().is_backed());

    handle_fault(Some(&aspace), &mut mmu, VM_FAULT_READ, va(0x1234)).unwrap();

    assert_eq!(coremap.free_frames(), before - 1);
    let frame = aspace.page_table().get_entry(va(0x1000)).unwrap().backing().unwrap();
    let page = VirtualPage::containing_address(va(0x1000));
    let slot = mmu.tlb().probe(page).unwrap();
    assert_eq!(mmu.tlb().read(slot).frame(), frame);
    assert!(mmu.tlb().read(slot).lo.dirty());
}

#[test]
fn refault_reuses_frame_and_slot() {
    let (coremap, _ram) = coremap(8);
    let mut mmu = mmu();
    let mut aspace = AddressSpace::create(coremap).unwrap();
    aspace.define_region(va(0x1000), 2 * PAGE_SIZE, Permissions::RW).unwrap();

    handle_fault(Some(&aspace), &mut mmu, VM_FAULT_WRITE, va(0x1000)).unwrap();
    let free = coremap.free_frames();
    handle_fault(Some(&aspace), &mut mmu, VM_FAULT_READ, va(0x1ffc)).unwrap();

    assert_eq!(coremap.free_frames(), free);
    assert_eq!(mmu.tlb().valid(), 1);
}

#[test]
fn frames_are_zeroed_and_stick() {
    let (coremap, ram) = coremap(4);
    let mut mmu = mmu();
    let mut aspace = AddressSpace::create(coremap).unwrap();
    aspace.define_region(va(0x0040_0000), PAGE_SIZE, Permissions::RW).unwrap();

    handle_fault(Some(&aspace), &mut mmu, VM_FAULT_WRITE, va(0x0040_0010)).unwrap();
    let frame = aspace.page_table().get_entry(va(0x0040_0000)).unwrap().backing().unwrap();
    let bytes = unsafe { ram.mapper.frame_bytes(frame) };
    assert!(bytes.iter().all(|&b| b == 0));
    bytes[0x10] = 0x5a;

    handle_fault(Some(&aspace), &mut mmu, VM_FAULT_READ, va(0x0040_0010)).unwrap();
    let bytes = unsafe { ram.mapper.frame_bytes(frame) };
    assert_eq!(bytes[0x10], 0x5a);
}

#[test]
fn undeclared_address_is_a_segmentation_fault() {
    let (coremap, _ram) = coremap(4);
    let mut mmu = mmu();
    let mut aspace = AddressSpace::create(coremap).unwrap();
    aspace.define_region(va(0x1000), PAGE_SIZE, Permissions::RW).unwrap();

    let err = handle_fault(Some(&aspace), &mut mmu, VM_FAULT_READ, va(0x2000)).unwrap_err();
    assert_eq!(err, FaultError::Segmentation(va(0x2000)));
    assert_eq!(err.errno(), EFAULT);

    let err = handle_fault(Some(&aspace), &mut mmu, VM_FAULT_READ, va(0x8000_1000)).unwrap_err();
    assert_eq!(err.errno(), EFAULT);

    assert_eq!(coremap.free_frames(), 4);
    assert_eq!(mmu.tlb().valid(), 0);
}

#[test]
fn unknown_fault_type_is_rejected() {
    let (coremap, _ram) = coremap(4);
    let mut mmu = mmu();
    let mut aspace = AddressSpace::create(coremap).unwrap();
    aspace.define_region(va(0x1000), PAGE_SIZE, Permissions::RW).unwrap();

    let err = handle_fault(Some(&aspace), &mut mmu, 9, va(0x1000)).unwrap_err();
    assert_eq!(err, FaultError::UnknownFaultType(9));
    assert_eq!(err.errno(), EINVAL);
    assert!(!aspace.page_table().get_entry(va(0x1000)).unwrap().is_backed());
}

#[test]
fn exhausted_memory_reports_enomem() {
    let (coremap, _ram) = coremap(2);
    let mut mmu = mmu();
    let mut aspace = AddressSpace::create(coremap).unwrap();
    aspace.define_region(va(0x1000), 3 * PAGE_SIZE, Permissions::RW).unwrap();

    handle_fault(Some(&aspace), &mut mmu, VM_FAULT_WRITE, va(0x1000)).unwrap();
    handle_fault(Some(&aspace), &mut mmu, VM_FAULT_WRITE, va(0x2000)).unwrap();
    let err = handle_fault(Some(&aspace), &mut mmu, VM_FAULT_WRITE, va(0x3000)).unwrap_err();

    assert_eq!(err, FaultError::OutOfMemory);
    assert_eq!(err.errno(), ENOMEM);
    assert!(!aspace.page_table().get_entry(va(0x3000)).unwrap().is_backed());

    drop(aspace);
    assert_eq!(coremap.free_frames(), 2);
}

#[test]
#[should_panic(expected = "read-only")]
fn read_only_fault_panics() {
    let (coremap, _ram) = coremap(2);
    let mut mmu = mmu();
    let mut aspace = AddressSpace::create(coremap).unwrap();
    aspace.define_region(va(0x1000), PAGE_SIZE, Permissions::RX).unwrap();
    let _ = handle_fault(Some(&aspace), &mut mmu, VM_FAULT_READONLY, va(0x1000));
}

#[test]
#[should_panic(expected = "no address space")]
fn fault_without_address_space_panics() {
    let mut mmu = mmu();
    let _ = handle_fault::<KernelCoremap, _, _>(None, &mut mmu, VM_FAULT_READ, va(0x1000));
}

#[test]
fn victims_rotate_through_every_slot() {
    let slots = u32::try_from(NUM_TLB).unwrap();
    let pages = slots + 1;
    let (coremap, _ram) = coremap(pages);
    let mut mmu = mmu();
    let mut aspace = AddressSpace::create(coremap).unwrap();
    aspace.define_region(va(0x0010_0000), pages * PAGE_SIZE, Permissions::RW).unwrap();

    for i in 0..pages {
        handle_fault(Some(&aspace), &mut mmu, VM_FAULT_READ, va(0x0010_0000 + i * PAGE_SIZE))
            .unwrap();
    }

    assert_eq!(mmu.tlb().valid(), NUM_TLB);
    // the last page evicted the first
    let first = VirtualPage::containing_address(va(0x0010_0000));
    let last = VirtualPage::containing_address(va(0x0010_0000 + slots * PAGE_SIZE));
    assert_eq!(mmu.tlb().probe(first), None);
    assert_eq!(mmu.tlb().probe(last), Some(0));
}

#[test]
fn interrupts_come_back_after_install() {
    let (coremap, _ram) = coremap(2);
    let mut mmu = mmu();
    let mut aspace = AddressSpace::create(coremap).unwrap();
    aspace.define_region(va(0x1000), PAGE_SIZE, Permissions::RW).unwrap();

    handle_fault(Some(&aspace), &mut mmu, VM_FAULT_READ, va(0x1000)).unwrap();
    assert!(mmu.interrupts().enabled());
}

#[test]
fn activation_flushes_the_tlb() {
    let (coremap, _ram) = coremap(2);
    let mut mmu = mmu();
    let mut aspace = AddressSpace::create(coremap).unwrap();
    aspace.define_region(va(0x1000), PAGE_SIZE, Permissions::RW).unwrap();
    handle_fault(Some(&aspace), &mut mmu, VM_FAULT_READ, va(0x1000)).unwrap();

    mmu.activate::<KernelCoremap>(None);
    assert_eq!(mmu.tlb().valid(), 1);

    mmu.deactivate(&aspace);
    assert_eq!(mmu.tlb().valid(), 1);

    mmu.activate(Some(&aspace));
    assert_eq!(mmu.tlb().valid(), 0);

    handle_fault(Some(&aspace), &mut mmu, VM_FAULT_READ, va(0x1000)).unwrap();
    mmu.prepare_load(&aspace);
    assert_eq!(mmu.tlb().valid(), 1);
    mmu.complete_load(&aspace);
    assert_eq!(mmu.tlb().valid(), 0);
}

#[test]
fn shrinking_the_heap_drops_cached_translations() {
    let (coremap, _ram) = coremap(2);
    let mut mmu = mmu();
    let mut aspace = AddressSpace::create(coremap).unwrap();
    aspace.define_heap(va(0x1000)).unwrap();

    assert_eq!(mmu.sbrk(&mut aspace, 1), Ok(va(0x1000)));
    handle_fault(Some(&aspace), &mut mmu, VM_FAULT_WRITE, va(0x1000)).unwrap();
    let page = VirtualPage::containing_address(va(0x1000));
    let frame = aspace.page_table().get_entry(va(0x1000)).unwrap().backing().unwrap();
    assert!(mmu.tlb().probe(page).is_some());

    assert_eq!(mmu.sbrk(&mut aspace, -1), Ok(va(0x2000)));
    assert_eq!(mmu.tlb().probe(page), None);
    assert_eq!(mmu.tlb().valid(), 0);

    // the frame goes to someone else; nothing in the TLB still reaches it
    let other = AddressSpace::create(coremap).unwrap();
    let reused = coremap.allocate_user_page(other.id(), page).unwrap();
    assert_eq!(reused, frame);
    assert!(mmu.tlb().slots.iter().all(|e| !e.is_valid() || e.frame() != frame));
}

#[test]
fn failed_shrink_keeps_translations() {
    let (coremap, _ram) = coremap(2);
    let mut mmu = mmu();
    let mut aspace = AddressSpace::create(coremap).unwrap();
    aspace.define_heap(va(0x1000)).unwrap();
    mmu.sbrk(&mut aspace, 1).unwrap();
    handle_fault(Some(&aspace), &mut mmu, VM_FAULT_READ, va(0x1000)).unwrap();

    assert!(mmu.sbrk(&mut aspace, -2).is_err());
    assert_eq!(mmu.tlb().valid(), 1);
}

#[test]
fn invalidate_clears_only_the_named_page() {
    let mut mmu = mmu();
    let a = VirtualPage::from_number(1);
    let b = VirtualPage::from_number(2);
    mmu.install(a, PhysicalPage::from_number(10));
    mmu.install(b, PhysicalPage::from_number(11));

    assert!(mmu.invalidate(a));
    assert!(!mmu.invalidate(a));
    assert_eq!(mmu.tlb().probe(b), Some(1));
    assert_eq!(mmu.tlb().read(0), TlbEntry::invalid(0));
    assert!(mmu.interrupts().enabled());
}

#[test]
#[should_panic(expected = "TLB without slots")]
fn a_tlb_needs_slots() {
    let tlb = SoftTlb {
        slots: Vec::new(),
        writes: 0,
    };
    let _ = Mmu::new(tlb, AtomicInterruptMask::default());
}
