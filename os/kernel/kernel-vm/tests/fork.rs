mod common;

use common::{coremap, mmu};
use kernel_info::errno::ENOMEM;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};
use kernel_vm::fault::VM_FAULT_WRITE;
use kernel_vm::handle_fault;
use kernel_vmem::{AddressSpace, FrameAlloc, PhysMapper, Permissions};

const BASE: u32 = 0x0040_0000;

fn va(v: u32) -> VirtualAddress {
    VirtualAddress::new(v)
}

fn touch_all<A: FrameAlloc + ?Sized>(aspace: &AddressSpace<'_, A>, pages: u32) {
    let mut mmu = mmu();
    for i in 0..pages {
        handle_fault(Some(aspace), &mut mmu, VM_FAULT_WRITE, va(BASE + i * PAGE_SIZE)).unwrap();
    }
}

#[test]
fn copy_duplicates_backed_pages() {
    let (coremap, ram) = coremap(8);
    let mut parent = AddressSpace::create(coremap).unwrap();
    parent.define_region(va(BASE), 4 * PAGE_SIZE, Permissions::RW).unwrap();
    touch_all(&parent, 3);

    for i in 0..3u8 {
        let frame = parent
            .page_table()
            .get_entry(va(BASE + u32::from(i) * PAGE_SIZE))
            .unwrap()
            .backing()
            .unwrap();
        unsafe { ram.mapper.frame_bytes(frame) }.fill(0xa0 + i);
    }
    assert_eq!(coremap.free_frames(), 5);

    let child = parent.copy().unwrap();
    assert_eq!(coremap.free_frames(), 2);
    assert_ne!(child.id(), parent.id());
    assert_eq!(child.page_table().mapped_pages(), 4);
    assert_eq!(child.page_table().backed_pages(), 3);
    assert_eq!(child.segments().count(), parent.segments().count());

    for i in 0..4u8 {
        let at = va(BASE + u32::from(i) * PAGE_SIZE);
        let theirs = parent.page_table().get_entry(at).unwrap();
        let ours = child.page_table().get_entry(at).unwrap();
        match (theirs.backing(), ours.backing()) {
            (Some(p), Some(c)) => {
                assert_ne!(p, c);
                let bytes = unsafe { ram.mapper.frame_bytes(c) };
                assert!(bytes.iter().all(|&b| b == 0xa0 + i));
            }
            (None, None) => assert_eq!(i, 3),
            other => panic!("backing diverged at {at}: {other:?}"),
        }
    }
}

#[test]
fn copies_are_isolated() {
    let (coremap, ram) = coremap(8);
    let mut parent = AddressSpace::create(coremap).unwrap();
    parent.define_region(va(BASE), PAGE_SIZE, Permissions::RW).unwrap();
    touch_all(&parent, 1);

    let child = parent.copy().unwrap();
    let p = parent.page_table().get_entry(va(BASE)).unwrap().backing().unwrap();
    let c = child.page_table().get_entry(va(BASE)).unwrap().backing().unwrap();

    (unsafe { ram.mapper.frame_bytes(c) })[0] = 0x42;
    assert_eq!(unsafe { ram.mapper.frame_bytes(p) }[0], 0);

    assert_eq!(coremap.frame_info(p.base()).unwrap().owner, Some(parent.id()));
    assert_eq!(coremap.frame_info(c.base()).unwrap().owner, Some(child.id()));
}

#[test]
fn destroying_one_side_leaves_the_other() {
    let (coremap, ram) = coremap(8);
    let mut parent = AddressSpace::create(coremap).unwrap();
    parent.define_region(va(BASE), 3 * PAGE_SIZE, Permissions::RW).unwrap();
    touch_all(&parent, 3);
    let frame = parent.page_table().get_entry(va(BASE)).unwrap().backing().unwrap();
    (unsafe { ram.mapper.frame_bytes(frame) })[7] = 7;

    let child = parent.copy().unwrap();
    drop(parent);
    assert_eq!(coremap.free_frames(), 5);

    let c = child.page_table().get_entry(va(BASE)).unwrap().backing().unwrap();
    assert_eq!(unsafe { ram.mapper.frame_bytes(c) }[7], 7);

    // the child still faults normally
    touch_all(&child, 3);
    assert_eq!(coremap.free_frames(), 5);

    drop(child);
    assert_eq!(coremap.free_frames(), 8);
}

#[test]
fn failed_copy_releases_everything() {
    let (coremap, _ram) = coremap(4);
    let mut parent = AddressSpace::create(coremap).unwrap();
    parent.define_region(va(BASE), 3 * PAGE_SIZE, Permissions::RW).unwrap();
    touch_all(&parent, 3);
    assert_eq!(coremap.free_frames(), 1);

    let Err(err) = parent.copy() else {
        panic!("copy should run out of frames");
    };
    assert_eq!(err.errno(), ENOMEM);
    assert_eq!(coremap.free_frames(), 1);
    assert_eq!(parent.page_table().backed_pages(), 3);
}

#[test]
fn stack_and_heap_fault_in() {
    let (coremap, _ram) = coremap(8);
    let mut mmu = mmu();
    let mut aspace = AddressSpace::create(coremap).unwrap();
    aspace.define_region(va(BASE), PAGE_SIZE, Permissions::RX).unwrap();
    let sp = aspace.define_stack().unwrap();
    aspace.define_heap(va(BASE + PAGE_SIZE + 1)).unwrap();

    handle_fault(Some(&aspace), &mut mmu, VM_FAULT_WRITE, va(sp.as_u32() - 4)).unwrap();

    let brk = aspace.sbrk(2).unwrap();
    assert_eq!(brk, va(BASE + 2 * PAGE_SIZE));
    handle_fault(Some(&aspace), &mut mmu, VM_FAULT_WRITE, va(brk.as_u32() + PAGE_SIZE)).unwrap();
    assert_eq!(coremap.free_frames(), 6);

    aspace.sbrk(-2).unwrap();
    assert_eq!(coremap.free_frames(), 7);
    assert!(handle_fault(Some(&aspace), &mut mmu, VM_FAULT_WRITE, brk).is_err());
}
