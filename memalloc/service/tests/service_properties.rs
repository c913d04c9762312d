//! End-to-end behavior of the allocation service over the wire interface,
//! with a real page pool backing the address space.

use memalloc_frames::PagePool;
use memalloc_service::admission::Quotas;
use memalloc_service::tlb::TlbInvalidate;
use memalloc_service::wire::{OP_ALLOCATE, OP_FREE, RawRequest};
use memalloc_service::{MemAllocService, ServiceError};
use memalloc_vmem::encoding::X86Encoding;
use memalloc_vmem::{VirtualAddress, VirtualPageRange};

/// Records one flush per completed request.
#[derive(Default)]
struct CountingTlb {
    flushes: usize,
}

impl TlbInvalidate for CountingTlb {
    fn invalidate(&mut self, _range: VirtualPageRange) {
        self.flushes += 1;
    }
}

type Service = MemAllocService<X86Encoding, PagePool, CountingTlb>;

fn service(pool_pages: usize, quotas: Quotas) -> Service {
    MemAllocService::new(
        PagePool::new(pool_pages),
        X86Encoding,
        CountingTlb::default(),
        quotas,
    )
    .expect("pool can supply the root table")
}

fn payload(vaddr: u64, num_pages: u32, write: bool) -> [u8; 16] {
    RawRequest {
        vaddr,
        num_pages,
        write,
    }
    .encode()
}

// x86-64 descriptor bits checked by the protection tests.
const PRESENT: u64 = 1 << 0;
const WRITABLE: u64 = 1 << 1;

#[test]
fn allocate_maps_zeroed_writable_pages() {
    let mut svc = service(64, Quotas::default());
    assert_eq!(svc.dispatch(OP_ALLOCATE, &payload(0x1000_0000, 4, true)), 0);

    for i in 0..4u64 {
        let va = VirtualAddress::new(0x1000_0000 + i * 0x1000);
        let page = svc
            .address_space()
            .translate(va)
            .expect("every page of the range is mapped");
        assert!(
            svc.frames().bytes(page).iter().all(|&b| b == 0),
            "fresh pages are zero-filled"
        );
        let descriptor = svc.address_space().leaf_descriptor(va).unwrap();
        assert_eq!(descriptor.bits() & PRESENT, PRESENT);
        assert_eq!(descriptor.bits() & WRITABLE, WRITABLE);
    }
    assert_eq!(svc.admission().total_pages_allocated(), 4);
    assert_eq!(svc.admission().total_allocations(), 1);
    assert_eq!(svc.tlb().flushes, 1);
}

#[test]
fn read_only_requests_clear_the_write_bit() {
    let mut svc = service(16, Quotas::default());
    assert_eq!(svc.dispatch(OP_ALLOCATE, &payload(0x2000_0000, 1, false)), 0);

    let descriptor = svc
        .address_space()
        .leaf_descriptor(VirtualAddress::new(0x2000_0000))
        .unwrap();
    assert_eq!(descriptor.bits() & PRESENT, PRESENT);
    assert_eq!(descriptor.bits() & WRITABLE, 0);
}

#[test]
fn overlapping_allocation_is_rejected_without_side_effects() {
    let mut svc = service(64, Quotas::default());
    assert_eq!(svc.dispatch(OP_ALLOCATE, &payload(0x1000_0000, 4, true)), 0);

    let tables_before = svc.address_space().table_count();
    let frames_before = svc.frames().allocated();

    // Overlap on the last page only; still rejected as a whole.
    assert_eq!(svc.dispatch(OP_ALLOCATE, &payload(0x1000_3000, 2, true)), -1);

    assert_eq!(svc.address_space().table_count(), tables_before);
    assert_eq!(svc.frames().allocated(), frames_before);
    assert_eq!(svc.admission().total_pages_allocated(), 4);
    assert_eq!(svc.admission().total_allocations(), 1);
    assert_eq!(svc.tlb().flushes, 1, "rejected requests do not flush");
    assert!(
        !svc.address_space()
            .is_mapped(VirtualAddress::new(0x1000_4000)),
        "no page of the rejected range was installed"
    );
}

#[test]
fn page_quota_rejects_oversized_requests() {
    let mut svc = service(16, Quotas::default());
    assert_eq!(svc.dispatch(OP_ALLOCATE, &payload(0x1000_0000, 4097, true)), -2);
    assert_eq!(svc.admission().total_pages_allocated(), 0);
}

#[test]
fn page_quota_accounts_for_pages_already_mapped() {
    let quotas = Quotas {
        max_pages: 8,
        max_allocations: 100,
    };
    let mut svc = service(32, quotas);
    assert_eq!(svc.dispatch(OP_ALLOCATE, &payload(0x1000_0000, 6, true)), 0);
    assert_eq!(svc.dispatch(OP_ALLOCATE, &payload(0x2000_0000, 3, true)), -2);
    assert_eq!(svc.dispatch(OP_ALLOCATE, &payload(0x2000_0000, 2, true)), 0);
}

#[test]
fn allocation_quota_caps_live_requests() {
    let mut svc = service(256, Quotas::default());
    for i in 0..100u64 {
        let code = svc.dispatch(OP_ALLOCATE, &payload(0x1000_0000 + i * 0x1000, 1, true));
        assert_eq!(code, 0, "allocation {i} fits both quotas");
    }
    assert_eq!(svc.dispatch(OP_ALLOCATE, &payload(0x3000_0000, 1, true)), -3);
    assert_eq!(svc.admission().total_allocations(), 100);

    // Freeing one slot makes the quota admit again.
    assert_eq!(svc.dispatch(OP_FREE, &payload(0x1000_0000, 1, false)), 0);
    assert_eq!(svc.dispatch(OP_ALLOCATE, &payload(0x3000_0000, 1, true)), 0);
}

#[test]
fn allocations_are_backed_by_distinct_pages() {
    let mut svc = service(32, Quotas::default());
    assert_eq!(svc.dispatch(OP_ALLOCATE, &payload(0x1000_0000, 1, true)), 0);
    assert_eq!(svc.dispatch(OP_ALLOCATE, &payload(0x2000_0000, 1, true)), 0);

    let first = svc
        .address_space()
        .translate(VirtualAddress::new(0x1000_0000))
        .unwrap();
    let second = svc
        .address_space()
        .translate(VirtualAddress::new(0x2000_0000))
        .unwrap();
    assert_ne!(first, second);

    svc.frames_mut().bytes_mut(first).fill(0xAB);
    assert!(
        svc.frames().bytes(second).iter().all(|&b| b == 0),
        "writes through one mapping are invisible through the other"
    );
}

#[test]
fn mid_range_table_shortfall_leaves_no_trace() {
    // 0x1ff000 occupies the last slot of the first leaf table, so the
    // second page of the range needs a fresh chain of tables. Budget:
    // root + 3 tables + 2 data pages = 6; the next table page is denied.
    let mut svc = service(6, Quotas::default());
    assert_eq!(svc.dispatch(OP_ALLOCATE, &payload(0x1f_f000, 2, true)), -12);

    assert!(!svc.address_space().is_mapped(VirtualAddress::new(0x1f_f000)));
    assert!(!svc.address_space().is_mapped(VirtualAddress::new(0x20_0000)));
    assert_eq!(svc.admission().total_pages_allocated(), 0);
    assert_eq!(svc.admission().total_allocations(), 0);
    assert_eq!(svc.tlb().flushes, 0);
    // Only the root and the intermediate tables remain in the pool.
    assert_eq!(svc.frames().allocated(), svc.address_space().table_count());
}

#[test]
fn plain_pool_exhaustion_is_reported_before_any_install() {
    // Root takes one page; three data pages cannot fit in the remaining two.
    let mut svc = service(3, Quotas::default());
    assert_eq!(svc.dispatch(OP_ALLOCATE, &payload(0x1000_0000, 3, true)), -12);
    assert_eq!(svc.frames().allocated(), 1, "only the root remains");
    assert_eq!(svc.admission().total_pages_allocated(), 0);
}

#[test]
fn free_reverses_the_allocation() {
    let mut svc = service(32, Quotas::default());
    assert_eq!(svc.dispatch(OP_ALLOCATE, &payload(0x1000_0000, 3, true)), 0);

    let page = svc
        .address_space()
        .translate(VirtualAddress::new(0x1000_0000))
        .unwrap();
    svc.frames_mut().bytes_mut(page).fill(0xCD);

    assert_eq!(svc.dispatch(OP_FREE, &payload(0x1000_0000, 3, false)), 0);
    for i in 0..3u64 {
        assert!(
            !svc.address_space()
                .is_mapped(VirtualAddress::new(0x1000_0000 + i * 0x1000))
        );
    }
    assert_eq!(svc.admission().total_pages_allocated(), 0);
    assert_eq!(svc.admission().total_allocations(), 0);
    assert_eq!(svc.tlb().flushes, 2);

    // The range is allocatable again and comes back zeroed.
    assert_eq!(svc.dispatch(OP_ALLOCATE, &payload(0x1000_0000, 3, true)), 0);
    let page = svc
        .address_space()
        .translate(VirtualAddress::new(0x1000_0000))
        .unwrap();
    assert!(svc.frames().bytes(page).iter().all(|&b| b == 0));
}

#[test]
fn free_of_unmapped_or_partial_ranges_is_rejected_whole() {
    let mut svc = service(32, Quotas::default());
    assert_eq!(svc.dispatch(OP_FREE, &payload(0x1000_0000, 1, false)), -1);

    assert_eq!(svc.dispatch(OP_ALLOCATE, &payload(0x1000_0000, 2, true)), 0);
    // One page past the mapped range; nothing may be torn down.
    assert_eq!(svc.dispatch(OP_FREE, &payload(0x1000_0000, 3, false)), -1);
    assert!(svc.address_space().is_mapped(VirtualAddress::new(0x1000_0000)));
    assert!(svc.address_space().is_mapped(VirtualAddress::new(0x1000_1000)));
    assert_eq!(svc.admission().total_pages_allocated(), 2);
}

#[test]
fn free_of_a_sub_range_leaves_the_allocation_intact() {
    let mut svc = service(32, Quotas::default());
    assert_eq!(svc.dispatch(OP_ALLOCATE, &payload(0x1000_0000, 2, true)), 0);

    // Sub-ranges of one allocation are mapped but not freeable on their own.
    assert_eq!(svc.dispatch(OP_FREE, &payload(0x1000_0000, 1, false)), -1);
    assert_eq!(svc.dispatch(OP_FREE, &payload(0x1000_1000, 1, false)), -1);
    assert!(svc.address_space().is_mapped(VirtualAddress::new(0x1000_0000)));
    assert!(svc.address_space().is_mapped(VirtualAddress::new(0x1000_1000)));
    assert_eq!(svc.admission().total_pages_allocated(), 2);
    assert_eq!(svc.admission().total_allocations(), 1);

    // Until one whole allocation is released, its count stays claimed.
    assert_eq!(svc.dispatch(OP_FREE, &payload(0x1000_0000, 2, false)), 0);
    assert_eq!(svc.admission().total_allocations(), 0);
}

#[test]
fn malformed_requests_are_rejected_by_validation() {
    let mut svc = service(16, Quotas::default());
    let good = payload(0x1000_0000, 1, true);

    assert_eq!(svc.dispatch(OP_ALLOCATE, &good[..7]), -14, "short payload");
    assert_eq!(
        svc.dispatch(OP_ALLOCATE, &payload(0x1000_0001, 1, true)),
        -14,
        "misaligned base"
    );
    assert_eq!(
        svc.dispatch(OP_ALLOCATE, &payload(0x1000_0000, 0, true)),
        -14,
        "zero pages"
    );
    assert_eq!(
        svc.dispatch(OP_ALLOCATE, &payload(1 << 48, 1, true)),
        -14,
        "beyond the translated address space"
    );
    assert_eq!(svc.dispatch(99, &good), -22, "unknown opcode");

    assert_eq!(svc.admission().total_pages_allocated(), 0);
    assert_eq!(svc.frames().allocated(), 1, "only the root was touched");
}

#[test]
fn allocate_error_variants_surface_through_the_typed_api() {
    let mut svc = service(16, Quotas::default());
    let request = RawRequest {
        vaddr: 0x1000_0000,
        num_pages: 1,
        write: true,
    };
    assert_eq!(svc.allocate(request), Ok(()));
    assert_eq!(svc.allocate(request), Err(ServiceError::ConflictExisting));
    assert_eq!(svc.free(request), Ok(()));
    assert_eq!(svc.free(request), Err(ServiceError::RangeNotMapped));
}
