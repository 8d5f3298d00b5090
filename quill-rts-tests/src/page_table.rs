//! Page residency table tests.

use fxhash::FxHashSet;
use proptest::strategy::Strategy;
use proptest::test_runner::{Config, TestCaseResult, TestRunner};

use quill_rts::constants::PAGE_SIZE;
use quill_rts::page_table::{PageTable, IN_CODE, IN_HEAP, IN_STATIC, IN_YOUNG};
use quill_rts::stat_alloc::StatPool;

pub unsafe fn test() {
    println!("Testing the page table ...");
    test_kinds();
    test_ranges();
    test_growth();
    test_membership_model();
}

unsafe fn test_kinds() {
    let mut pool = StatPool::new();
    let mut table = PageTable::new(&mut pool, 64 * PAGE_SIZE).unwrap();

    let heap = 0x10_0000;
    let young = 0x20_0000;
    table.add(&mut pool, IN_HEAP, heap, heap + PAGE_SIZE).unwrap();
    table
        .add(&mut pool, IN_YOUNG, young, young + PAGE_SIZE)
        .unwrap();

    assert_eq!(table.lookup(heap), IN_HEAP);
    assert_eq!(table.lookup(heap + 123), IN_HEAP);
    assert_eq!(table.lookup(young), IN_YOUNG);
    assert_eq!(table.lookup(0x30_0000), 0);

    assert!(table.is_in_heap(heap));
    assert!(!table.is_in_heap(young));
    assert!(table.is_in_heap_or_young(young));
    assert!(table.is_in_value_area(heap));
    assert!(!table.is_in_value_area(0x30_0000));

    // Kinds compose per page and clear independently.
    table.add(&mut pool, IN_STATIC, heap, heap + PAGE_SIZE).unwrap();
    assert_eq!(table.lookup(heap), IN_HEAP | IN_STATIC);
    table
        .remove(&mut pool, IN_HEAP, heap, heap + PAGE_SIZE)
        .unwrap();
    assert_eq!(table.lookup(heap), IN_STATIC);
    assert!(table.is_in_value_area(heap));
}

unsafe fn test_ranges() {
    let mut pool = StatPool::new();
    let mut table = PageTable::new(&mut pool, 64 * PAGE_SIZE).unwrap();

    // A range covers every page it touches, end exclusive.
    let start = 5 * PAGE_SIZE + 100;
    let end = 9 * PAGE_SIZE + 1;
    table.add(&mut pool, IN_HEAP, start, end).unwrap();
    for page in 5..=9 {
        assert_eq!(table.lookup(page * PAGE_SIZE), IN_HEAP);
    }
    assert_eq!(table.lookup(4 * PAGE_SIZE), 0);
    assert_eq!(table.lookup(10 * PAGE_SIZE), 0);

    // An exact page-aligned end does not spill into the next page.
    let start = 20 * PAGE_SIZE;
    table.add(&mut pool, IN_CODE, start, start + PAGE_SIZE).unwrap();
    assert_eq!(table.lookup(start + PAGE_SIZE), 0);
}

unsafe fn test_growth() {
    let mut pool = StatPool::new();
    // Start tiny so insertions cross the half-load threshold repeatedly.
    let mut table = PageTable::new(&mut pool, PAGE_SIZE).unwrap();
    let pages = 4096usize;
    let base = 0x4000_0000;
    table
        .add(&mut pool, IN_HEAP, base, base + pages * PAGE_SIZE)
        .unwrap();
    for i in 0..pages {
        assert_eq!(table.lookup(base + i * PAGE_SIZE + 17), IN_HEAP);
    }
    assert_eq!(table.lookup(base + pages * PAGE_SIZE), 0);
}

fn page_index_strategy() -> impl Strategy<Value = Vec<u16>> {
    proptest::collection::vec(1u16..4096, 0..300)
}

unsafe fn test_membership_model() {
    println!("  membership against a set model");
    let mut runner = TestRunner::new(Config {
        cases: 100,
        failure_persistence: None,
        ..Default::default()
    });
    runner
        .run(
            &(page_index_strategy(), page_index_strategy()),
            |(added, removed)| test_membership_case(added, removed),
        )
        .unwrap();
}

fn test_membership_case(added: Vec<u16>, removed: Vec<u16>) -> TestCaseResult {
    unsafe {
        let mut pool = StatPool::new();
        let mut table = PageTable::new(&mut pool, 8 * PAGE_SIZE).unwrap();
        let mut model: FxHashSet<usize> = FxHashSet::default();

        for page in &added {
            let addr = *page as usize * PAGE_SIZE;
            table.add(&mut pool, IN_HEAP, addr, addr + PAGE_SIZE).unwrap();
            model.insert(*page as usize);
        }
        for page in &removed {
            let addr = *page as usize * PAGE_SIZE;
            table
                .remove(&mut pool, IN_HEAP, addr, addr + PAGE_SIZE)
                .unwrap();
            model.remove(&(*page as usize));
        }
        for page in 1..4096usize {
            let expected = if model.contains(&page) { IN_HEAP } else { 0 };
            assert_eq!(table.lookup(page * PAGE_SIZE + 8), expected);
        }
    }
    Ok(())
}
