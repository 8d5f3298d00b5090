//! Remembered-set table protocol tests.

use crate::runtime::new_heap;
use quill_rts::gc::gc_dispatch;
use quill_rts::major_heap::alloc_shr;
use quill_rts::types::{Value, ABSTRACT_TAG};
use quill_rts::write_barrier::initialize;

pub unsafe fn test() {
    println!("Testing the remembered-set tables ...");
    test_growth_protocol();
    test_ephe_and_custom_registration();
}

unsafe fn test_growth_protocol() {
    let (mut gc, mut rt) = new_heap(4096);

    // Initial table size is minor_heap_wsz / 8 entries plus a reserve of
    // 256; filling past the threshold must request a minor collection,
    // filling past the reserve must reallocate.
    let threshold = gc.minor_heap_wsz / 8;
    let entries = threshold + 256 + 32;

    let young = quill_rts::gc::alloc_small(&mut gc, &mut rt, 1, 0);
    young.set_field(0, Value::from_int(1));

    let big = alloc_shr(&mut gc, &mut rt, entries, 0).unwrap();
    assert!(!gc.requested_minor_gc);
    for i in 0..entries {
        initialize(&mut gc, big.field_ptr(i), young);
    }
    assert_eq!(gc.ref_table.len(), entries);
    // Crossing the threshold asked for a minor collection and raised the
    // allocation limit so the mutator suspends promptly.
    assert!(gc.requested_minor_gc);
    assert_eq!(gc.young.limit, gc.young.alloc_end);

    // The requested collection drains every entry.
    gc_dispatch(&mut gc, &mut rt);
    assert!(gc.ref_table.is_empty());
    assert!(!gc.requested_minor_gc);
    let promoted = big.field(0);
    assert!(gc.page_table.is_in_heap(promoted.raw()));
    for i in 1..entries {
        assert_eq!(big.field(i), promoted);
    }
}

unsafe fn test_ephe_and_custom_registration() {
    let (mut gc, mut rt) = new_heap(4096);

    assert!(gc.ephe_ref_table.is_empty());
    let ephe = alloc_shr(&mut gc, &mut rt, 3, ABSTRACT_TAG).unwrap();
    for i in 0..3 {
        initialize(&mut gc, ephe.field_ptr(i), Value::UNIT);
    }
    gc.register_ephe_ref(ephe, 2);
    gc.register_ephe_ref(ephe, 1);
    assert_eq!(gc.ephe_ref_table.len(), 2);

    // Entries whose offset lies beyond the block are treated as
    // truncated ephemerons and dropped by the next collection.
    gc.register_ephe_ref(ephe, 7);
    quill_rts::gc::empty_minor_heap(&mut gc, &mut rt, 0.0);
    assert!(gc.ephe_ref_table.is_empty());
}
