//! Minor collection scenarios: promotion, aging, short-circuiting,
//! ephemerons, custom blocks, and the dispatcher.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::runtime::{alloc_young_filled, new_heap, test_params, TestRuntime};
use quill_rts::constants::WORD_SIZE;
use quill_rts::gc::{
    alloc_small, check_urgent_gc, empty_minor_heap, set_minor_heap_size, Gc,
};
use quill_rts::major_heap::alloc_shr;
use quill_rts::page_table::IN_YOUNG;
use quill_rts::remembered_set::EPHE_NONE;
use quill_rts::types::{
    Color, CustomOps, Header, Value, Words, ABSTRACT_TAG, CLOSURE_TAG, CUSTOM_TAG, DOUBLE_TAG,
    FORWARD_TAG, INFIX_TAG, LAZY_TAG,
};
use quill_rts::write_barrier::{initialize, modify};

pub unsafe fn test() {
    println!("Testing minor collection ...");
    test_promote_simple_block();
    test_remembered_slot_promotion();
    test_cycle_of_two();
    test_semispace_parity();
    test_full_drain_idempotence();
    test_aging_boundary();
    test_aging_monotonicity();
    test_aged_blocks_promote_next_cycle();
    test_long_roots_never_age();
    test_size1_chains_do_not_recurse();
    test_worklist_drains_lists();
    test_short_circuit();
    test_infix_blocks();
    test_ephemerons();
    test_custom_blocks();
    test_hooks();
    test_dispatcher();
    test_check_urgent_gc();
    test_resize_minor_heap();
    test_huge_page_fallback();
}

/// Allocate a 3-field block of immediates, drain fully, and check the
/// promoted image field for field.
unsafe fn test_promote_simple_block() {
    let (mut gc, mut rt) = new_heap(4096);

    let b = alloc_young_filled(&mut gc, &mut rt, 3, 1, 10);
    let root = rt.add_long_root(b);
    let promoted_before = gc.stats.promoted_words;

    empty_minor_heap(&mut gc, &mut rt, 0.0);

    // The original carries the forwarding marker, its first field the new
    // address.
    assert!(b.header().is_forwarded());
    let new_b = b.field(0);
    assert_eq!(new_b, *root);
    assert!(gc.page_table.is_in_heap(new_b.raw()));
    assert!(!gc.young.is_young(new_b));
    assert_eq!(new_b.wosize(), 3);
    assert_eq!(new_b.tag(), 1);
    for i in 0..3 {
        assert_eq!(new_b.field(i).as_int(), 10 + i as isize);
    }
    assert_eq!(gc.stats.promoted_words - promoted_before, 4);
    assert_eq!(gc.stats.minor_collections, 1);
}

/// A young block reachable only through a major-heap field survives via
/// the remembered set; its unreachable sibling does not.
unsafe fn test_remembered_slot_promotion() {
    let (mut gc, mut rt) = new_heap(4096);

    let a = alloc_young_filled(&mut gc, &mut rt, 1, 0, 1);
    let b = alloc_young_filled(&mut gc, &mut rt, 2, 0, 2);
    let a_header = a.header();
    let o = alloc_shr(&mut gc, &mut rt, 1, 0).unwrap();
    initialize(&mut gc, o.field_ptr(0), Value::UNIT);
    modify(&mut gc, &mut rt, o.field_ptr(0), b);

    empty_minor_heap(&mut gc, &mut rt, 0.0);

    let new_b = o.field(0);
    assert!(gc.page_table.is_in_heap(new_b.raw()));
    assert_eq!(new_b.field(0).as_int(), 2);
    assert!(gc.ref_table.is_empty());
    // Nothing reached `a`: no forwarding marker was installed.
    assert!(!a.header().is_forwarded());
    assert_eq!(a.header(), a_header);
}

unsafe fn test_cycle_of_two() {
    let (mut gc, mut rt) = new_heap(4096);

    let a = alloc_small(&mut gc, &mut rt, 1, 0);
    let b = alloc_small(&mut gc, &mut rt, 1, 0);
    a.set_field(0, b);
    b.set_field(0, a);
    let root = rt.add_long_root(a);

    empty_minor_heap(&mut gc, &mut rt, 0.0);

    let new_a = *root;
    assert!(gc.page_table.is_in_heap(new_a.raw()));
    let new_b = new_a.field(0);
    assert!(gc.page_table.is_in_heap(new_b.raw()));
    assert_ne!(new_a, new_b);
    // The cycle is closed again in the major heap.
    assert_eq!(new_b.field(0), new_a);
}

unsafe fn test_semispace_parity() {
    let (mut gc, mut rt) = new_heap(4096);

    let first_start = gc.young.alloc_start;
    let first_end = gc.young.alloc_end;
    alloc_young_filled(&mut gc, &mut rt, 4, 0, 0);

    empty_minor_heap(&mut gc, &mut rt, 0.0);

    assert_eq!(gc.young.ptr, gc.young.alloc_end);
    assert_eq!(gc.young.alloc_start, first_end);
    assert_ne!(gc.young.alloc_start, first_start);
    assert_eq!(gc.young.trigger, gc.young.alloc_mid);
    assert_eq!(gc.young.limit, gc.young.trigger);

    empty_minor_heap(&mut gc, &mut rt, 0.0);
    assert_eq!(gc.young.alloc_start, first_start);
}

unsafe fn test_full_drain_idempotence() {
    let (mut gc, mut rt) = new_heap(4096);

    let b = alloc_young_filled(&mut gc, &mut rt, 2, 0, 0);
    rt.add_long_root(b);
    empty_minor_heap(&mut gc, &mut rt, 0.0);

    let minor_words = gc.stats.minor_words;
    let promoted_words = gc.stats.promoted_words;
    let collections = gc.stats.minor_collections;
    let start = gc.young.alloc_start;

    // A second full drain only advances the collection counter.
    empty_minor_heap(&mut gc, &mut rt, 0.0);
    assert_eq!(gc.stats.minor_words, minor_words);
    assert_eq!(gc.stats.promoted_words, promoted_words);
    assert_eq!(gc.stats.minor_collections, collections + 1);
    assert_eq!(gc.young.ptr, gc.young.alloc_end);
    assert_ne!(gc.young.alloc_start, start);
}

/// Fill the arena exactly and age half of it: survivors sit below the
/// aging watermark, at their original addresses.
unsafe fn test_aging_boundary() {
    let (mut gc, mut rt) = new_heap(4096);

    let arena_blocks = 4096 / 4;
    let mut origs = Vec::new();
    let mut roots = Vec::new();
    for i in 0..arena_blocks {
        let v = alloc_young_filled(&mut gc, &mut rt, 3, 0, i as isize * 3);
        roots.push(rt.add_short_root(v));
        origs.push(v);
    }
    let alloc_start = gc.young.alloc_start;
    let alloc_end = gc.young.alloc_end;
    assert_eq!(gc.young.ptr, alloc_start);

    empty_minor_heap(&mut gc, &mut rt, 0.5);

    let arena_words = (alloc_end - alloc_start) / WORD_SIZE;
    let aging_limit = alloc_start + (arena_words as f64 * 0.5) as usize * WORD_SIZE;
    let mut survivors = 0;
    for (i, (orig, root)) in origs.iter().zip(&roots).enumerate() {
        let now = **root;
        let hp = orig.raw() - WORD_SIZE;
        if hp >= alloc_start && hp < aging_limit {
            // Aged in place.
            assert_eq!(now, *orig);
            assert!(now.header().is_black());
            assert!(gc.young.is_young(now));
            survivors += 1;
        } else {
            assert_ne!(now, *orig);
            assert!(gc.page_table.is_in_heap(now.raw()));
        }
        assert_eq!(now.field(1).as_int(), i as isize * 3 + 1);
    }
    assert_eq!(survivors, arena_blocks / 2);
}

unsafe fn count_aging_survivors(ratio: f64) -> usize {
    let (mut gc, mut rt) = new_heap(4096);
    let mut roots = Vec::new();
    for i in 0..1024 {
        let v = alloc_young_filled(&mut gc, &mut rt, 3, 0, i);
        roots.push(rt.add_short_root(v));
    }
    empty_minor_heap(&mut gc, &mut rt, ratio);
    let mut survivors = 0;
    for root in &roots {
        let v = **root;
        if v.is_block() && gc.young.is_young(v) {
            survivors += 1;
        }
    }
    survivors
}

unsafe fn test_aging_monotonicity() {
    let mut last = 0;
    for ratio in [0.0, 0.25, 0.5, 0.75, 1.0] {
        let survivors = count_aging_survivors(ratio);
        assert!(survivors >= last);
        last = survivors;
    }
    assert_eq!(count_aging_survivors(0.0), 0);
    assert_eq!(count_aging_survivors(1.0), 1024);
}

/// Blocks aged in one collection sit outside the next arena; the
/// following collection promotes what is still reachable.
unsafe fn test_aged_blocks_promote_next_cycle() {
    let (mut gc, mut rt) = new_heap(4096);

    let v = alloc_young_filled(&mut gc, &mut rt, 2, 0, 40);
    let root = rt.add_short_root(v);
    empty_minor_heap(&mut gc, &mut rt, 1.0);
    assert!(gc.young.is_young(*root));
    assert!((*root).header().is_black());

    empty_minor_heap(&mut gc, &mut rt, 1.0);
    let now = *root;
    assert!(gc.page_table.is_in_heap(now.raw()));
    assert!(!gc.young.is_young(now));
    assert_eq!(now.field(0).as_int(), 40);
    assert_eq!(now.field(1).as_int(), 41);
}

unsafe fn test_long_roots_never_age() {
    let (mut gc, mut rt) = new_heap(4096);

    let short = alloc_young_filled(&mut gc, &mut rt, 1, 0, 1);
    let long = alloc_young_filled(&mut gc, &mut rt, 1, 0, 2);
    let short_root = rt.add_short_root(short);
    let long_root = rt.add_long_root(long);

    empty_minor_heap(&mut gc, &mut rt, 1.0);

    // Aging applies to the short-lived root only.
    assert!(gc.young.is_young(*short_root));
    assert_eq!(*short_root, short);
    assert!(gc.page_table.is_in_heap((*long_root).raw()));
}

/// A chain of one-field blocks is followed with the tail-call cursor;
/// deep chains must not touch the native stack.
unsafe fn test_size1_chains_do_not_recurse() {
    let (mut gc, mut rt) = new_heap(65536);

    let len = 10_000;
    let mut head = Value::from_int(-1);
    for _ in 0..len {
        let node = alloc_small(&mut gc, &mut rt, 1, 0);
        node.set_field(0, head);
        head = node;
    }
    let root = rt.add_long_root(head);

    empty_minor_heap(&mut gc, &mut rt, 0.0);

    let mut cur = *root;
    let mut count = 0;
    while cur.is_block() {
        assert!(gc.page_table.is_in_heap(cur.raw()));
        assert_eq!(cur.wosize(), 1);
        cur = cur.field(0);
        count += 1;
    }
    assert_eq!(count, len);
    assert_eq!(cur.as_int(), -1);
}

unsafe fn test_worklist_drains_lists() {
    let (mut gc, mut rt) = new_heap(4096);

    let len = 1000;
    let mut head = Value::from_int(0);
    for i in (0..len).rev() {
        let node = alloc_small(&mut gc, &mut rt, 2, 0);
        node.set_field(0, Value::from_int(i));
        node.set_field(1, head);
        head = node;
    }
    let root = rt.add_long_root(head);

    empty_minor_heap(&mut gc, &mut rt, 0.0);

    let mut cur = *root;
    for i in 0..len {
        assert!(gc.page_table.is_in_heap(cur.raw()));
        assert_eq!(cur.field(0).as_int(), i);
        cur = cur.field(1);
    }
    assert!(cur.is_int());
}

unsafe fn test_short_circuit() {
    // A forward block onto an ordinary target vanishes: the root becomes
    // the target directly.
    let (mut gc, mut rt) = new_heap(4096);
    let v3 = alloc_young_filled(&mut gc, &mut rt, 2, 0, 30);
    let v1 = alloc_small(&mut gc, &mut rt, 1, FORWARD_TAG);
    v1.set_field(0, v3);
    let root = rt.add_long_root(v1);
    empty_minor_heap(&mut gc, &mut rt, 0.0);
    let now = *root;
    assert_eq!(now.tag(), 0);
    assert_eq!(now.wosize(), 2);
    assert_eq!(now.field(0).as_int(), 30);
    // The forward block itself was never moved.
    assert!(!v1.header().is_forwarded());

    // A lazy target is opaque: the indirection is copied instead.
    let (mut gc, mut rt) = new_heap(4096);
    let thunk = alloc_young_filled(&mut gc, &mut rt, 1, LAZY_TAG, 5);
    let fwd = alloc_small(&mut gc, &mut rt, 1, FORWARD_TAG);
    fwd.set_field(0, thunk);
    let root = rt.add_long_root(fwd);
    empty_minor_heap(&mut gc, &mut rt, 0.0);
    let now = *root;
    assert_eq!(now.tag(), FORWARD_TAG);
    assert_eq!(now.field(0).tag(), LAZY_TAG);
    assert_eq!(now.field(0).field(0).as_int(), 5);

    // Same for an unboxed float target.
    let (mut gc, mut rt) = new_heap(4096);
    let dbl = alloc_small(&mut gc, &mut rt, 1, DOUBLE_TAG);
    dbl.set_field(0, Value::from_raw(0x3FF0_0000_0000_0000));
    let fwd = alloc_small(&mut gc, &mut rt, 1, FORWARD_TAG);
    fwd.set_field(0, dbl);
    let root = rt.add_long_root(fwd);
    empty_minor_heap(&mut gc, &mut rt, 0.0);
    assert_eq!((*root).tag(), FORWARD_TAG);
    assert_eq!((*root).field(0).tag(), DOUBLE_TAG);

    // In a two-hop chain the middle indirection is cut out: the first
    // forward block survives, pointing straight at the target.
    let (mut gc, mut rt) = new_heap(4096);
    let v3 = alloc_young_filled(&mut gc, &mut rt, 2, 0, 77);
    let v2 = alloc_small(&mut gc, &mut rt, 1, FORWARD_TAG);
    v2.set_field(0, v3);
    let v1 = alloc_small(&mut gc, &mut rt, 1, FORWARD_TAG);
    v1.set_field(0, v2);
    let root = rt.add_long_root(v1);
    empty_minor_heap(&mut gc, &mut rt, 0.0);
    let now = *root;
    assert_eq!(now.tag(), FORWARD_TAG);
    assert_eq!(now.field(0).tag(), 0);
    assert_eq!(now.field(0).field(0).as_int(), 77);
}

unsafe fn test_infix_blocks() {
    let (mut gc, mut rt) = new_heap(4096);

    // A closure with an interior entry point: the infix header occupies
    // field 1, the infix value points at field 2.
    let closure = alloc_small(&mut gc, &mut rt, 4, CLOSURE_TAG);
    closure.set_field(0, Value::from_int(0x100));
    closure.set_field(
        1,
        Value::from_raw(Header::new(2, INFIX_TAG, Color::White).0),
    );
    closure.set_field(2, Value::from_int(0x200));
    closure.set_field(3, Value::from_int(9));

    let infix = Value::from_raw(closure.raw() + 2 * WORD_SIZE);
    assert_eq!(infix.tag(), INFIX_TAG);
    let root = rt.add_long_root(infix);

    empty_minor_heap(&mut gc, &mut rt, 0.0);

    let now = *root;
    let new_closure = Value::from_raw(now.raw() - 2 * WORD_SIZE);
    assert!(gc.page_table.is_in_heap(new_closure.raw()));
    assert_eq!(new_closure.tag(), CLOSURE_TAG);
    assert_eq!(new_closure.wosize(), 4);
    assert_eq!(now.tag(), INFIX_TAG);
    assert_eq!(new_closure.field(0).as_int(), 0x100);
    assert_eq!(new_closure.field(3).as_int(), 9);
    // The infix value addresses the copied interior.
    assert_eq!(now.field(0).as_int(), 0x200);
    assert!(closure.header().is_forwarded());
    assert_eq!(closure.field(0), new_closure);
}

unsafe fn test_ephemerons() {
    // Key alive: the data is kept and both are relocated.
    let (mut gc, mut rt) = new_heap(4096);
    let k = alloc_young_filled(&mut gc, &mut rt, 1, 0, 1);
    let d = alloc_young_filled(&mut gc, &mut rt, 1, 0, 2);
    let ephe = alloc_shr(&mut gc, &mut rt, 3, ABSTRACT_TAG).unwrap();
    initialize(&mut gc, ephe.field_ptr(0), Value::UNIT);
    ephe.set_field(1, d);
    ephe.set_field(2, k);
    gc.register_ephe_ref(ephe, 2);
    gc.register_ephe_ref(ephe, 1);
    let key_root = rt.add_long_root(k);

    empty_minor_heap(&mut gc, &mut rt, 0.0);

    assert_eq!(ephe.field(2), *key_root);
    assert!(gc.page_table.is_in_heap(ephe.field(2).raw()));
    let new_d = ephe.field(1);
    assert!(gc.page_table.is_in_heap(new_d.raw()));
    assert_eq!(new_d.field(0).as_int(), 2);
    assert!(gc.ephe_ref_table.is_empty());

    // Key dead: key and data slots are erased together.
    let (mut gc, mut rt) = new_heap(4096);
    let k = alloc_young_filled(&mut gc, &mut rt, 1, 0, 1);
    let d = alloc_young_filled(&mut gc, &mut rt, 1, 0, 2);
    let ephe = alloc_shr(&mut gc, &mut rt, 3, ABSTRACT_TAG).unwrap();
    initialize(&mut gc, ephe.field_ptr(0), Value::UNIT);
    ephe.set_field(1, d);
    ephe.set_field(2, k);
    gc.register_ephe_ref(ephe, 2);
    gc.register_ephe_ref(ephe, 1);

    empty_minor_heap(&mut gc, &mut rt, 0.0);

    assert_eq!(ephe.field(2), EPHE_NONE);
    assert_eq!(ephe.field(1), EPHE_NONE);

    // Key aged in place: the entries stay registered for the next cycle.
    let (mut gc, mut rt) = new_heap(4096);
    let k = alloc_young_filled(&mut gc, &mut rt, 1, 0, 1);
    let d = alloc_young_filled(&mut gc, &mut rt, 1, 0, 2);
    let ephe = alloc_shr(&mut gc, &mut rt, 3, ABSTRACT_TAG).unwrap();
    initialize(&mut gc, ephe.field_ptr(0), Value::UNIT);
    ephe.set_field(1, d);
    ephe.set_field(2, k);
    gc.register_ephe_ref(ephe, 2);
    gc.register_ephe_ref(ephe, 1);
    rt.add_short_root(k);

    empty_minor_heap(&mut gc, &mut rt, 1.0);

    assert_eq!(ephe.field(2), k);
    assert!(gc.young.is_young(k));
    assert_eq!(gc.ephe_ref_table.len(), 2);
}

static FINALIZED: AtomicUsize = AtomicUsize::new(0);

unsafe fn count_finalize(_v: Value) {
    FINALIZED.fetch_add(1, Ordering::SeqCst);
}

static COUNTER_OPS: CustomOps = CustomOps {
    identifier: "test.counter",
    finalize: Some(count_finalize),
};

unsafe fn new_custom(gc: &mut Gc, rt: &mut TestRuntime) -> Value {
    let c = alloc_small(gc, rt, 2, CUSTOM_TAG);
    c.set_field(0, Value::from_raw(&COUNTER_OPS as *const CustomOps as usize));
    c.set_field(1, Value::from_int(0));
    c
}

unsafe fn test_custom_blocks() {
    // Dead: the finaliser runs during the collection.
    let (mut gc, mut rt) = new_heap(4096);
    let c = new_custom(&mut gc, &mut rt);
    gc.register_custom(c, 1, 10);
    let finalized_before = FINALIZED.load(Ordering::SeqCst);
    empty_minor_heap(&mut gc, &mut rt, 0.0);
    assert_eq!(FINALIZED.load(Ordering::SeqCst), finalized_before + 1);
    assert!(gc.custom_table.is_empty());
    assert_eq!(gc.extra_heap_resources_minor, 0.0);

    // Promoted: no finalisation, but the pacing account is charged.
    let (mut gc, mut rt) = new_heap(4096);
    let c = new_custom(&mut gc, &mut rt);
    gc.register_custom(c, 1, 10);
    rt.add_long_root(c);
    let finalized_before = FINALIZED.load(Ordering::SeqCst);
    empty_minor_heap(&mut gc, &mut rt, 0.0);
    assert_eq!(FINALIZED.load(Ordering::SeqCst), finalized_before);
    assert!(gc.custom_table.is_empty());
    assert!((gc.extra_heap_resources - 0.1).abs() < 1e-9);

    // Aged: the entry is carried over to the next collection.
    let (mut gc, mut rt) = new_heap(4096);
    let c = new_custom(&mut gc, &mut rt);
    gc.register_custom(c, 1, 10);
    rt.add_short_root(c);
    let finalized_before = FINALIZED.load(Ordering::SeqCst);
    empty_minor_heap(&mut gc, &mut rt, 1.0);
    assert_eq!(FINALIZED.load(Ordering::SeqCst), finalized_before);
    assert_eq!(gc.custom_table.len(), 1);
    assert!(c.header().is_black());
}

static BEGIN_HOOKS: AtomicUsize = AtomicUsize::new(0);
static END_HOOKS: AtomicUsize = AtomicUsize::new(0);

fn count_begin_hook() {
    BEGIN_HOOKS.fetch_add(1, Ordering::SeqCst);
}

fn count_end_hook() {
    END_HOOKS.fetch_add(1, Ordering::SeqCst);
}

unsafe fn test_hooks() {
    let (mut gc, mut rt) = new_heap(4096);
    gc.minor_gc_begin_hook = Some(count_begin_hook);
    gc.minor_gc_end_hook = Some(count_end_hook);
    let begin = BEGIN_HOOKS.load(Ordering::SeqCst);
    let end = END_HOOKS.load(Ordering::SeqCst);
    empty_minor_heap(&mut gc, &mut rt, 0.0);
    empty_minor_heap(&mut gc, &mut rt, 0.0);
    assert_eq!(BEGIN_HOOKS.load(Ordering::SeqCst), begin + 2);
    assert_eq!(END_HOOKS.load(Ordering::SeqCst), end + 2);
}

/// Bump allocation drives the collector by itself: a full arena runs a
/// minor collection (plus a major slice while the collector is idle), a
/// half-full arena runs a major slice and rearms the full trigger.
unsafe fn test_dispatcher() {
    let (mut gc, mut rt) = new_heap(4096);
    let arena_blocks = 4096 / 4;

    for _ in 0..arena_blocks {
        alloc_young_filled(&mut gc, &mut rt, 3, 0, 0);
    }
    assert_eq!(gc.stats.minor_collections, 0);

    // This one does not fit: the dispatcher runs a minor collection.
    alloc_young_filled(&mut gc, &mut rt, 3, 0, 0);
    assert_eq!(gc.stats.minor_collections, 1);
    assert_eq!(rt.major_slices, 1);
    assert_eq!(rt.final_calls, 1);
    assert_eq!(gc.young.trigger, gc.young.alloc_mid);

    // Fill to the half-way trigger: the next allocation runs a major
    // slice and rearms the full trigger.
    for _ in 0..arena_blocks / 2 - 1 {
        alloc_young_filled(&mut gc, &mut rt, 3, 0, 0);
    }
    assert_eq!(rt.major_slices, 1);
    alloc_young_filled(&mut gc, &mut rt, 3, 0, 0);
    assert_eq!(rt.major_slices, 2);
    assert_eq!(gc.stats.minor_collections, 1);
    assert_eq!(gc.young.trigger, gc.young.alloc_start);
}

unsafe fn test_check_urgent_gc() {
    let (mut gc, mut rt) = new_heap(4096);

    let v = alloc_young_filled(&mut gc, &mut rt, 2, 0, 50);
    // Nothing pending: the root passes through untouched.
    assert_eq!(check_urgent_gc(&mut gc, &mut rt, v), v);

    gc.request_minor_gc();
    let moved = check_urgent_gc(&mut gc, &mut rt, v);
    assert_ne!(moved, v);
    assert!(gc.page_table.is_in_heap(moved.raw()));
    assert_eq!(moved.field(0).as_int(), 50);
    assert_eq!(moved.field(1).as_int(), 51);
}

unsafe fn test_resize_minor_heap() {
    let (mut gc, mut rt) = new_heap(4096);

    let v = alloc_young_filled(&mut gc, &mut rt, 2, 0, 60);
    let root = rt.add_long_root(v);
    let old_start = gc.young.young_start;

    set_minor_heap_size(&mut gc, &mut rt, Words(16384).to_bytes()).unwrap();

    // Installing the new heap forced a full drain first.
    assert!(gc.page_table.is_in_heap((*root).raw()));
    assert_eq!((*root).field(0).as_int(), 60);
    assert_eq!(gc.minor_heap_wsz, 16384);
    assert_eq!(
        gc.young.young_end - gc.young.young_start,
        2 * Words(16384).to_bytes().as_usize()
    );
    assert_eq!(gc.page_table.lookup(old_start + 64) & IN_YOUNG, 0);
    assert_ne!(gc.page_table.lookup(gc.young.young_start + 64) & IN_YOUNG, 0);

    // The new arena allocates normally.
    let w = alloc_young_filled(&mut gc, &mut rt, 1, 0, 0);
    assert!(gc.young.is_young(w));
}

unsafe fn test_huge_page_fallback() {
    let mut rt = TestRuntime::new();
    let mut params = test_params(4096);
    params.use_huge_pages = true;
    let mut gc = Gc::new(&params, &mut rt).unwrap();

    // Whether or not the system grants huge pages, allocation proceeds;
    // a refusal is counted, not surfaced.
    let v = alloc_shr(&mut gc, &mut rt, 8, 0).unwrap();
    for i in 0..8 {
        initialize(&mut gc, v.field_ptr(i), Value::from_int(i as isize));
    }
    assert_eq!(gc.stats.heap_chunks, 1);
    assert!(gc.page_table.is_in_heap(v.raw()));
    assert!(gc.stats.huge_fallback_count <= 1);
}
