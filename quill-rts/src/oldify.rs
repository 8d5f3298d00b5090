//! Promotion and aging engine of the minor collector.
//!
//! [`oldify_one`] makes `*p` the post-collection image of `v`: young
//! blocks below the aging watermark are blackened and retained in place,
//! the rest are copied to the major heap behind a forwarding marker
//! (header zero, first field holds the new address). Blocks with more
//! than one field go onto a LIFO worklist instead of being scanned
//! immediately; [`oldify_mopup`] drains the worklist to a fixed point,
//! interleaved with the ephemeron liveness loop.
//!
//! For a promoted block the worklist entry is the *original* address, so
//! the fields are read from the pre-copy image; for an aged block the
//! entry is the block itself and the fields are rewritten in place.
//!
//! Chains of one-field blocks are followed with an explicit tail-call
//! cursor rather than recursion; only `INFIX_TAG` recurses, and that at
//! most one level deep.

use crate::constants::WORD_SIZE;
use crate::gc::Gc;
use crate::major_heap::alloc_shr_for_minor_gc;
use crate::remembered_set::{EPHE_DATA_OFFSET, EPHE_FIRST_KEY, EPHE_NONE};
use crate::runtime::Runtime;
use crate::types::{debug_assert_young_header, Header, Tag, Value};
use crate::types::{FORWARD_TAG, INFIX_TAG, LAZY_TAG, NO_SCAN_TAG};

#[cfg(feature = "flat-float-array")]
use crate::types::DOUBLE_TAG;

pub(crate) unsafe fn oldify_init(gc: &mut Gc) {
    gc.oldify_stack_ptr = gc.young.stack;
}

unsafe fn push_worklist(gc: &mut Gc, v: Value) {
    debug_assert!(gc.oldify_stack_ptr < gc.young.stack_end);
    *gc.oldify_stack_ptr = v;
    gc.oldify_stack_ptr = gc.oldify_stack_ptr.add(1);
}

/// Make `*p` the post-collection image of `v`, for root scanning and
/// similar external callers. This never records a new old-to-young
/// reference: roots are traced afresh on every cycle.
pub unsafe fn oldify_one<R: Runtime>(gc: &mut Gc, rt: &mut R, v: Value, p: *mut Value) {
    oldify_one_aux(gc, rt, v, p, false);
}

// The tests on the tag depend on INFIX_TAG, FORWARD_TAG and NO_SCAN_TAG
// being contiguous.
pub(crate) unsafe fn oldify_one_aux<R: Runtime>(
    gc: &mut Gc,
    rt: &mut R,
    mut v: Value,
    mut p: *mut Value,
    mut add_to_ref: bool,
) {
    loop {
        if !(v.is_block() && gc.young.is_young(v)) {
            *p = v;
            return;
        }
        let hp = v.raw() - WORD_SIZE;
        debug_assert!(!(hp >= gc.young.alloc_start && hp < gc.young.ptr));
        let hd = v.header();
        if hd.is_forwarded() {
            // Already moved; the forward pointer is the first field.
            *p = v.field(0);
            return;
        }
        debug_assert_young_header!(hd);
        let tag = hd.tag();
        if tag < INFIX_TAG {
            let sz = hd.wosize();
            if gc.in_aging_range(v) {
                debug_assert!(hp >= gc.young.ptr);
                // This block stays in the minor heap.
                if add_to_ref {
                    // A new old-to-young pointer.
                    gc.add_to_ref_table(p);
                }
                *p = v;
                if hd.is_white() {
                    v.set_header(hd.blackened());
                    if sz > 1 {
                        push_worklist(gc, v);
                        return;
                    }
                    debug_assert_eq!(sz, 1);
                    p = v.field_ptr(0);
                    v = v.field(0);
                    add_to_ref = false;
                    continue;
                }
                debug_assert!(hd.is_black());
                return;
            }
            let result = alloc_shr_for_minor_gc(gc, rt, sz, tag, hd);
            *p = result;
            let field0 = v.field(0);
            v.set_header(Header::FORWARDED); // set forward flag
            v.set_field(0, result); //  and forward pointer
            if sz > 1 {
                result.set_field(0, field0);
                push_worklist(gc, v);
                return;
            }
            debug_assert_eq!(sz, 1);
            p = result.field_ptr(0);
            v = field0;
            add_to_ref = true;
        } else if tag >= NO_SCAN_TAG {
            let sz = hd.wosize();
            if gc.in_aging_range(v) {
                debug_assert!(hp >= gc.young.ptr);
                // This block stays in the minor heap.
                if add_to_ref {
                    gc.add_to_ref_table(p);
                }
                v.set_header(hd.blackened());
                *p = v;
            } else {
                let result = alloc_shr_for_minor_gc(gc, rt, sz, tag, hd);
                for i in 0..sz {
                    result.set_field(i, v.field(i));
                }
                v.set_header(Header::FORWARDED);
                v.set_field(0, result);
                *p = result;
            }
            return;
        } else if tag == INFIX_TAG {
            let offset = hd.infix_offset();
            // Cannot recurse deeper than one level.
            oldify_one(gc, rt, Value::from_raw(v.raw() - offset), p);
            *p = Value::from_raw((*p).raw() + offset);
            return;
        } else {
            debug_assert_eq!(tag, FORWARD_TAG);
            let f = v.field(0);
            let mut vv = true;
            let mut ft: Tag = 0;

            if f.is_block() {
                if gc.young.is_young(f) {
                    ft = if f.header().is_forwarded() {
                        f.field(0).tag()
                    } else {
                        f.tag()
                    };
                } else {
                    vv = gc.page_table.is_in_value_area(f.raw());
                    if vv {
                        ft = f.tag();
                    }
                }
            }
            #[cfg(feature = "flat-float-array")]
            let opaque = !vv || ft == FORWARD_TAG || ft == LAZY_TAG || ft == DOUBLE_TAG;
            #[cfg(not(feature = "flat-float-array"))]
            let opaque = !vv || ft == FORWARD_TAG || ft == LAZY_TAG;

            if opaque {
                // Do not short-circuit the pointer. Copy as a normal
                // block.
                debug_assert_eq!(hd.wosize(), 1);
                if gc.in_aging_range(v) {
                    debug_assert!(hp >= gc.young.ptr);
                    if add_to_ref {
                        gc.add_to_ref_table(p);
                    }
                    v.set_header(hd.blackened());
                    *p = v;
                    p = v.field_ptr(0);
                    v = f;
                    add_to_ref = false;
                } else {
                    let result = alloc_shr_for_minor_gc(gc, rt, 1, FORWARD_TAG, hd);
                    *p = result;
                    v.set_header(Header::FORWARDED);
                    v.set_field(0, result);
                    p = result.field_ptr(0);
                    v = f;
                    add_to_ref = true;
                }
            } else {
                // Follow the forwarding, then oldify.
                v = f;
            }
        }
    }
}

/// Whether all keys of the ephemeron are alive: copied, aged, or outside
/// the minor heap.
unsafe fn ephe_check_alive_data(gc: &Gc, ephe: Value) -> bool {
    for i in EPHE_FIRST_KEY..ephe.wosize() {
        let child = ephe.field(i);
        if child != EPHE_NONE && child.is_block() && gc.young_and_dead(child) {
            // Neither copied to the major heap nor retained in the minor
            // heap.
            return false;
        }
    }
    true
}

/// Finish the work put off by [`oldify_one_aux`]: drain the worklist,
/// then give the data of live ephemerons the same treatment, looping
/// until no ephemeron produces new work. The top of the worklist is
/// popped before its fields are oldified, since oldifying may push.
pub unsafe fn oldify_mopup<R: Runtime>(gc: &mut Gc, rt: &mut R) {
    let mut redo = true;
    while redo {
        redo = false;
        while gc.oldify_stack_ptr != gc.young.stack {
            gc.oldify_stack_ptr = gc.oldify_stack_ptr.sub(1);
            let v = *gc.oldify_stack_ptr;
            let hd = v.header();
            if hd.is_forwarded() {
                // Promoted to the major heap.
                let new_v = v.field(0);
                let hd = new_v.header();
                debug_assert_young_header!(hd);
                debug_assert!(hd.tag() < INFIX_TAG);

                // Field 0 was stashed in the copy when the block was
                // promoted; the remaining fields still sit in the
                // original.
                let f = new_v.field(0);
                if f.is_block() && gc.young.is_young(f) {
                    oldify_one_aux(gc, rt, f, new_v.field_ptr(0), true);
                }
                for i in 1..hd.wosize() {
                    let f = v.field(i);
                    if f.is_block() && gc.young.is_young(f) {
                        oldify_one_aux(gc, rt, f, new_v.field_ptr(i), true);
                    } else {
                        new_v.set_field(i, f);
                    }
                }
            } else {
                // Kept in the minor heap.
                debug_assert_young_header!(hd);
                debug_assert!(hd.is_black());
                for i in 0..hd.wosize() {
                    let f = v.field(i);
                    if f.is_block() && gc.young.is_young(f) {
                        oldify_one_aux(gc, rt, f, v.field_ptr(i), false);
                    }
                }
            }
        }

        // Oldify the minor-heap data of alive ephemerons. During a minor
        // collection, keys outside the minor heap count as alive.
        let mut re = gc.ephe_ref_table.base;
        while re < gc.ephe_ref_table.ptr {
            let entry = *re;
            if entry.offset == EPHE_DATA_OFFSET {
                let data = entry.ephe.field_ptr(EPHE_DATA_OFFSET);
                let d = *data;
                if d != EPHE_NONE && d.is_block() && gc.young.is_young(d) {
                    if d.header().is_forwarded() {
                        // Data already copied to the major heap.
                        *data = d.field(0);
                    } else if gc.kept_in_minor_heap(d) {
                        debug_assert!(d.raw() - WORD_SIZE >= gc.young.ptr);
                    } else if ephe_check_alive_data(gc, entry.ephe) {
                        oldify_one_aux(gc, rt, d, data, false);
                        redo = true; // the worklist may have refilled
                    }
                }
            }
            re = re.add(1);
        }
    }
}
