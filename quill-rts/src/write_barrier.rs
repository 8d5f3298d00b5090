//! Write barrier, maintained lazily in two levels.
//!
//! [`modify`] appends `(field, old value)` to a fixed-size log, filled in
//! reverse from the top, and performs the store. Only when the log fills
//! does [`modify_batch`] process the entries. The batch checks two
//! conditions per entry and takes the appropriate action:
//!
//! 1. creation of a pointer from the major heap to the minor heap
//!    — record the field in the remembered set;
//! 2. overwriting of a pointer from the major heap to the major heap that
//!    was already present at the start of the collection cycle, while the
//!    collector is marking — darken the overwritten pointer so the mark
//!    phase treats it as an additional root (snapshot-at-the-beginning).
//!
//! A direct-mapped cache keyed on the field address short-circuits
//! repeated writes to the same field within a cycle. The cache is purely
//! an accelerator: flushing it at any point is always safe, and it must
//! be flushed at the start of every minor collection and whenever the
//! collector phase changes.

use core::ptr;

use crate::constants::{MODIFY_CACHE_HASH_FACTOR, MODIFY_LOG_SIZE};
use crate::gc::{fatal_error, Gc};
use crate::runtime::{Phase, Runtime};
use crate::types::Value;

const MODIFY_CACHE_SHIFT: usize = usize::BITS as usize - crate::constants::MODIFY_CACHE_BITS;

#[derive(Clone, Copy)]
pub(crate) struct LogEntry {
    field_pointer: *mut Value,
    old_value: Value,
}

#[derive(Clone, Copy)]
pub(crate) struct CacheEntry {
    field_pointer: *mut Value,
    in_ref_table: bool,
}

impl CacheEntry {
    pub(crate) const EMPTY: CacheEntry = CacheEntry {
        field_pointer: ptr::null_mut(),
        in_ref_table: false,
    };
}

fn modify_hash(fp: *mut Value) -> usize {
    // The field address is hashed unshifted: the three constant low bits
    // only feed the multiplier.
    (fp as usize).wrapping_mul(MODIFY_CACHE_HASH_FACTOR) >> MODIFY_CACHE_SHIFT
}

pub(crate) unsafe fn init_modify(gc: &mut Gc) {
    let log = gc
        .pool
        .alloc(MODIFY_LOG_SIZE * core::mem::size_of::<LogEntry>())
        as *mut LogEntry;
    if log.is_null() {
        fatal_error("not enough memory for the modify log");
    }
    gc.modify_log = log;
    gc.modify_log_index = MODIFY_LOG_SIZE;
    flush_modify_cache(gc);
}

/// Forget everything the cache knows. Always safe; required at the start
/// of every minor collection and on any collector phase change.
pub unsafe fn flush_modify_cache(gc: &mut Gc) {
    for entry in gc.modify_cache.iter_mut() {
        entry.field_pointer = ptr::null_mut();
    }
}

/// Overwrite `*fp` with `val`, preserving the collector invariants. Use
/// this for any store into a field that may sit in the major heap or hold
/// a pointer; plain assignment is only safe when neither is possible.
/// Never triggers a collection.
pub unsafe fn modify<R: Runtime>(gc: &mut Gc, rt: &mut R, fp: *mut Value, val: Value) {
    if gc.modify_log_index == 0 {
        modify_batch(gc, rt);
    }
    gc.modify_log_index -= 1;
    let entry = gc.modify_log.add(gc.modify_log_index);
    (*entry).field_pointer = fp;
    (*entry).old_value = *fp;
    *fp = val;
}

/// Process and drain the modify log.
pub unsafe fn modify_batch<R: Runtime>(gc: &mut Gc, rt: &mut R) {
    for i in (gc.modify_log_index..MODIFY_LOG_SIZE).rev() {
        let LogEntry {
            field_pointer: fp,
            old_value: old,
        } = *gc.modify_log.add(i);
        if gc.young.is_young_addr(fp as usize) {
            // The modified object resides in the minor heap. Conditions 1
            // and 2 cannot occur.
            continue;
        }
        // The modified object resides in the major heap.
        debug_assert!(gc.page_table.is_in_heap(fp as usize));
        debug_assert!(!fp.is_null());
        let h = modify_hash(fp);
        if gc.modify_cache[h].field_pointer == fp {
            // Writing again to an already-modified field: condition 2
            // cannot re-occur.
            if !gc.modify_cache[h].in_ref_table {
                // Check for condition 1.
                let val = *fp;
                if val.is_block() && gc.young.is_young(val) {
                    gc.add_to_ref_table(fp);
                    gc.modify_cache[h].in_ref_table = true;
                }
            }
        } else {
            gc.modify_cache[h].field_pointer = fp;
            gc.modify_cache[h].in_ref_table = false;
            if old.is_block() {
                if gc.young.is_young(old) {
                    // Condition 2 cannot occur, and the batch entry for
                    // the write that stored this young pointer already
                    // recorded the field in the remembered set.
                    continue;
                }
                // [old] can be a pointer within the major heap. Check for
                // condition 2.
                if rt.gc_phase() == Phase::Mark {
                    rt.darken(gc, old);
                }
            }
            // Check for condition 1.
            let val = *fp;
            if val.is_block() && gc.young.is_young(val) {
                gc.add_to_ref_table(fp);
                gc.modify_cache[h].in_ref_table = true;
            }
        }
    }
    gc.modify_log_index = MODIFY_LOG_SIZE;
}

/// Store the first value of an unset field. Cheaper than [`modify`]: the
/// destination is known to hold no pointer yet, so only condition 1 can
/// apply, and neither the log nor the cache is involved.
pub unsafe fn initialize(gc: &mut Gc, fp: *mut Value, val: Value) {
    debug_assert!(gc.page_table.is_in_heap_or_young(fp as usize));
    *fp = val;
    if !gc.young.is_young_addr(fp as usize) && val.is_block() && gc.young.is_young(val) {
        gc.add_to_ref_table(fp);
    }
}
