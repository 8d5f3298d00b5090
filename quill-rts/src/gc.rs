//! Collector state and the minor collection cycle.
//!
//! All process-wide mutable state of the core — both heaps, the page
//! residency table, the remembered-set tables, the write-barrier log and
//! cache, tunables and counters — is bundled in [`Gc`], passed explicitly
//! to every operation together with the embedder's [`Runtime`].
//!
//! Scheduling is single-threaded and cooperative: the mutator bumps the
//! minor allocation pointer until it crosses `limit`, then calls
//! [`gc_dispatch`], which runs a minor collection, a major slice, or
//! both. A collection runs to completion once entered.

use core::ptr;

use crate::config::RuntimeParams;
use crate::constants::{MAX_YOUNG_WOSIZE, MODIFY_CACHE_SIZE, WORD_SIZE};
use crate::major_heap::MajorHeap;
use crate::minor_heap::MinorHeap;
use crate::oldify::{oldify_init, oldify_mopup, oldify_one_aux};
use crate::page_table::{PageTable, IN_YOUNG};
use crate::remembered_set::{
    realloc_table, CustomElt, CustomTable, EpheRef, EpheRefTable, RefTable, EPHE_DATA_OFFSET,
    EPHE_NONE,
};
use crate::runtime::{Phase, Runtime};
use crate::stat_alloc::StatPool;
use crate::types::{whsize_wosize, Bytes, Color, Header, Tag, Value, Words, CUSTOM_TAG};
use crate::write_barrier::{flush_modify_cache, init_modify, modify_batch, CacheEntry, LogEntry};

#[derive(Debug, thiserror::Error)]
pub enum GcError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("allocation request exceeds the maximum block size")]
    RequestTooLarge,
}

/// Unrecoverable runtime condition, e.g. an allocation failure while a
/// collection is rewriting the heap.
pub fn fatal_error(msg: &str) -> ! {
    panic!("fatal error: {msg}")
}

macro_rules! gc_message {
    ($gc:expr, $mask:expr, $($arg:tt)*) => {
        if $gc.verb_gc & $mask != 0 {
            log::debug!($($arg)*);
        }
    };
}
pub(crate) use gc_message;

/// Counters exposed to the mutator program.
#[derive(Debug, Default, Clone)]
pub struct GcStats {
    /// Words allocated in the minor heap over the program's lifetime.
    pub minor_words: usize,
    /// Words promoted from the minor heap to the major heap.
    pub promoted_words: usize,
    pub minor_collections: usize,
    /// Current major heap size in words.
    pub heap_wsz: usize,
    /// Largest major heap size reached, in words.
    pub top_heap_wsz: usize,
    pub heap_chunks: usize,
    /// Times a huge-page mapping failed and an ordinary chunk was used
    /// instead.
    pub huge_fallback_count: usize,
}

pub struct Gc {
    pub(crate) pool: StatPool,
    pub page_table: PageTable,
    pub young: MinorHeap,
    pub major: MajorHeap,

    pub ref_table: RefTable,
    pub ref_table_aux: RefTable,
    pub ephe_ref_table: EpheRefTable,
    pub custom_table: CustomTable,

    pub(crate) modify_log: *mut LogEntry,
    pub(crate) modify_log_index: usize,
    pub(crate) modify_cache: Box<[CacheEntry; MODIFY_CACHE_SIZE]>,

    pub(crate) oldify_stack_ptr: *mut Value,
    pub(crate) aging_limit: usize,
    pub(crate) extra_roots: Vec<Value>,

    pub in_minor_collection: bool,
    pub requested_minor_gc: bool,
    pub requested_major_slice: bool,

    // Tunables.
    pub minor_heap_wsz: usize,
    pub young_aging_ratio: f64,
    pub percent_free: usize,
    pub use_huge_pages: bool,
    pub verb_gc: usize,

    /// Aging ratio of the most recent minor collection.
    pub latest_aging_ratio: f64,

    /// Major-heap words allocated since the external collector last reset
    /// the counter; overflowing `minor_heap_wsz` requests a major slice.
    pub allocated_words: usize,
    pub gc_clock: f64,
    pub extra_heap_resources: f64,
    pub extra_heap_resources_minor: f64,
    pub dependent_size: usize,
    pub dependent_allocated: usize,

    pub stats: GcStats,

    pub minor_gc_begin_hook: Option<fn()>,
    pub minor_gc_end_hook: Option<fn()>,
}

impl Gc {
    /// Build the collector state and install a minor heap sized per
    /// `params`.
    pub fn new<R: Runtime>(params: &RuntimeParams, rt: &mut R) -> Result<Gc, GcError> {
        let mut pool = StatPool::new();
        let minor_bytes = Words(params.minor_heap_wsz).to_bytes().as_usize();
        let page_table = PageTable::new(&mut pool, 4 * minor_bytes)?;
        let mut gc = Gc {
            pool,
            page_table,
            young: MinorHeap::uninit(),
            major: MajorHeap::uninit(),
            ref_table: RefTable::new(),
            ref_table_aux: RefTable::new(),
            ephe_ref_table: EpheRefTable::new(),
            custom_table: CustomTable::new(),
            modify_log: ptr::null_mut(),
            modify_log_index: 0,
            modify_cache: Box::new([CacheEntry::EMPTY; MODIFY_CACHE_SIZE]),
            oldify_stack_ptr: ptr::null_mut(),
            aging_limit: 0,
            extra_roots: Vec::new(),
            in_minor_collection: false,
            requested_minor_gc: false,
            requested_major_slice: false,
            minor_heap_wsz: params.minor_heap_wsz,
            young_aging_ratio: params.aging_ratio,
            percent_free: params.percent_free,
            use_huge_pages: params.use_huge_pages,
            verb_gc: params.verb_gc,
            latest_aging_ratio: 0.0,
            allocated_words: 0,
            gc_clock: 0.0,
            extra_heap_resources: 0.0,
            extra_heap_resources_minor: 0.0,
            dependent_size: 0,
            dependent_allocated: 0,
            stats: GcStats::default(),
            minor_gc_begin_hook: None,
            minor_gc_end_hook: None,
        };
        unsafe {
            init_modify(&mut gc);
            set_minor_heap_size(&mut gc, rt, Bytes(minor_bytes))?;
        }
        Ok(gc)
    }

    /// Ask for a minor collection at the next suspension point.
    pub fn request_minor_gc(&mut self) {
        self.requested_minor_gc = true;
        self.young.limit = self.young.alloc_end;
    }

    /// Ask for a major collection slice at the next suspension point.
    pub fn request_major_slice(&mut self) {
        self.requested_major_slice = true;
        self.young.limit = self.young.alloc_end;
    }

    /// Whether the block's header sits in the aging range of the current
    /// collection: such blocks are retained in place instead of promoted.
    pub(crate) unsafe fn in_aging_range(&self, v: Value) -> bool {
        let hp = v.raw() - WORD_SIZE;
        hp >= self.young.alloc_start && hp < self.aging_limit
    }

    /// Whether the current collection retained `v` in the minor heap.
    pub(crate) unsafe fn kept_in_minor_heap(&self, v: Value) -> bool {
        self.in_aging_range(v) && v.header().is_black()
    }

    /// Whether `v` is a young block the current collection neither copied
    /// nor retained.
    pub(crate) unsafe fn young_and_dead(&self, v: Value) -> bool {
        self.young.is_young(v) && !v.header().is_forwarded() && !self.kept_in_minor_heap(v)
    }

    /// Record a major-heap field that may hold a young pointer.
    pub(crate) unsafe fn add_to_ref_table(&mut self, p: *mut Value) {
        if self.ref_table.is_full() {
            let init = self.minor_heap_wsz / 8;
            let pending = self.requested_minor_gc;
            if realloc_table(&mut self.ref_table, &mut self.pool, init, pending, "ref_table") {
                self.request_minor_gc();
            }
        }
        self.ref_table.push_unchecked(p);
    }

    /// Track an ephemeron key or data slot that involves the minor heap.
    pub unsafe fn register_ephe_ref(&mut self, ephe: Value, offset: usize) {
        if self.ephe_ref_table.is_full() {
            let init = self.minor_heap_wsz / 8;
            let pending = self.requested_minor_gc;
            if realloc_table(
                &mut self.ephe_ref_table,
                &mut self.pool,
                init,
                pending,
                "ephe_ref_table",
            ) {
                self.request_minor_gc();
            }
        }
        self.ephe_ref_table.push_unchecked(EpheRef { ephe, offset });
    }

    /// Track a finaliser-bearing custom block living in the minor heap.
    /// `mem`/`max` feed the collection pacing once the block is promoted.
    pub unsafe fn register_custom(&mut self, block: Value, mem: usize, max: usize) {
        debug_assert_eq!(block.tag(), CUSTOM_TAG);
        if self.custom_table.is_full() {
            let init = self.minor_heap_wsz / 8;
            let pending = self.requested_minor_gc;
            if realloc_table(
                &mut self.custom_table,
                &mut self.pool,
                init,
                pending,
                "custom_table",
            ) {
                self.request_minor_gc();
            }
        }
        self.custom_table.push_unchecked(CustomElt { block, mem, max });
        if max != 0 {
            self.extra_heap_resources_minor += mem as f64 / max as f64;
            if self.extra_heap_resources_minor > 1.0 {
                self.request_minor_gc();
            }
        }
    }

    /// Speed up the major collector when finalised blocks hold resources
    /// other than memory: at least one cycle per `max` resources, of
    /// which `res` were just allocated.
    pub fn adjust_gc_speed(&mut self, res: usize, max: usize) {
        let max = if max == 0 { 1 } else { max };
        let res = res.min(max);
        self.extra_heap_resources += res as f64 / max as f64;
        if self.extra_heap_resources > 1.0 {
            self.extra_heap_resources = 1.0;
            self.request_major_slice();
        }
    }

    /// Account memory allocated outside the heap whose deallocation
    /// depends on the collector (and finalisers).
    pub fn alloc_dependent_memory(&mut self, nbytes: usize) {
        self.dependent_size += nbytes / WORD_SIZE;
        self.dependent_allocated += nbytes / WORD_SIZE;
    }

    pub fn free_dependent_memory(&mut self, nbytes: usize) {
        self.dependent_size = self.dependent_size.saturating_sub(nbytes / WORD_SIZE);
    }
}

impl Drop for Gc {
    fn drop(&mut self) {
        // Pool-backed memory (chunks, tables, the minor heap region, the
        // modify log) goes away with the pool; huge-page chunks need
        // explicit unmapping.
        #[cfg(target_os = "linux")]
        unsafe {
            use crate::major_heap::{chunk_header, CHUNK_HEADER_SIZE};
            let mut chunk = self.major.heap_start;
            while !chunk.is_null() {
                let header = chunk_header(chunk);
                let next = (*header).next;
                if (*header).mapped {
                    libc::munmap(
                        (*header).block as *mut libc::c_void,
                        (*header).size + CHUNK_HEADER_SIZE,
                    );
                }
                chunk = next;
            }
        }
    }
}

/// Install a minor heap of `2 × bsz` bytes (`bsz` per semispace). Any
/// live young data is drained to the major heap first. The remembered
/// tables are reset.
pub unsafe fn set_minor_heap_size<R: Runtime>(
    gc: &mut Gc,
    rt: &mut R,
    bsz: Bytes<usize>,
) -> Result<(), GcError> {
    let bsz = bsz.as_usize();
    debug_assert!(bsz >= crate::constants::MINOR_HEAP_MIN.to_bytes().as_usize());
    debug_assert!(bsz <= crate::constants::MINOR_HEAP_MAX.to_bytes().as_usize());
    debug_assert_eq!(bsz % WORD_SIZE, 0);

    if gc.young.ptr != gc.young.alloc_end || gc.latest_aging_ratio != 0.0 {
        // The minor heap must be emptied before it can move.
        gc.requested_minor_gc = false;
        empty_minor_heap(gc, rt, 0.0);
    }
    debug_assert_eq!(gc.young.ptr, gc.young.alloc_end);

    let (new_heap, new_base) = gc.pool.alloc_aligned(2 * bsz, 0);
    if new_heap.is_null() {
        return Err(GcError::OutOfMemory);
    }
    // The worklist needs at most one slot per block of two or more fields
    // in the minor heap.
    let stack_entries = Bytes(2 * bsz).to_words().as_usize() / whsize_wosize(2);
    let new_stack = gc.pool.alloc(Words(stack_entries).to_bytes().as_usize()) as *mut Value;
    if new_stack.is_null() {
        gc.pool.free(new_base);
        return Err(GcError::OutOfMemory);
    }
    let start = new_heap as usize;
    if gc
        .page_table
        .add(&mut gc.pool, IN_YOUNG, start, start + 2 * bsz)
        .is_err()
    {
        gc.pool.free(new_stack as *mut u8);
        gc.pool.free(new_base);
        return Err(GcError::OutOfMemory);
    }

    if gc.young.young_start != 0 {
        gc.page_table
            .remove(
                &mut gc.pool,
                IN_YOUNG,
                gc.young.young_start,
                gc.young.young_end,
            )
            .map_err(|_| GcError::OutOfMemory)?;
        gc.pool.free(gc.young.base);
        debug_assert!(!gc.young.stack.is_null());
        gc.pool.free(gc.young.stack as *mut u8);
    }

    gc.young.base = new_base;
    gc.young.young_start = start;
    gc.young.young_end = start + 2 * bsz;
    gc.young.semispace_boundary = start + bsz;
    gc.young.semispace_cur = 0;
    gc.young.alloc_start = gc.young.young_start;
    gc.young.alloc_end = gc.young.semispace_boundary;
    gc.young.alloc_mid = gc.young.alloc_start + (gc.young.alloc_end - gc.young.alloc_start) / 2;
    gc.young.trigger = gc.young.alloc_start;
    gc.young.limit = gc.young.trigger;
    gc.young.ptr = gc.young.alloc_end;
    gc.young.stack = new_stack;
    gc.young.stack_end = new_stack.add(stack_entries);
    gc.minor_heap_wsz = Bytes(bsz).to_words().as_usize();

    gc.ref_table.reset(&mut gc.pool);
    gc.ephe_ref_table.reset(&mut gc.pool);
    gc.custom_table.reset(&mut gc.pool);
    Ok(())
}

/// Allocate a block of `wosize` fields in the minor heap by bumping the
/// allocation pointer, dispatching the collector as needed. The fields
/// are left uninitialized; the caller must fill them before the next
/// suspension point.
pub unsafe fn alloc_small<R: Runtime>(gc: &mut Gc, rt: &mut R, wosize: usize, tag: Tag) -> Value {
    debug_assert!(wosize >= 1 && wosize <= MAX_YOUNG_WOSIZE);
    let bytes = Words(whsize_wosize(wosize)).to_bytes().as_usize();
    loop {
        gc.young.ptr -= bytes;
        if gc.young.ptr < gc.young.limit {
            gc.young.ptr += bytes;
            gc_dispatch(gc, rt);
            continue;
        }
        let hp = gc.young.ptr as *mut Header;
        *hp = Header::new(wosize, tag, Color::White);
        return Value::from_hp(hp);
    }
}

/// Do a partial collection of the minor heap. `aging_ratio` says how much
/// of the most recently allocated data is kept in the minor heap, between
/// 0 (none — a full drain) and 1 (the whole arena).
pub unsafe fn empty_minor_heap<R: Runtime>(gc: &mut Gc, rt: &mut R, aging_ratio: f64) {
    debug_assert!((0.0..=1.0).contains(&aging_ratio));
    gc.latest_aging_ratio = aging_ratio;
    if let Some(hook) = gc.minor_gc_begin_hook {
        hook();
    }
    let prev_alloc_words = gc.allocated_words;
    gc.in_minor_collection = true;
    gc_message!(gc, 0x02, "<");

    // Pending logged writes must reach the remembered set before the
    // collection reads it, and the cache starts every cycle cold.
    modify_batch(gc, rt);
    flush_modify_cache(gc);

    oldify_init(gc);

    // Switch to a new ref table; the one with the previous cycle's
    // entries is processed below and then recycled.
    debug_assert!(gc.ref_table_aux.is_empty());
    core::mem::swap(&mut gc.ref_table, &mut gc.ref_table_aux);

    // Long-lived roots are promoted unconditionally: they would otherwise
    // cycle through aging on every collection.
    gc.aging_limit = gc.young.alloc_start;
    rt.oldify_long_lived_roots(gc);

    let arena_words = (gc.young.alloc_end - gc.young.alloc_start) / WORD_SIZE;
    gc.aging_limit =
        gc.young.alloc_start + (arena_words as f64 * aging_ratio) as usize * WORD_SIZE;
    debug_assert!(gc.aging_limit <= gc.young.alloc_end);

    {
        let mut r = gc.ref_table_aux.base;
        while r < gc.ref_table_aux.ptr {
            let slot = *r;
            oldify_one_aux(gc, rt, *slot, slot, true);
            r = r.add(1);
        }
    }
    // Empty the old remembered set to prepare for the next cycle.
    let keep = gc.ref_table_aux.base;
    gc.ref_table_aux.clear(keep);

    rt.oldify_short_lived_roots(gc);
    let mut extra = core::mem::take(&mut gc.extra_roots);
    for slot in extra.iter_mut() {
        let v = *slot;
        oldify_one_aux(gc, rt, v, slot, false);
    }
    gc.extra_roots = extra;

    oldify_mopup(gc, rt);

    // Update the ephemerons: fix keys of promoted values, keep entries
    // whose value aged in place, erase dead keys together with the data.
    let mut keep_re = gc.ephe_ref_table.base;
    {
        let mut re = gc.ephe_ref_table.base;
        while re < gc.ephe_ref_table.ptr {
            let entry = *re;
            // A larger offset means the ephemeron has been truncated.
            if entry.offset < entry.ephe.wosize() {
                let key = entry.ephe.field_ptr(entry.offset);
                let v = *key;
                if v != EPHE_NONE && v.is_block() && gc.young.is_young(v) {
                    if v.header().is_forwarded() {
                        *key = v.field(0);
                    } else if gc.kept_in_minor_heap(v) {
                        debug_assert!(v.raw() - WORD_SIZE >= gc.young.ptr);
                        *keep_re = entry;
                        keep_re = keep_re.add(1);
                    } else {
                        *key = EPHE_NONE;
                        entry.ephe.set_field(EPHE_DATA_OFFSET, EPHE_NONE);
                    }
                }
            }
            re = re.add(1);
        }
    }

    // Let the finaliser queue relocate its finalise-last values.
    rt.final_update_minor_roots_last(gc);

    // Custom blocks: promoted ones feed the pacing numbers, aged ones
    // keep their entry, dead ones get finalised now.
    let mut keep_elt = gc.custom_table.base;
    {
        let mut elt = gc.custom_table.base;
        while elt < gc.custom_table.ptr {
            let e = *elt;
            let v = e.block;
            if v.header().is_forwarded() {
                gc.adjust_gc_speed(e.mem, e.max);
            } else if gc.kept_in_minor_heap(v) {
                debug_assert!(v.raw() - WORD_SIZE >= gc.young.ptr);
                debug_assert_eq!(v.tag(), CUSTOM_TAG);
                *keep_elt = e;
                keep_elt = keep_elt.add(1);
            } else {
                debug_assert_eq!(v.tag(), CUSTOM_TAG);
                if let Some(final_fun) = (*v.custom_ops()).finalize {
                    final_fun(v);
                }
            }
            elt = elt.add(1);
        }
    }

    let minor_words = gc.young.allocated_words();
    gc.stats.minor_words += minor_words;
    gc.gc_clock += minor_words as f64 / gc.minor_heap_wsz as f64;

    gc.young.flip();

    gc.ephe_ref_table.clear(keep_re);
    gc.custom_table.clear(keep_elt);
    gc.extra_heap_resources_minor = 0.0;
    gc_message!(gc, 0x02, ">");
    gc.in_minor_collection = false;

    gc.stats.promoted_words += gc.allocated_words - prev_alloc_words;
    gc.stats.minor_collections += 1;
    if let Some(hook) = gc.minor_gc_end_hook {
        hook();
    }

    #[cfg(debug_assertions)]
    {
        let mut p = gc.young.alloc_start;
        while p < gc.young.alloc_end {
            *(p as *mut usize) = crate::constants::DEBUG_FREE_MINOR;
            p += WORD_SIZE;
        }
    }
}

/// Empty the minor heap entirely.
pub unsafe fn minor_collection<R: Runtime>(gc: &mut Gc, rt: &mut R) {
    empty_minor_heap(gc, rt, 0.0);
}

/// Do a minor collection or a slice of major collection, call finalisers,
/// etc. Leaves enough room in the minor heap to allocate at least one
/// block.
pub unsafe fn gc_dispatch<R: Runtime>(gc: &mut Gc, rt: &mut R) {
    if gc.young.trigger == gc.young.alloc_start {
        // The minor heap is full: a minor collection is due.
        gc.requested_minor_gc = true;
    } else {
        // The minor heap is half-full: run a major slice.
        gc.requested_major_slice = true;
    }
    if gc.requested_minor_gc {
        gc.requested_minor_gc = false;
        if rt.gc_phase() == Phase::Idle {
            // Empty the minor heap so a major collection can start.
            empty_minor_heap(gc, rt, 0.0);
            rt.major_collection_slice(gc, -1);
        } else {
            empty_minor_heap(gc, rt, gc.young_aging_ratio);
        }

        rt.final_do_calls(gc);

        while gc.young.ptr - gc.young.alloc_start
            < Words(whsize_wosize(MAX_YOUNG_WOSIZE)).to_bytes().as_usize()
        {
            // The finalisers or the hooks have filled up the minor heap:
            // repeat the minor collection.
            gc.requested_minor_gc = false;
            empty_minor_heap(gc, rt, gc.young_aging_ratio);
        }
    }
    if gc.requested_major_slice {
        gc.requested_major_slice = false;
        gc.young.trigger = gc.young.alloc_start;
        gc.young.limit = gc.young.trigger;
        rt.major_collection_slice(gc, -1);
    }
}

/// Run a pending collection, if any was requested, and return `root`
/// relocated to its post-collection image.
pub unsafe fn check_urgent_gc<R: Runtime>(gc: &mut Gc, rt: &mut R, root: Value) -> Value {
    if gc.requested_major_slice || gc.requested_minor_gc {
        gc.extra_roots.push(root);
        gc_dispatch(gc, rt);
        gc.extra_roots.pop().unwrap()
    } else {
        root
    }
}
