//! Major heap: chunk-chained shared allocation.
//!
//! The major heap is a singly-linked, address-ordered list of chunks.
//! Each chunk is a page-aligned byte range preceded by a header carrying
//! its size, the link to the next chunk and the redarkening cursors used
//! by the external collector. Inside a chunk, block headers and fields
//! are laid out contiguously with no gaps; blue blocks form the free
//! list, threaded through their first field.
//!
//! Chunk layout:
//!
//! ```text
//! ┌──────────────┬───────────────────────────────────────────────┐
//! │ ChunkHeader  │ blocks: header │ fields │ header │ fields │ … │
//! └──────────────┴───────────────────────────────────────────────┘
//!                ▲ page-aligned, this is the chunk address
//! ```
//!
//! Growth is by request: when the free list comes up empty, a padded
//! over-request is carved into blue blocks and pushed onto it. Freshly
//! allocated blocks are coloured according to the collector phase so an
//! in-progress sweep never mistakes them for garbage.

use core::ptr;

use crate::constants::{HEAP_CHUNK_MIN, PAGE_LOG, PAGE_SIZE};
use crate::gc::{fatal_error, gc_message, Gc, GcError};
use crate::page_table::IN_HEAP;
use crate::runtime::{Phase, Runtime};
use crate::types::{
    whsize_wosize, wosize_whsize, Bytes, Color, Header, Tag, Value, Words, MAX_WOSIZE,
};

#[repr(C)]
pub struct ChunkHeader {
    /// Base of the backing allocation (pool block or mapping).
    pub(crate) block: *mut u8,
    /// Usable bytes in the chunk, a multiple of the page size.
    pub size: usize,
    /// Next chunk in address order, null at the end of the chain.
    pub next: *mut u8,
    pub redarken_start: *mut Value,
    pub redarken_end: *mut Value,
    /// Whether the chunk is backed by a huge-page mapping.
    pub(crate) mapped: bool,
}

pub const CHUNK_HEADER_SIZE: usize = core::mem::size_of::<ChunkHeader>();

pub unsafe fn chunk_header(chunk: *mut u8) -> *mut ChunkHeader {
    chunk.sub(CHUNK_HEADER_SIZE) as *mut ChunkHeader
}

pub unsafe fn chunk_size(chunk: *mut u8) -> usize {
    (*chunk_header(chunk)).size
}

pub unsafe fn chunk_next(chunk: *mut u8) -> *mut u8 {
    (*chunk_header(chunk)).next
}

pub struct MajorHeap {
    /// First chunk of the address-ordered chain.
    pub heap_start: *mut u8,
}

impl MajorHeap {
    pub(crate) const fn uninit() -> MajorHeap {
        MajorHeap {
            heap_start: ptr::null_mut(),
        }
    }

    /// Iterate the chunk chain.
    pub unsafe fn chunks(&self) -> impl Iterator<Item = *mut u8> {
        let mut cur = self.heap_start;
        core::iter::from_fn(move || {
            if cur.is_null() {
                None
            } else {
                let chunk = cur;
                cur = unsafe { chunk_next(cur) };
                Some(chunk)
            }
        })
    }
}

#[cfg(target_os = "linux")]
const HUGE_PAGE_LOG: usize = 22;

#[cfg(target_os = "linux")]
fn round_mmap_size(size: usize) -> usize {
    ((size - 1) | ((1 << HUGE_PAGE_LOG) - 1)) + 1
}

#[cfg(target_os = "linux")]
unsafe fn mmap_huge(size: usize) -> *mut u8 {
    let block = libc::mmap(
        ptr::null_mut(),
        size,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_HUGETLB,
        -1,
        0,
    );
    if block == libc::MAP_FAILED {
        ptr::null_mut()
    } else {
        block as *mut u8
    }
}

/// Allocate a chunk of at least `request` bytes, to be passed to
/// [`add_to_heap`] later. The request is rounded up to a whole number of
/// pages; read the actual size back with [`chunk_size`]. The chunk's
/// header is initialized but its contents are not. Returns null when the
/// request cannot be satisfied.
pub unsafe fn alloc_for_heap(gc: &mut Gc, request: Bytes<usize>) -> *mut u8 {
    if gc.use_huge_pages {
        #[cfg(target_os = "linux")]
        {
            let size = round_mmap_size(CHUNK_HEADER_SIZE + request.as_usize());
            let block = mmap_huge(size);
            if !block.is_null() {
                let chunk = block.add(CHUNK_HEADER_SIZE);
                let header = chunk_header(chunk);
                (*header).block = block;
                (*header).size = size - CHUNK_HEADER_SIZE;
                (*header).next = ptr::null_mut();
                (*header).redarken_start = chunk.add((*header).size) as *mut Value;
                (*header).redarken_end = chunk as *mut Value;
                (*header).mapped = true;
                return chunk;
            }
        }
        // Huge pages unavailable: fall back to an ordinary aligned chunk.
        gc.stats.huge_fallback_count += 1;
    }

    let request = ((request.as_usize() + PAGE_SIZE - 1) >> PAGE_LOG) << PAGE_LOG;
    let (mem, block) = gc
        .pool
        .alloc_aligned(request + CHUNK_HEADER_SIZE, CHUNK_HEADER_SIZE);
    if mem.is_null() {
        return ptr::null_mut();
    }
    let chunk = mem.add(CHUNK_HEADER_SIZE);
    let header = chunk_header(chunk);
    (*header).block = block;
    (*header).size = request;
    (*header).next = ptr::null_mut();
    (*header).redarken_start = chunk.add(request) as *mut Value;
    (*header).redarken_end = chunk as *mut Value;
    (*header).mapped = false;
    chunk
}

/// Free a chunk obtained from [`alloc_for_heap`] that was never added to
/// the heap (or has just been unchained from it).
pub unsafe fn free_for_heap(gc: &mut Gc, chunk: *mut u8) {
    let header = chunk_header(chunk);
    if (*header).mapped {
        #[cfg(target_os = "linux")]
        libc::munmap(
            (*header).block as *mut libc::c_void,
            (*header).size + CHUNK_HEADER_SIZE,
        );
        #[cfg(not(target_os = "linux"))]
        unreachable!("huge-page chunk on a platform without huge pages");
    } else {
        gc.pool.free((*header).block);
    }
}

/// Register a chunk's pages and splice it into the address-ordered chain.
/// The chunk contents must already be a valid sequence of blocks and
/// fragments; blue blocks are the caller's to thread onto the free list.
pub unsafe fn add_to_heap(gc: &mut Gc, chunk: *mut u8) -> Result<(), GcError> {
    gc_message!(
        gc,
        0x04,
        "Growing heap to {}k bytes",
        (Words(gc.stats.heap_wsz).to_bytes().as_usize() + chunk_size(chunk)) / 1024
    );

    let start = chunk as usize;
    let end = start + chunk_size(chunk);
    gc.page_table.add(&mut gc.pool, IN_HEAP, start, end)?;

    // Chain this heap chunk.
    let mut last: *mut *mut u8 = &mut gc.major.heap_start;
    let mut cur = *last;
    while !cur.is_null() && cur < chunk {
        last = &mut (*chunk_header(cur)).next;
        cur = *last;
    }
    (*chunk_header(chunk)).next = cur;
    *last = chunk;

    gc.stats.heap_chunks += 1;
    gc.stats.heap_wsz += Bytes(chunk_size(chunk)).to_words().as_usize();
    if gc.stats.heap_wsz > gc.stats.top_heap_wsz {
        gc.stats.top_heap_wsz = gc.stats.heap_wsz;
    }
    Ok(())
}

/// Remove a chunk from the heap and give its memory back.
pub unsafe fn shrink_heap(gc: &mut Gc, chunk: *mut u8) {
    // The first chunk is never deallocated: it anchors the chain and the
    // page numbering.
    if chunk == gc.major.heap_start {
        return;
    }

    gc.stats.heap_wsz -= Bytes(chunk_size(chunk)).to_words().as_usize();
    gc_message!(gc, 0x04, "Shrinking heap to {}k words", gc.stats.heap_wsz / 1024);

    #[cfg(debug_assertions)]
    {
        let words = Bytes(chunk_size(chunk)).to_words().as_usize();
        let base = chunk as *mut usize;
        for i in 0..words {
            *base.add(i) = crate::constants::DEBUG_FREE_SHRINK;
        }
    }

    gc.stats.heap_chunks -= 1;

    // Unchain the chunk.
    let mut cp: *mut *mut u8 = &mut gc.major.heap_start;
    while *cp != chunk {
        cp = &mut (*chunk_header(*cp)).next;
    }
    *cp = chunk_next(chunk);

    // The pages must be unregistered before the memory goes away.
    let start = chunk as usize;
    if gc
        .page_table
        .remove(&mut gc.pool, IN_HEAP, start, start + chunk_size(chunk))
        .is_err()
    {
        fatal_error("page table update failed while shrinking the heap");
    }

    free_for_heap(gc, chunk);
}

/// Colour for a block freshly allocated at header address `hp`. During
/// marking (and cleaning) new blocks are black so the current cycle keeps
/// them; during sweeping the colour depends on whether the sweeper has
/// already passed the address.
pub fn allocation_color<R: Runtime>(rt: &R, hp: usize) -> Color {
    match rt.gc_phase() {
        Phase::Mark | Phase::Clean => Color::Black,
        Phase::Sweep => {
            if hp >= rt.sweep_cursor() {
                Color::Black
            } else {
                Color::White
            }
        }
        Phase::Idle => Color::White,
    }
}

/// Get more memory for the heap and carve it into a chain of blue blocks,
/// threaded through field 0; field 1 of the first block points at the
/// last. `request` is in words and must be at most [`MAX_WOSIZE`]. The
/// caller inserts the blocks into the free list. Returns
/// [`Value::NULL`] when out of memory.
unsafe fn expand_heap(gc: &mut Gc, request: usize) -> Value {
    debug_assert!(request <= MAX_WOSIZE);
    let over_request = request + request / 100 * gc.percent_free;
    let malloc_request = clip_heap_chunk_wsz(over_request);
    let mem = alloc_for_heap(gc, Words(malloc_request).to_bytes());
    if mem.is_null() {
        gc_message!(gc, 0x04, "No room for growing heap");
        return Value::NULL;
    }
    let mut remain = Bytes(chunk_size(mem)).to_words().as_usize();
    let first = mem as *mut Header;
    let mut prev = first;
    let mut hp = first;
    while wosize_whsize(remain) > MAX_WOSIZE {
        *hp = Header::new(MAX_WOSIZE, 0, Color::Blue);
        #[cfg(debug_assertions)]
        poison_fields(Value::from_hp(hp), crate::constants::DEBUG_FREE_MAJOR);
        hp = hp.add(whsize_wosize(MAX_WOSIZE));
        remain -= whsize_wosize(MAX_WOSIZE);
        Value::from_hp(prev).set_field(0, Value::from_hp(hp));
        Value::from_hp(first).set_field(1, Value::from_hp(hp));
        prev = hp;
    }
    if remain > 1 {
        *hp = Header::new(wosize_whsize(remain), 0, Color::Blue);
        #[cfg(debug_assertions)]
        poison_fields(Value::from_hp(hp), crate::constants::DEBUG_FREE_MAJOR);
        Value::from_hp(prev).set_field(0, Value::from_hp(hp));
        Value::from_hp(first).set_field(1, Value::from_hp(hp));
        Value::from_hp(hp).set_field(0, Value::NULL);
    } else {
        Value::from_hp(prev).set_field(0, Value::NULL);
        if remain == 1 {
            *hp = Header::new(0, 0, Color::White);
        }
    }
    debug_assert!((*first).wosize() >= request);
    if add_to_heap(gc, mem).is_err() {
        free_for_heap(gc, mem);
        return Value::NULL;
    }
    Value::from_hp(first)
}

fn clip_heap_chunk_wsz(wsz: usize) -> usize {
    wsz.max(HEAP_CHUNK_MIN.as_usize())
}

#[cfg(debug_assertions)]
unsafe fn poison_fields(v: Value, filler: usize) {
    for i in 0..v.wosize() {
        v.set_field(i, Value::from_raw(filler));
    }
}

unsafe fn alloc_shr_aux<R: Runtime>(
    gc: &mut Gc,
    rt: &mut R,
    wosize: usize,
    tag: Tag,
    track: bool,
    old_hd: Header,
) -> Value {
    if wosize > MAX_WOSIZE {
        return Value::NULL;
    }
    let mut hp = rt.fl_allocate(wosize);
    if hp.is_null() {
        let new_block = expand_heap(gc, wosize);
        if new_block == Value::NULL {
            return Value::NULL;
        }
        rt.fl_add_blocks(new_block);
        hp = rt.fl_allocate(wosize);
        debug_assert!(!hp.is_null());
    }

    debug_assert!(gc.page_table.is_in_heap(Value::from_hp(hp).raw()));

    let color = allocation_color(rt, hp as usize);
    *hp = Header::with_profinfo_of(wosize, tag, color, old_hd);

    gc.allocated_words += whsize_wosize(wosize);
    if gc.allocated_words > gc.minor_heap_wsz {
        gc.request_major_slice();
    }

    #[cfg(debug_assertions)]
    poison_fields(Value::from_hp(hp), crate::constants::DEBUG_UNINIT_MAJOR);

    let v = Value::from_hp(hp);
    if track {
        rt.memprof_track_alloc_shr(gc, v);
    }
    v
}

fn check_oom(gc: &Gc, v: Value) -> Result<Value, GcError> {
    if v == Value::NULL {
        if gc.in_minor_collection {
            fatal_error("out of memory");
        }
        return Err(GcError::OutOfMemory);
    }
    Ok(v)
}

/// Allocate a block of `wosize` fields directly in the major heap. The
/// fields are uninitialized; use [`crate::write_barrier::initialize`] to
/// store their first values.
pub unsafe fn alloc_shr<R: Runtime>(
    gc: &mut Gc,
    rt: &mut R,
    wosize: usize,
    tag: Tag,
) -> Result<Value, GcError> {
    if wosize > MAX_WOSIZE {
        return Err(GcError::RequestTooLarge);
    }
    let v = alloc_shr_aux(gc, rt, wosize, tag, true, Header::FORWARDED);
    check_oom(gc, v)
}

/// Shared allocation on behalf of the promotion engine: carries the
/// profiling info of the young block's header over to the copy, skips
/// allocation sampling, and treats out-of-memory as fatal (the collector
/// cannot restore its invariants half-way through a copy).
pub(crate) unsafe fn alloc_shr_for_minor_gc<R: Runtime>(
    gc: &mut Gc,
    rt: &mut R,
    wosize: usize,
    tag: Tag,
    old_hd: Header,
) -> Value {
    debug_assert!(gc.in_minor_collection);
    let v = alloc_shr_aux(gc, rt, wosize, tag, false, old_hd);
    match check_oom(gc, v) {
        Ok(v) => v,
        Err(_) => unreachable!(),
    }
}
