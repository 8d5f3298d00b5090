//! Test embedder: a first-fit free list over real heap chunks, scripted
//! collector phases, and recording hooks.

use quill_rts::oldify::oldify_one;
use quill_rts::types::{whsize_wosize, Color, Header, Tag, Value};
use quill_rts::{Gc, Phase, Runtime, RuntimeParams};

/// First-fit free list threaded through field 0 of blue blocks.
pub struct FreeList {
    head: Value,
}

impl FreeList {
    pub fn new() -> FreeList {
        FreeList { head: Value::NULL }
    }

    pub unsafe fn allocate(&mut self, wosize: usize) -> *mut Header {
        let mut prev = Value::NULL;
        let mut cur = self.head;
        while cur != Value::NULL {
            let hd = cur.header();
            assert!(hd.is_blue(), "free list block is not blue");
            let cur_wosize = hd.wosize();
            if cur_wosize == wosize {
                let next = cur.field(0);
                if prev == Value::NULL {
                    self.head = next;
                } else {
                    prev.set_field(0, next);
                }
                return cur.hp();
            }
            if cur_wosize >= wosize + 2 {
                // Carve from the high end so the list node stays where it
                // is.
                let remaining = cur_wosize - whsize_wosize(wosize);
                cur.set_header(Header::new(remaining, 0, Color::Blue));
                return cur.field_ptr(remaining) as *mut Header;
            }
            prev = cur;
            cur = cur.field(0);
        }
        core::ptr::null_mut()
    }

    pub unsafe fn add_blocks(&mut self, chain: Value) {
        let mut cur = chain;
        while cur != Value::NULL {
            let next = cur.field(0);
            cur.set_field(0, self.head);
            self.head = cur;
            cur = next;
        }
    }
}

pub struct TestRuntime {
    pub free_list: FreeList,
    pub phase: Phase,
    pub sweep_cursor: usize,
    /// Values handed to the darken hook by the write barrier.
    pub darkened: Vec<Value>,
    pub major_slices: usize,
    pub final_calls: usize,
    long_roots: Vec<Box<Value>>,
    short_roots: Vec<Box<Value>>,
}

impl TestRuntime {
    pub fn new() -> TestRuntime {
        TestRuntime {
            free_list: FreeList::new(),
            phase: Phase::Idle,
            sweep_cursor: 0,
            darkened: Vec::new(),
            major_slices: 0,
            final_calls: 0,
            long_roots: Vec::new(),
            short_roots: Vec::new(),
        }
    }

    /// Register a root that is promoted unconditionally on collection.
    /// The returned cell address stays valid for the runtime's lifetime.
    pub fn add_long_root(&mut self, v: Value) -> *mut Value {
        self.long_roots.push(Box::new(v));
        &mut **self.long_roots.last_mut().unwrap()
    }

    /// Register a root that participates in aging.
    pub fn add_short_root(&mut self, v: Value) -> *mut Value {
        self.short_roots.push(Box::new(v));
        &mut **self.short_roots.last_mut().unwrap()
    }
}

impl Runtime for TestRuntime {
    unsafe fn fl_allocate(&mut self, wosize: usize) -> *mut Header {
        self.free_list.allocate(wosize)
    }

    unsafe fn fl_add_blocks(&mut self, chain: Value) {
        self.free_list.add_blocks(chain)
    }

    fn gc_phase(&self) -> Phase {
        self.phase
    }

    fn sweep_cursor(&self) -> usize {
        self.sweep_cursor
    }

    unsafe fn darken(&mut self, _gc: &mut Gc, v: Value) {
        self.darkened.push(v);
    }

    unsafe fn major_collection_slice(&mut self, _gc: &mut Gc, _budget: isize) {
        self.major_slices += 1;
    }

    unsafe fn oldify_long_lived_roots(&mut self, gc: &mut Gc) {
        let mut roots = std::mem::take(&mut self.long_roots);
        for r in roots.iter_mut() {
            let v = **r;
            oldify_one(gc, self, v, &mut **r);
        }
        self.long_roots = roots;
    }

    unsafe fn oldify_short_lived_roots(&mut self, gc: &mut Gc) {
        let mut roots = std::mem::take(&mut self.short_roots);
        for r in roots.iter_mut() {
            let v = **r;
            oldify_one(gc, self, v, &mut **r);
        }
        self.short_roots = roots;
    }

    unsafe fn final_do_calls(&mut self, _gc: &mut Gc) {
        self.final_calls += 1;
    }
}

pub fn test_params(minor_heap_wsz: usize) -> RuntimeParams {
    RuntimeParams {
        minor_heap_wsz,
        ..RuntimeParams::default()
    }
}

/// A collector over a fresh minor heap of `minor_heap_wsz` words per
/// semispace, wired to a [`TestRuntime`].
pub fn new_heap(minor_heap_wsz: usize) -> (Gc, TestRuntime) {
    let mut rt = TestRuntime::new();
    let gc = Gc::new(&test_params(minor_heap_wsz), &mut rt).unwrap();
    (gc, rt)
}

/// Allocate a minor block and fill its fields with immediates
/// `base, base+1, …`.
pub unsafe fn alloc_young_filled(
    gc: &mut Gc,
    rt: &mut TestRuntime,
    wosize: usize,
    tag: Tag,
    base: isize,
) -> Value {
    let v = quill_rts::gc::alloc_small(gc, rt, wosize, tag);
    for i in 0..wosize {
        v.set_field(i, Value::from_int(base + i as isize));
    }
    v
}
