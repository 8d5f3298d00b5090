//! Minor heap: a double-buffered semispace bump arena.
//!
//! The region spans `2 × H` words, halved into two semispaces. One
//! semispace at a time is the allocation arena; the bump pointer starts at
//! the arena's high end and moves down:
//!
//! ```text
//! young_start                semispace_boundary                young_end
//! │                                  │                                 │
//! ├────────── semispace 0 ───────────┼────────── semispace 1 ──────────┤
//! │                                  │                                 │
//! alloc_start      alloc_mid      alloc_end
//!       ▲                             ▲
//!    trigger                   ptr starts here, moves down
//! ```
//!
//! `trigger` is either `alloc_start` (dispatch once full) or `alloc_mid`
//! (dispatch once half-full, to interleave a major slice). `limit` is the
//! pointer compared against on allocation; it normally equals `trigger`
//! and is raised to `alloc_end` to force an immediate dispatch.
//!
//! At the end of each minor collection the semispaces switch. Blocks aged
//! in place by the collector stay behind in the previous arena; they are
//! still young, and the next collection promotes whatever is left of them.

use crate::constants::WORD_SIZE;
use crate::types::Value;

pub struct MinorHeap {
    /// Backing block of the whole region, owned by the statistics pool.
    pub(crate) base: *mut u8,
    pub young_start: usize,
    pub young_end: usize,
    pub(crate) semispace_boundary: usize,
    pub(crate) semispace_cur: usize,
    pub alloc_start: usize,
    pub alloc_mid: usize,
    pub alloc_end: usize,
    /// Next allocation, moving down. May sit slightly below the arena
    /// while a failed allocation waits for the dispatcher.
    pub ptr: usize,
    pub trigger: usize,
    pub limit: usize,
    /// Promotion worklist backing store, one slot per block of two or
    /// more fields.
    pub(crate) stack: *mut Value,
    pub(crate) stack_end: *mut Value,
}

impl MinorHeap {
    pub(crate) const fn uninit() -> MinorHeap {
        MinorHeap {
            base: core::ptr::null_mut(),
            young_start: 0,
            young_end: 0,
            semispace_boundary: 0,
            semispace_cur: 0,
            alloc_start: 0,
            alloc_mid: 0,
            alloc_end: 0,
            ptr: 0,
            trigger: 0,
            limit: 0,
            stack: core::ptr::null_mut(),
            stack_end: core::ptr::null_mut(),
        }
    }

    /// Whether `addr` lies in the minor heap (either semispace).
    pub fn is_young_addr(&self, addr: usize) -> bool {
        addr > self.young_start && addr < self.young_end
    }

    /// Whether the block value `v` lives in the minor heap.
    pub fn is_young(&self, v: Value) -> bool {
        debug_assert!(v.is_block());
        self.is_young_addr(v.raw())
    }

    /// Words allocated in the arena since the last collection.
    pub fn allocated_words(&self) -> usize {
        (self.alloc_end - self.ptr) / WORD_SIZE
    }

    /// Switch semispaces and reset the allocation arena, done at the end
    /// of every minor collection.
    pub(crate) fn flip(&mut self) {
        if self.semispace_cur == 0 {
            self.semispace_cur = 1;
            self.alloc_start = self.semispace_boundary;
            self.alloc_end = self.young_end;
        } else {
            debug_assert_eq!(self.semispace_cur, 1);
            self.semispace_cur = 0;
            self.alloc_start = self.young_start;
            self.alloc_end = self.semispace_boundary;
        }
        self.alloc_mid = self.alloc_start + (self.alloc_end - self.alloc_start) / 2;
        self.trigger = self.alloc_mid;
        self.limit = self.trigger;
        self.ptr = self.alloc_end;
    }
}
