//! Seam to the surrounding runtime.
//!
//! The collector core does not own the major collector's mark/sweep
//! machinery, the free list, the mutator's roots or the finaliser queue.
//! It reaches all of them through this trait, and the embedder's
//! implementations may re-enter the core through the `&mut Gc` they are
//! handed (for example a root scanner calls back into
//! [`crate::oldify::oldify_one`], a finaliser may allocate).

use crate::gc::Gc;
use crate::types::{Header, Value};

/// Phase of the external major collector. The core only reads this flag;
/// it never drives the phase machine.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Phase {
    Idle,
    Mark,
    Sweep,
    Clean,
}

pub trait Runtime {
    /// Allocate a block of `wosize` fields from the major free list.
    /// Returns the header address, or null when the free list cannot
    /// satisfy the request.
    unsafe fn fl_allocate(&mut self, wosize: usize) -> *mut Header;

    /// Hand a freshly carved chain of blue blocks to the free list. The
    /// blocks are threaded through field 0; field 1 of the first block
    /// points at the last one.
    unsafe fn fl_add_blocks(&mut self, chain: Value);

    fn gc_phase(&self) -> Phase;

    /// While sweeping, the address the sweeper has advanced to. Blocks at
    /// or above it have not been swept yet.
    fn sweep_cursor(&self) -> usize {
        0
    }

    /// Treat `v` as an additional root of the in-progress mark phase.
    unsafe fn darken(&mut self, _gc: &mut Gc, _v: Value) {}

    /// Run one slice of the major collection. A negative budget lets the
    /// collector pick its own.
    unsafe fn major_collection_slice(&mut self, _gc: &mut Gc, _budget: isize) {}

    /// Scan the roots that are expected to survive many collections.
    /// These are promoted unconditionally, never aged.
    unsafe fn oldify_long_lived_roots(&mut self, _gc: &mut Gc) {}

    /// Scan the remaining roots (stacks, local frames).
    unsafe fn oldify_short_lived_roots(&mut self, _gc: &mut Gc) {}

    /// Run pending finalisers.
    unsafe fn final_do_calls(&mut self, _gc: &mut Gc) {}

    /// Let the finaliser queue relocate its finalise-last values after a
    /// minor collection moved them.
    unsafe fn final_update_minor_roots_last(&mut self, _gc: &mut Gc) {}

    /// Allocation-sampling hook, invoked for tracked shared allocations.
    unsafe fn memprof_track_alloc_shr(&mut self, _gc: &mut Gc, _v: Value) {}
}
