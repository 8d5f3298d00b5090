//! Remembered-set tables.
//!
//! Three parallel tables track everything the minor collector must visit
//! besides the roots:
//!
//! * [`RefTable`] — addresses of major-heap fields that may hold a young
//!   pointer (the old-to-young remembered set proper).
//! * [`EpheRefTable`] — ephemeron key/value slots involving the minor
//!   heap.
//! * [`CustomTable`] — finaliser-bearing custom blocks currently in the
//!   minor heap.
//!
//! Each is a growable buffer with `base <= ptr <= threshold <= limit <=
//! end`. Crossing `threshold` requests a minor collection; only once that
//! request is pending may the buffer grow to `end` and then double.
//! Allocation failure while growing is fatal: the collector cannot give
//! up half-way through recording a reference.

use crate::stat_alloc::StatPool;
use crate::types::Value;

/// Sentinel stored in an emptied ephemeron key or data slot.
pub const EPHE_NONE: Value = Value::UNIT;

/// Field index of an ephemeron's data slot.
pub const EPHE_DATA_OFFSET: usize = 1;

/// Field index of an ephemeron's first key.
pub const EPHE_FIRST_KEY: usize = 2;

/// An ephemeron together with the field index of the tracked key or data
/// slot.
#[derive(Debug, Clone, Copy)]
pub struct EpheRef {
    pub ephe: Value,
    pub offset: usize,
}

/// A custom block in the minor heap, with its resource accounting
/// parameters for collection pacing.
#[derive(Debug, Clone, Copy)]
pub struct CustomElt {
    pub block: Value,
    pub mem: usize,
    pub max: usize,
}

pub type RefTable = Table<*mut Value>;
pub type EpheRefTable = Table<EpheRef>;
pub type CustomTable = Table<CustomElt>;

pub struct Table<T> {
    pub(crate) base: *mut T,
    pub(crate) end: *mut T,
    pub(crate) threshold: *mut T,
    pub(crate) ptr: *mut T,
    pub(crate) limit: *mut T,
    size: usize,
    reserve: usize,
}

impl<T: Copy> Table<T> {
    pub const fn new() -> Table<T> {
        Table {
            base: core::ptr::null_mut(),
            end: core::ptr::null_mut(),
            threshold: core::ptr::null_mut(),
            ptr: core::ptr::null_mut(),
            limit: core::ptr::null_mut(),
            size: 0,
            reserve: 0,
        }
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        if self.base.is_null() {
            0
        } else {
            unsafe { self.ptr.offset_from(self.base) as usize }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn is_full(&self) -> bool {
        self.ptr >= self.limit
    }

    pub unsafe fn as_slice(&self) -> &[T] {
        if self.base.is_null() {
            &[]
        } else {
            core::slice::from_raw_parts(self.base, self.len())
        }
    }

    /// `sz` and `rsv` are numbers of entries.
    pub(crate) unsafe fn alloc(&mut self, pool: &mut StatPool, sz: usize, rsv: usize) {
        self.size = sz;
        self.reserve = rsv;
        let new_base =
            pool.calloc(self.size + self.reserve, core::mem::size_of::<T>()) as *mut T;
        if new_base.is_null() {
            crate::gc::fatal_error("not enough memory");
        }
        if !self.base.is_null() {
            pool.free(self.base as *mut u8);
        }
        self.base = new_base;
        self.ptr = self.base;
        self.threshold = self.base.add(self.size);
        self.limit = self.threshold;
        self.end = self.base.add(self.size + self.reserve);
    }

    pub(crate) unsafe fn push_unchecked(&mut self, elem: T) {
        debug_assert!(self.ptr < self.limit);
        *self.ptr = elem;
        self.ptr = self.ptr.add(1);
    }

    /// Remove all elements located at or after `keep`.
    pub(crate) unsafe fn clear(&mut self, keep: *mut T) {
        if self.base.is_null() {
            debug_assert!(self.ptr.is_null());
            debug_assert!(self.threshold.is_null());
            debug_assert!(self.limit.is_null());
            debug_assert!(self.end.is_null());
            debug_assert!(keep.is_null());
        } else {
            debug_assert!(keep <= self.ptr);
            self.ptr = keep;
            if keep < self.threshold {
                self.limit = self.threshold;
            }
            debug_assert!(keep < self.limit);
        }
    }

    /// Free the backing memory entirely.
    pub(crate) unsafe fn reset(&mut self, pool: &mut StatPool) {
        self.size = 0;
        self.reserve = 0;
        if !self.base.is_null() {
            pool.free(self.base as *mut u8);
        }
        self.base = core::ptr::null_mut();
        self.ptr = core::ptr::null_mut();
        self.threshold = core::ptr::null_mut();
        self.limit = core::ptr::null_mut();
        self.end = core::ptr::null_mut();
    }
}

/// Make room for one more entry in a full table. Returns `true` when the
/// caller must request a minor collection (the buffer was extended into
/// its reserve instead of being reallocated).
pub(crate) unsafe fn realloc_table<T: Copy>(
    tbl: &mut Table<T>,
    pool: &mut StatPool,
    init_size: usize,
    minor_gc_pending: bool,
    label: &'static str,
) -> bool {
    debug_assert!(tbl.ptr == tbl.limit);
    debug_assert!(tbl.limit <= tbl.end);
    debug_assert!(tbl.limit >= tbl.threshold);

    if tbl.base.is_null() {
        tbl.alloc(pool, init_size, 256);
        false
    } else if tbl.limit == tbl.threshold {
        log::debug!("{} threshold crossed", label);
        tbl.limit = tbl.end;
        true
    } else {
        let cur_ptr = tbl.ptr.offset_from(tbl.base) as usize;
        debug_assert!(minor_gc_pending);

        tbl.size *= 2;
        let sz = (tbl.size + tbl.reserve) * core::mem::size_of::<T>();
        log::debug!("Growing {} to {}k bytes", label, sz / 1024);
        let new_base = pool.resize(tbl.base as *mut u8, sz) as *mut T;
        if new_base.is_null() {
            crate::gc::fatal_error(&format!("{label} overflow"));
        }
        tbl.base = new_base;
        tbl.end = tbl.base.add(tbl.size + tbl.reserve);
        tbl.threshold = tbl.base.add(tbl.size);
        tbl.ptr = tbl.base.add(cur_ptr);
        tbl.limit = tbl.end;
        false
    }
}
