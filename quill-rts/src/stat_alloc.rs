//! Out-of-heap bookkeeping allocator.
//!
//! Buffers that live outside the managed heaps (page-table entries,
//! remembered-set tables, the minor-heap region itself) are served from
//! this pool: a ring of blocks over the system allocator, where each
//! block's header links to its neighbours. Insertion and removal are O(1)
//! given the block pointer. The ring always contains a pivot block with no
//! data, so unlinking never has to special-case an empty pool.
//!
//! Callers receive pointers to the data area, not to the header, and hand
//! the same pointer back to [`StatPool::free`] and [`StatPool::resize`].

use core::alloc::Layout;
use core::ptr;

use crate::constants::PAGE_SIZE;
use crate::gc::fatal_error;

const BLOCK_ALIGN: usize = 16;

const POOL_MAGIC: usize = 0xD700_D7D7_D700_D6D8;

// 32 bytes, so the data area keeps `BLOCK_ALIGN` alignment.
#[repr(C)]
struct PoolBlock {
    next: *mut PoolBlock,
    prev: *mut PoolBlock,
    size: usize,
    magic: usize,
}

const HEADER_SIZE: usize = core::mem::size_of::<PoolBlock>();

fn block_layout(data_size: usize) -> Layout {
    // The header size keeps the total layout representable whenever the
    // request itself was.
    Layout::from_size_align(HEADER_SIZE + data_size, BLOCK_ALIGN).unwrap()
}

unsafe fn data_of(block: *mut PoolBlock) -> *mut u8 {
    (block as *mut u8).add(HEADER_SIZE)
}

unsafe fn block_of(data: *mut u8) -> *mut PoolBlock {
    let block = data.sub(HEADER_SIZE) as *mut PoolBlock;
    #[cfg(debug_assertions)]
    assert_eq!((*block).magic, POOL_MAGIC);
    block
}

pub struct StatPool {
    pivot: *mut PoolBlock,
}

impl StatPool {
    pub fn new() -> StatPool {
        unsafe {
            let pivot = std::alloc::alloc(block_layout(0)) as *mut PoolBlock;
            if pivot.is_null() {
                fatal_error("out of memory");
            }
            (*pivot).next = pivot;
            (*pivot).prev = pivot;
            (*pivot).size = 0;
            (*pivot).magic = POOL_MAGIC;
            StatPool { pivot }
        }
    }

    /// Allocate `sz` bytes. Returns null when the system allocator fails.
    pub unsafe fn alloc(&mut self, sz: usize) -> *mut u8 {
        let block = std::alloc::alloc(block_layout(sz)) as *mut PoolBlock;
        if block.is_null() {
            return ptr::null_mut();
        }
        (*block).size = sz;
        (*block).magic = POOL_MAGIC;

        // Link the block into the ring.
        (*block).next = (*self.pivot).next;
        (*block).prev = self.pivot;
        (*(*self.pivot).next).prev = block;
        (*self.pivot).next = block;

        data_of(block)
    }

    /// Allocate and zero `count * sz` bytes, checking the multiplication
    /// for overflow.
    pub unsafe fn calloc(&mut self, count: usize, sz: usize) -> *mut u8 {
        let total = match count.checked_mul(sz) {
            Some(total) => total,
            None => return ptr::null_mut(),
        };
        let data = self.alloc(total);
        if !data.is_null() {
            ptr::write_bytes(data, 0, total);
        }
        data
    }

    pub unsafe fn free(&mut self, data: *mut u8) {
        if data.is_null() {
            return;
        }
        let block = block_of(data);

        // Unlink the block from the ring.
        (*(*block).prev).next = (*block).next;
        (*(*block).next).prev = (*block).prev;

        std::alloc::dealloc(block as *mut u8, block_layout((*block).size));
    }

    /// Grow or shrink a block in place if possible. On failure returns
    /// null and leaves the old block valid and linked.
    pub unsafe fn resize(&mut self, data: *mut u8, sz: usize) -> *mut u8 {
        if data.is_null() {
            return self.alloc(sz);
        }
        let block = block_of(data);
        let old_layout = block_layout((*block).size);
        let new_block =
            std::alloc::realloc(block as *mut u8, old_layout, HEADER_SIZE + sz) as *mut PoolBlock;
        if new_block.is_null() {
            return ptr::null_mut();
        }
        (*new_block).size = sz;

        // Relink the new block in place of the old one.
        (*(*new_block).prev).next = new_block;
        (*(*new_block).next).prev = new_block;

        data_of(new_block)
    }

    /// Allocate `sz` bytes such that the result plus `modulo` is
    /// page-aligned. Returns `(aligned, base)`; `base` is the pool pointer
    /// to hand back to [`StatPool::free`].
    pub unsafe fn alloc_aligned(&mut self, sz: usize, modulo: usize) -> (*mut u8, *mut u8) {
        debug_assert!(modulo < PAGE_SIZE);
        let raw = self.alloc(sz + PAGE_SIZE);
        if raw.is_null() {
            return (ptr::null_mut(), ptr::null_mut());
        }
        let to_align = raw as usize + modulo;
        let aligned = (to_align / PAGE_SIZE + 1) * PAGE_SIZE;
        ((aligned - modulo) as *mut u8, raw)
    }
}

impl Drop for StatPool {
    fn drop(&mut self) {
        unsafe {
            (*(*self.pivot).prev).next = ptr::null_mut();
            let mut block = self.pivot;
            while !block.is_null() {
                let next = (*block).next;
                std::alloc::dealloc(block as *mut u8, block_layout((*block).size));
                block = next;
            }
        }
    }
}
