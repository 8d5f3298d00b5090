//! Statistics pool tests.

use quill_rts::constants::PAGE_SIZE;
use quill_rts::stat_alloc::StatPool;

pub unsafe fn test() {
    println!("Testing the statistics pool ...");
    test_alloc_free();
    test_calloc();
    test_resize();
    test_aligned();
    test_ring_teardown();
}

unsafe fn test_alloc_free() {
    let mut pool = StatPool::new();
    let a = pool.alloc(64);
    let b = pool.alloc(128);
    assert!(!a.is_null() && !b.is_null());
    assert_ne!(a, b);

    for i in 0..64 {
        *a.add(i) = i as u8;
    }
    for i in 0..64 {
        assert_eq!(*a.add(i), i as u8);
    }

    pool.free(a);
    pool.free(b);
    pool.free(core::ptr::null_mut()); // must be a no-op
}

unsafe fn test_calloc() {
    let mut pool = StatPool::new();
    let p = pool.calloc(16, 8);
    assert!(!p.is_null());
    for i in 0..128 {
        assert_eq!(*p.add(i), 0);
    }
    // Overflowing requests are refused, not wrapped.
    assert!(pool.calloc(usize::MAX, 16).is_null());
    pool.free(p);
}

unsafe fn test_resize() {
    let mut pool = StatPool::new();
    let p = pool.alloc(32);
    for i in 0..32 {
        *p.add(i) = 0xAB;
    }
    let q = pool.resize(p, 4096);
    assert!(!q.is_null());
    for i in 0..32 {
        assert_eq!(*q.add(i), 0xAB);
    }
    // Resizing null is an allocation.
    let r = pool.resize(core::ptr::null_mut(), 16);
    assert!(!r.is_null());
    pool.free(q);
    pool.free(r);
}

unsafe fn test_aligned() {
    let mut pool = StatPool::new();
    for modulo in [0usize, 8, 48, 1024] {
        let (aligned, base) = pool.alloc_aligned(3 * PAGE_SIZE, modulo);
        assert!(!aligned.is_null());
        assert_eq!((aligned as usize + modulo) % PAGE_SIZE, 0);
        // The aligned span must fit inside the backing block.
        *aligned = 1;
        *aligned.add(3 * PAGE_SIZE - 1) = 2;
        pool.free(base);
    }
}

unsafe fn test_ring_teardown() {
    // Blocks still linked at drop time are released with the ring.
    let mut pool = StatPool::new();
    for sz in [8usize, 16, 1024, 65536] {
        let p = pool.alloc(sz);
        assert!(!p.is_null());
    }
    drop(pool);
}
