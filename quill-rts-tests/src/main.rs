mod config;
mod minor_gc;
mod page_table;
mod remembered_set;
mod runtime;
mod stat_alloc;
mod types;
mod write_barrier;

fn main() {
    if std::mem::size_of::<usize>() != 8 {
        println!("quill-rts only works on 64-bit architectures");
        std::process::exit(1);
    }

    unsafe {
        run_all();
    }
}

unsafe fn run_all() {
    let _ = env_logger::builder().is_test(true).try_init();

    types::test();
    config::test();
    stat_alloc::test();
    page_table::test();
    remembered_set::test();
    write_barrier::test();
    minor_gc::test();
}

#[cfg(test)]
mod harness {
    #[test]
    fn rts_test_suite() {
        assert_eq!(std::mem::size_of::<usize>(), 8);
        unsafe { super::run_all() }
    }
}
