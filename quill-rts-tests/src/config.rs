//! Runtime parameter parsing tests.

use quill_rts::config::{ParseError, RuntimeParams};
use quill_rts::constants::{MINOR_HEAP_MAX, MINOR_HEAP_MIN};

pub fn test() {
    println!("Testing runtime parameters ...");

    let defaults = RuntimeParams::default();
    assert_eq!(defaults.minor_heap_wsz, 256 * 1024);
    assert_eq!(defaults.percent_free, 80);
    assert_eq!(defaults.aging_ratio, 0.0);
    assert!(!defaults.use_huge_pages);
    assert_eq!(defaults.verb_gc, 0);

    assert_eq!(RuntimeParams::parse("").unwrap(), defaults);

    let params = RuntimeParams::parse("s=512k,o=120,a=0.25,H=1,v=0x7").unwrap();
    assert_eq!(params.minor_heap_wsz, 512 * 1024);
    assert_eq!(params.percent_free, 120);
    assert_eq!(params.aging_ratio, 0.25);
    assert!(params.use_huge_pages);
    assert_eq!(params.verb_gc, 7);

    assert_eq!(RuntimeParams::parse("s=1M").unwrap().minor_heap_wsz, 1 << 20);
    assert_eq!(RuntimeParams::parse("v=11").unwrap().verb_gc, 11);
    assert_eq!(RuntimeParams::parse("H=0").unwrap().use_huge_pages, false);

    // Sizes are clamped to the supported range.
    assert_eq!(
        RuntimeParams::parse("s=1").unwrap().minor_heap_wsz,
        MINOR_HEAP_MIN.as_usize()
    );
    assert_eq!(
        RuntimeParams::parse("s=99999999G").unwrap().minor_heap_wsz,
        MINOR_HEAP_MAX.as_usize()
    );

    // Options of other subsystems are ignored.
    let params = RuntimeParams::parse("b=1,s=64k,l=8M").unwrap();
    assert_eq!(params.minor_heap_wsz, 64 * 1024);

    assert!(matches!(
        RuntimeParams::parse("s"),
        Err(ParseError::Malformed(_))
    ));
    assert!(matches!(
        RuntimeParams::parse("xy=1"),
        Err(ParseError::Malformed(_))
    ));
    assert!(matches!(
        RuntimeParams::parse("a=1.5"),
        Err(ParseError::InvalidValue { option: 'a', .. })
    ));
    assert!(matches!(
        RuntimeParams::parse("s=abc"),
        Err(ParseError::InvalidValue { option: 's', .. })
    ));
}
