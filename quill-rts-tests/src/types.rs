//! Value and header encoding tests.

use quill_rts::constants::MAX_YOUNG_WOSIZE;
use quill_rts::types::{
    whsize_wosize, wosize_whsize, Color, Header, Value, CLOSURE_TAG, FORWARD_TAG, INFIX_TAG,
    MAX_WOSIZE, NO_SCAN_TAG,
};

pub unsafe fn test() {
    println!("Testing value and header encodings ...");
    test_immediates();
    test_headers();
    test_young_header_validity();
    test_block_access();
}

fn test_immediates() {
    assert_eq!(Value::from_int(0).as_int(), 0);
    assert_eq!(Value::from_int(42).as_int(), 42);
    assert_eq!(Value::from_int(-1).as_int(), -1);
    assert_eq!(Value::from_int(isize::MIN / 2).as_int(), isize::MIN / 2);

    assert!(Value::from_int(7).is_int());
    assert!(!Value::from_int(7).is_block());
    assert!(Value::from_raw(0x8000).is_block());
    assert_eq!(Value::UNIT, Value::from_int(0));
}

fn test_headers() {
    let hd = Header::new(3, 0, Color::White);
    assert_eq!(hd.wosize(), 3);
    assert_eq!(hd.whsize(), 4);
    assert_eq!(hd.tag(), 0);
    assert_eq!(hd.color(), Color::White);
    assert!(hd.is_white());
    assert!(!hd.is_forwarded());

    let black = hd.blackened();
    assert_eq!(black.wosize(), 3);
    assert_eq!(black.tag(), 0);
    assert!(black.is_black());

    let blue = Header::new(MAX_WOSIZE, 0, Color::Blue);
    assert!(blue.is_blue());
    assert_eq!(blue.wosize(), MAX_WOSIZE);

    let custom = Header::new(2, 255, Color::Black);
    assert_eq!(custom.tag(), 255);
    assert_eq!(custom.wosize(), 2);

    assert!(Header::FORWARDED.is_forwarded());
    assert_eq!(Header::FORWARDED.0, 0);

    // An infix header reuses the size field as a word offset.
    let infix = Header::new(2, INFIX_TAG, Color::White);
    assert_eq!(infix.infix_offset(), 16);

    // Infix and closure headers read as immediates during field scans.
    assert!(Value::from_raw(infix.0).is_int());
    assert!(Value::from_raw(Header::new(4, CLOSURE_TAG, Color::White).0).is_int());

    assert_eq!(whsize_wosize(wosize_whsize(8)), 8);
    assert!(INFIX_TAG < FORWARD_TAG && FORWARD_TAG < NO_SCAN_TAG);
}

fn test_young_header_validity() {
    assert!(Header::new(1, 0, Color::White).is_valid_young_header());
    assert!(Header::new(MAX_YOUNG_WOSIZE, 250, Color::Black).is_valid_young_header());
    // Empty, oversized, or mid-mark colours are not valid young headers.
    assert!(!Header::new(0, 0, Color::White).is_valid_young_header());
    assert!(!Header::new(MAX_YOUNG_WOSIZE + 1, 0, Color::White).is_valid_young_header());
    assert!(!Header::new(1, 0, Color::Gray).is_valid_young_header());
    assert!(!Header::new(1, 0, Color::Blue).is_valid_young_header());
    assert!(!Header::FORWARDED.is_valid_young_header());
}

unsafe fn test_block_access() {
    // Lay a block out in plain memory and read it back through `Value`.
    let mut words = vec![0usize; 4];
    let hp = words.as_mut_ptr() as *mut Header;
    *hp = Header::new(3, 1, Color::White);
    let v = Value::from_hp(hp);

    assert_eq!(v.hp(), hp);
    assert_eq!(v.header(), Header::new(3, 1, Color::White));
    assert_eq!(v.wosize(), 3);
    assert_eq!(v.tag(), 1);

    v.set_field(0, Value::from_int(10));
    v.set_field(1, Value::from_int(-10));
    v.set_field(2, Value::UNIT);
    assert_eq!(v.field(0).as_int(), 10);
    assert_eq!(v.field(1).as_int(), -10);
    assert_eq!(v.field(2), Value::UNIT);
    assert_eq!(words[1], Value::from_int(10).raw());

    v.set_header(v.header().blackened());
    assert!(v.header().is_black());
}
