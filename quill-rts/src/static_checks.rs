//! Compile-time assertions to make sure the word-level layouts are as
//! expected.

use static_assertions::{assert_eq_align, assert_eq_size, const_assert, const_assert_eq};

use crate::constants::{MODIFY_CACHE_SIZE, PAGE_SIZE, WORD_SIZE};
use crate::types::{Color, Header, Value, FORWARD_TAG, INFIX_TAG, MAX_WOSIZE, NO_SCAN_TAG};

// The runtime assumes the sparse page-table representation and the
// 64-bit header split.
assert_eq_size!(usize, u64);
const_assert_eq!(core::mem::size_of::<usize>(), WORD_SIZE);

// Values and headers are bare words; blocks of them can be addressed as
// word arrays.
assert_eq_size!(Value, usize);
assert_eq_size!(Header, usize);
assert_eq_align!(Value, usize);

// The short-circuiting tests in the promotion engine rely on this
// ordering.
const_assert_eq!(INFIX_TAG + 1, FORWARD_TAG);
const_assert_eq!(FORWARD_TAG + 1, NO_SCAN_TAG);

// Infix and closure headers must read as immediates when a scannable
// block's fields are traversed.
const_assert!(INFIX_TAG % 2 == 1);
const_assert!(crate::types::CLOSURE_TAG % 2 == 1);

// The header encoding must round-trip the extremes.
const_assert_eq!(Header::new(MAX_WOSIZE, 255, Color::Black).wosize(), MAX_WOSIZE);
const_assert_eq!(Header::new(MAX_WOSIZE, 255, Color::Black).tag(), 255);
const_assert!(!Header::new(1, 0, Color::White).is_forwarded());

// Direct-mapped cache indexing needs a power-of-two table.
const_assert!(MODIFY_CACHE_SIZE.is_power_of_two());
const_assert!(PAGE_SIZE.is_power_of_two());

// A chunk header must not break the page alignment of the chunk data.
const_assert!(crate::major_heap::CHUNK_HEADER_SIZE % WORD_SIZE == 0);
const_assert!(crate::major_heap::CHUNK_HEADER_SIZE < PAGE_SIZE);
