use crate::types::Words;

/// Host word size. The runtime only works on 64-bit platforms; the page
/// residency table in particular assumes the sparse hash representation.
pub const WORD_SIZE: usize = 8;

pub const LOG_WORD_SIZE: usize = 3;

/// Page granularity of the residency table.
pub const PAGE_LOG: usize = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_LOG;

/// Largest block that may live in the minor heap. Anything bigger is
/// allocated shared directly.
pub const MAX_YOUNG_WOSIZE: usize = 256;

/// Bounds on the per-semispace minor heap size, in words.
pub const MINOR_HEAP_MIN: Words<usize> = Words(4096);
pub const MINOR_HEAP_MAX: Words<usize> = Words(1 << 40);

/// Minimum size of a major heap chunk, in words.
pub const HEAP_CHUNK_MIN: Words<usize> = Words(64 * 1024);

/// Number of entries in the write-barrier log.
pub const MODIFY_LOG_SIZE: usize = 256;

pub const MODIFY_CACHE_BITS: usize = 10;
pub const MODIFY_CACHE_SIZE: usize = 1 << MODIFY_CACHE_BITS;

/// Multiplicative hash constants (Knuth, TAOCP vol 3, section 6.4):
/// (sqrt(5) - 1) / 2 * 2^64, in the two historical roundings used by the
/// page table and the modify cache respectively.
pub const PAGE_HASH_FACTOR: usize = 11400714819323198486;
pub const MODIFY_CACHE_HASH_FACTOR: usize = 11400714819323198485;

// Poison patterns written into dead or uninitialized memory in debug
// builds. The low bit is set so a poison word never passes for a pointer.
#[cfg(debug_assertions)]
pub(crate) const fn debug_tag(t: usize) -> usize {
    0xD700_D7D7_D700_D6D7 | (t << 16) | (t << 48)
}

#[cfg(debug_assertions)]
pub(crate) const DEBUG_FREE_MINOR: usize = debug_tag(0x00);
#[cfg(debug_assertions)]
pub(crate) const DEBUG_FREE_MAJOR: usize = debug_tag(0x01);
#[cfg(debug_assertions)]
pub(crate) const DEBUG_FREE_SHRINK: usize = debug_tag(0x03);
#[cfg(debug_assertions)]
pub(crate) const DEBUG_UNINIT_MAJOR: usize = debug_tag(0x06);
