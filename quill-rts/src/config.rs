//! Runtime parameters.
//!
//! Tunables are parsed from a compact option string, typically taken from
//! the `QUILLRUNPARAM` environment variable: comma-separated
//! `letter=value` pairs, e.g. `s=512k,o=80,a=0.25,v=0x7,H=1`.
//!
//! | option | meaning |
//! |--------|------------------------------------------------|
//! | `s`    | minor heap size per semispace, in words (`k`/`M`/`G` suffixes) |
//! | `o`    | space overhead percentage of the major heap |
//! | `a`    | aging ratio in `[0, 1]` |
//! | `H`    | allocate heap chunks with huge pages |
//! | `v`    | verbosity bitmask for collector messages |
//!
//! Unknown options are ignored, so option strings can be shared across
//! runtime versions.

use crate::constants::{MINOR_HEAP_MAX, MINOR_HEAP_MIN};

pub const PARAM_ENV_VAR: &str = "QUILLRUNPARAM";

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed option {0:?}, expected letter=value")]
    Malformed(String),
    #[error("invalid value {value:?} for option '{option}'")]
    InvalidValue { option: char, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeParams {
    /// Per-semispace minor heap size, in words.
    pub minor_heap_wsz: usize,
    /// Major-heap space overhead percentage.
    pub percent_free: usize,
    /// Fraction of the most recent minor allocations retained in the
    /// minor heap on a collection.
    pub aging_ratio: f64,
    pub use_huge_pages: bool,
    /// Collector message verbosity bitmask.
    pub verb_gc: usize,
}

impl Default for RuntimeParams {
    fn default() -> RuntimeParams {
        RuntimeParams {
            minor_heap_wsz: 256 * 1024,
            percent_free: 80,
            aging_ratio: 0.0,
            use_huge_pages: false,
            verb_gc: 0,
        }
    }
}

impl RuntimeParams {
    pub fn parse(s: &str) -> Result<RuntimeParams, ParseError> {
        let mut params = RuntimeParams::default();
        for item in s.split(',') {
            if item.is_empty() {
                continue;
            }
            let (key, value) = item
                .split_once('=')
                .ok_or_else(|| ParseError::Malformed(item.to_string()))?;
            let mut keys = key.chars();
            let option = keys
                .next()
                .ok_or_else(|| ParseError::Malformed(item.to_string()))?;
            if keys.next().is_some() {
                return Err(ParseError::Malformed(item.to_string()));
            }
            match option {
                's' => {
                    params.minor_heap_wsz = parse_size(option, value)?
                        .clamp(MINOR_HEAP_MIN.as_usize(), MINOR_HEAP_MAX.as_usize());
                }
                'o' => params.percent_free = parse_size(option, value)?,
                'a' => {
                    let ratio: f64 = value.parse().map_err(|_| ParseError::InvalidValue {
                        option,
                        value: value.to_string(),
                    })?;
                    if !(0.0..=1.0).contains(&ratio) {
                        return Err(ParseError::InvalidValue {
                            option,
                            value: value.to_string(),
                        });
                    }
                    params.aging_ratio = ratio;
                }
                'H' => params.use_huge_pages = value != "0",
                'v' => params.verb_gc = parse_mask(option, value)?,
                // Options of other runtime subsystems.
                _ => {}
            }
        }
        Ok(params)
    }

    /// Parameters from the environment; malformed strings fall back to
    /// the defaults.
    pub fn from_env() -> RuntimeParams {
        match std::env::var(PARAM_ENV_VAR) {
            Ok(s) => match RuntimeParams::parse(&s) {
                Ok(params) => params,
                Err(err) => {
                    log::warn!("ignoring {PARAM_ENV_VAR}: {err}");
                    RuntimeParams::default()
                }
            },
            Err(_) => RuntimeParams::default(),
        }
    }
}

fn parse_size(option: char, value: &str) -> Result<usize, ParseError> {
    let invalid = || ParseError::InvalidValue {
        option,
        value: value.to_string(),
    };
    let (digits, mult) = match value.as_bytes().last().copied() {
        Some(b'k') => (&value[..value.len() - 1], 1usize << 10),
        Some(b'M') => (&value[..value.len() - 1], 1 << 20),
        Some(b'G') => (&value[..value.len() - 1], 1 << 30),
        _ => (value, 1),
    };
    let n: usize = digits.parse().map_err(|_| invalid())?;
    n.checked_mul(mult).ok_or_else(invalid)
}

fn parse_mask(option: char, value: &str) -> Result<usize, ParseError> {
    let invalid = || ParseError::InvalidValue {
        option,
        value: value.to_string(),
    };
    if let Some(hex) = value.strip_prefix("0x") {
        usize::from_str_radix(hex, 16).map_err(|_| invalid())
    } else {
        value.parse().map_err(|_| invalid())
    }
}
