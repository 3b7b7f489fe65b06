//! Error types for the splat store and codec

use thiserror::Error;

/// Result type for store and codec operations
pub type SplatResult<T> = Result<T, SplatError>;

/// Errors that can occur while mutating or (de)serializing a splat store
#[derive(Error, Debug)]
pub enum SplatError {
    #[error("length mismatch for {what}: expected {expected}, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("index {index} out of range for {len} splats")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("color coefficient count mismatch: expected {expected} f_rest fields, found {found}")]
    CoefficientCount { expected: usize, found: usize },

    #[error("field group {prefix}: expected {expected} fields, found {found}")]
    FieldCount {
        prefix: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("truncated body: expected {expected} records, read {read}")]
    Truncated { expected: usize, read: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SplatError {
    pub fn check_len(what: &'static str, expected: usize, actual: usize) -> SplatResult<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(SplatError::LengthMismatch {
                what,
                expected,
                actual,
            })
        }
    }
}
