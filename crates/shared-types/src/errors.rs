//! # Error Types
//!
//! Parsing errors for identities received from the node.

use thiserror::Error;

/// Failure to parse a textual block hash.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashParseError {
    /// The input is not valid hexadecimal.
    #[error("invalid hex in block hash: {0}")]
    InvalidHex(String),

    /// The decoded hash has the wrong width.
    #[error("block hash must be {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
