//! Error types for the hashchain index.
//!
//! The store itself never fails: every mutation is total over its inputs.
//! The only fallible surface is turning text back into a [`BlockHash`].
//!
//! [`BlockHash`]: crate::hash::BlockHash

use thiserror::Error;

/// Errors raised while parsing a hex-encoded block hash.
#[derive(Debug, Error, PartialEq)]
pub enum HashParseError {
    /// The input did not have exactly `expected` hex characters.
    #[error("invalid hash length: expected {expected} hex characters, got {got}")]
    InvalidLength {
        /// Required number of hex characters.
        expected: usize,
        /// Number of characters actually supplied.
        got: usize,
    },

    /// The input contained something other than hex digits.
    #[error("invalid hex encoding: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}
