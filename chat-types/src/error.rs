//! Error types for relaychat types.

use thiserror::Error;

/// Errors that can occur while parsing event vocabulary.
#[derive(Debug, Error)]
pub enum TypesError {
    /// Hex decoding failed
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Decoded value has the wrong length
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Expected byte length.
        expected: usize,
        /// Actual byte length.
        actual: usize,
    },

    /// Addressable coordinate is not `kind:pubkey:identifier`
    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),

    /// JSON (de)serialization failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
