//! Error types for vendor document conversion.

use thiserror::Error;

/// Primary error type for converter operations.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The raw document was not valid JSON.
    #[error("vendor document is not valid JSON: {detail}")]
    InvalidJson {
        /// Parser detail.
        detail: String,
    },
    /// A known field carried a value of the wrong type.
    #[error("unexpected value at '{path}': expected {expected}")]
    UnexpectedType {
        /// Path of the offending field inside the vendor document.
        path: String,
        /// The type the converter expected.
        expected: &'static str,
    },
    /// The normalized configuration could not be serialized.
    #[error("failed to encode vendor document")]
    Encode {
        /// Source serialization error.
        source: serde_json::Error,
    },
    /// The generation value stored for a device is not supported.
    #[error("unsupported device generation {value}")]
    UnsupportedGeneration {
        /// Raw generation value.
        value: i64,
    },
}

/// Convenience alias for converter results.
pub type Result<T> = std::result::Result<T, ConvertError>;
