//! Error types for normalized-model operations.

use thiserror::Error;

/// Primary error type for model conversions and merges.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A configuration document could not be serialized to a JSON tree.
    #[error("failed to encode configuration")]
    Encode {
        /// Source serialization error.
        source: serde_json::Error,
    },
    /// A merged JSON tree no longer deserializes into the normalized model.
    #[error("merged configuration is structurally invalid")]
    Decode {
        /// Source deserialization error.
        source: serde_json::Error,
    },
    /// A stored document carried a value of the wrong shape at a known path.
    #[error("unexpected value shape at '{path}'")]
    UnexpectedShape {
        /// Dot path of the offending value.
        path: String,
    },
}

/// Convenience alias for model results.
pub type Result<T> = std::result::Result<T, ModelError>;
