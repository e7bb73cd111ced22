//! Application bootstrap errors.

use thiserror::Error;

/// Errors raised while assembling the application.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is absent.
    #[error("required environment variable '{name}' is not set")]
    MissingEnv {
        /// Variable name.
        name: &'static str,
    },
    /// An environment variable carried an unusable value.
    #[error("environment variable '{name}' is invalid: {detail}")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// What was wrong with it.
        detail: String,
    },
}
