//! Error taxonomy for configuration service operations.

use thiserror::Error;

use shelman_model::ValidationIssue;

/// Primary error type for the configuration service.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The referenced device does not exist.
    #[error("device {id} not found")]
    DeviceNotFound {
        /// Missing device id.
        id: i64,
    },
    /// The referenced template does not exist.
    #[error("template {id} not found")]
    TemplateNotFound {
        /// Missing template id.
        id: i64,
    },
    /// A template delete was refused because devices still reference it.
    #[error("template {id} is assigned to {device_count} device(s)")]
    TemplateInUse {
        /// Template id.
        id: i64,
        /// How many devices reference it.
        device_count: usize,
    },
    /// A template cannot attach to the device it was offered to.
    #[error("template {template_id} cannot be assigned: {detail}")]
    ScopeMismatch {
        /// Offending template id.
        template_id: i64,
        /// Why the assignment is invalid.
        detail: String,
    },
    /// A document failed validation.
    #[error("configuration failed validation")]
    ValidationFailed {
        /// Field-level findings.
        issues: Vec<ValidationIssue>,
    },
    /// A unique key or state constraint was violated.
    #[error("conflict: {detail}")]
    Conflict {
        /// What collided.
        detail: String,
    },
    /// Drift was requested for a device that has never been read.
    #[error("device {device_id} has no imported configuration")]
    NoImportedConfig {
        /// Device id.
        device_id: i64,
    },
    /// The device row has no usable address.
    #[error("device {device_id} has no known IP address")]
    NoAddress {
        /// Device id.
        device_id: i64,
    },
    /// The hardware lacks the capability the request needs.
    #[error("device {device_id} has no {capability}")]
    Unsupported {
        /// Device id.
        device_id: i64,
        /// Missing capability (`power meter`, `switch channel`).
        capability: &'static str,
    },
    /// Model-layer failure (merge/serialize).
    #[error(transparent)]
    Model(#[from] shelman_model::ModelError),
    /// Vendor conversion failure.
    #[error(transparent)]
    Convert(#[from] shelman_vendor::ConvertError),
    /// Device transport failure.
    #[error(transparent)]
    Device(#[from] shelman_device::DeviceError),
    /// Store failure.
    #[error(transparent)]
    Data(#[from] shelman_data::DataError),
}

/// Convenience alias for service results.
pub type Result<T> = std::result::Result<T, ConfigError>;

impl ConfigError {
    pub(crate) fn from_unique(err: shelman_data::DataError, detail: &str) -> Self {
        if err.is_unique_violation() {
            Self::Conflict {
                detail: detail.to_string(),
            }
        } else {
            Self::Data(err)
        }
    }
}
