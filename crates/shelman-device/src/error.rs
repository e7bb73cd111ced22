//! Error types for device transport operations.

use thiserror::Error;

/// Primary error type for device I/O.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The per-operation deadline elapsed.
    #[error("device did not answer '{op}' in time")]
    Timeout {
        /// Operation identifier.
        op: &'static str,
    },
    /// The caller's cancellation token fired mid-flight.
    #[error("operation '{op}' was cancelled")]
    Cancelled {
        /// Operation identifier.
        op: &'static str,
    },
    /// The transport failed below HTTP (connect refused, reset, DNS).
    #[error("transport failure during '{op}'")]
    Transport {
        /// Operation identifier.
        op: &'static str,
        /// Underlying client error.
        source: reqwest::Error,
    },
    /// The device answered with a non-success HTTP status.
    #[error("device answered '{op}' with status {status}")]
    Status {
        /// Operation identifier.
        op: &'static str,
        /// HTTP status code returned by the device.
        status: u16,
    },
    /// The device answered with a payload the adapter cannot interpret.
    #[error("unexpected device payload during '{op}': {detail}")]
    Protocol {
        /// Operation identifier.
        op: &'static str,
        /// What was wrong with the payload.
        detail: String,
    },
    /// The device rejected an RPC with a structured error.
    #[error("device rejected '{method}': {message}")]
    Rpc {
        /// RPC method that failed.
        method: String,
        /// Device-reported message.
        message: String,
    },
    /// The reachability cache classified the device offline.
    #[error("device is offline")]
    Offline,
    /// Conversion between vendor and normalized form failed.
    #[error(transparent)]
    Convert(#[from] shelman_vendor::ConvertError),
}

impl DeviceError {
    /// Whether this failure should classify the device offline.
    ///
    /// Timeouts and transport errors do; protocol-level surprises do not,
    /// because the device demonstrably answered.
    #[must_use]
    pub const fn marks_offline(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport { .. })
    }

    /// Whether this failure is a timeout (surfaced as `DEVICE_TIMEOUT` and
    /// exempt from security counters).
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Convenience alias for device results.
pub type Result<T> = std::result::Result<T, DeviceError>;
