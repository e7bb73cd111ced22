#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links
)]
#![allow(clippy::module_name_repetitions)]

//! Generation-agnostic configuration model for Shelly-family devices.
//!
//! Layout: `config.rs` (the normalized configuration tree), `merge.rs`
//! (layered merge with per-field source tracking), `diff.rs` (comparison
//! rules between desired and observed configuration), `validate.rs`
//! (context-sensitive validation), `error.rs` (`ModelError`).
//!
//! Every leaf in the normalized tree is an `Option` so that three states are
//! representable: absent (inherit from a lower layer), present with a value
//! (set), and present with the type's zero value (explicit clear).
//! Serialization elides absent leaves entirely, which is what makes stored
//! templates and overrides transmit only intent.

pub mod config;
pub mod diff;
pub mod error;
pub mod merge;
pub mod validate;

pub use config::{
    AuthConfig, CloudConfig, CoiotConfig, DeviceConfiguration, DimmerConfig, EthConfig,
    InputConfig, LedConfig, LocationConfig, MeterConfig, MqttConfig, NetworkConfig, RollerConfig,
    SwitchConfig, SystemConfig, WifiApConfig, WifiStationConfig,
};
pub use diff::{ConfigDifference, DiffSeverity, compare, has_errors, normalize_timezone};
pub use error::{ModelError, Result};
pub use merge::{ConfigLayer, MergeOutcome, SourceMap, apply_patch, merge};
pub use validate::{ValidationIssue, ValidationMode, validate};
