#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links
)]
#![allow(clippy::module_name_repetitions)]

//! Configuration service: the orchestrator tying templates, overrides, the
//! merge engine, the store, and the device transport together.
//!
//! Layout: `service.rs` (device/template/assignment/override operations and
//! desired-config recomputation), `apply.rs` (apply/verify workflows and
//! drift), `error.rs` (`ConfigError`).
//!
//! Every mutation recomputes the affected devices' desired configuration in
//! the same transaction and clears their applied flag; readers never observe
//! a template edit without its propagation.

pub mod apply;
pub mod error;
pub mod service;

pub use apply::{
    ApplyAndVerifyResult, ApplyFailure, ApplyResult, BulkApplyEntry, ConfigStatus, VerifyResult,
};
pub use error::{ConfigError, Result};
pub use service::{
    ConfigurationService, DesiredConfig, DeviceAction, NewDeviceSpec, NewTemplateSpec, OpContext,
    TemplateUpdateSpec,
};
