#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links
)]
#![allow(clippy::module_name_repetitions)]

//! Telemetry primitives shared across the Shelman workspace.
//!
//! Layout: `init.rs` (logging setup), `context.rs` (task-local request
//! context), `layers.rs` (request-id middleware), `metrics.rs` (Prometheus
//! registry and dashboard snapshots).

pub mod context;
pub mod init;
pub mod layers;
pub mod metrics;

pub use context::{current_request_id, current_route, with_request_context};
pub use init::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, init_logging};
pub use layers::{propagate_request_id_layer, set_request_id_layer};
pub use metrics::{Metrics, MetricsSnapshot};
