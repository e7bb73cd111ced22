#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links
)]
#![allow(clippy::module_name_repetitions)]

//! Device transport and control plane for Shelly-family hardware.
//!
//! Layout: `client.rs` (per-generation HTTP transport with bounded
//! timeouts), `reachability.rs` (short-TTL online/offline cache),
//! `control.rs` (parallel detail fan-out with cancellation), `cancel.rs`
//! (per-device cancellation registry), `error.rs` (`DeviceError`).
//!
//! Every outbound call takes a cancellation token; the tighter of the
//! per-operation deadline and the caller's token wins. Timeouts classify the
//! device offline in the reachability cache but are never treated as
//! attacks.

pub mod cancel;
pub mod client;
pub mod control;
pub mod error;
pub mod reachability;

pub use cancel::DeviceTokens;
pub use client::{
    DeviceClient, DeviceTarget, SectionWrite, SwitchAction, Timeouts, WriteOutcome,
};
pub use control::{DeviceDetail, SectionResult, fetch_detail};
pub use error::{DeviceError, Result};
pub use reachability::{ReachabilityCache, ReachabilityStatus};
