#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links
)]
#![allow(clippy::module_name_repetitions)]

//! HTTP surface for the Shelman fleet manager.
//!
//! Layout: `envelope.rs` (uniform response shape and error taxonomy),
//! `state.rs` (shared application state), `middleware.rs` (the layered
//! security pipeline), `auth.rs` (admin bearer credential), `router.rs`
//! (route table and server host), `handlers/` (REST handlers), `ws.rs`
//! (metrics/alerts WebSocket).

pub mod auth;
pub mod dto;
pub mod envelope;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;
pub mod ws;

pub use envelope::{ApiError, Envelope, ErrorCode};
pub use router::ApiServer;
pub use state::{ApiSettings, ApiState};
