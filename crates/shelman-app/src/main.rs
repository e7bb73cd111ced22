#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links
)]

//! Binary entrypoint that wires the Shelman services together and launches
//! the HTTP surface and background sweepers.

mod bootstrap;
mod error;
mod settings;

use anyhow::Result;

/// Bootstraps the Shelman application and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::run_app().await
}
