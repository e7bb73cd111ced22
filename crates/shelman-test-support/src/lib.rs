#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links
)]
#![allow(clippy::module_name_repetitions)]

//! Shared test helpers used across integration suites.

pub mod fixtures;
pub mod postgres;

pub use postgres::{TestDatabase, start_postgres};
