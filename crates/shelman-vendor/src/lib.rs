#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links
)]
#![allow(clippy::module_name_repetitions)]

//! Bidirectional converters between vendor API documents and the normalized
//! configuration model.
//!
//! Layout: `capability.rs` (hardware capability table keyed by vendor model
//! code), `gen1.rs` (form-era settings documents), `gen2.rs` (RPC-era
//! component documents), `error.rs` (`ConvertError`).
//!
//! Both converters uphold the same contract: reads map vendor fields into
//! normalized roles and leave anything the document omits unset; writes emit
//! only the fields the configuration sets and never emit read-only fields
//! (MAC, firmware identifiers, uptime, channel counts). Malformed input is
//! reported as a structured parse error naming the offending path.

pub mod capability;
pub mod error;
pub mod gen1;
pub mod gen2;

mod value;

pub use capability::{DeviceCapabilities, Generation};
pub use error::{ConvertError, Result};

use shelman_model::DeviceConfiguration;

/// Parse a raw vendor configuration document into normalized form.
///
/// # Errors
///
/// Returns a [`ConvertError`] naming the offending path when the document is
/// malformed.
pub fn from_api(
    generation: Generation,
    raw: &[u8],
    model: &str,
) -> Result<DeviceConfiguration> {
    match generation {
        Generation::Gen1 => gen1::from_api(raw, model),
        Generation::Gen2 => gen2::from_api(raw, model),
    }
}

/// Render a normalized configuration as the vendor document for `generation`.
///
/// Secrets are written out; read-only fields are never emitted. Sections the
/// generation cannot express are dropped.
///
/// # Errors
///
/// Returns a [`ConvertError`] when the configuration cannot be serialized.
pub fn to_api(
    generation: Generation,
    config: &DeviceConfiguration,
    model: &str,
) -> Result<Vec<u8>> {
    match generation {
        Generation::Gen1 => gen1::to_api(config, model),
        Generation::Gen2 => gen2::to_api(config, model),
    }
}
