//! REST handlers, grouped by resource.

pub mod config;
pub mod devices;
pub mod system;
pub mod tags;

use shelman_config::OpContext;
use shelman_telemetry::current_request_id;

/// Operation context for the acting admin, carrying the request id into the
/// audit trail.
pub(crate) fn op_context() -> OpContext {
    OpContext::new("admin", current_request_id())
}
