#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links
)]
#![allow(clippy::module_name_repetitions)]

//! Security primitives for the request pipeline.
//!
//! Layout: `rate_limit.rs` (per-IP token buckets with path classes),
//! `ip_block.rs` (block list with expiry and internal-network exemptions),
//! `monitor.rs` (suspicious-content classification and per-IP attack
//! profiles), `validation.rs` (structural request validation limits).
//!
//! Everything here is transport-free plain state; the HTTP layer assembles
//! it into middleware. All maps are bounded and swept periodically, and the
//! whole state is rebuildable from scratch on restart.

pub mod ip_block;
pub mod monitor;
pub mod rate_limit;
pub mod validation;

pub use ip_block::{BlockList, Cidr};
pub use monitor::{AttackKind, Monitor, MonitorConfig, classify_request};
pub use rate_limit::{
    BucketConfig, PathClass, RateLimitConfig, RateLimitDecision, RateLimiterMap, class_for_path,
};
pub use validation::{ValidationConfig, ValidationViolation, json_depth};

use std::net::IpAddr;
use std::sync::Arc;

use shelman_events::EventBus;

/// Aggregated security state shared by the middleware pipeline.
#[derive(Clone)]
pub struct SecurityState {
    /// IP block list.
    pub blocks: Arc<BlockList>,
    /// Per-IP rate limiter buckets.
    pub limiter: Arc<RateLimiterMap>,
    /// Suspicious-activity monitor.
    pub monitor: Arc<Monitor>,
    /// Structural validation limits.
    pub validation: Arc<ValidationConfig>,
}

impl SecurityState {
    /// Assemble the pipeline state.
    #[must_use]
    pub fn new(
        events: EventBus,
        internal_networks: Vec<Cidr>,
        rate_limits: RateLimitConfig,
        monitor_config: MonitorConfig,
        validation: ValidationConfig,
    ) -> Self {
        let blocks = Arc::new(BlockList::new(internal_networks));
        Self {
            monitor: Arc::new(Monitor::new(monitor_config, Arc::clone(&blocks), events)),
            limiter: Arc::new(RateLimiterMap::new(rate_limits)),
            blocks,
            validation: Arc::new(validation),
        }
    }

    /// Whether the address bypasses blocking and scanner heuristics
    /// (loopback or configured internal ranges).
    #[must_use]
    pub fn is_exempt(&self, ip: IpAddr) -> bool {
        self.blocks.is_exempt(ip)
    }

    /// Run the periodic eviction pass over every bounded map.
    pub fn sweep(&self) {
        self.blocks.sweep();
        self.limiter.sweep();
        self.monitor.sweep();
    }
}
