//! Per-IP token-bucket rate limiting with path classes.
//!
//! Buckets use scaled integer arithmetic so fractional replenishment never
//! rounds to zero. Each (address, class) pair owns one bucket; the map is
//! swept so idle clients do not accumulate forever. A full bucket admits
//! exactly `burst` back-to-back requests before the first rejection, which
//! carries a positive retry hint.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Path classes with their own thresholds; device control is tighter than
/// reads, provisioning and bulk operations tighter still.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathClass {
    /// Catalogue reads and metrics.
    Read,
    /// Device control and configuration writes.
    Control,
    /// Device creation and bulk operations.
    Provisioning,
}

/// One class's bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketConfig {
    /// Requests admitted from a full bucket.
    pub burst: u32,
    /// Time to refill a drained bucket completely.
    pub replenish_period: Duration,
}

/// Thresholds for every path class.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Threshold for [`PathClass::Read`].
    pub read: BucketConfig,
    /// Threshold for [`PathClass::Control`].
    pub control: BucketConfig,
    /// Threshold for [`PathClass::Provisioning`].
    pub provisioning: BucketConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            read: BucketConfig {
                burst: 300,
                replenish_period: Duration::from_secs(60),
            },
            control: BucketConfig {
                burst: 60,
                replenish_period: Duration::from_secs(60),
            },
            provisioning: BucketConfig {
                burst: 20,
                replenish_period: Duration::from_secs(60),
            },
        }
    }
}

impl RateLimitConfig {
    const fn for_class(&self, class: PathClass) -> BucketConfig {
        match class {
            PathClass::Read => self.read,
            PathClass::Control => self.control,
            PathClass::Provisioning => self.provisioning,
        }
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// The class's configured burst, for response headers.
    pub limit: u32,
    /// Remaining whole tokens after this request.
    pub remaining: u32,
    /// How long until a token is available when rejected.
    pub retry_after: Duration,
}

const TOKEN_SCALE: u128 = 1_000_000;

struct Bucket {
    config: BucketConfig,
    tokens: u128,
    last_refill: Instant,
    last_access: Instant,
}

impl Bucket {
    fn new(config: BucketConfig, now: Instant) -> Self {
        Self {
            config,
            tokens: capacity_of(config),
            last_refill: now,
            last_access: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed == Duration::ZERO {
            return;
        }
        let period_micros = self.config.replenish_period.as_micros();
        let capacity = capacity_of(self.config);
        if period_micros == 0 || capacity == 0 {
            self.tokens = capacity;
            self.last_refill = now;
            return;
        }
        let replenished = capacity
            .saturating_mul(elapsed.as_micros())
            .checked_div(period_micros);
        if let Some(amount) = replenished {
            if amount > 0 {
                self.tokens = (self.tokens + amount).min(capacity);
                self.last_refill = now;
            }
        }
    }

    fn admit(&mut self, now: Instant) -> RateLimitDecision {
        self.refill(now);
        self.last_access = now;

        if self.tokens >= TOKEN_SCALE {
            self.tokens -= TOKEN_SCALE;
            RateLimitDecision {
                allowed: true,
                limit: self.config.burst,
                remaining: self.remaining(),
                retry_after: Duration::ZERO,
            }
        } else {
            RateLimitDecision {
                allowed: false,
                limit: self.config.burst,
                remaining: 0,
                retry_after: self.retry_delay(),
            }
        }
    }

    fn remaining(&self) -> u32 {
        u32::try_from(self.tokens / TOKEN_SCALE).unwrap_or(u32::MAX)
    }

    fn retry_delay(&self) -> Duration {
        let capacity = capacity_of(self.config);
        if capacity == 0 {
            return Duration::MAX;
        }
        let period_micros = self.config.replenish_period.as_micros();
        if period_micros == 0 {
            return Duration::ZERO;
        }
        let deficit = TOKEN_SCALE.saturating_sub(self.tokens);
        let needed = deficit.saturating_mul(period_micros);
        let retry_micros = needed.div_ceil(capacity).min(u128::from(u64::MAX));
        Duration::from_micros(u64::try_from(retry_micros).unwrap_or(u64::MAX))
    }
}

const fn capacity_of(config: BucketConfig) -> u128 {
    (config.burst as u128) * TOKEN_SCALE
}

/// Keyed bucket map covering every client address and path class.
pub struct RateLimiterMap {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<(IpAddr, PathClass), Bucket>>,
}

impl RateLimiterMap {
    /// Build the map from the configured thresholds.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Check one request against its class bucket.
    pub fn check(&self, ip: IpAddr, class: PathClass) -> RateLimitDecision {
        let now = Instant::now();
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        buckets
            .entry((ip, class))
            .or_insert_with(|| Bucket::new(self.config.for_class(class), now))
            .admit(now)
    }

    /// Evict buckets idle for longer than twice their replenish period.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        buckets.retain(|_, bucket| {
            now.saturating_duration_since(bucket.last_access)
                < bucket.config.replenish_period * 2
        });
    }

    /// Number of live buckets; exposed for tests and metrics.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        match self.buckets.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

/// Classify a request path into its rate-limit class.
#[must_use]
pub fn class_for_path(path: &str, method_is_mutation: bool) -> PathClass {
    if path.starts_with("/api/v1/config/apply-bulk")
        || (path == "/api/v1/devices" && method_is_mutation)
    {
        return PathClass::Provisioning;
    }
    if path.contains("/control")
        || path.contains("/config/apply")
        || path.contains("/config/verify")
        || path.contains("/config/reboot-and-verify")
        || method_is_mutation
    {
        return PathClass::Control;
    }
    PathClass::Read
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn config(burst: u32) -> RateLimitConfig {
        let bucket = BucketConfig {
            burst,
            replenish_period: Duration::from_secs(60),
        };
        RateLimitConfig {
            read: bucket,
            control: bucket,
            provisioning: bucket,
        }
    }

    fn client() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, 10))
    }

    #[test]
    fn nth_request_is_admitted_and_the_next_rejected() {
        let limiter = RateLimiterMap::new(config(5));
        for _ in 0..5 {
            assert!(limiter.check(client(), PathClass::Read).allowed);
        }
        let rejected = limiter.check(client(), PathClass::Read);
        assert!(!rejected.allowed);
        assert!(rejected.retry_after > Duration::ZERO);
    }

    #[test]
    fn classes_are_limited_independently() {
        let limiter = RateLimiterMap::new(config(1));
        assert!(limiter.check(client(), PathClass::Read).allowed);
        assert!(limiter.check(client(), PathClass::Control).allowed);
        assert!(!limiter.check(client(), PathClass::Read).allowed);
    }

    #[test]
    fn addresses_are_limited_independently() {
        let limiter = RateLimiterMap::new(config(1));
        let other = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 11));
        assert!(limiter.check(client(), PathClass::Read).allowed);
        assert!(limiter.check(other, PathClass::Read).allowed);
    }

    #[test]
    fn sweep_evicts_idle_buckets() {
        let tight = RateLimitConfig {
            read: BucketConfig {
                burst: 1,
                replenish_period: Duration::ZERO,
            },
            control: BucketConfig {
                burst: 1,
                replenish_period: Duration::ZERO,
            },
            provisioning: BucketConfig {
                burst: 1,
                replenish_period: Duration::ZERO,
            },
        };
        let limiter = RateLimiterMap::new(tight);
        limiter.check(client(), PathClass::Read);
        assert_eq!(limiter.bucket_count(), 1);
        limiter.sweep();
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[test]
    fn path_classification_orders_by_sensitivity() {
        assert_eq!(class_for_path("/api/v1/devices", false), PathClass::Read);
        assert_eq!(
            class_for_path("/api/v1/devices", true),
            PathClass::Provisioning
        );
        assert_eq!(
            class_for_path("/api/v1/devices/3/control", true),
            PathClass::Control
        );
        assert_eq!(
            class_for_path("/api/v1/config/apply-bulk", true),
            PathClass::Provisioning
        );
    }
}
