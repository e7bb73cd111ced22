//! Short-TTL online/offline classification.
//!
//! The cache is consulted before expensive device I/O so known-offline
//! devices fail fast, and it is corrected by every actual I/O outcome. It is
//! advisory only: an expired entry reads as `Unknown`, and a forced read
//! always goes to the network (updating the cache on completion).

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Default lifetime of an `Online` classification.
const ONLINE_TTL: Duration = Duration::from_secs(60);
/// Default lifetime of an `Offline` classification.
const OFFLINE_TTL: Duration = Duration::from_secs(30);
/// Entries untouched for this long are dropped by the sweeper.
const SWEEP_HORIZON: Duration = Duration::from_secs(600);

/// Reachability classification of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReachabilityStatus {
    /// Recent I/O succeeded.
    Online,
    /// Recent I/O failed at the transport level.
    Offline,
    /// No fresh observation.
    Unknown,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    online: bool,
    observed_at: Instant,
    ttl: Duration,
}

/// Process-wide reachability cache; single writer per observation, many
/// readers. Stale reads during an update are harmless because the next
/// actual I/O corrects the state.
pub struct ReachabilityCache {
    entries: RwLock<HashMap<i64, Entry>>,
    online_ttl: Duration,
    offline_ttl: Duration,
}

impl ReachabilityCache {
    /// Cache with the default TTLs (online 60 s, offline 30 s).
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttls(ONLINE_TTL, OFFLINE_TTL)
    }

    /// Cache with custom TTLs; tests use short ones.
    #[must_use]
    pub fn with_ttls(online_ttl: Duration, offline_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            online_ttl,
            offline_ttl,
        }
    }

    /// Current classification for a device.
    #[must_use]
    pub fn status(&self, device_id: i64) -> ReachabilityStatus {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match entries.get(&device_id) {
            Some(entry) if entry.observed_at.elapsed() <= entry.ttl => {
                if entry.online {
                    ReachabilityStatus::Online
                } else {
                    ReachabilityStatus::Offline
                }
            }
            _ => ReachabilityStatus::Unknown,
        }
    }

    /// Record a successful I/O.
    pub fn record_success(&self, device_id: i64) {
        self.record(device_id, true, self.online_ttl);
    }

    /// Record a timeout or transport failure.
    pub fn record_failure(&self, device_id: i64) {
        self.record(device_id, false, self.offline_ttl);
    }

    /// Forget a device entirely (used when the device row is deleted).
    pub fn forget(&self, device_id: i64) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.remove(&device_id);
    }

    /// Number of devices currently classified online.
    #[must_use]
    pub fn online_count(&self) -> usize {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries
            .values()
            .filter(|entry| entry.online && entry.observed_at.elapsed() <= entry.ttl)
            .count()
    }

    /// Drop entries that have not been observed within the sweep horizon;
    /// keeps the map bounded over long uptimes.
    pub fn sweep(&self) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.retain(|_, entry| entry.observed_at.elapsed() < SWEEP_HORIZON);
    }

    fn record(&self, device_id: i64, online: bool, ttl: Duration) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(
            device_id,
            Entry {
                online,
                observed_at: Instant::now(),
                ttl,
            },
        );
    }
}

impl Default for ReachabilityCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unobserved_devices_are_unknown() {
        let cache = ReachabilityCache::new();
        assert_eq!(cache.status(1), ReachabilityStatus::Unknown);
    }

    #[test]
    fn observations_flip_the_classification() {
        let cache = ReachabilityCache::new();
        cache.record_failure(1);
        assert_eq!(cache.status(1), ReachabilityStatus::Offline);
        cache.record_success(1);
        assert_eq!(cache.status(1), ReachabilityStatus::Online);
        assert_eq!(cache.online_count(), 1);
    }

    #[test]
    fn expired_entries_read_as_unknown() {
        let cache = ReachabilityCache::with_ttls(Duration::ZERO, Duration::ZERO);
        cache.record_success(1);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.status(1), ReachabilityStatus::Unknown);
    }

    #[test]
    fn forget_removes_the_entry() {
        let cache = ReachabilityCache::new();
        cache.record_success(7);
        cache.forget(7);
        assert_eq!(cache.status(7), ReachabilityStatus::Unknown);
    }
}
