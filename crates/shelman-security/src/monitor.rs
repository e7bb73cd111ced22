//! Suspicious-content classification and per-IP attack profiles.
//!
//! Classification is deliberately literal: a fixed set of substrings per
//! attack family, matched case-insensitively against the path, query, and
//! user-agent. Matches feed per-IP profiles; repeat offenders crossing the
//! threshold inside the window are auto-blocked. Timeouts (HTTP 408) never
//! reach this module, and exempt addresses are counted nowhere.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::ip_block::BlockList;
use shelman_events::{AlertSeverity, Event, EventBus};

/// Attack families the monitor recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttackKind {
    /// SQL injection probes.
    SqlInjection,
    /// Cross-site scripting payloads.
    CrossSiteScripting,
    /// Path traversal attempts.
    PathTraversal,
    /// Known vulnerability-scanner fingerprints.
    Scanner,
}

impl AttackKind {
    /// Stable label used in alerts and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SqlInjection => "sql_injection",
            Self::CrossSiteScripting => "xss",
            Self::PathTraversal => "path_traversal",
            Self::Scanner => "scanner",
        }
    }
}

const SQLI_TOKENS: [&str; 7] = [
    "union select",
    "' or '1'='1",
    " or 1=1",
    "drop table",
    "; drop ",
    "sleep(",
    "load_file(",
];

const XSS_TOKENS: [&str; 5] = [
    "<script",
    "javascript:",
    "onerror=",
    "onload=",
    "<iframe",
];

const TRAVERSAL_TOKENS: [&str; 4] = ["../", "..\\", "..%2f", "%2e%2e/"];

const SCANNER_AGENTS: [&str; 8] = [
    "sqlmap", "nikto", "nmap", "masscan", "zgrab", "dirbuster", "gobuster", "nuclei",
];

/// Classify one request; `None` means it looks ordinary.
#[must_use]
pub fn classify_request(path_and_query: &str, user_agent: &str) -> Option<(AttackKind, String)> {
    let haystack = path_and_query.to_ascii_lowercase();
    for token in SQLI_TOKENS {
        if haystack.contains(token) {
            return Some((AttackKind::SqlInjection, token.to_string()));
        }
    }
    for token in XSS_TOKENS {
        if haystack.contains(token) {
            return Some((AttackKind::CrossSiteScripting, token.to_string()));
        }
    }
    for token in TRAVERSAL_TOKENS {
        if haystack.contains(token) {
            return Some((AttackKind::PathTraversal, token.to_string()));
        }
    }
    let agent = user_agent.to_ascii_lowercase();
    for token in SCANNER_AGENTS {
        if agent.contains(token) {
            return Some((AttackKind::Scanner, token.to_string()));
        }
    }
    None
}

/// Monitor thresholds.
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    /// Suspicious hits inside the window that trigger an auto-block.
    pub auto_block_threshold: u32,
    /// Window over which hits accumulate.
    pub window: Duration,
    /// How long an auto-block lasts.
    pub block_duration: Duration,
    /// Maximum tracked profiles; least-recently-seen are evicted beyond it.
    pub max_profiles: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            auto_block_threshold: 10,
            window: Duration::from_secs(600),
            block_duration: Duration::from_secs(3600),
            max_profiles: 10_000,
        }
    }
}

#[derive(Debug)]
struct AttackProfile {
    hits: HashMap<AttackKind, u32>,
    total_in_window: u32,
    window_started: Instant,
    last_seen: Instant,
}

/// Per-IP attack bookkeeping feeding the alert stream and the block list.
pub struct Monitor {
    config: MonitorConfig,
    profiles: Mutex<HashMap<IpAddr, AttackProfile>>,
    blocks: Arc<BlockList>,
    events: EventBus,
}

impl Monitor {
    /// Build the monitor around the shared block list and event bus.
    #[must_use]
    pub fn new(config: MonitorConfig, blocks: Arc<BlockList>, events: EventBus) -> Self {
        Self {
            config,
            profiles: Mutex::new(HashMap::new()),
            blocks,
            events,
        }
    }

    /// Record one suspicious request. Returns `true` when the source
    /// crossed the threshold and was auto-blocked.
    pub fn record(&self, ip: IpAddr, kind: AttackKind, matched: &str, path: &str) -> bool {
        if self.blocks.is_exempt(ip) {
            return false;
        }

        let now = Instant::now();
        let total = {
            let mut profiles = match self.profiles.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if profiles.len() >= self.config.max_profiles && !profiles.contains_key(&ip) {
                evict_least_recent(&mut profiles);
            }
            let profile = profiles.entry(ip).or_insert_with(|| AttackProfile {
                hits: HashMap::new(),
                total_in_window: 0,
                window_started: now,
                last_seen: now,
            });
            if now.saturating_duration_since(profile.window_started) > self.config.window {
                profile.total_in_window = 0;
                profile.window_started = now;
            }
            *profile.hits.entry(kind).or_insert(0) += 1;
            profile.total_in_window += 1;
            profile.last_seen = now;
            profile.total_in_window
        };

        self.events.publish(Event::SecurityAlert {
            severity: AlertSeverity::Warning,
            kind: kind.as_str().to_string(),
            source_ip: ip.to_string(),
            detail: format!("matched '{matched}' in {path}"),
        });

        if total >= self.config.auto_block_threshold {
            warn!(%ip, hits = total, "auto-blocking repeat offender");
            self.blocks
                .block(ip, self.config.block_duration, kind.as_str());
            self.events.publish(Event::SecurityAlert {
                severity: AlertSeverity::Critical,
                kind: "auto_block".to_string(),
                source_ip: ip.to_string(),
                detail: format!("{total} suspicious requests inside the window"),
            });
            return true;
        }
        false
    }

    /// Drop profiles idle for longer than twice the window.
    pub fn sweep(&self) {
        let now = Instant::now();
        let horizon = self.config.window * 2;
        let mut profiles = match self.profiles.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        profiles.retain(|_, profile| now.saturating_duration_since(profile.last_seen) < horizon);
    }

    /// Number of tracked profiles; exposed for tests and metrics.
    #[must_use]
    pub fn profile_count(&self) -> usize {
        match self.profiles.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

fn evict_least_recent(profiles: &mut HashMap<IpAddr, AttackProfile>) {
    if let Some(oldest) = profiles
        .iter()
        .min_by_key(|(_, profile)| profile.last_seen)
        .map(|(ip, _)| *ip)
    {
        profiles.remove(&oldest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(threshold: u32, max_profiles: usize) -> Monitor {
        Monitor::new(
            MonitorConfig {
                auto_block_threshold: threshold,
                window: Duration::from_secs(600),
                block_duration: Duration::from_secs(3600),
                max_profiles,
            },
            Arc::new(BlockList::new(Vec::new())),
            shelman_events::EventBus::new(),
        )
    }

    fn attacker() -> IpAddr {
        "203.0.113.66".parse().expect("ip")
    }

    #[test]
    fn classification_catches_each_family() {
        assert_eq!(
            classify_request("/api/v1/devices?search=1 UNION SELECT *", "curl")
                .map(|(kind, _)| kind),
            Some(AttackKind::SqlInjection)
        );
        assert_eq!(
            classify_request("/api/v1/devices?name=<script>alert(1)</script>", "curl")
                .map(|(kind, _)| kind),
            Some(AttackKind::CrossSiteScripting)
        );
        assert_eq!(
            classify_request("/api/v1/../../etc/passwd", "curl").map(|(kind, _)| kind),
            Some(AttackKind::PathTraversal)
        );
        assert_eq!(
            classify_request("/api/v1/devices", "sqlmap/1.7").map(|(kind, _)| kind),
            Some(AttackKind::Scanner)
        );
        assert_eq!(classify_request("/api/v1/devices?page=2", "curl"), None);
    }

    #[test]
    fn threshold_crossing_blocks_the_source() {
        let monitor = monitor(3, 100);
        for _ in 0..2 {
            assert!(!monitor.record(attacker(), AttackKind::Scanner, "nikto", "/"));
        }
        assert!(monitor.record(attacker(), AttackKind::Scanner, "nikto", "/"));
        assert!(monitor.blocks.is_blocked(attacker()));
    }

    #[test]
    fn exempt_sources_are_never_counted() {
        let monitor = monitor(1, 100);
        let loopback: IpAddr = "127.0.0.1".parse().expect("ip");
        for _ in 0..1000 {
            assert!(!monitor.record(loopback, AttackKind::Scanner, "nikto", "/"));
        }
        assert!(!monitor.blocks.is_blocked(loopback));
        assert_eq!(monitor.profile_count(), 0);
    }

    #[test]
    fn profile_map_is_capped_with_lru_eviction() {
        let monitor = monitor(100, 2);
        for octet in 1..=3u8 {
            let ip: IpAddr = format!("203.0.113.{octet}").parse().expect("ip");
            monitor.record(ip, AttackKind::Scanner, "nmap", "/");
        }
        assert_eq!(monitor.profile_count(), 2);
    }
}
