//! IP block list with per-entry expiry and internal-network exemptions.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// An IPv4 network in CIDR notation. Loopback is always exempt and needs no
/// entry here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    base: u32,
    prefix: u8,
}

impl Cidr {
    /// Whether the network contains an address. Only IPv4 addresses can
    /// match; IPv6 internal ranges are out of scope for a LAN fleet manager.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        let IpAddr::V4(v4) = ip else {
            return false;
        };
        if self.prefix == 0 {
            return true;
        }
        let mask = u32::MAX << (32 - u32::from(self.prefix));
        (u32::from(v4) & mask) == (self.base & mask)
    }
}

impl FromStr for Cidr {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = raw
            .split_once('/')
            .ok_or_else(|| format!("'{raw}' is not CIDR notation"))?;
        let base = addr
            .parse::<Ipv4Addr>()
            .map_err(|err| format!("invalid network address '{addr}': {err}"))?;
        let prefix = prefix
            .parse::<u8>()
            .ok()
            .filter(|bits| *bits <= 32)
            .ok_or_else(|| format!("invalid prefix length in '{raw}'"))?;
        Ok(Self {
            base: u32::from(base),
            prefix,
        })
    }
}

#[derive(Debug, Clone)]
struct BlockEntry {
    until: Instant,
    reason: String,
}

/// Block list consulted on every request, O(1) per lookup.
pub struct BlockList {
    entries: RwLock<HashMap<IpAddr, BlockEntry>>,
    exempt_networks: Vec<Cidr>,
}

impl BlockList {
    /// Build the list with the configured internal (exempt) networks.
    #[must_use]
    pub fn new(exempt_networks: Vec<Cidr>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            exempt_networks,
        }
    }

    /// Whether the address bypasses blocking and scanner heuristics.
    #[must_use]
    pub fn is_exempt(&self, ip: IpAddr) -> bool {
        ip.is_loopback() || self.exempt_networks.iter().any(|net| net.contains(ip))
    }

    /// Whether the address is currently blocked.
    #[must_use]
    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        if self.is_exempt(ip) {
            return false;
        }
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries
            .get(&ip)
            .is_some_and(|entry| entry.until > Instant::now())
    }

    /// Block an address for a duration. Exempt addresses are never blocked,
    /// regardless of traffic pattern.
    pub fn block(&self, ip: IpAddr, duration: Duration, reason: impl Into<String>) {
        if self.is_exempt(ip) {
            return;
        }
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(
            ip,
            BlockEntry {
                until: Instant::now() + duration,
                reason: reason.into(),
            },
        );
    }

    /// Remove an address manually.
    pub fn unblock(&self, ip: IpAddr) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.remove(&ip);
    }

    /// The stored reason for a blocked address, for operator inspection.
    #[must_use]
    pub fn reason(&self, ip: IpAddr) -> Option<String> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries
            .get(&ip)
            .filter(|entry| entry.until > Instant::now())
            .map(|entry| entry.reason.clone())
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        entries.values().filter(|entry| entry.until > now).count()
    }

    /// Whether the list has no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.retain(|_, entry| entry.until > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn external() -> IpAddr {
        "203.0.113.50".parse().expect("ip")
    }

    #[test]
    fn cidr_matching_honours_the_prefix() {
        let net: Cidr = "192.168.0.0/16".parse().expect("cidr");
        assert!(net.contains("192.168.4.20".parse().expect("ip")));
        assert!(!net.contains("10.0.0.1".parse().expect("ip")));
        assert!("192.168.0.0".parse::<Cidr>().is_err());
        assert!("192.168.0.0/40".parse::<Cidr>().is_err());
    }

    #[test]
    fn blocked_addresses_expire() {
        let list = BlockList::new(Vec::new());
        list.block(external(), Duration::from_millis(10), "test");
        assert!(list.is_blocked(external()));
        std::thread::sleep(Duration::from_millis(20));
        assert!(!list.is_blocked(external()));
        list.sweep();
        assert!(list.is_empty());
    }

    #[test]
    fn loopback_is_never_blocked() {
        let list = BlockList::new(Vec::new());
        let loopback: IpAddr = "127.0.0.1".parse().expect("ip");
        list.block(loopback, Duration::from_secs(3600), "test");
        assert!(!list.is_blocked(loopback));
    }

    #[test]
    fn internal_networks_are_exempt() {
        let list = BlockList::new(vec!["10.0.0.0/8".parse().expect("cidr")]);
        let internal: IpAddr = "10.1.2.3".parse().expect("ip");
        list.block(internal, Duration::from_secs(3600), "test");
        assert!(!list.is_blocked(internal));
        assert!(list.is_exempt(internal));
    }
}
