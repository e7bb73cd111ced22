#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links
)]
#![allow(clippy::module_name_repetitions)]

//! Domain event fan-out for the Shelman platform.
//!
//! Events are appended to a bounded in-memory journal and fanned out over a
//! `tokio::broadcast` channel. The journal is a fixed ring whose oldest
//! entries are overwritten in place, and it doubles as the recovery path:
//! a WebSocket client that reconnects calls [`EventBus::resume`] with the
//! last id it saw, and a live subscriber that falls behind the channel is
//! re-seeded from the journal instead of silently skipping whatever the
//! channel dropped. Events older than the journal are gone; consumers that
//! need a complete record have the audit trail.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Identifier assigned to each event emitted by the platform.
pub type EventId = u64;

/// Journal entries retained for replay and lag recovery.
const DEFAULT_JOURNAL_SIZE: usize = 1_024;

/// Typed domain events surfaced across the system.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Periodic snapshot of platform metrics for dashboard consumers.
    MetricsUpdate {
        /// Gauges and counters serialized for the dashboard.
        snapshot: serde_json::Value,
    },
    /// The security monitor flagged or blocked a client.
    SecurityAlert {
        /// Alert severity: `info`, `warning`, or `critical`.
        severity: AlertSeverity,
        /// What tripped the alert (e.g. `sql_injection`, `scanner`).
        kind: String,
        /// Source address the alert is attributed to.
        source_ip: String,
        /// Human-readable alert detail.
        detail: String,
    },
    /// Something happened to a device in the catalogue.
    DeviceEvent {
        /// Identifier of the affected device.
        device_id: i64,
        /// What happened to the device.
        kind: DeviceEventKind,
        /// Optional human-readable detail.
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl Event {
    /// Machine-friendly discriminator for WebSocket consumers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MetricsUpdate { .. } => "metrics_update",
            Self::SecurityAlert { .. } => "security_alert",
            Self::DeviceEvent { .. } => "device_event",
        }
    }
}

/// Severity attached to a [`Event::SecurityAlert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Informational; no action required.
    Info,
    /// Suspicious activity worth watching.
    Warning,
    /// Active attack pattern or auto-block.
    Critical,
}

/// Lifecycle changes surfaced in a [`Event::DeviceEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceEventKind {
    /// Device row created.
    Created,
    /// Device row updated.
    Updated,
    /// Device row deleted.
    Deleted,
    /// Reachability changed (online/offline).
    StatusChanged,
    /// Desired configuration verified as applied.
    ConfigApplied,
    /// Verification found drift between desired and observed configuration.
    ConfigDrifted,
}

/// An event with its sequence id and emission timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct EventEnvelope {
    /// Monotonic identifier assigned at publish time.
    pub id: EventId,
    /// When the event was published.
    pub timestamp: DateTime<Utc>,
    /// The event payload.
    pub event: Event,
}

/// Bounded ring of recent envelopes. Entries are overwritten in place once
/// the ring is full, so the slot order is not chronological; readers filter
/// by id and sort.
struct Journal {
    slots: Vec<EventEnvelope>,
    capacity: usize,
    write_at: usize,
    next_id: EventId,
}

impl Journal {
    fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            write_at: 0,
            next_id: 1,
        }
    }

    fn record(&mut self, event: Event) -> EventEnvelope {
        let envelope = EventEnvelope {
            id: self.next_id,
            timestamp: Utc::now(),
            event,
        };
        self.next_id += 1;

        if self.slots.len() < self.capacity {
            self.slots.push(envelope.clone());
        } else {
            self.slots[self.write_at] = envelope.clone();
        }
        self.write_at = (self.write_at + 1) % self.capacity;
        envelope
    }

    /// Retained envelopes newer than `after`, oldest first.
    fn since(&self, after: EventId) -> Vec<EventEnvelope> {
        let mut found: Vec<EventEnvelope> = self
            .slots
            .iter()
            .filter(|entry| entry.id > after)
            .cloned()
            .collect();
        found.sort_unstable_by_key(|entry| entry.id);
        found
    }

    fn latest_id(&self) -> Option<EventId> {
        (self.next_id > 1).then_some(self.next_id - 1)
    }
}

/// Shared event bus: one journal, one broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    journal: Arc<RwLock<Journal>>,
}

impl EventBus {
    /// Bus with the default journal size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_journal_size(DEFAULT_JOURNAL_SIZE)
    }

    /// Bus retaining `size` envelopes for replay; a zero size is bumped to
    /// one so the journal always holds the latest event.
    #[must_use]
    pub fn with_journal_size(size: usize) -> Self {
        let capacity = size.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            journal: Arc::new(RwLock::new(Journal::new(capacity))),
        }
    }

    /// Publish an event, returning its assigned id.
    pub fn publish(&self, event: Event) -> EventId {
        let envelope = self
            .journal
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .record(event);
        let id = envelope.id;
        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        // Channel first, cursor second: an event landing in between is
        // already in the channel and gets dropped by the cursor guard,
        // instead of vanishing.
        let receiver = self.sender.subscribe();
        let cursor = self.latest_id().unwrap_or(0);
        EventStream {
            receiver,
            journal: Arc::clone(&self.journal),
            pending: Vec::new(),
            cursor,
        }
    }

    /// Subscribe, first replaying every retained event newer than `after`.
    /// Passing `0` replays the whole journal.
    #[must_use]
    pub fn resume(&self, after: EventId) -> EventStream {
        let receiver = self.sender.subscribe();
        let mut pending = self
            .journal
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .since(after);
        // Delivery pops from the back, so keep the oldest entry last.
        pending.reverse();
        EventStream {
            receiver,
            journal: Arc::clone(&self.journal),
            pending,
            cursor: after,
        }
    }

    /// Id of the most recently published event, if any.
    #[must_use]
    pub fn latest_id(&self) -> Option<EventId> {
        self.journal
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .latest_id()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered event stream with journal-backed catch-up.
///
/// The stream tracks the last delivered id. When the broadcast channel
/// reports it lagged, the gap is refilled from the journal, so a slow
/// consumer loses events only once they age out of the journal itself.
pub struct EventStream {
    receiver: broadcast::Receiver<EventEnvelope>,
    journal: Arc<RwLock<Journal>>,
    pending: Vec<EventEnvelope>,
    cursor: EventId,
}

impl EventStream {
    /// Receive the next event in id order, or `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        loop {
            if let Some(envelope) = self.pending.pop() {
                self.cursor = envelope.id;
                return Some(envelope);
            }

            match self.receiver.recv().await {
                Ok(envelope) => {
                    // Already delivered via a catch-up pass.
                    if envelope.id <= self.cursor {
                        continue;
                    }
                    self.cursor = envelope.id;
                    return Some(envelope);
                }
                Err(RecvError::Lagged(_)) => self.catch_up(),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    fn catch_up(&mut self) {
        let mut missed = self
            .journal
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .since(self.cursor);
        missed.reverse();
        self.pending = missed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const RECV_TIMEOUT: Duration = Duration::from_secs(1);

    fn device_event(device_id: i64, kind: DeviceEventKind) -> Event {
        Event::DeviceEvent {
            device_id,
            kind,
            detail: None,
        }
    }

    async fn collect(stream: &mut EventStream, count: usize) -> Vec<EventId> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let envelope = timeout(RECV_TIMEOUT, stream.next())
                .await
                .expect("no timeout")
                .expect("event");
            ids.push(envelope.id);
        }
        ids
    }

    #[test]
    fn event_kinds_cover_all_variants() {
        let events = [
            Event::MetricsUpdate {
                snapshot: serde_json::json!({}),
            },
            Event::SecurityAlert {
                severity: AlertSeverity::Warning,
                kind: "scanner".to_string(),
                source_ip: "203.0.113.9".to_string(),
                detail: "scanner user-agent".to_string(),
            },
            device_event(1, DeviceEventKind::Created),
        ];
        let kinds: Vec<_> = events.iter().map(Event::kind).collect();
        assert_eq!(kinds, ["metrics_update", "security_alert", "device_event"]);
    }

    #[test]
    fn discriminator_field_appears_in_serialized_payload() {
        let event = device_event(7, DeviceEventKind::ConfigDrifted);
        let payload = serde_json::to_value(&event).expect("serialize");
        assert_eq!(payload["type"], "device_event");
        assert_eq!(payload["kind"], "config_drifted");
    }

    #[tokio::test]
    async fn live_subscribers_only_see_the_future() {
        let bus = EventBus::new();
        bus.publish(device_event(1, DeviceEventKind::Created));

        let mut stream = bus.subscribe();
        let id = bus.publish(device_event(1, DeviceEventKind::Updated));
        assert_eq!(collect(&mut stream, 1).await, vec![id]);
    }

    #[tokio::test]
    async fn resume_replays_the_journal_in_order() {
        let bus = EventBus::new();
        let first = bus.publish(device_event(1, DeviceEventKind::Created));
        let second = bus.publish(device_event(1, DeviceEventKind::Updated));
        let third = bus.publish(device_event(1, DeviceEventKind::ConfigApplied));

        let mut stream = bus.resume(first);
        assert_eq!(collect(&mut stream, 2).await, vec![second, third]);

        // Replay does not double-deliver once the stream goes live.
        let fourth = bus.publish(device_event(1, DeviceEventKind::ConfigDrifted));
        assert_eq!(collect(&mut stream, 1).await, vec![fourth]);
    }

    #[tokio::test]
    async fn journal_overwrites_oldest_entries_in_place() {
        let bus = EventBus::with_journal_size(3);
        let mut ids = Vec::new();
        for index in 0..7_i64 {
            ids.push(bus.publish(device_event(index, DeviceEventKind::Updated)));
        }

        let mut stream = bus.resume(0);
        let replayed = collect(&mut stream, 3).await;
        assert_eq!(replayed, ids[4..].to_vec());
        assert_eq!(bus.latest_id(), ids.last().copied());
    }

    #[tokio::test]
    async fn lagged_subscriber_heals_from_the_journal() {
        let bus = EventBus::with_journal_size(4);
        let mut stream = bus.subscribe();

        // Overflow the broadcast channel while the subscriber sleeps.
        let mut ids = Vec::new();
        for index in 0..10_i64 {
            ids.push(bus.publish(device_event(index, DeviceEventKind::Updated)));
        }

        // The channel dropped early events; the journal still holds the
        // last four, and nothing is delivered twice.
        let received = collect(&mut stream, 4).await;
        assert_eq!(received, ids[6..].to_vec());
    }

    #[test]
    fn zero_journal_size_is_bumped_to_one() {
        let bus = EventBus::with_journal_size(0);
        let id = bus.publish(device_event(1, DeviceEventKind::Created));
        assert_eq!(bus.latest_id(), Some(id));
    }
}
