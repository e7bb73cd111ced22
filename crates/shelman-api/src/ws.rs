//! Real-time WebSocket channel for metrics snapshots and security alerts.
//!
//! One reader task and one writer task per connection. The writer pushes
//! bus events and a heartbeat ping every 30 seconds; two heartbeats without
//! a pong close the connection. A normal close (code 1000) is routine and
//! logs at debug, never at error.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info};

use crate::state::ApiState;
use shelman_events::{Event, EventStream};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const MAX_MISSED_HEARTBEATS: u32 = 2;

/// `GET /api/v1/metrics/ws`
pub(crate) async fn metrics_ws(
    State(state): State<Arc<ApiState>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: Arc<ApiState>, socket: WebSocket) {
    state.metrics.ws_client_connected();
    let (sender, receiver) = socket.split();
    let missed = Arc::new(AtomicU32::new(0));
    let events = state.events.subscribe();

    let writer = tokio::spawn(write_loop(
        sender,
        events,
        Arc::clone(&state),
        Arc::clone(&missed),
    ));
    read_loop(receiver, &missed).await;

    writer.abort();
    state.metrics.ws_client_disconnected();
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut events: EventStream,
    state: Arc<ApiState>,
    missed: Arc<AtomicU32>,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first interval tick fires immediately and doubles as the initial
    // snapshot push.
    let mut first_tick = true;

    loop {
        tokio::select! {
            maybe = events.next() => match maybe {
                Some(envelope) => {
                    if send_event(&mut sender, &envelope.event).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = heartbeat.tick() => {
                if first_tick {
                    first_tick = false;
                    let snapshot = state.metrics.snapshot();
                    let event = Event::MetricsUpdate {
                        snapshot: serde_json::to_value(&snapshot).unwrap_or_default(),
                    };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                    continue;
                }
                if missed.fetch_add(1, Ordering::Relaxed) >= MAX_MISSED_HEARTBEATS {
                    debug!("client missed heartbeats; closing");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &Event,
) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(text) => sender.send(Message::Text(text.into())).await,
        Err(err) => {
            debug!(error = %err, "skipping unserializable event");
            Ok(())
        }
    }
}

async fn read_loop(mut receiver: SplitStream<WebSocket>, missed: &AtomicU32) {
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Pong(_)) => missed.store(0, Ordering::Relaxed),
            Ok(Message::Close(frame)) => {
                match frame {
                    Some(frame) if u16::from(frame.code) != 1000 => {
                        info!(code = u16::from(frame.code), "client closed abnormally");
                    }
                    _ => debug!("client closed"),
                }
                break;
            }
            // Inbound text is ignored; the channel is publish-only.
            Ok(_) => {}
            Err(err) => {
                debug!(error = %err, "websocket receive failed");
                break;
            }
        }
    }
}
