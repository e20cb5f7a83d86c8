//! Real-time event channel: WebSocket fan-out of task lifecycle events and
//! periodic metrics snapshots.
//!
//! Each connection runs its own receive loop and reports lifecycle
//! transitions to the broadcaster over an internal channel; the broadcaster
//! owns the active set. Delivery snapshots the set before iterating, so a
//! connection dropped mid-tick is neither skipped nor visited twice.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::metrics;
use crate::AppContext;

// ─── Connection state machine ────────────────────────────────────────────────

/// Connecting → Open → Closed. Closed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Open,
    Closed,
}

impl ConnState {
    /// Apply a transition; anything out of order lands in Closed.
    pub fn advance(self) -> Self {
        match self {
            Self::Connecting => Self::Open,
            Self::Open | Self::Closed => Self::Closed,
        }
    }
}

struct ConnectionSlot {
    tx: mpsc::UnboundedSender<String>,
    state: ConnState,
    connected_at: std::time::Instant,
}

enum Lifecycle {
    Opened {
        id: u64,
        tx: mpsc::UnboundedSender<String>,
    },
    Closed {
        id: u64,
    },
}

// ─── Broadcaster ─────────────────────────────────────────────────────────────

/// Fans serialized event frames out to every open connection.
pub struct EventBroadcaster {
    connections: Arc<RwLock<HashMap<u64, ConnectionSlot>>>,
    lifecycle_tx: mpsc::UnboundedSender<Lifecycle>,
    next_id: AtomicU64,
}

impl EventBroadcaster {
    /// Create the broadcaster and its registrar task. The registrar is the
    /// only writer of the active set; connection loops talk to it over the
    /// lifecycle channel.
    pub fn spawn() -> Arc<Self> {
        let connections: Arc<RwLock<HashMap<u64, ConnectionSlot>>> = Arc::default();
        let (lifecycle_tx, mut lifecycle_rx) = mpsc::unbounded_channel();

        let registry = connections.clone();
        tokio::spawn(async move {
            while let Some(event) = lifecycle_rx.recv().await {
                match event {
                    Lifecycle::Opened { id, tx } => {
                        registry.write().await.insert(
                            id,
                            ConnectionSlot {
                                tx,
                                state: ConnState::Connecting.advance(),
                                connected_at: std::time::Instant::now(),
                            },
                        );
                        debug!(conn = id, "ws connection open");
                    }
                    Lifecycle::Closed { id } => {
                        // Idempotent: close and error paths may both report.
                        if let Some(mut slot) = registry.write().await.remove(&id) {
                            slot.state = slot.state.advance();
                            debug!(conn = id, "ws connection closed");
                        }
                    }
                }
            }
        });

        Arc::new(Self {
            connections,
            lifecycle_tx,
            next_id: AtomicU64::new(1),
        })
    }

    fn frame(kind: &str, data: Value) -> String {
        json!({ "type": kind, "data": data }).to_string()
    }

    /// Serialize once, snapshot the active set, then deliver. A send into a
    /// half-closed connection schedules its removal instead of raising.
    pub async fn broadcast(&self, kind: &str, data: Value) {
        let payload = Self::frame(kind, data);
        let targets: Vec<(u64, mpsc::UnboundedSender<String>)> = self
            .connections
            .read()
            .await
            .iter()
            .filter(|(_, slot)| slot.state == ConnState::Open)
            .map(|(id, slot)| (*id, slot.tx.clone()))
            .collect();

        for (id, tx) in targets {
            if tx.send(payload.clone()).is_err() {
                let _ = self.lifecycle_tx.send(Lifecycle::Closed { id });
            }
        }
    }

    pub async fn task_created(&self, task: &crate::tasks::Task) {
        self.broadcast("task_created", serde_json::to_value(task).unwrap_or_default())
            .await;
    }

    pub async fn task_status_changed(&self, task: &crate::tasks::Task) {
        self.broadcast(
            "task_status_changed",
            serde_json::to_value(task).unwrap_or_default(),
        )
        .await;
    }

    pub async fn task_priority_changed(&self, task: &crate::tasks::Task) {
        self.broadcast(
            "task_priority_changed",
            serde_json::to_value(task).unwrap_or_default(),
        )
        .await;
    }

    pub async fn task_deleted(&self, task: &crate::tasks::Task) {
        self.broadcast("task_deleted", serde_json::to_value(task).unwrap_or_default())
            .await;
    }

    pub async fn active_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Connection summary for getWebSocketStatus.
    pub async fn status(&self) -> Value {
        let connections = self.connections.read().await;
        let conns: Vec<Value> = connections
            .iter()
            .map(|(id, slot)| {
                json!({
                    "id": id,
                    "state": match slot.state {
                        ConnState::Connecting => "connecting",
                        ConnState::Open => "open",
                        ConnState::Closed => "closed",
                    },
                    "connectedForSecs": slot.connected_at.elapsed().as_secs(),
                })
            })
            .collect();
        json!({ "activeConnections": connections.len(), "connections": conns })
    }
}

// ─── Server ──────────────────────────────────────────────────────────────────

/// Accept loop for the real-time channel. One spawned task per connection.
pub async fn run(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let addr = ctx.config.ws_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "real-time event server listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(c) => c,
            Err(e) => {
                warn!(err = %e, "ws accept error");
                continue;
            }
        };
        debug!(peer = %peer, "ws connection attempt");
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, ctx).await {
                debug!(peer = %peer, err = %e, "ws connection ended with error");
            }
        });
    }
}

async fn handle_connection(stream: tokio::net::TcpStream, ctx: Arc<AppContext>) -> anyhow::Result<()> {
    // A plain request without the upgrade handshake fails here and the
    // connection is dropped — never silently treated as a ws client.
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(err = %e, "rejected non-websocket request");
            return Ok(());
        }
    };
    let (mut sink, mut stream) = ws.split();

    let id = ctx.broadcaster.next_id.fetch_add(1, Ordering::Relaxed);
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let _ = ctx
        .broadcaster
        .lifecycle_tx
        .send(Lifecycle::Opened { id, tx });

    loop {
        tokio::select! {
            // Outbound: broadcast frames routed to this connection.
            frame = rx.recv() => {
                match frame {
                    Some(text) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            // Inbound: client messages.
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&text, &ctx, &mut sink).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(conn = id, err = %e, "ws read error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    let _ = ctx.broadcaster.lifecycle_tx.send(Lifecycle::Closed { id });
    Ok(())
}

/// `{"type":"refresh_metrics"}` primes a fresh connection with one snapshot
/// outside the periodic cadence. Anything unrecognized is ignored.
async fn handle_client_message<S>(text: &str, ctx: &AppContext, sink: &mut S)
where
    S: SinkExt<Message> + Unpin,
{
    let kind = serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(Value::as_str).map(str::to_string));
    if kind.as_deref() == Some("refresh_metrics") {
        let tasks = ctx.store.snapshot().await;
        let snapshot = metrics::queue_snapshot(&tasks, &ctx.config.metrics);
        let frame = EventBroadcaster::frame(
            "metrics_update",
            serde_json::to_value(&snapshot).unwrap_or_default(),
        );
        let _ = sink.send(Message::Text(frame)).await;
    }
}

/// Periodic metrics broadcast. Computes one snapshot per tick and fans the
/// identical payload to every connection. The caller owns the returned task
/// and aborts it on shutdown.
pub fn spawn_metrics_ticker(ctx: Arc<AppContext>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let period = std::time::Duration::from_secs(ctx.config.metrics.interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let tasks = ctx.store.snapshot().await;
            let snapshot = metrics::queue_snapshot(&tasks, &ctx.config.metrics);
            ctx.broadcaster
                .broadcast(
                    "metrics_update",
                    serde_json::to_value(&snapshot).unwrap_or_default(),
                )
                .await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_is_linear_and_closed_is_terminal() {
        let s = ConnState::Connecting;
        let s = s.advance();
        assert_eq!(s, ConnState::Open);
        let s = s.advance();
        assert_eq!(s, ConnState::Closed);
        assert_eq!(s.advance(), ConnState::Closed);
    }

    #[tokio::test]
    async fn broadcast_drops_dead_connections_idempotently() {
        let broadcaster = EventBroadcaster::spawn();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = broadcaster.next_id.fetch_add(1, Ordering::Relaxed);
        broadcaster
            .lifecycle_tx
            .send(Lifecycle::Opened { id, tx })
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(broadcaster.active_count().await, 1);

        // Receiver gone: the next broadcast schedules removal instead of failing.
        drop(rx);
        broadcaster.broadcast("task_created", json!({})).await;
        // A second close report for the same id is a no-op.
        broadcaster
            .lifecycle_tx
            .send(Lifecycle::Closed { id })
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(broadcaster.active_count().await, 0);
    }

    #[tokio::test]
    async fn broadcast_frames_carry_type_and_data() {
        let broadcaster = EventBroadcaster::spawn();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = broadcaster.next_id.fetch_add(1, Ordering::Relaxed);
        broadcaster
            .lifecycle_tx
            .send(Lifecycle::Opened { id, tx })
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        broadcaster.broadcast("task_deleted", json!({"id": "t1"})).await;
        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "task_deleted");
        assert_eq!(frame["data"]["id"], "t1");
    }
}
