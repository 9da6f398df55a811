// =============================================================================
// Realtime fan-out hub (C12)
// =============================================================================
//
// A multi-topic, multi-connection fan-out hub. Transport (the actual axum
// WebSocket split/send loop) stays at the API layer; this module owns only
// the subscription indexes and the backpressure policy, so it is testable
// without a socket.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Bounded per-connection outbound queue depth. Exceeding this closes the
/// connection rather than buffering unboundedly.
const SEND_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Portfolio,
    Orders,
    MarketData,
    Notifications,
}

impl Topic {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "portfolio" => Some(Topic::Portfolio),
            "orders" => Some(Topic::Orders),
            "market_data" => Some(Topic::MarketData),
            "notifications" => Some(Topic::Notifications),
            _ => None,
        }
    }

    /// `market_data` is the only unauthenticated, broadcast-to-all topic.
    pub fn requires_auth(&self) -> bool {
        !matches!(self, Topic::MarketData)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub data: serde_json::Value,
    pub timestamp: i64,
}

impl Envelope {
    pub fn new(msg_type: impl Into<String>, data: serde_json::Value, timestamp: i64) -> Self {
        Self {
            msg_type: msg_type.into(),
            data,
            timestamp,
        }
    }
}

pub type ConnectionId = Uuid;

struct Connection {
    user_id: Option<String>,
    tx: mpsc::Sender<Envelope>,
}

/// Per-connection drop counters, surfaced for observability.
#[derive(Default)]
struct DropCounters {
    counts: RwLock<HashMap<ConnectionId, u64>>,
}

impl DropCounters {
    fn increment(&self, id: ConnectionId) -> u64 {
        let mut counts = self.counts.write();
        let entry = counts.entry(id).or_insert(0);
        *entry += 1;
        *entry
    }

    fn forget(&self, id: ConnectionId) {
        self.counts.write().remove(&id);
    }
}

pub struct RealtimeHub {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    connections_by_user: RwLock<HashMap<String, HashSet<ConnectionId>>>,
    subscriptions: RwLock<HashMap<ConnectionId, HashSet<Topic>>>,
    drops: DropCounters,
    total_broadcasts: AtomicU64,
}

impl RealtimeHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: RwLock::new(HashMap::new()),
            connections_by_user: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            drops: DropCounters::default(),
            total_broadcasts: AtomicU64::new(0),
        })
    }

    /// Register a new connection, returning its id and the receiving half of
    /// its outbound queue. The caller (API layer) owns forwarding messages
    /// from the returned receiver onto the actual socket.
    pub fn register(&self, user_id: Option<String>) -> (ConnectionId, mpsc::Receiver<Envelope>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(SEND_QUEUE_DEPTH);
        self.connections.write().insert(id, Connection { user_id: user_id.clone(), tx });
        self.subscriptions.write().insert(id, HashSet::new());
        if let Some(uid) = user_id {
            self.connections_by_user.write().entry(uid).or_default().insert(id);
        }
        debug!(%id, "realtime connection registered");
        (id, rx)
    }

    pub fn subscribe(&self, conn_id: ConnectionId, topic: Topic) {
        if let Some(set) = self.subscriptions.write().get_mut(&conn_id) {
            set.insert(topic);
        }
    }

    pub fn unsubscribe(&self, conn_id: ConnectionId, topic: Topic) {
        if let Some(set) = self.subscriptions.write().get_mut(&conn_id) {
            set.remove(&topic);
        }
    }

    /// Remove a connection from every index. Idempotent.
    pub fn disconnect(&self, conn_id: ConnectionId) {
        let user_id = self.connections.write().remove(&conn_id).and_then(|c| c.user_id);
        self.subscriptions.write().remove(&conn_id);
        self.drops.forget(conn_id);
        if let Some(uid) = user_id {
            let mut by_user = self.connections_by_user.write();
            if let Some(set) = by_user.get_mut(&uid) {
                set.remove(&conn_id);
                if set.is_empty() {
                    by_user.remove(&uid);
                }
            }
        }
        debug!(%conn_id, "realtime connection removed");
    }

    /// Deliver `envelope` to every connection of `user_id`. Failed sends
    /// (queue full or peer closed) drop the connection from every index.
    pub fn send_to_user(&self, user_id: &str, envelope: Envelope) {
        let targets: Vec<ConnectionId> = self
            .connections_by_user
            .read()
            .get(user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for conn_id in targets {
            self.deliver(conn_id, envelope.clone());
        }
    }

    /// Deliver `envelope` to every connection currently subscribed to
    /// `topic`.
    pub fn broadcast_to_subscribers(&self, topic: Topic, envelope: Envelope) {
        self.total_broadcasts.fetch_add(1, Ordering::Relaxed);
        let targets: Vec<ConnectionId> = self
            .subscriptions
            .read()
            .iter()
            .filter(|(_, topics)| topics.contains(&topic))
            .map(|(id, _)| *id)
            .collect();
        for conn_id in targets {
            self.deliver(conn_id, envelope.clone());
        }
    }

    fn deliver(&self, conn_id: ConnectionId, envelope: Envelope) {
        let tx = {
            let conns = self.connections.read();
            conns.get(&conn_id).map(|c| c.tx.clone())
        };
        let Some(tx) = tx else { return };
        match tx.try_send(envelope) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let drops = self.drops.increment(conn_id);
                warn!(%conn_id, drops, "realtime send queue full, closing connection");
                self.disconnect(conn_id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(%conn_id, "realtime peer closed, removing connection");
                self.disconnect(conn_id);
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscriptions.read().values().filter(|t| t.contains(&topic)).count()
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            connections_by_user: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            drops: DropCounters::default(),
            total_broadcasts: AtomicU64::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> Envelope {
        Envelope::new("test", serde_json::json!({"k": "v"}), 0)
    }

    #[tokio::test]
    async fn subscribe_then_broadcast_reaches_subscriber() {
        let hub = RealtimeHub::new();
        let (id, mut rx) = hub.register(None);
        hub.subscribe(id, Topic::MarketData);
        hub.broadcast_to_subscribers(Topic::MarketData, envelope());
        let received = rx.recv().await.unwrap();
        assert_eq!(received.msg_type, "test");
    }

    #[tokio::test]
    async fn unsubscribed_connection_does_not_receive() {
        let hub = RealtimeHub::new();
        let (id, mut rx) = hub.register(None);
        hub.subscribe(id, Topic::Orders);
        hub.broadcast_to_subscribers(Topic::MarketData, envelope());
        // No message should arrive on the Orders-subscribed channel.
        let res = tokio::time::timeout(std::time::Duration::from_millis(20), rx.recv()).await;
        assert!(res.is_err(), "expected timeout, got a message");
    }

    #[tokio::test]
    async fn send_to_user_reaches_all_of_that_users_connections() {
        let hub = RealtimeHub::new();
        let (_id1, mut rx1) = hub.register(Some("u1".into()));
        let (_id2, mut rx2) = hub.register(Some("u1".into()));
        let (_id3, mut rx3) = hub.register(Some("u2".into()));
        hub.send_to_user("u1", envelope());
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_removes_from_all_indexes() {
        let hub = RealtimeHub::new();
        let (id, _rx) = hub.register(Some("u1".into()));
        hub.subscribe(id, Topic::Portfolio);
        assert_eq!(hub.connection_count(), 1);
        hub.disconnect(id);
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.subscriber_count(Topic::Portfolio), 0);
        hub.send_to_user("u1", envelope()); // must not panic on empty index
    }

    #[tokio::test]
    async fn dead_peer_is_removed_on_send_failure() {
        let hub = RealtimeHub::new();
        let (id, rx) = hub.register(None);
        hub.subscribe(id, Topic::MarketData);
        drop(rx); // simulate a closed peer
        hub.broadcast_to_subscribers(Topic::MarketData, envelope());
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn market_data_topic_does_not_require_auth() {
        assert!(!Topic::MarketData.requires_auth());
        assert!(Topic::Portfolio.requires_auth());
        assert!(Topic::Orders.requires_auth());
        assert!(Topic::Notifications.requires_auth());
    }

    #[test]
    fn topic_parse_roundtrips_known_names() {
        assert_eq!(Topic::parse("portfolio"), Some(Topic::Portfolio));
        assert_eq!(Topic::parse("orders"), Some(Topic::Orders));
        assert_eq!(Topic::parse("market_data"), Some(Topic::MarketData));
        assert_eq!(Topic::parse("notifications"), Some(Topic::Notifications));
        assert_eq!(Topic::parse("bogus"), None);
    }
}
