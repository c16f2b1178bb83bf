//! Event fan-out to open WebSocket connections
//!
//! Delivery is fire-and-forget: each connection owns a bounded queue and a
//! full queue drops the event for that connection only. A client that missed
//! events resynchronizes from the snapshot it receives when it registers again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::events::ServerEvent;
use crate::presence::SessionLease;
use crate::types::ConnId;

/// One open WebSocket connection
pub struct ClientConnection {
    pub id: ConnId,
    tx: mpsc::Sender<Arc<str>>,
    lease: Mutex<Option<SessionLease>>,
    drops: AtomicU64,
}

impl ClientConnection {
    /// Create a connection with a fresh identity around an outbound queue
    pub fn new(tx: mpsc::Sender<Arc<str>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
            lease: Mutex::new(None),
            drops: AtomicU64::new(0),
        }
    }

    /// User this connection is registered as, if any
    pub fn user_id(&self) -> Option<String> {
        self.lease.lock().as_ref().map(|l| l.user_id.clone())
    }

    pub fn lease(&self) -> Option<SessionLease> {
        self.lease.lock().clone()
    }

    fn bind(&self, lease: SessionLease) {
        *self.lease.lock() = Some(lease);
    }

    /// Queue a serialized frame. Returns false if it was dropped.
    pub fn send(&self, frame: Arc<str>) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            self.drops.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Frames dropped because the queue was full or closed
    pub fn drop_count(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }
}

/// Set of open connections and selective broadcast over them
pub struct BroadcastRouter {
    connections: RwLock<HashMap<ConnId, Arc<ClientConnection>>>,
}

impl BroadcastRouter {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Add an open connection
    pub fn add(&self, connection: Arc<ClientConnection>) {
        self.connections.write().insert(connection.id, connection);
    }

    /// Remove a connection. Returns it only the first time.
    pub fn remove(&self, conn_id: ConnId) -> Option<Arc<ClientConnection>> {
        self.connections.write().remove(&conn_id)
    }

    pub fn is_open(&self, conn_id: ConnId) -> bool {
        self.connections.read().contains_key(&conn_id)
    }

    pub fn get(&self, conn_id: ConnId) -> Option<Arc<ClientConnection>> {
        self.connections.read().get(&conn_id).cloned()
    }

    /// Associate an open connection with a user. Returns false if it is closed.
    pub fn bind(&self, conn_id: ConnId, lease: SessionLease) -> bool {
        match self.connections.read().get(&conn_id) {
            Some(conn) => {
                conn.bind(lease);
                true
            }
            None => false,
        }
    }

    pub fn lease_of(&self, conn_id: ConnId) -> Option<SessionLease> {
        self.connections.read().get(&conn_id).and_then(|c| c.lease())
    }

    /// Send an event to a single connection
    pub fn send_to(&self, conn_id: ConnId, event: &ServerEvent) -> bool {
        let Some(frame) = serialize(event) else {
            return false;
        };
        match self.connections.read().get(&conn_id) {
            Some(conn) => {
                let sent = conn.send(frame);
                if !sent {
                    warn!(conn_id = %conn_id, event = event.name(), "dropped event for client (queue full)");
                }
                sent
            }
            None => false,
        }
    }

    /// Deliver `event` to every open connection not bound to `excluded`.
    ///
    /// With no excluded user every open connection receives the event.
    /// Connections that never registered are always included. Returns the
    /// number of connections the event was queued for.
    pub fn broadcast_except(&self, excluded: Option<&str>, event: &ServerEvent) -> usize {
        let Some(frame) = serialize(event) else {
            return 0;
        };

        let conns = self.connections.read();
        let mut delivered = 0;
        for conn in conns.values() {
            if let Some(excluded) = excluded {
                if conn.user_id().as_deref() == Some(excluded) {
                    continue;
                }
            }
            if conn.send(Arc::clone(&frame)) {
                delivered += 1;
            } else {
                warn!(
                    conn_id = %conn.id,
                    event = event.name(),
                    total_drops = conn.drop_count(),
                    "dropped event for client (queue full)"
                );
            }
        }
        debug!(event = event.name(), excluded, delivered, "broadcast event");
        delivered
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }
}

impl Default for BroadcastRouter {
    fn default() -> Self {
        Self::new()
    }
}

fn serialize(event: &ServerEvent) -> Option<Arc<str>> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            warn!(event = event.name(), error = %e, "failed to serialize event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(user: Option<&str>) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(8);
        let conn = ClientConnection::new(tx);
        if let Some(user) = user {
            conn.bind(SessionLease {
                user_id: user.to_string(),
                conn_id: conn.id,
                generation: 1,
            });
        }
        (Arc::new(conn), rx)
    }

    #[tokio::test]
    async fn test_broadcast_except_skips_excluded_user() {
        let router = BroadcastRouter::new();
        let (a, mut rx_a) = connection(Some("A1"));
        let (b, mut rx_b) = connection(Some("B1"));
        let (anon, mut rx_anon) = connection(None);
        router.add(a);
        router.add(b);
        router.add(anon);

        let delivered = router.broadcast_except(Some("B1"), &ServerEvent::Pong);

        assert_eq!(delivered, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_anon.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_without_exclusion_reaches_everyone() {
        let router = BroadcastRouter::new();
        let (a, mut rx_a) = connection(Some("A1"));
        let (b, mut rx_b) = connection(None);
        router.add(a);
        router.add(b);

        assert_eq!(router.broadcast_except(None, &ServerEvent::Pong), 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let router = BroadcastRouter::new();
        let (tx, _rx) = mpsc::channel(1);
        let conn = Arc::new(ClientConnection::new(tx));
        let id = conn.id;
        router.add(Arc::clone(&conn));

        assert!(router.send_to(id, &ServerEvent::Pong));
        assert!(!router.send_to(id, &ServerEvent::Pong));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn test_remove_returns_connection_once() {
        let router = BroadcastRouter::new();
        let (conn, _rx) = connection(None);
        let id = conn.id;
        router.add(conn);

        assert!(router.remove(id).is_some());
        assert!(router.remove(id).is_none());
        assert!(!router.is_open(id));
        assert_eq!(router.connection_count(), 0);
    }

    #[test]
    fn test_bind_closed_connection_fails() {
        let router = BroadcastRouter::new();
        let lease = SessionLease {
            user_id: "A1".to_string(),
            conn_id: Uuid::new_v4(),
            generation: 1,
        };
        assert!(!router.bind(lease.conn_id, lease));
    }
}
