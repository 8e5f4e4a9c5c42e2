use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::frame::ServerFrame;
use crate::metrics;

/// What the per-socket task receives over its outbound channel
#[derive(Debug)]
pub enum Outbound {
    Frame(ServerFrame),
    /// Instructs the socket task to close (superseded session or heartbeat eviction)
    Close,
}

pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

#[derive(Clone)]
pub struct ConnectionEntry {
    /// Distinguishes this socket from a replacement for the same user
    pub connection_id: Uuid,
    pub username: String,
    pub tx: OutboundSender,
    pub last_seen: DateTime<Utc>,
}

/// Registry of authenticated sockets, one entry per user, last-auth-wins.
///
/// The map is the primary shared mutable resource; every access goes through
/// the RwLock. Broadcast iteration isolates per-connection send failures.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<Uuid, ConnectionEntry>>,
}

pub type Registry = Arc<ConnectionRegistry>;

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the mapping for the user, replacing any previous entry.
    /// The superseded socket is told to close so stale duplicates never
    /// linger in the map.
    pub async fn register(&self, user_id: Uuid, entry: ConnectionEntry) {
        let previous = self.connections.write().await.insert(user_id, entry);
        if let Some(old) = previous {
            tracing::info!(user_id = %user_id, "Superseding previous connection");
            let _ = old.tx.send(Outbound::Frame(ServerFrame::Error {
                message: "Session replaced by a newer connection".to_string(),
            }));
            let _ = old.tx.send(Outbound::Close);
        }
    }

    /// Removes the mapping, but only if it still belongs to this socket.
    /// A superseded socket closing later must not evict its replacement.
    pub async fn unregister(&self, user_id: Uuid, connection_id: Uuid) {
        let mut connections = self.connections.write().await;
        if connections
            .get(&user_id)
            .map_or(false, |e| e.connection_id == connection_id)
        {
            connections.remove(&user_id);
        }
    }

    pub async fn lookup(&self, user_id: Uuid) -> Option<ConnectionEntry> {
        self.connections.read().await.get(&user_id).cloned()
    }

    pub async fn touch(&self, user_id: Uuid, connection_id: Uuid) {
        let mut connections = self.connections.write().await;
        if let Some(entry) = connections.get_mut(&user_id) {
            if entry.connection_id == connection_id {
                entry.last_seen = Utc::now();
            }
        }
    }

    pub async fn online_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Snapshot of currently connected user ids, for building broadcast
    /// recipient sets with async access checks before iteration
    pub async fn online_user_ids(&self) -> Vec<Uuid> {
        self.connections.read().await.keys().copied().collect()
    }

    /// Sends a frame to the single connection for the user, if open.
    /// Returns false when the user has no live connection or the send failed.
    pub async fn send_to(&self, user_id: Uuid, frame: ServerFrame) -> bool {
        let entry = match self.lookup(user_id).await {
            Some(entry) => entry,
            None => return false,
        };
        if let Err(e) = entry.tx.send(Outbound::Frame(frame)) {
            metrics::DELIVERY_FAILURES_TOTAL.inc();
            tracing::warn!(user_id = %user_id, error = %e, "Failed to deliver frame");
            return false;
        }
        true
    }

    /// Iterates all open connections whose user id matches the predicate and
    /// delivers the frame. A single failed send is logged and skipped; it
    /// never aborts delivery to the remaining recipients.
    pub async fn broadcast_where<F>(&self, predicate: F, frame: &ServerFrame) -> usize
    where
        F: Fn(Uuid) -> bool,
    {
        let connections = self.connections.read().await;
        let mut delivered = 0;
        for (user_id, entry) in connections.iter() {
            if !predicate(*user_id) {
                continue;
            }
            match entry.tx.send(Outbound::Frame(frame.clone())) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    metrics::DELIVERY_FAILURES_TOTAL.inc();
                    tracing::warn!(user_id = %user_id, error = %e, "Skipping dead connection in broadcast");
                }
            }
        }
        delivered
    }

    /// Delivers a frame to every open connection
    pub async fn broadcast_all(&self, frame: &ServerFrame) -> usize {
        self.broadcast_where(|_| true, frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tx: OutboundSender) -> ConnectionEntry {
        ConnectionEntry {
            connection_id: Uuid::new_v4(),
            username: "tester".to_string(),
            tx,
            last_seen: Utc::now(),
        }
    }

    #[tokio::test]
    async fn register_replaces_and_signals_close() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        registry.register(user, entry(tx1)).await;
        registry.register(user, entry(tx2)).await;

        assert_eq!(registry.online_count().await, 1);
        // superseded socket gets an error frame then the close signal
        assert!(matches!(rx1.recv().await, Some(Outbound::Frame(_))));
        assert!(matches!(rx1.recv().await, Some(Outbound::Close)));
    }

    #[tokio::test]
    async fn stale_unregister_keeps_replacement() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        let old = entry(tx1);
        let old_id = old.connection_id;
        registry.register(user, old).await;
        registry.register(user, entry(tx2)).await;

        // the old socket's deferred cleanup runs after the replacement registered
        registry.unregister(user, old_id).await;
        assert!(registry.lookup(user).await.is_some());
    }

    #[tokio::test]
    async fn broadcast_skips_failed_sends() {
        let registry = ConnectionRegistry::new();
        let alive = Uuid::new_v4();
        let dead = Uuid::new_v4();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        drop(rx2);

        registry.register(alive, entry(tx1)).await;
        registry.register(dead, entry(tx2)).await;

        let delivered = registry.broadcast_all(&ServerFrame::Ping).await;
        assert_eq!(delivered, 1);
        assert!(matches!(rx1.recv().await, Some(Outbound::Frame(ServerFrame::Ping))));
    }
}
