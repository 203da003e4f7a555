//! Live connection registry.
//!
//! Maps each user to the set of device connections currently streaming for
//! them. Sessions register on successful authentication and are removed when
//! their [`Registration`] guard drops, whatever path the session exits by.
//!
//! Each user also has an ordering lock. Registration plus the snapshot, and
//! every save plus its broadcast, run under it, so a device never sees a
//! broadcast ahead of its snapshot or a snapshot older than a later broadcast.

use crate::error::TransportError;
use keeper_core::UserId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

pub type ConnId = Uuid;

/// Work item for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// An encoded envelope to send as a text frame.
    Frame(String),
    /// Send a close frame and stop writing.
    Close,
}

/// Write side of one device connection.
#[derive(Debug)]
pub struct PeerHandle {
    id: ConnId,
    user_id: UserId,
    tx: mpsc::Sender<Outbound>,
}

impl PeerHandle {
    pub fn new(user_id: UserId, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            tx,
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Queue a frame for this connection, giving up after `timeout` if the
    /// peer is not draining.
    pub async fn send(&self, frame: String, timeout: Duration) -> Result<(), TransportError> {
        self.tx
            .send_timeout(Outbound::Frame(frame), timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => TransportError::TimedOut,
                SendTimeoutError::Closed(_) => TransportError::Closed,
            })
    }

    /// Ask the writer to close the socket. Best effort.
    pub fn close(&self) {
        let _ = self.tx.try_send(Outbound::Close);
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    conns: RwLock<HashMap<UserId, Vec<Arc<PeerHandle>>>>,
    order: RwLock<HashMap<UserId, Arc<AsyncMutex<()>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to its user's set.
    pub fn put(&self, peer: Arc<PeerHandle>) {
        let mut conns = self.conns.write().unwrap_or_else(PoisonError::into_inner);
        conns.entry(peer.user_id()).or_default().push(peer);
    }

    /// Snapshot of the user's live connections. Safe to iterate while other
    /// sessions register or leave.
    pub fn connections_for(&self, user_id: UserId) -> Vec<Arc<PeerHandle>> {
        let conns = self.conns.read().unwrap_or_else(PoisonError::into_inner);
        conns.get(&user_id).cloned().unwrap_or_default()
    }

    /// Drop one connection. Returns whether it was present.
    pub fn remove(&self, user_id: UserId, id: ConnId) -> bool {
        let mut conns = self.conns.write().unwrap_or_else(PoisonError::into_inner);
        let Some(peers) = conns.get_mut(&user_id) else {
            return false;
        };
        let before = peers.len();
        peers.retain(|p| p.id() != id);
        let removed = peers.len() != before;
        if peers.is_empty() {
            conns.remove(&user_id);
        }
        removed
    }

    pub fn count(&self, user_id: UserId) -> usize {
        let conns = self.conns.read().unwrap_or_else(PoisonError::into_inner);
        conns.get(&user_id).map_or(0, Vec::len)
    }

    /// Total connections across all users.
    pub fn total(&self) -> usize {
        let conns = self.conns.read().unwrap_or_else(PoisonError::into_inner);
        conns.values().map(Vec::len).sum()
    }

    /// The user's ordering lock. Entries live as long as the registry.
    pub fn user_lock(&self, user_id: UserId) -> Arc<AsyncMutex<()>> {
        {
            let order = self.order.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(lock) = order.get(&user_id) {
                return Arc::clone(lock);
            }
        }
        let mut order = self.order.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(order.entry(user_id).or_default())
    }

    /// Register `peer` and return a guard that unregisters it on drop.
    pub fn register(self: &Arc<Self>, peer: Arc<PeerHandle>) -> Registration {
        self.put(Arc::clone(&peer));
        Registration {
            registry: Arc::clone(self),
            peer,
        }
    }
}

/// Keeps a connection registered for as long as it is alive.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    peer: Arc<PeerHandle>,
}

impl Registration {
    pub fn peer(&self) -> &Arc<PeerHandle> {
        &self.peer
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry
            .remove(self.peer.user_id(), self.peer.id());
        tracing::debug!(
            "Connection {} for user {} unregistered",
            self.peer.id(),
            self.peer.user_id()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(user_id: UserId) -> (Arc<PeerHandle>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(4);
        (Arc::new(PeerHandle::new(user_id, tx)), rx)
    }

    #[test]
    fn put_and_lookup_by_user() {
        let registry = ConnectionRegistry::new();
        let (a1, _r1) = peer(1);
        let (a2, _r2) = peer(1);
        let (b1, _r3) = peer(2);
        registry.put(a1.clone());
        registry.put(a2.clone());
        registry.put(b1);

        let ids: Vec<_> = registry.connections_for(1).iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec![a1.id(), a2.id()]);
        assert_eq!(registry.count(2), 1);
        assert!(registry.connections_for(3).is_empty());
        assert_eq!(registry.total(), 3);
    }

    #[test]
    fn remove_is_precise() {
        let registry = ConnectionRegistry::new();
        let (a1, _r1) = peer(1);
        let (a2, _r2) = peer(1);
        registry.put(a1.clone());
        registry.put(a2.clone());

        assert!(registry.remove(1, a1.id()));
        assert!(!registry.remove(1, a1.id()));
        assert_eq!(registry.count(1), 1);
        assert_eq!(registry.connections_for(1)[0].id(), a2.id());

        assert!(registry.remove(1, a2.id()));
        assert_eq!(registry.total(), 0);
    }

    #[test]
    fn registration_guard_unregisters() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (a1, _r1) = peer(7);
        {
            let reg = registry.register(a1.clone());
            assert_eq!(reg.peer().id(), a1.id());
            assert_eq!(registry.count(7), 1);
        }
        assert_eq!(registry.count(7), 0);
    }

    #[test]
    fn concurrent_put_and_iterate() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut handles = Vec::new();
        for t in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                let mut keep = Vec::new();
                for _ in 0..50 {
                    let (tx, rx) = mpsc::channel(1);
                    let p = Arc::new(PeerHandle::new(t % 2, tx));
                    registry.put(p.clone());
                    keep.push(rx);
                    let _ = registry.connections_for(t % 2).len();
                    if keep.len() % 5 == 0 {
                        registry.remove(p.user_id(), p.id());
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.total(), 8 * 40);
        assert_eq!(registry.count(0), 4 * 40);
    }

    #[tokio::test]
    async fn user_lock_is_shared_per_user() {
        let registry = ConnectionRegistry::new();
        let first = registry.user_lock(1);
        assert!(Arc::ptr_eq(&first, &registry.user_lock(1)));
        assert!(!Arc::ptr_eq(&first, &registry.user_lock(2)));

        let held = first.lock().await;
        assert!(registry.user_lock(1).try_lock().is_err());
        assert!(registry.user_lock(2).try_lock().is_ok());
        drop(held);
        assert!(registry.user_lock(1).try_lock().is_ok());
    }

    #[tokio::test]
    async fn send_reports_timeout_and_closed() {
        let (tx, rx) = mpsc::channel(1);
        let p = PeerHandle::new(1, tx);
        let timeout = Duration::from_millis(20);

        p.send("a".into(), timeout).await.unwrap();
        assert_eq!(
            p.send("b".into(), timeout).await,
            Err(TransportError::TimedOut)
        );

        drop(rx);
        assert_eq!(
            p.send("c".into(), timeout).await,
            Err(TransportError::Closed)
        );
    }
}
