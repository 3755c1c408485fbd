use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod handlers;
pub mod message_types;

pub use message_types::{WsInboundEvent, WsOutboundEvent};

/// Unique identifier for one websocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle of a gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Authenticated,
    Disconnected,
}

impl ConnectionState {
    /// Forward-only transitions; any state may drop to `Disconnected`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticating)
                | (Authenticating, Authenticated)
                | (Connecting | Authenticating | Authenticated, Disconnected)
        )
    }

    pub fn transition(&mut self, next: ConnectionState) -> bool {
        if !self.can_transition_to(next) {
            tracing::warn!(from = ?self, to = ?next, "rejected connection state transition");
            return false;
        }
        tracing::debug!(from = ?self, to = ?next, "connection state");
        *self = next;
        true
    }
}

struct Connection {
    user_id: Uuid,
    sender: UnboundedSender<String>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Connection>,
    // conversation_id -> connections in that room
    rooms: HashMap<Uuid, HashSet<ConnectionId>>,
    // Connections dropped by a failed send whose owner has not unregistered yet.
    pruned: HashMap<ConnectionId, Uuid>,
}

impl Inner {
    fn drop_connection(&mut self, id: ConnectionId) -> Option<Connection> {
        let removed = self.connections.remove(&id);
        self.rooms.retain(|_, members| {
            members.remove(&id);
            !members.is_empty()
        });
        removed
    }

    fn prune(&mut self, id: ConnectionId) {
        if let Some(conn) = self.drop_connection(id) {
            self.pruned.insert(id, conn.user_id);
        }
    }
}

/// Process-local map of live connections and the rooms they joined.
///
/// Every connection owns one outbound channel; broadcasting is a channel send,
/// and a failed send means the socket is gone, so the connection is pruned.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an authenticated connection and hand back its outbound stream.
    pub async fn register(&self, user_id: Uuid) -> (ConnectionId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let id = ConnectionId::new();

        let mut guard = self.inner.write().await;
        guard.connections.insert(
            id,
            Connection {
                user_id,
                sender: tx,
            },
        );
        tracing::debug!(connection_id = %id, %user_id, total = guard.connections.len(), "connection registered");
        (id, rx)
    }

    /// Forget a connection and remove it from every room. Returns its user.
    ///
    /// A connection already pruned by a broadcast still yields its user here,
    /// exactly once, so the disconnect path can finish its cleanup.
    pub async fn unregister(&self, id: ConnectionId) -> Option<Uuid> {
        let mut guard = self.inner.write().await;
        let removed = guard
            .drop_connection(id)
            .map(|c| c.user_id)
            .or_else(|| guard.pruned.remove(&id));
        if removed.is_some() {
            tracing::debug!(connection_id = %id, remaining = guard.connections.len(), "connection unregistered");
        }
        removed
    }

    /// Returns false for unknown connections.
    pub async fn join(&self, id: ConnectionId, conversation_id: Uuid) -> bool {
        let mut guard = self.inner.write().await;
        if !guard.connections.contains_key(&id) {
            return false;
        }
        guard.rooms.entry(conversation_id).or_default().insert(id);
        true
    }

    pub async fn leave(&self, id: ConnectionId, conversation_id: Uuid) {
        let mut guard = self.inner.write().await;
        if let Some(members) = guard.rooms.get_mut(&conversation_id) {
            members.remove(&id);
            if members.is_empty() {
                guard.rooms.remove(&conversation_id);
            }
        }
    }

    /// Send to every connection in the room except `exclude`.
    /// Returns how many connections received the event.
    pub async fn broadcast_room(
        &self,
        conversation_id: Uuid,
        payload: &str,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let mut guard = self.inner.write().await;
        let Some(members) = guard.rooms.get(&conversation_id) else {
            return 0;
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for id in members.iter().filter(|id| Some(**id) != exclude) {
            match guard.connections.get(id) {
                Some(conn) if conn.sender.send(payload.to_owned()).is_ok() => delivered += 1,
                _ => dead.push(*id),
            }
        }

        if !dead.is_empty() {
            tracing::debug!(
                %conversation_id,
                cleaned = dead.len(),
                "pruned dead connections during broadcast"
            );
            for id in dead {
                guard.prune(id);
            }
        }
        delivered
    }

    /// Send to every live connection except `exclude`.
    pub async fn broadcast_all(&self, payload: &str, exclude: Option<ConnectionId>) -> usize {
        let mut guard = self.inner.write().await;
        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, conn) in guard.connections.iter() {
            if Some(*id) == exclude {
                continue;
            }
            if conn.sender.send(payload.to_owned()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*id);
            }
        }
        for id in dead {
            guard.prune(id);
        }
        delivered
    }

    pub async fn send_to(&self, id: ConnectionId, payload: &str) -> bool {
        let guard = self.inner.read().await;
        guard
            .connections
            .get(&id)
            .is_some_and(|c| c.sender.send(payload.to_owned()).is_ok())
    }

    pub async fn is_in_room(&self, id: ConnectionId, conversation_id: Uuid) -> bool {
        let guard = self.inner.read().await;
        guard
            .rooms
            .get(&conversation_id)
            .is_some_and(|members| members.contains(&id))
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    pub async fn room_size(&self, conversation_id: Uuid) -> usize {
        let guard = self.inner.read().await;
        guard.rooms.get(&conversation_id).map(|m| m.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_room_broadcast_respects_exclude() {
        let registry = ConnectionRegistry::new();
        let conv = Uuid::new_v4();
        let (a, mut rx_a) = registry.register(Uuid::new_v4()).await;
        let (b, mut rx_b) = registry.register(Uuid::new_v4()).await;
        let (_c, mut rx_c) = registry.register(Uuid::new_v4()).await;
        assert!(registry.join(a, conv).await);
        assert!(registry.join(b, conv).await);

        assert_eq!(registry.broadcast_room(conv, "hi", Some(a)).await, 1);
        assert_eq!(rx_b.try_recv().unwrap(), "hi");
        assert!(rx_a.try_recv().is_err());
        assert!(rx_c.try_recv().is_err());

        assert_eq!(registry.broadcast_room(conv, "all", None).await, 2);
        assert_eq!(rx_a.try_recv().unwrap(), "all");
    }

    #[tokio::test]
    async fn test_dead_connections_are_pruned() {
        let registry = ConnectionRegistry::new();
        let conv = Uuid::new_v4();
        let (a, rx_a) = registry.register(Uuid::new_v4()).await;
        let (b, _rx_b) = registry.register(Uuid::new_v4()).await;
        registry.join(a, conv).await;
        registry.join(b, conv).await;
        drop(rx_a);

        assert_eq!(registry.broadcast_room(conv, "x", None).await, 1);
        assert_eq!(registry.connection_count().await, 1);
        assert_eq!(registry.room_size(conv).await, 1);
    }

    #[tokio::test]
    async fn test_pruned_connection_still_unregisters_once() {
        let registry = ConnectionRegistry::new();
        let conv = Uuid::new_v4();
        let user = Uuid::new_v4();
        let (a, rx_a) = registry.register(user).await;
        registry.join(a, conv).await;
        drop(rx_a);

        assert_eq!(registry.broadcast_all("x", None).await, 0);
        assert_eq!(registry.connection_count().await, 0);
        assert_eq!(registry.broadcast_room(conv, "y", None).await, 0);

        assert_eq!(registry.unregister(a).await, Some(user));
        assert_eq!(registry.unregister(a).await, None);
    }

    #[tokio::test]
    async fn test_unregister_leaves_all_rooms() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (a, _rx) = registry.register(user).await;
        let rooms = [Uuid::new_v4(), Uuid::new_v4()];
        for room in rooms {
            registry.join(a, room).await;
        }

        assert_eq!(registry.unregister(a).await, Some(user));
        assert_eq!(registry.unregister(a).await, None);
        for room in rooms {
            assert_eq!(registry.room_size(room).await, 0);
        }
        assert!(!registry.join(a, rooms[0]).await);
    }

    #[test]
    fn test_connection_state_transitions() {
        let mut state = ConnectionState::Connecting;
        assert!(!state.transition(ConnectionState::Authenticated));
        assert!(state.transition(ConnectionState::Authenticating));
        assert!(state.transition(ConnectionState::Authenticated));
        assert!(!state.transition(ConnectionState::Authenticating));
        assert!(state.transition(ConnectionState::Disconnected));
        assert!(!state.transition(ConnectionState::Authenticated));
    }
}
