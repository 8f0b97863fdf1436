use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{
    mpsc::{channel, error::TrySendError, Receiver, Sender},
    RwLock,
};
use uuid::Uuid;

pub mod events;
pub mod handlers;
pub mod message_types;

pub type ConnectionId = Uuid;

struct ConnectionHandle {
    user_id: Uuid,
    tx: Sender<String>,
    subscriptions: HashSet<Uuid>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionHandle>,
    // conversation_id -> subscribed connections
    topics: HashMap<Uuid, HashSet<ConnectionId>>,
    // user_id -> that user's live connections (per-user private queue)
    users: HashMap<Uuid, HashSet<ConnectionId>>,
}

/// Connection registry for the fan-out channel.
///
/// Every connection gets a bounded outbound queue. Publishing never waits on
/// a slow subscriber: a full queue disconnects that subscriber and delivery
/// to the rest continues. The client reconciles after reconnect by re-reading
/// history and unread counts.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    queue_capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub async fn register(&self, user_id: Uuid) -> (ConnectionId, Receiver<String>) {
        let (tx, rx) = channel(self.queue_capacity);
        let connection_id = Uuid::new_v4();
        let mut guard = self.inner.write().await;
        guard.connections.insert(
            connection_id,
            ConnectionHandle {
                user_id,
                tx,
                subscriptions: HashSet::new(),
            },
        );
        guard.users.entry(user_id).or_default().insert(connection_id);
        (connection_id, rx)
    }

    pub async fn subscribe(&self, connection_id: ConnectionId, conversation_id: Uuid) {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        if let Some(handle) = inner.connections.get_mut(&connection_id) {
            handle.subscriptions.insert(conversation_id);
            inner
                .topics
                .entry(conversation_id)
                .or_default()
                .insert(connection_id);
        }
    }

    pub async fn unsubscribe(&self, connection_id: ConnectionId, conversation_id: Uuid) {
        let mut guard = self.inner.write().await;
        if let Some(handle) = guard.connections.get_mut(&connection_id) {
            handle.subscriptions.remove(&conversation_id);
        }
        detach_from_topic(&mut guard, conversation_id, connection_id);
    }

    /// Drop a connection and all of its subscriptions. In-flight payloads
    /// already queued for it are discarded with the queue.
    pub async fn drop_connection(&self, connection_id: ConnectionId) {
        let mut guard = self.inner.write().await;
        remove_connection(&mut guard, connection_id);
    }

    /// Remove a user's live subscriptions to one conversation, e.g. after
    /// the membership row is deleted. The connections stay open.
    pub async fn evict(&self, conversation_id: Uuid, user_id: Uuid) {
        let mut guard = self.inner.write().await;
        let members: Vec<ConnectionId> = guard
            .users
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for connection_id in members {
            if let Some(handle) = guard.connections.get_mut(&connection_id) {
                handle.subscriptions.remove(&conversation_id);
            }
            detach_from_topic(&mut guard, conversation_id, connection_id);
        }
    }

    /// Deliver a payload to every subscriber of a conversation topic.
    /// Returns the number of queues the payload was placed on.
    pub async fn broadcast(&self, conversation_id: Uuid, payload: &str) -> usize {
        let mut guard = self.inner.write().await;
        let subscribers: Vec<ConnectionId> = guard
            .topics
            .get(&conversation_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        let mut delivered = 0;
        for connection_id in subscribers {
            let Some(handle) = guard.connections.get(&connection_id) else {
                continue;
            };
            match handle.tx.try_send(payload.to_string()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        %connection_id,
                        %conversation_id,
                        "outbound queue full; disconnecting slow subscriber"
                    );
                    remove_connection(&mut guard, connection_id);
                }
                Err(TrySendError::Closed(_)) => {
                    remove_connection(&mut guard, connection_id);
                }
            }
        }
        delivered
    }

    /// Deliver a payload to every connection of one user.
    pub async fn send_to_user(&self, user_id: Uuid, payload: &str) {
        let mut guard = self.inner.write().await;
        let connections: Vec<ConnectionId> = guard
            .users
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for connection_id in connections {
            let Some(handle) = guard.connections.get(&connection_id) else {
                continue;
            };
            if handle.tx.try_send(payload.to_string()).is_err() {
                remove_connection(&mut guard, connection_id);
            }
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}

fn detach_from_topic(inner: &mut RegistryInner, conversation_id: Uuid, connection_id: ConnectionId) {
    if let Some(subscribers) = inner.topics.get_mut(&conversation_id) {
        subscribers.remove(&connection_id);
        if subscribers.is_empty() {
            inner.topics.remove(&conversation_id);
        }
    }
}

fn remove_connection(inner: &mut RegistryInner, connection_id: ConnectionId) {
    let Some(handle) = inner.connections.remove(&connection_id) else {
        return;
    };
    for conversation_id in handle.subscriptions {
        detach_from_topic(inner, conversation_id, connection_id);
    }
    if let Some(set) = inner.users.get_mut(&handle.user_id) {
        set.remove(&connection_id);
        if set.is_empty() {
            inner.users.remove(&handle.user_id);
        }
    }
}
