use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use etincelle_shared::{ServerEvent, UserId};

/// Identifies one socket connection inside a user's room.
pub type ConnectionId = Uuid;

#[derive(Default)]
struct Room {
    senders: HashMap<ConnectionId, mpsc::Sender<ServerEvent>>,
}

/// Tracks which users are online and fans events out to every device in a
/// user's room. Publishers never block: a full queue drops the event for
/// that connection only.
#[derive(Clone)]
pub struct Registry {
    rooms: Arc<RwLock<HashMap<UserId, Room>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a connection to the user's room (creates the room if missing).
    pub async fn join(&self, user: &UserId, conn: ConnectionId, tx: mpsc::Sender<ServerEvent>) {
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(user.clone()).or_default();
        room.senders.insert(conn, tx);

        info!(
            user = %user,
            conn = %conn,
            connections = room.senders.len(),
            "Connection joined user room"
        );
    }

    /// Remove a connection. Auto-deletes the room if it becomes empty.
    pub async fn leave(&self, user: &UserId, conn: ConnectionId) {
        let mut rooms = self.rooms.write().await;
        let should_remove = if let Some(room) = rooms.get_mut(user) {
            room.senders.remove(&conn);
            info!(
                user = %user,
                conn = %conn,
                connections = room.senders.len(),
                "Connection left user room"
            );
            room.senders.is_empty()
        } else {
            false
        };

        if should_remove {
            rooms.remove(user);
            debug!(user = %user, "Removed empty user room");
        }
    }

    /// Handle a client's room registration claim. The claimed id must match
    /// the authenticated session; anything else is dropped.
    pub async fn register_for_notifications(
        &self,
        session_user: &UserId,
        claimed: &UserId,
        conn: ConnectionId,
        tx: mpsc::Sender<ServerEvent>,
    ) {
        if claimed != session_user {
            warn!(
                user = %session_user,
                claimed = %claimed,
                "Ignoring room registration for a foreign user id"
            );
            return;
        }
        self.join(session_user, conn, tx).await;
    }

    /// Deliver an event to every connection in a user's room. Returns how
    /// many connections accepted it. Unknown users are a no-op.
    pub async fn broadcast_to_user(&self, user: &UserId, event: &ServerEvent) -> usize {
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(user) else {
            return 0;
        };

        let mut delivered = 0;
        for (conn, tx) in &room.senders {
            if tx.try_send(event.clone()).is_err() {
                debug!(user = %user, conn = %conn, "Dropping event for slow connection");
            } else {
                delivered += 1;
            }
        }
        delivered
    }

    /// Deliver an event to one specific connection only.
    pub async fn send_to_connection(
        &self,
        user: &UserId,
        conn: ConnectionId,
        event: &ServerEvent,
    ) -> bool {
        let rooms = self.rooms.read().await;
        let Some(tx) = rooms.get(user).and_then(|room| room.senders.get(&conn)) else {
            return false;
        };

        if tx.try_send(event.clone()).is_err() {
            debug!(user = %user, conn = %conn, "Dropping event for slow connection");
            return false;
        }
        true
    }

    pub async fn is_online(&self, user: &UserId) -> bool {
        self.rooms.read().await.contains_key(user)
    }

    pub async fn connection_count(&self, user: &UserId) -> usize {
        self.rooms
            .read()
            .await
            .get(user)
            .map(|room| room.senders.len())
            .unwrap_or(0)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
