//! Live-session registry.
//!
//! Authoritative in-memory map from user id to the single active session
//! handle.  A user has at most one live session: a new connection silently
//! replaces the prior handle (last-connection-wins).  Every change
//! broadcasts the full online-user-id list to all connected sessions.
//!
//! The map is the only piece of mutable shared state in the server; all
//! mutation goes through [`PresenceRegistry::register`] /
//! [`PresenceRegistry::unregister`], and reads never observe a
//! half-written entry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use missive_shared::protocol::{OnlinePresence, ServerEvent};
use missive_shared::types::UserId;

/// Handle to one live socket session: an identity for replace-detection
/// plus the channel the socket task drains toward the client.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl SessionHandle {
    pub fn new(tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue an event toward the client.
    ///
    /// Returns `false` when the session's socket task has already gone
    /// away; callers treat that as a no-op, never an error.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

#[derive(Clone, Default)]
pub struct PresenceRegistry {
    sessions: Arc<Mutex<HashMap<UserId, SessionHandle>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a session with a user, replacing any prior handle.
    pub async fn register(&self, user: UserId, handle: SessionHandle) {
        let mut sessions = self.sessions.lock().await;
        if sessions.insert(user, handle).is_some() {
            tracing::debug!(user = %user, "replaced existing session");
        }
        broadcast_online(&sessions);
    }

    /// Drop a user's session if one is registered.
    ///
    /// Disconnect races are expected and harmless; a missing mapping is a
    /// no-op and triggers no broadcast.
    pub async fn unregister(&self, user: UserId) {
        let mut sessions = self.sessions.lock().await;
        if sessions.remove(&user).is_none() {
            return;
        }
        broadcast_online(&sessions);
    }

    /// Current session handle for a user, if connected.
    pub async fn lookup(&self, user: UserId) -> Option<SessionHandle> {
        self.sessions.lock().await.get(&user).cloned()
    }

    /// Ids of all currently-connected users.
    pub async fn online_users(&self) -> Vec<UserId> {
        self.sessions.lock().await.keys().copied().collect()
    }

    /// Send an event to every connected session.
    pub async fn broadcast(&self, event: &ServerEvent) {
        let sessions = self.sessions.lock().await;
        for handle in sessions.values() {
            let _ = handle.send(event.clone());
        }
    }
}

fn broadcast_online(sessions: &HashMap<UserId, SessionHandle>) {
    let event = ServerEvent::OnlineUsersChanged(OnlinePresence {
        user_ids: sessions.keys().copied().collect(),
    });
    for handle in sessions.values() {
        let _ = handle.send(event.clone());
    }
}
