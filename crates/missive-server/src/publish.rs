//! Event publication toward live sessions.
//!
//! Keeps the delivery logic transport-agnostic: the coordinator publishes
//! to session handles or user ids and never touches the socket layer.

use missive_shared::protocol::ServerEvent;
use missive_shared::types::UserId;

use crate::presence::{PresenceRegistry, SessionHandle};

#[derive(Clone)]
pub struct Publisher {
    presence: PresenceRegistry,
}

impl Publisher {
    pub fn new(presence: PresenceRegistry) -> Self {
        Self { presence }
    }

    /// Push an event to a specific session.
    ///
    /// A handle whose socket task already exited is a no-op; the persisted
    /// state that motivated the event is not rolled back.
    pub fn publish_to(&self, handle: &SessionHandle, event: ServerEvent) {
        if !handle.send(event) {
            tracing::debug!(session = %handle.id(), "dropped event for closed session");
        }
    }

    /// Push an event to a user's live session, if any.
    ///
    /// Returns whether a session was found.
    pub async fn publish_to_user(&self, user: UserId, event: ServerEvent) -> bool {
        match self.presence.lookup(user).await {
            Some(handle) => {
                self.publish_to(&handle, event);
                true
            }
            None => false,
        }
    }

    /// Push an event to every connected session.
    pub async fn broadcast(&self, event: ServerEvent) {
        self.presence.broadcast(&event).await;
    }
}
