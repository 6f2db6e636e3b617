//! Message delivery coordination.
//!
//! A send moves through four stages: validation (length and size caps,
//! structurally-empty rejection), classification (tag and reference
//! extraction), persistence, and routing.  Routing consults the presence
//! registry: a live receiver session gets the message pushed and the
//! record promoted to `delivered`; an offline receiver leaves the record
//! in `sent` and the sender's client renders the synchronous response.
//!
//! Store access is serialized behind one async mutex, so two rapid sends
//! from the same sender persist in submission order.  The store calls are
//! the only suspension points besides blob I/O.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use missive_shared::constants::{FILES_URL_PREFIX, MAX_FILE_BYTES, MAX_IMAGE_BYTES, MAX_TEXT_CHARS};
use missive_shared::protocol::{
    AutoDeletion, DeletionNotice, MessageView, ReferencedMessage, ServerEvent, StatusReceipt,
    TaggedEntryView, UserSummary,
};
use missive_shared::tags::{self, TagFilter};
use missive_shared::types::{ConversationKey, FileAttachment, MessageId, MessageStatus, UserId};
use missive_store::{Database, Message, NewMessage, StoreError};

use crate::blob_store::BlobStore;
use crate::error::ServerError;
use crate::presence::PresenceRegistry;
use crate::publish::Publisher;

/// The store handle shared across request handlers.
pub type SharedDb = Arc<Mutex<Database>>;

/// Inbound attachment payload, already read into memory by the gateway.
#[derive(Debug, Clone)]
pub enum AttachmentPayload {
    Image {
        data: Bytes,
        mime_type: String,
    },
    File {
        data: Bytes,
        original_name: String,
        mime_type: String,
    },
}

/// A message-send request.
///
/// The sender identity is *not* part of this struct: it always comes from
/// the authenticated session, never from the client payload.
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub text: Option<String>,
    pub attachment: Option<AttachmentPayload>,
    pub reply_to: Option<MessageId>,
}

pub struct DeliveryCoordinator {
    db: SharedDb,
    presence: PresenceRegistry,
    publisher: Publisher,
    blobs: Arc<BlobStore>,
}

impl DeliveryCoordinator {
    pub fn new(
        db: SharedDb,
        presence: PresenceRegistry,
        publisher: Publisher,
        blobs: Arc<BlobStore>,
    ) -> Self {
        Self {
            db,
            presence,
            publisher,
            blobs,
        }
    }

    /// Accept, classify, persist, and route a message.
    ///
    /// Returns the resolved view synchronously so the sender's client can
    /// render it immediately, whether or not the receiver was online.
    pub async fn send_message(
        &self,
        sender: UserId,
        receiver: UserId,
        request: SendRequest,
    ) -> Result<MessageView, ServerError> {
        let text = request.text.unwrap_or_default();

        if text.chars().count() > MAX_TEXT_CHARS {
            return Err(ServerError::Validation(format!(
                "Message too long. Maximum {MAX_TEXT_CHARS} characters allowed."
            )));
        }
        match &request.attachment {
            Some(AttachmentPayload::Image { data, .. }) => {
                if data.is_empty() {
                    return Err(ServerError::Validation("empty attachment".to_string()));
                }
                if data.len() > MAX_IMAGE_BYTES {
                    return Err(ServerError::Validation(format!(
                        "Image too large. Maximum {} MiB allowed.",
                        MAX_IMAGE_BYTES / (1024 * 1024)
                    )));
                }
            }
            Some(AttachmentPayload::File { data, .. }) => {
                if data.is_empty() {
                    return Err(ServerError::Validation("empty attachment".to_string()));
                }
                if data.len() > MAX_FILE_BYTES {
                    return Err(ServerError::Validation(format!(
                        "File too large. Maximum {} MiB allowed.",
                        MAX_FILE_BYTES / (1024 * 1024)
                    )));
                }
            }
            None => {}
        }
        if text.trim().is_empty() && request.attachment.is_none() {
            return Err(ServerError::Validation("empty message".to_string()));
        }

        let extraction = tags::extract(&text, Utc::now());
        let linked_to = tags::extract_linked(&text, request.reply_to);

        let mut stored_key = None;
        let (image_url, file) = match request.attachment {
            None => (None, None),
            Some(AttachmentPayload::Image { data, mime_type }) => {
                let blob = self.blobs.put(&data, "image", &mime_type).await?;
                stored_key = Some(blob.key);
                (Some(blob.url), None)
            }
            Some(AttachmentPayload::File {
                data,
                original_name,
                mime_type,
            }) => {
                let blob = self.blobs.put(&data, &original_name, &mime_type).await?;
                stored_key = Some(blob.key);
                let attachment = FileAttachment {
                    storage_key: blob.key,
                    original_name,
                    size: data.len() as i64,
                    mime_type,
                    url: blob.url,
                };
                (None, Some(attachment))
            }
        };

        let created = {
            self.db.lock().await.create_message(NewMessage {
                sender_id: sender,
                receiver_id: receiver,
                text,
                image_url,
                file,
                reply_to: request.reply_to,
                linked_to,
                tag: extraction.tag,
                metadata: extraction.metadata,
            })
        };
        let mut message = match created {
            Ok(message) => message,
            Err(e) => {
                // Don't leave an orphan blob behind a failed insert.
                if let Some(key) = stored_key {
                    let _ = self.blobs.delete(key).await;
                }
                return Err(e.into());
            }
        };

        tracing::debug!(
            id = %message.id,
            sender = %sender,
            receiver = %receiver,
            tag = ?message.tag,
            "message persisted"
        );

        let receiver_session = self.presence.lookup(receiver).await;
        if receiver_session.is_some() {
            let now = Utc::now();
            self.db
                .lock()
                .await
                .update_status(message.id, MessageStatus::Delivered, now)?;
            message.status = MessageStatus::Delivered;
            message.delivered_at = Some(now);
        }

        let view = {
            let db = self.db.lock().await;
            resolve_view(&db, &message)?
        };

        if let Some(session) = &receiver_session {
            self.publisher
                .publish_to(session, ServerEvent::NewMessage(view.clone()));
        }
        // The sender's own live session sees the sent message too, unless
        // it is the very session just pushed to (self-message).
        if let Some(sender_session) = self.presence.lookup(sender).await {
            let already_pushed =
                receiver_session.as_ref().map(|s| s.id()) == Some(sender_session.id());
            if !already_pushed {
                self.publisher
                    .publish_to(&sender_session, ServerEvent::NewMessage(view.clone()));
            }
        }

        Ok(view)
    }

    /// Every message of the conversation between `me` and `other`, oldest
    /// first, resolved for display.
    ///
    /// Fetching is also the delivery event for a receiver who was offline
    /// at send time: messages addressed to `me` still in `sent` are
    /// promoted to `delivered` and each sender's live session is notified.
    pub async fn list_conversation(
        &self,
        me: UserId,
        other: UserId,
    ) -> Result<Vec<MessageView>, ServerError> {
        let key = ConversationKey::new(me, other);
        let now = Utc::now();

        let (views, receipts) = {
            let db = self.db.lock().await;
            let mut messages = db.list_conversation(key)?;

            let mut receipts = Vec::new();
            for message in &mut messages {
                if message.receiver_id == me && message.status == MessageStatus::Sent {
                    db.update_status(message.id, MessageStatus::Delivered, now)?;
                    message.status = MessageStatus::Delivered;
                    message.delivered_at = Some(now);
                    receipts.push((message.sender_id, message.id));
                }
            }

            let mut views = Vec::with_capacity(messages.len());
            for message in &messages {
                views.push(resolve_view(&db, message)?);
            }
            (views, receipts)
        };

        for (sender, message_id) in receipts {
            self.publisher
                .publish_to_user(
                    sender,
                    ServerEvent::MessageDelivered(StatusReceipt {
                        message_id,
                        user_id: me,
                    }),
                )
                .await;
        }

        Ok(views)
    }

    /// Tagged messages of the conversation plus their reply context,
    /// newest first.
    pub async fn list_tagged(
        &self,
        me: UserId,
        other: UserId,
        filter: TagFilter,
    ) -> Result<Vec<TaggedEntryView>, ServerError> {
        let key = ConversationKey::new(me, other);
        let db = self.db.lock().await;

        db.list_tagged(key, filter)?
            .into_iter()
            .map(|entry| {
                Ok(TaggedEntryView {
                    message: resolve_view(&db, &entry.message)?,
                    is_context: entry.is_context,
                    related_tagged_message: entry.related_tagged,
                })
            })
            .collect()
    }

    /// Record that the recipient viewed a message.
    ///
    /// Idempotent: an already-read message is left untouched and the
    /// sender is not re-notified.
    pub async fn mark_read(&self, requester: UserId, id: MessageId) -> Result<(), ServerError> {
        let message = self.fetch_message(id).await?;

        if message.receiver_id != requester {
            return Err(ServerError::Permission(
                "Only the recipient can mark a message read".to_string(),
            ));
        }
        if message.status == MessageStatus::Read {
            return Ok(());
        }

        self.db
            .lock()
            .await
            .update_status(id, MessageStatus::Read, Utc::now())?;

        self.publisher
            .publish_to_user(
                message.sender_id,
                ServerEvent::MessageRead(StatusReceipt {
                    message_id: id,
                    user_id: requester,
                }),
            )
            .await;

        Ok(())
    }

    /// Remove a message and notify both participants' live sessions.
    ///
    /// Plain messages may only be deleted by their sender; tagged messages
    /// by either participant.
    pub async fn delete_message(
        &self,
        requester: UserId,
        id: MessageId,
    ) -> Result<DeletionNotice, ServerError> {
        let message = self.fetch_message(id).await?;

        let is_creator = message.sender_id == requester;
        let is_receiver = message.receiver_id == requester;
        let was_tagged = message.tag.is_some();

        if was_tagged {
            if !is_creator && !is_receiver {
                return Err(ServerError::Permission(
                    "You can only delete messages from your conversations".to_string(),
                ));
            }
        } else if !is_creator {
            return Err(ServerError::Permission(
                "You can only delete your own messages".to_string(),
            ));
        }

        let deleted = { self.db.lock().await.delete_message(id)? };
        let Some(deleted) = deleted else {
            // Lost a race with another deletion.
            return Err(ServerError::NotFound(format!("Message {id} not found")));
        };

        self.discard_attachment(&deleted).await;

        let notice = DeletionNotice {
            message_id: id,
            deleted_by: requester,
            was_tagged,
            tag: deleted.tag,
        };

        tracing::info!(
            id = %id,
            deleted_by = %requester,
            was_tagged,
            "message deleted"
        );

        let receiver_session = self.presence.lookup(deleted.receiver_id).await;
        if let Some(session) = &receiver_session {
            self.publisher
                .publish_to(session, ServerEvent::MessageDeleted(notice.clone()));
        }
        if let Some(sender_session) = self.presence.lookup(deleted.sender_id).await {
            if receiver_session.as_ref().map(|s| s.id()) != Some(sender_session.id()) {
                self.publisher
                    .publish_to(&sender_session, ServerEvent::MessageDeleted(notice.clone()));
            }
        }

        Ok(notice)
    }

    /// Retention sweep: drop every message created before `cutoff` and
    /// broadcast the removed ids to all connected sessions.
    pub async fn sweep_expired(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MessageId>, ServerError> {
        let ids = { self.db.lock().await.delete_older_than(cutoff)? };
        if ids.is_empty() {
            return Ok(ids);
        }

        tracing::info!(count = ids.len(), "retention sweep removed messages");

        self.publisher
            .broadcast(ServerEvent::MessagesAutoDeleted(AutoDeletion {
                message_ids: ids.clone(),
            }))
            .await;

        Ok(ids)
    }

    async fn fetch_message(&self, id: MessageId) -> Result<Message, ServerError> {
        let db = self.db.lock().await;
        match db.get_message(id) {
            Ok(message) => Ok(message),
            Err(StoreError::NotFound) => {
                Err(ServerError::NotFound(format!("Message {id} not found")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn discard_attachment(&self, message: &Message) {
        let key = message
            .file
            .as_ref()
            .map(|f| f.storage_key)
            .or_else(|| message.image_url.as_deref().and_then(blob_key_from_url));

        if let Some(key) = key {
            if let Err(e) = self.blobs.delete(key).await {
                tracing::warn!(key = %key, error = %e, "failed to remove attachment blob");
            }
        }
    }
}

/// Resolve a persisted record for display: user summaries attached and
/// reply/link references expanded one level deep (a reference's own
/// references are never followed).
fn resolve_view(db: &Database, message: &Message) -> Result<MessageView, ServerError> {
    Ok(MessageView {
        id: message.id,
        sender: summary_for(db, message.sender_id)?,
        receiver: summary_for(db, message.receiver_id)?,
        text: message.text.clone(),
        display_text: tags::strip_tag_token(&message.text),
        image_url: message.image_url.clone(),
        file: message.file.clone(),
        reply_to: message
            .reply_to
            .map(|id| reference_for(db, id))
            .transpose()?,
        linked_to: message
            .linked_to
            .map(|id| reference_for(db, id))
            .transpose()?,
        tag: message.tag,
        metadata: message.metadata.clone(),
        status: message.status,
        delivered_at: message.delivered_at,
        read_at: message.read_at,
        created_at: message.created_at,
    })
}

fn summary_for(db: &Database, id: UserId) -> Result<UserSummary, ServerError> {
    match db.get_user(id) {
        Ok(user) => Ok(UserSummary {
            id,
            full_name: user.full_name,
            avatar_url: user.avatar_url,
        }),
        // The directory is best-effort; an unknown id still renders.
        Err(StoreError::NotFound) => Ok(UserSummary {
            id,
            full_name: format!("user-{}", &id.to_string()[..8]),
            avatar_url: None,
        }),
        Err(e) => Err(e.into()),
    }
}

fn reference_for(db: &Database, id: MessageId) -> Result<ReferencedMessage, ServerError> {
    match db.get_message(id) {
        Ok(message) => Ok(ReferencedMessage::Available {
            id,
            sender_id: message.sender_id,
            text: message.text,
            tag: message.tag,
            created_at: message.created_at,
        }),
        Err(StoreError::NotFound) => Ok(ReferencedMessage::Unavailable { id }),
        Err(e) => Err(e.into()),
    }
}

fn blob_key_from_url(url: &str) -> Option<Uuid> {
    let key = url.strip_prefix(FILES_URL_PREFIX)?.strip_prefix('/')?;
    Uuid::parse_str(key).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use missive_shared::tags::Tag;
    use rusqlite::params;
    use tokio::sync::mpsc;

    use crate::presence::SessionHandle;

    struct Harness {
        coordinator: DeliveryCoordinator,
        db: SharedDb,
        presence: PresenceRegistry,
        blobs: Arc<BlobStore>,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let db: SharedDb = Arc::new(Mutex::new(
            Database::open_at(&dir.path().join("test.db")).unwrap(),
        ));
        let presence = PresenceRegistry::new();
        let publisher = Publisher::new(presence.clone());
        let blobs = Arc::new(BlobStore::new(dir.path().join("blobs")).await.unwrap());

        Harness {
            coordinator: DeliveryCoordinator::new(
                db.clone(),
                presence.clone(),
                publisher,
                blobs.clone(),
            ),
            db,
            presence,
            blobs,
            _dir: dir,
        }
    }

    async fn connect(h: &Harness, user: UserId) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        h.presence.register(user, SessionHandle::new(tx)).await;
        rx
    }

    fn text(t: &str) -> SendRequest {
        SendRequest {
            text: Some(t.to_string()),
            ..Default::default()
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn new_messages(events: &[ServerEvent]) -> Vec<&MessageView> {
        events
            .iter()
            .filter_map(|e| match e {
                ServerEvent::NewMessage(view) => Some(view),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn send_to_offline_receiver_stays_sent() {
        let h = harness().await;
        let (alice, bob) = (UserId::new(), UserId::new());

        let view = h.coordinator.send_message(alice, bob, text("hello")).await.unwrap();

        assert_eq!(view.status, MessageStatus::Sent);
        assert!(view.delivered_at.is_none());
        assert_eq!(view.sender.id, alice);

        let stored = h.db.lock().await.get_message(view.id).unwrap();
        assert_eq!(stored.status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn send_to_online_receiver_delivers_and_pushes() {
        let h = harness().await;
        let (alice, bob) = (UserId::new(), UserId::new());
        let mut bob_rx = connect(&h, bob).await;

        let view = h
            .coordinator
            .send_message(alice, bob, text("@deadline[date:2024-01-01] submit report"))
            .await
            .unwrap();

        assert_eq!(view.status, MessageStatus::Delivered);
        assert!(view.delivered_at.is_some());
        assert_eq!(view.tag, Some(Tag::Deadline));
        assert_eq!(view.metadata.get("date"), Some("2024-01-01"));
        assert_eq!(view.display_text, "submit report");

        let events = drain(&mut bob_rx);
        let pushed = new_messages(&events);
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].id, view.id);
        assert_eq!(pushed[0].status, MessageStatus::Delivered);

        let stored = h.db.lock().await.get_message(view.id).unwrap();
        assert_eq!(stored.status, MessageStatus::Delivered);
        assert!(stored.delivered_at.is_some());
    }

    #[tokio::test]
    async fn sender_session_also_receives_the_push() {
        let h = harness().await;
        let (alice, bob) = (UserId::new(), UserId::new());
        let mut alice_rx = connect(&h, alice).await;
        let mut bob_rx = connect(&h, bob).await;

        let view = h.coordinator.send_message(alice, bob, text("hi")).await.unwrap();

        assert_eq!(new_messages(&drain(&mut bob_rx)).len(), 1);
        let alice_events = drain(&mut alice_rx);
        let alice_pushes = new_messages(&alice_events);
        assert_eq!(alice_pushes.len(), 1);
        assert_eq!(alice_pushes[0].id, view.id);
    }

    #[tokio::test]
    async fn self_message_is_pushed_once() {
        let h = harness().await;
        let alice = UserId::new();
        let mut rx = connect(&h, alice).await;

        h.coordinator.send_message(alice, alice, text("note to self")).await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(new_messages(&events).len(), 1);
    }

    #[tokio::test]
    async fn fetch_by_receiver_promotes_to_delivered() {
        let h = harness().await;
        let (alice, bob) = (UserId::new(), UserId::new());
        let mut alice_rx = connect(&h, alice).await;

        let view = h.coordinator.send_message(alice, bob, text("hello")).await.unwrap();
        assert_eq!(view.status, MessageStatus::Sent);
        drain(&mut alice_rx);

        let fetched = h.coordinator.list_conversation(bob, alice).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].status, MessageStatus::Delivered);

        let receipts: Vec<_> = drain(&mut alice_rx)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::MessageDelivered(receipt) => Some(receipt),
                _ => None,
            })
            .collect();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].message_id, view.id);
        assert_eq!(receipts[0].user_id, bob);

        // The sender's own fetch must not touch anything.
        let again = h.coordinator.list_conversation(alice, bob).await.unwrap();
        assert_eq!(again[0].status, MessageStatus::Delivered);
        assert!(drain(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn mark_read_notifies_sender_and_is_idempotent() {
        let h = harness().await;
        let (alice, bob) = (UserId::new(), UserId::new());
        let mut alice_rx = connect(&h, alice).await;

        let view = h.coordinator.send_message(alice, bob, text("hello")).await.unwrap();
        drain(&mut alice_rx);

        h.coordinator.mark_read(bob, view.id).await.unwrap();

        let stored = h.db.lock().await.get_message(view.id).unwrap();
        assert_eq!(stored.status, MessageStatus::Read);
        let read_at = stored.read_at.unwrap();

        let reads: Vec<_> = drain(&mut alice_rx)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::MessageRead(receipt) => Some(receipt),
                _ => None,
            })
            .collect();
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].message_id, view.id);
        assert_eq!(reads[0].user_id, bob);

        // Second acknowledgement: no state change, no second notification.
        h.coordinator.mark_read(bob, view.id).await.unwrap();
        assert_eq!(h.db.lock().await.get_message(view.id).unwrap().read_at, Some(read_at));
        assert!(drain(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn only_the_recipient_can_mark_read() {
        let h = harness().await;
        let (alice, bob) = (UserId::new(), UserId::new());

        let view = h.coordinator.send_message(alice, bob, text("hello")).await.unwrap();

        assert!(matches!(
            h.coordinator.mark_read(alice, view.id).await,
            Err(ServerError::Permission(_))
        ));
        assert!(matches!(
            h.coordinator.mark_read(bob, MessageId::new()).await,
            Err(ServerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn tagged_round_trip() {
        let h = harness().await;
        let (alice, bob) = (UserId::new(), UserId::new());

        let view = h
            .coordinator
            .send_message(alice, bob, text("@task[assignee:bob] ship it"))
            .await
            .unwrap();

        assert_eq!(view.tag, Some(Tag::Task));
        assert_eq!(view.display_text, "ship it");
        assert_eq!(view.metadata.get("assignee"), Some("bob"));
        assert_eq!(view.metadata.get("tag"), Some("task"));
        assert!(view.metadata.contains_key("timestamp"));

        let stored = h.db.lock().await.get_message(view.id).unwrap();
        assert_eq!(stored.tag, Some(Tag::Task));
        assert_eq!(stored.metadata, view.metadata);
    }

    #[tokio::test]
    async fn text_length_boundary() {
        let h = harness().await;
        let (alice, bob) = (UserId::new(), UserId::new());

        let at_limit = "x".repeat(500);
        assert!(h.coordinator.send_message(alice, bob, text(&at_limit)).await.is_ok());

        let over_limit = "x".repeat(501);
        assert!(matches!(
            h.coordinator.send_message(alice, bob, text(&over_limit)).await,
            Err(ServerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn structurally_empty_message_is_rejected() {
        let h = harness().await;
        let (alice, bob) = (UserId::new(), UserId::new());

        for request in [SendRequest::default(), text(""), text("   ")] {
            assert!(matches!(
                h.coordinator.send_message(alice, bob, request).await,
                Err(ServerError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn oversize_image_is_rejected() {
        let h = harness().await;
        let (alice, bob) = (UserId::new(), UserId::new());

        let request = SendRequest {
            attachment: Some(AttachmentPayload::Image {
                data: Bytes::from(vec![0u8; MAX_IMAGE_BYTES + 1]),
                mime_type: "image/png".to_string(),
            }),
            ..Default::default()
        };
        assert!(matches!(
            h.coordinator.send_message(alice, bob, request).await,
            Err(ServerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn delete_permissions_follow_tagging() {
        let h = harness().await;
        let (alice, bob, eve) = (UserId::new(), UserId::new(), UserId::new());

        // Plain message: only the sender may delete.
        let plain = h.coordinator.send_message(alice, bob, text("plain")).await.unwrap();
        assert!(matches!(
            h.coordinator.delete_message(bob, plain.id).await,
            Err(ServerError::Permission(_))
        ));
        h.coordinator.delete_message(alice, plain.id).await.unwrap();

        // Tagged message: either participant may delete, outsiders cannot.
        let tagged = h
            .coordinator
            .send_message(alice, bob, text("@decision going with plan B"))
            .await
            .unwrap();
        assert!(matches!(
            h.coordinator.delete_message(eve, tagged.id).await,
            Err(ServerError::Permission(_))
        ));
        let notice = h.coordinator.delete_message(bob, tagged.id).await.unwrap();
        assert!(notice.was_tagged);
        assert_eq!(notice.tag, Some(Tag::Decision));
        assert_eq!(notice.deleted_by, bob);

        assert!(matches!(
            h.coordinator.delete_message(alice, tagged.id).await,
            Err(ServerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn deletion_notifies_both_sessions_and_empties_listing() {
        let h = harness().await;
        let (alice, bob) = (UserId::new(), UserId::new());
        let mut alice_rx = connect(&h, alice).await;
        let mut bob_rx = connect(&h, bob).await;

        let view = h
            .coordinator
            .send_message(alice, bob, text("@deadline[date:2024-01-01] submit report"))
            .await
            .unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        h.coordinator.delete_message(alice, view.id).await.unwrap();

        for rx in [&mut alice_rx, &mut bob_rx] {
            let deletions: Vec<_> = drain(rx)
                .into_iter()
                .filter_map(|e| match e {
                    ServerEvent::MessageDeleted(notice) => Some(notice),
                    _ => None,
                })
                .collect();
            assert_eq!(deletions.len(), 1);
            assert_eq!(deletions[0].message_id, view.id);
            assert_eq!(deletions[0].deleted_by, alice);
            assert!(deletions[0].was_tagged);
            assert_eq!(deletions[0].tag, Some(Tag::Deadline));
        }

        assert!(h.coordinator.list_conversation(alice, bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reply_references_resolve_depth_one() {
        let h = harness().await;
        let (alice, bob) = (UserId::new(), UserId::new());

        let original = h.coordinator.send_message(alice, bob, text("original")).await.unwrap();

        let mut reply = text("@confirm noted");
        reply.reply_to = Some(original.id);
        let reply = h.coordinator.send_message(bob, alice, reply).await.unwrap();

        match reply.reply_to.as_ref().unwrap() {
            ReferencedMessage::Available { id, text, .. } => {
                assert_eq!(*id, original.id);
                assert_eq!(text, "original");
            }
            other => panic!("expected available referent, got {other:?}"),
        }
        // The link derives from the reply.
        assert_eq!(reply.linked_to.as_ref().map(|r| r.id()), Some(original.id));

        // Once the referent is gone the reference dangles gracefully.
        h.coordinator.delete_message(alice, original.id).await.unwrap();
        let listed = h.coordinator.list_conversation(alice, bob).await.unwrap();
        let reloaded = listed.iter().find(|v| v.id == reply.id).unwrap();
        assert_eq!(
            reloaded.reply_to,
            Some(ReferencedMessage::Unavailable { id: original.id })
        );
    }

    #[tokio::test]
    async fn tagged_listing_pairs_context_with_replies() {
        let h = harness().await;
        let (alice, bob) = (UserId::new(), UserId::new());

        let original = h
            .coordinator
            .send_message(alice, bob, text("let's plan the release"))
            .await
            .unwrap();
        let mut tagged = text("@task[assignee:alice] cut the branch");
        tagged.reply_to = Some(original.id);
        let tagged = h.coordinator.send_message(bob, alice, tagged).await.unwrap();

        let entries = h
            .coordinator
            .list_tagged(alice, bob, TagFilter::All)
            .await
            .unwrap();

        assert_eq!(entries.len(), 2);
        // Newest first: the tagged reply precedes its older context.
        assert_eq!(entries[0].message.id, tagged.id);
        assert!(!entries[0].is_context);
        assert_eq!(entries[1].message.id, original.id);
        assert!(entries[1].is_context);
        assert_eq!(entries[1].related_tagged_message, Some(tagged.id));
    }

    #[tokio::test]
    async fn file_attachment_lands_in_blob_store_and_dies_with_the_message() {
        let h = harness().await;
        let (alice, bob) = (UserId::new(), UserId::new());

        let request = SendRequest {
            attachment: Some(AttachmentPayload::File {
                data: Bytes::from_static(b"quarterly numbers"),
                original_name: "q3.csv".to_string(),
                mime_type: "text/csv".to_string(),
            }),
            ..Default::default()
        };
        let view = h.coordinator.send_message(alice, bob, request).await.unwrap();

        let file = view.file.clone().unwrap();
        assert_eq!(file.original_name, "q3.csv");
        assert_eq!(file.size, 17);
        let (data, meta) = h.blobs.get(file.storage_key).await.unwrap();
        assert_eq!(data, b"quarterly numbers");
        assert_eq!(meta.mime_type, "text/csv");

        h.coordinator.delete_message(alice, view.id).await.unwrap();
        assert!(h.blobs.get(file.storage_key).await.is_err());
    }

    #[tokio::test]
    async fn sweep_broadcasts_removed_ids_once() {
        let h = harness().await;
        let (alice, bob) = (UserId::new(), UserId::new());
        let mut rx = connect(&h, alice).await;
        drain(&mut rx);

        let mut old_ids = Vec::new();
        for body in ["one", "two", "three"] {
            old_ids.push(h.coordinator.send_message(alice, bob, text(body)).await.unwrap().id);
        }
        let fresh = h.coordinator.send_message(alice, bob, text("fresh")).await.unwrap();
        drain(&mut rx);

        // Backdate the first three past the cutoff.
        let last_week = (Utc::now() - chrono::Duration::days(8)).to_rfc3339();
        {
            let db = h.db.lock().await;
            for id in &old_ids {
                db.conn()
                    .execute(
                        "UPDATE messages SET created_at = ?1 WHERE id = ?2",
                        params![last_week, id.to_string()],
                    )
                    .unwrap();
            }
        }

        let cutoff = Utc::now() - chrono::Duration::days(7);
        let swept = h.coordinator.sweep_expired(cutoff).await.unwrap();
        assert_eq!(swept.len(), 3);
        for id in &old_ids {
            assert!(swept.contains(id));
        }

        let broadcasts: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::MessagesAutoDeleted(payload) => Some(payload),
                _ => None,
            })
            .collect();
        assert_eq!(broadcasts.len(), 1);
        assert_eq!(broadcasts[0].message_ids.len(), 3);

        // Nothing newer was touched, and an empty sweep stays silent.
        assert!(h.db.lock().await.get_message(fresh.id).is_ok());
        assert!(h.coordinator.sweep_expired(cutoff).await.unwrap().is_empty());
        assert!(drain(&mut rx).is_empty());
    }
}
