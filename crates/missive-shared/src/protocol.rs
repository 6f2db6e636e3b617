//! Client-facing DTOs and the push-event envelope.
//!
//! Events travel as JSON with a `{ "type": ..., "payload": ... }` envelope.
//! Field names are camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tags::{Metadata, Tag};
use crate::types::{FileAttachment, MessageId, MessageStatus, UserId};

/// Display data for one side of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub full_name: String,
    pub avatar_url: Option<String>,
}

/// Depth-1 view of a message referenced by reply or link.
///
/// The referent may have been deleted since the reference was written; a
/// dangling reference resolves to `Unavailable` rather than an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ReferencedMessage {
    #[serde(rename_all = "camelCase")]
    Available {
        id: MessageId,
        sender_id: UserId,
        text: String,
        tag: Option<Tag>,
        created_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Unavailable { id: MessageId },
}

impl ReferencedMessage {
    pub fn id(&self) -> MessageId {
        match self {
            ReferencedMessage::Available { id, .. } => *id,
            ReferencedMessage::Unavailable { id } => *id,
        }
    }
}

/// A message resolved for display: sender/receiver summaries attached and
/// reply/link references expanded one level deep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub sender: UserSummary,
    pub receiver: UserSummary,
    /// Raw text as stored, tag token included.
    pub text: String,
    /// Text with the tag token stripped, ready to render.
    pub display_text: String,
    pub image_url: Option<String>,
    pub file: Option<FileAttachment>,
    pub reply_to: Option<ReferencedMessage>,
    pub linked_to: Option<ReferencedMessage>,
    pub tag: Option<Tag>,
    pub metadata: Metadata,
    pub status: MessageStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Entry in a tagged-message listing: either a tagged message itself or the
/// original message a tagged reply points at, included once as context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaggedEntryView {
    #[serde(flatten)]
    pub message: MessageView,
    pub is_context: bool,
    pub related_tagged_message: Option<MessageId>,
}

/// Payload broadcast when a message is removed interactively.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeletionNotice {
    pub message_id: MessageId,
    pub deleted_by: UserId,
    pub was_tagged: bool,
    pub tag: Option<Tag>,
}

/// Payload for per-message status notifications (delivered / read).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusReceipt {
    pub message_id: MessageId,
    pub user_id: UserId,
}

/// Full list of currently-online user ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OnlinePresence {
    pub user_ids: Vec<UserId>,
}

/// Ids removed by the retention sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AutoDeletion {
    pub message_ids: Vec<MessageId>,
}

/// Server-to-client push events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum ServerEvent {
    #[serde(rename = "newMessage")]
    NewMessage(MessageView),

    #[serde(rename = "messageDeleted")]
    MessageDeleted(DeletionNotice),

    #[serde(rename = "messageDelivered")]
    MessageDelivered(StatusReceipt),

    #[serde(rename = "messageRead")]
    MessageRead(StatusReceipt),

    #[serde(rename = "onlineUsersChanged")]
    OnlineUsersChanged(OnlinePresence),

    #[serde(rename = "messagesAutoDeleted")]
    MessagesAutoDeleted(AutoDeletion),
}

/// Client-to-server events received over the socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum ClientEvent {
    #[serde(rename = "markRead")]
    MarkRead(MarkRead),
}

/// Acknowledgement that the recipient viewed a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MarkRead {
    pub message_id: MessageId,
}
