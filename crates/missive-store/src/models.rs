//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the gateway layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use missive_shared::tags::{Metadata, Tag};
use missive_shared::types::{FileAttachment, MessageId, MessageStatus, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// Directory data for a known user.  Credentials are not stored here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub full_name: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Friendship
// ---------------------------------------------------------------------------

/// Lifecycle state of a friend request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FriendshipStatus {
    Pending,
    Accepted,
    Rejected,
}

impl FriendshipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FriendshipStatus::Pending => "pending",
            FriendshipStatus::Accepted => "accepted",
            FriendshipStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for FriendshipStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FriendshipStatus::Pending),
            "accepted" => Ok(FriendshipStatus::Accepted),
            "rejected" => Ok(FriendshipStatus::Rejected),
            other => Err(format!("unknown friendship status: {other}")),
        }
    }
}

/// A friend request and its outcome.  At most one row exists per directed
/// pair of users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Friendship {
    pub id: Uuid,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub status: FriendshipStatus,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single direct message as persisted.
///
/// `reply_to` and `linked_to` are plain references; the referent may have
/// been deleted, and readers must treat a missing referent as unavailable
/// rather than an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    /// Raw text, tag token included.  Empty string when the message is an
    /// attachment without a caption.
    pub text: String,
    pub image_url: Option<String>,
    pub file: Option<FileAttachment>,
    pub reply_to: Option<MessageId>,
    pub linked_to: Option<MessageId>,
    pub tag: Option<Tag>,
    pub metadata: Metadata,
    pub status: MessageStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Whether `user` is one of the two conversation participants.
    pub fn involves(&self, user: UserId) -> bool {
        self.sender_id == user || self.receiver_id == user
    }
}

/// Input for [`Database::create_message`]; id, status, and timestamps are
/// assigned by the store.
///
/// [`Database::create_message`]: crate::Database::create_message
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: String,
    pub image_url: Option<String>,
    pub file: Option<FileAttachment>,
    pub reply_to: Option<MessageId>,
    pub linked_to: Option<MessageId>,
    pub tag: Option<Tag>,
    pub metadata: Metadata,
}

/// Entry in a tagged-message listing.
///
/// Either a tagged message itself, or the original message a tagged reply
/// points at, included once as context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEntry {
    pub message: Message,
    pub is_context: bool,
    /// For context entries, the tagged message that pulled this one in.
    pub related_tagged: Option<MessageId>,
}
