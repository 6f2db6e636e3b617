//! # missive-shared
//!
//! Domain and wire types shared by the missive store and server crates:
//! identifiers, message status, the tag/reference extractor, and the
//! client-facing event protocol.

pub mod constants;
pub mod protocol;
pub mod tags;
pub mod types;

pub use tags::{Extraction, Metadata, Tag, TagFilter};
pub use types::{ConversationKey, FileAttachment, MessageId, MessageStatus, UserId};
