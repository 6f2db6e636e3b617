//! CRUD and query operations for [`Message`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use missive_shared::tags::{Tag, TagFilter};
use missive_shared::types::{ConversationKey, FileAttachment, MessageId, MessageStatus, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Message, NewMessage, TaggedEntry};

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, text, image_url, \
     file_key, file_name, file_size, file_mime, file_url, \
     reply_to, linked_to, tag, metadata, status, delivered_at, read_at, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Persist a new message, assigning its id and creation timestamp.
    ///
    /// The record starts in `sent` status.  The insert is a single-row
    /// write; a failure leaves no partial record behind.
    pub fn create_message(&self, new: NewMessage) -> Result<Message> {
        let message = Message {
            id: MessageId::new(),
            sender_id: new.sender_id,
            receiver_id: new.receiver_id,
            text: new.text,
            image_url: new.image_url,
            file: new.file,
            reply_to: new.reply_to,
            linked_to: new.linked_to,
            tag: new.tag,
            metadata: new.metadata,
            status: MessageStatus::Sent,
            delivered_at: None,
            read_at: None,
            created_at: Utc::now(),
        };

        self.conn().execute(
            "INSERT INTO messages (id, sender_id, receiver_id, text, image_url,
                                   file_key, file_name, file_size, file_mime, file_url,
                                   reply_to, linked_to, tag, metadata, status,
                                   delivered_at, read_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                     ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                message.id.to_string(),
                message.sender_id.to_string(),
                message.receiver_id.to_string(),
                message.text,
                message.image_url,
                message.file.as_ref().map(|f| f.storage_key.to_string()),
                message.file.as_ref().map(|f| f.original_name.as_str()),
                message.file.as_ref().map(|f| f.size),
                message.file.as_ref().map(|f| f.mime_type.as_str()),
                message.file.as_ref().map(|f| f.url.as_str()),
                message.reply_to.map(|id| id.to_string()),
                message.linked_to.map(|id| id.to_string()),
                message.tag.map(|t| t.as_str()),
                serde_json::to_string(&message.metadata)?,
                message.status.as_str(),
                Option::<String>::None,
                Option::<String>::None,
                message.created_at.to_rfc3339(),
            ],
        )?;

        Ok(message)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single message by id.
    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// List every message exchanged inside a conversation, oldest first.
    ///
    /// Both directions of the pair are included, so the result is the same
    /// whichever participant the key was built from.
    pub fn list_conversation(&self, key: ConversationKey) -> Result<Vec<Message>> {
        let (a, b) = key.participants();
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY created_at ASC, rowid ASC"
        ))?;

        let rows = stmt.query_map(params![a.to_string(), b.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// List tagged messages in a conversation, newest first, with each
    /// replied-to original pulled in once as a context entry.
    ///
    /// The scan runs oldest-first so context dedup is deterministic, then
    /// the combined sequence is flipped to descending creation order for
    /// presentation.
    pub fn list_tagged(&self, key: ConversationKey, filter: TagFilter) -> Result<Vec<TaggedEntry>> {
        let (a, b) = key.participants();

        let mut sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE ((sender_id = ?1 AND receiver_id = ?2)
                 OR (sender_id = ?2 AND receiver_id = ?1))
               AND tag IS NOT NULL"
        );
        if let TagFilter::Only(_) = filter {
            sql.push_str(" AND tag = ?3");
        }
        sql.push_str(" ORDER BY created_at ASC, rowid ASC");

        let mut stmt = self.conn().prepare(&sql)?;
        let tagged: Vec<Message> = match filter {
            TagFilter::All => {
                let rows =
                    stmt.query_map(params![a.to_string(), b.to_string()], row_to_message)?;
                rows.collect::<rusqlite::Result<_>>()?
            }
            TagFilter::Only(tag) => {
                let rows = stmt.query_map(
                    params![a.to_string(), b.to_string(), tag.as_str()],
                    row_to_message,
                )?;
                rows.collect::<rusqlite::Result<_>>()?
            }
        };

        let mut entries: Vec<TaggedEntry> = Vec::with_capacity(tagged.len());
        let mut added: std::collections::HashSet<MessageId> = std::collections::HashSet::new();

        for message in tagged {
            if let Some(reply_to) = message.reply_to {
                if !added.contains(&reply_to) {
                    match self.get_message(reply_to) {
                        Ok(original) => {
                            added.insert(original.id);
                            entries.push(TaggedEntry {
                                message: original,
                                is_context: true,
                                related_tagged: Some(message.id),
                            });
                        }
                        // The referent was deleted; the reference dangles.
                        Err(StoreError::NotFound) => {}
                        Err(e) => return Err(e),
                    }
                }
            }

            if added.insert(message.id) {
                entries.push(TaggedEntry {
                    message,
                    is_context: false,
                    related_tagged: None,
                });
            }
        }

        entries.sort_by(|x, y| y.message.created_at.cmp(&x.message.created_at));
        Ok(entries)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Record a delivery-state transition.
    ///
    /// The caller guarantees the transition only moves forward (sent ->
    /// delivered -> read); the store does not re-validate.  The matching
    /// timestamp column is written at most once.
    pub fn update_status(
        &self,
        id: MessageId,
        status: MessageStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let affected = match status {
            MessageStatus::Sent => self.conn().execute(
                "UPDATE messages SET status = ?2 WHERE id = ?1",
                params![id.to_string(), status.as_str()],
            )?,
            MessageStatus::Delivered => self.conn().execute(
                "UPDATE messages
                 SET status = ?2, delivered_at = COALESCE(delivered_at, ?3)
                 WHERE id = ?1",
                params![id.to_string(), status.as_str(), at.to_rfc3339()],
            )?,
            MessageStatus::Read => self.conn().execute(
                "UPDATE messages
                 SET status = ?2, read_at = COALESCE(read_at, ?3)
                 WHERE id = ?1",
                params![id.to_string(), status.as_str(), at.to_rfc3339()],
            )?,
        };

        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a message, returning the removed record so the caller can
    /// build deletion notifications.  `None` when nothing was deleted.
    pub fn delete_message(&self, id: MessageId) -> Result<Option<Message>> {
        let message = match self.get_message(id) {
            Ok(message) => message,
            Err(StoreError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };

        self.conn().execute(
            "DELETE FROM messages WHERE id = ?1",
            params![id.to_string()],
        )?;

        Ok(Some(message))
    }

    /// Bulk retention sweep: remove every message created before `cutoff`
    /// and return the removed ids.
    pub fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<MessageId>> {
        let cutoff = cutoff.to_rfc3339();

        let mut stmt = self
            .conn()
            .prepare("SELECT id FROM messages WHERE created_at < ?1")?;
        let rows = stmt.query_map(params![cutoff], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(MessageId(Uuid::parse_str(&row?)?));
        }

        self.conn().execute(
            "DELETE FROM messages WHERE created_at < ?1",
            params![cutoff],
        )?;

        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(index: usize, value: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_timestamp(index: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                index,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

/// Map a `rusqlite::Row` to a [`Message`].
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id = parse_uuid(0, &row.get::<_, String>(0)?)?;
    let sender_id = parse_uuid(1, &row.get::<_, String>(1)?)?;
    let receiver_id = parse_uuid(2, &row.get::<_, String>(2)?)?;
    let text: String = row.get(3)?;
    let image_url: Option<String> = row.get(4)?;

    let file_key: Option<String> = row.get(5)?;
    let file = match file_key {
        Some(key) => Some(FileAttachment {
            storage_key: parse_uuid(5, &key)?,
            original_name: row.get(6)?,
            size: row.get(7)?,
            mime_type: row.get(8)?,
            url: row.get(9)?,
        }),
        None => None,
    };

    let reply_to = row
        .get::<_, Option<String>>(10)?
        .map(|s| parse_uuid(10, &s))
        .transpose()?
        .map(MessageId);
    let linked_to = row
        .get::<_, Option<String>>(11)?
        .map(|s| parse_uuid(11, &s))
        .transpose()?
        .map(MessageId);

    let tag = row
        .get::<_, Option<String>>(12)?
        .map(|s| {
            s.parse::<Tag>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    12,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })
        .transpose()?;

    let metadata = serde_json::from_str(&row.get::<_, String>(13)?).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(13, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let status = row
        .get::<_, String>(14)?
        .parse::<MessageStatus>()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(14, rusqlite::types::Type::Text, e.into())
        })?;

    let delivered_at = row
        .get::<_, Option<String>>(15)?
        .map(|s| parse_timestamp(15, &s))
        .transpose()?;
    let read_at = row
        .get::<_, Option<String>>(16)?
        .map(|s| parse_timestamp(16, &s))
        .transpose()?;
    let created_at = parse_timestamp(17, &row.get::<_, String>(17)?)?;

    Ok(Message {
        id: MessageId(id),
        sender_id: UserId(sender_id),
        receiver_id: UserId(receiver_id),
        text,
        image_url,
        file,
        reply_to,
        linked_to,
        tag,
        metadata,
        status,
        delivered_at,
        read_at,
        created_at,
    })
}
