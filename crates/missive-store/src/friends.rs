//! CRUD operations for [`Friendship`] records.
//!
//! The friend graph is plain relationship bookkeeping; message delivery
//! does not consult it.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use missive_shared::types::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Friendship, FriendshipStatus, User};

impl Database {
    /// Record a new friend request from `sender` to `recipient`.
    ///
    /// The caller is expected to check [`Database::get_friendship`] first;
    /// a duplicate directed pair violates the unique constraint.
    pub fn create_friend_request(&self, sender: UserId, recipient: UserId) -> Result<Friendship> {
        let friendship = Friendship {
            id: Uuid::new_v4(),
            sender_id: sender,
            recipient_id: recipient,
            status: FriendshipStatus::Pending,
            created_at: Utc::now(),
            responded_at: None,
        };

        self.conn().execute(
            "INSERT INTO friendships (id, sender_id, recipient_id, status, created_at, responded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                friendship.id.to_string(),
                friendship.sender_id.to_string(),
                friendship.recipient_id.to_string(),
                friendship.status.as_str(),
                friendship.created_at.to_rfc3339(),
                Option::<String>::None,
            ],
        )?;

        Ok(friendship)
    }

    /// Fetch the relationship between two users in either direction.
    pub fn get_friendship(&self, a: UserId, b: UserId) -> Result<Option<Friendship>> {
        let result = self.conn().query_row(
            "SELECT id, sender_id, recipient_id, status, created_at, responded_at
             FROM friendships
             WHERE (sender_id = ?1 AND recipient_id = ?2)
                OR (sender_id = ?2 AND recipient_id = ?1)",
            params![a.to_string(), b.to_string()],
            row_to_friendship,
        );

        match result {
            Ok(friendship) => Ok(Some(friendship)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve a pending request.
    pub fn respond_friend_request(
        &self,
        id: Uuid,
        status: FriendshipStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE friendships SET status = ?2, responded_at = ?3 WHERE id = ?1",
            params![id.to_string(), status.as_str(), at.to_rfc3339()],
        )?;

        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Whether an accepted friendship exists between the two users.
    pub fn is_friend(&self, a: UserId, b: UserId) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM friendships
             WHERE ((sender_id = ?1 AND recipient_id = ?2)
                 OR (sender_id = ?2 AND recipient_id = ?1))
               AND status = 'accepted'",
            params![a.to_string(), b.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// List the accepted friends of a user, as directory records.
    pub fn list_friends(&self, user: UserId) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(
            "SELECT u.id, u.full_name, u.avatar_url, u.created_at
             FROM friendships f
             JOIN users u
               ON u.id = CASE WHEN f.sender_id = ?1 THEN f.recipient_id ELSE f.sender_id END
             WHERE (f.sender_id = ?1 OR f.recipient_id = ?1)
               AND f.status = 'accepted'
             ORDER BY u.full_name ASC",
        )?;

        let rows = stmt.query_map(params![user.to_string()], crate::users::row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// List pending requests addressed to a user, newest first.
    pub fn list_incoming_requests(&self, user: UserId) -> Result<Vec<Friendship>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, recipient_id, status, created_at, responded_at
             FROM friendships
             WHERE recipient_id = ?1 AND status = 'pending'
             ORDER BY created_at DESC",
        )?;

        let rows = stmt.query_map(params![user.to_string()], row_to_friendship)?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?);
        }
        Ok(requests)
    }
}

/// Map a `rusqlite::Row` to a [`Friendship`].
fn row_to_friendship(row: &rusqlite::Row<'_>) -> rusqlite::Result<Friendship> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let recipient_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let created_str: String = row.get(4)?;
    let responded_str: Option<String> = row.get(5)?;

    let parse_uuid = |index: usize, value: &str| {
        Uuid::parse_str(value).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                index,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
    };
    let parse_ts = |index: usize, value: &str| {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    index,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
    };

    let status = status_str.parse::<FriendshipStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(Friendship {
        id: parse_uuid(0, &id_str)?,
        sender_id: UserId(parse_uuid(1, &sender_str)?),
        recipient_id: UserId(parse_uuid(2, &recipient_str)?),
        status,
        created_at: parse_ts(4, &created_str)?,
        responded_at: responded_str.map(|s| parse_ts(5, &s)).transpose()?,
    })
}
