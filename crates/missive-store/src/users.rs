//! CRUD operations for [`User`] directory records.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use missive_shared::types::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;

impl Database {
    /// Insert a user, or refresh the display fields of an existing one.
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, full_name, avatar_url, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                 full_name = excluded.full_name,
                 avatar_url = excluded.avatar_url",
            params![
                user.id.to_string(),
                user.full_name,
                user.avatar_url,
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single user by id.
    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, full_name, avatar_url, created_at FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// List every user except the given one (the conversation sidebar).
    pub fn list_users_except(&self, id: UserId) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, full_name, avatar_url, created_at
             FROM users
             WHERE id != ?1
             ORDER BY full_name ASC",
        )?;

        let rows = stmt.query_map(params![id.to_string()], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }
}

/// Map a `rusqlite::Row` to a [`User`].
pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let full_name: String = row.get(1)?;
    let avatar_url: Option<String> = row.get(2)?;
    let created_str: String = row.get(3)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(User {
        id: UserId(id),
        full_name,
        avatar_url,
        created_at,
    })
}
