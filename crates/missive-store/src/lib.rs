//! # missive-store
//!
//! SQLite persistence for the missive messaging service.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model.  Callers on an async runtime serialize access behind their own
//! lock; every mutation here is a single-row write covered by SQLite's
//! native atomicity.

pub mod database;
pub mod friends;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
