//! # etincelle-store
//!
//! SQLite persistence for the Étincelle realtime backend: direct messages
//! with per-viewer tombstones, the account slice this subsystem reads
//! (plans, verification, likes), and the notification feed.
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! [`rusqlite::Connection`] with typed helpers per table. Async callers share
//! it through [`SharedDb`]; the connection itself is `Send` but not `Sync`.

use std::sync::Arc;

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod notifications;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;

/// Shared handle for async code. Operations are short and indexed, so a
/// single connection behind a `tokio` mutex is the serialization point.
pub type SharedDb = Arc<tokio::sync::Mutex<Database>>;
