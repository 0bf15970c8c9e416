//! Notification feed rows. Delivery lives in the server; this is only the
//! persistence the feed and its unread badge are computed from.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use etincelle_shared::{NotificationKind, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::NotificationRecord;

impl Database {
    pub fn insert_notification(&self, note: &NotificationRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO notifications (id, recipient, sender, kind, body, link, read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                note.id.to_string(),
                note.recipient.to_string(),
                note.sender.as_ref().map(|s| s.to_string()),
                note.kind.as_str(),
                note.body,
                note.link,
                note.read,
                note.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn count_unread_notifications(&self, recipient: &UserId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM notifications WHERE recipient = ?1 AND read = 0",
            params![recipient.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Drop read notifications older than `cutoff`; unread ones stay until
    /// the user has seen them.
    pub fn purge_read_notifications(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM notifications WHERE read = 1 AND created_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(affected)
    }
}

/// Build a feed row with a fresh id and timestamp.
pub fn new_record(
    recipient: &UserId,
    sender: Option<&UserId>,
    kind: NotificationKind,
    body: &str,
    link: Option<&str>,
) -> NotificationRecord {
    NotificationRecord {
        id: Uuid::new_v4(),
        recipient: recipient.clone(),
        sender: sender.cloned(),
        kind,
        body: body.to_string(),
        link: link.map(str::to_string),
        read: false,
        created_at: Utc::now(),
    }
}
