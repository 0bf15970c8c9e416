//! Direct-message storage: creation, thread views, read marking, unread
//! accounting, per-viewer tombstones, and the retention purge.
//!
//! Every read honors the viewer's tombstones: a tombstoned message is
//! invisible to that viewer in listings, counts, and receipts, while the
//! other participant's view is untouched.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use etincelle_shared::constants::{HISTORY_PAGE_MAX, MAX_MESSAGE_CHARS, THREAD_PAGE_MAX};
use etincelle_shared::{Message, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};

const MESSAGE_COLUMNS: &str = "id, sender, recipient, content, read, read_at, created_at";

/// Visibility predicate shared by every viewer-scoped query. `?1` is always
/// the viewer.
const NOT_TOMBSTONED: &str = "NOT EXISTS (
    SELECT 1 FROM message_tombstones t
    WHERE t.message_id = m.id AND t.user_id = ?1
)";

impl Database {
    /// Validate and persist a new message.
    ///
    /// Content is trimmed first; empty, over-long, or self-addressed input is
    /// rejected with [`StoreError::InvalidMessage`] and nothing is written.
    pub fn create_message(
        &self,
        sender: &UserId,
        recipient: &UserId,
        content: &str,
    ) -> Result<Message> {
        if sender == recipient {
            return Err(StoreError::InvalidMessage(
                "sender and recipient must differ",
            ));
        }

        let content = content.trim();
        if content.is_empty() {
            return Err(StoreError::InvalidMessage("content is empty"));
        }
        if content.chars().count() > MAX_MESSAGE_CHARS {
            return Err(StoreError::InvalidMessage("content too long"));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();

        self.conn().execute(
            "INSERT INTO messages (id, sender, recipient, content, read, read_at, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, NULL, ?5)",
            params![
                id.to_string(),
                sender.to_string(),
                recipient.to_string(),
                content,
                now.to_rfc3339(),
            ],
        )?;

        Ok(Message {
            id,
            sender: sender.clone(),
            recipient: recipient.clone(),
            content: content.to_string(),
            read: false,
            read_at: None,
            created_at: now,
        })
    }

    /// Ascending thread view between `viewer` and `peer`, tombstones honored.
    ///
    /// `before` is an exclusive upper bound on `created_at`; `limit` is
    /// clamped to [`THREAD_PAGE_MAX`].
    pub fn thread_messages(
        &self,
        viewer: &UserId,
        peer: &UserId,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m
             WHERE ((m.sender = ?1 AND m.recipient = ?2)
                 OR (m.sender = ?2 AND m.recipient = ?1))
               AND {NOT_TOMBSTONED}
               AND (?3 IS NULL OR m.created_at < ?3)
             ORDER BY m.created_at ASC, m.id ASC
             LIMIT ?4"
        );

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                viewer.to_string(),
                peer.to_string(),
                before.map(|t| t.to_rfc3339()),
                limit.clamp(1, THREAD_PAGE_MAX),
            ],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Descending history page for infinite scroll, tombstones honored.
    ///
    /// `before` is an exclusive upper bound; `limit` is clamped to
    /// [`HISTORY_PAGE_MAX`].
    pub fn thread_page_desc(
        &self,
        viewer: &UserId,
        peer: &UserId,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m
             WHERE ((m.sender = ?1 AND m.recipient = ?2)
                 OR (m.sender = ?2 AND m.recipient = ?1))
               AND {NOT_TOMBSTONED}
               AND m.created_at < ?3
             ORDER BY m.created_at DESC, m.id DESC
             LIMIT ?4"
        );

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                viewer.to_string(),
                peer.to_string(),
                before.to_rfc3339(),
                limit.clamp(1, HISTORY_PAGE_MAX),
            ],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Mark every visible unread message from `peer` to `viewer` as read.
    ///
    /// Returns the number of rows touched; calling again immediately returns
    /// zero. `read_at` is set once and never overwritten.
    pub fn mark_read_from(&self, viewer: &UserId, peer: &UserId) -> Result<usize> {
        let sql = format!(
            "UPDATE messages SET read = 1, read_at = ?3
             WHERE recipient = ?1 AND sender = ?2 AND read = 0
               AND NOT EXISTS (
                   SELECT 1 FROM message_tombstones t
                   WHERE t.message_id = messages.id AND t.user_id = ?1
               )"
        );

        let affected = self.conn().execute(
            &sql,
            params![
                viewer.to_string(),
                peer.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(affected)
    }

    /// Timestamp of the newest visible message from `peer` that `viewer` has
    /// read; the watermark carried by the `chat:read` receipt.
    pub fn latest_read_from(&self, viewer: &UserId, peer: &UserId) -> Result<Option<DateTime<Utc>>> {
        let sql = format!(
            "SELECT m.created_at FROM messages m
             WHERE m.recipient = ?1 AND m.sender = ?2 AND m.read = 1
               AND {NOT_TOMBSTONED}
             ORDER BY m.created_at DESC, m.id DESC
             LIMIT 1"
        );

        let row: std::result::Result<String, rusqlite::Error> = self.conn().query_row(
            &sql,
            params![viewer.to_string(), peer.to_string()],
            |row| row.get(0),
        );

        match row {
            Ok(ts) => {
                let parsed = DateTime::parse_from_rfc3339(&ts)?.with_timezone(&Utc);
                Ok(Some(parsed))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }

    /// Total visible unread messages addressed to `viewer`.
    pub fn count_unread(&self, viewer: &UserId) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM messages m
             WHERE m.recipient = ?1 AND m.read = 0 AND {NOT_TOMBSTONED}"
        );

        let count: i64 =
            self.conn()
                .query_row(&sql, params![viewer.to_string()], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Visible unread messages from one specific peer.
    pub fn count_unread_between(&self, viewer: &UserId, peer: &UserId) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM messages m
             WHERE m.recipient = ?1 AND m.sender = ?2 AND m.read = 0 AND {NOT_TOMBSTONED}"
        );

        let count: i64 = self.conn().query_row(
            &sql,
            params![viewer.to_string(), peer.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Tombstone every message of the pair for `viewer`. Idempotent; the
    /// peer's view is untouched. Returns the number of newly hidden messages.
    pub fn soft_delete_thread(&self, viewer: &UserId, peer: &UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO message_tombstones (message_id, user_id, created_at)
             SELECT m.id, ?1, ?3 FROM messages m
             WHERE (m.sender = ?1 AND m.recipient = ?2)
                OR (m.sender = ?2 AND m.recipient = ?1)",
            params![
                viewer.to_string(),
                peer.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(affected)
    }

    /// Tombstone the listed messages for `viewer`, skipping ids the viewer is
    /// not a participant of and ids that do not exist.
    pub fn soft_delete_messages(&self, viewer: &UserId, ids: &[Uuid]) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let mut affected = 0;

        for id in ids {
            affected += self.conn().execute(
                "INSERT OR IGNORE INTO message_tombstones (message_id, user_id, created_at)
                 SELECT m.id, ?2, ?3 FROM messages m
                 WHERE m.id = ?1 AND (m.sender = ?2 OR m.recipient = ?2)",
                params![id.to_string(), viewer.to_string(), now],
            )?;
        }
        Ok(affected)
    }

    /// Hard-delete messages older than `cutoff` that both participants have
    /// tombstoned. Tombstone rows follow via the cascade.
    pub fn purge_expired_messages(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM messages
             WHERE created_at < ?1
               AND (SELECT COUNT(*) FROM message_tombstones t
                    WHERE t.message_id = messages.id) >= 2",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(affected)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let recipient_str: String = row.get(2)?;
    let content: String = row.get(3)?;
    let read: bool = row.get(4)?;
    let read_at_str: Option<String> = row.get(5)?;
    let created_at_str: String = row.get(6)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let sender = UserId::parse(&sender_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let recipient = UserId::parse(&recipient_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let read_at = match read_at_str {
        Some(ts) => Some(parse_ts(5, &ts)?),
        None => None,
    };
    let created_at = parse_ts(6, &created_at_str)?;

    Ok(Message {
        id,
        sender,
        recipient,
        content,
        read,
        read_at,
        created_at,
    })
}

fn parse_ts(col: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("in-memory db")
    }

    fn send(db: &Database, from: &UserId, to: &UserId, text: &str) -> Message {
        db.create_message(from, to, text).expect("create message")
    }

    #[test]
    fn create_and_list_roundtrip() {
        let db = test_db();
        let (a, b) = (UserId::new(), UserId::new());

        let sent = send(&db, &a, &b, "  premier message  ");
        assert_eq!(sent.content, "premier message");
        assert!(!sent.read);
        assert!(sent.read_at.is_none());

        let thread = db.thread_messages(&b, &a, None, 50).unwrap();
        assert_eq!(thread.len(), 1);
        assert_eq!(thread[0], sent);
    }

    #[test]
    fn create_message_rejects_bad_input() {
        let db = test_db();
        let (a, b) = (UserId::new(), UserId::new());

        assert!(matches!(
            db.create_message(&a, &a, "hi"),
            Err(StoreError::InvalidMessage(_))
        ));
        assert!(matches!(
            db.create_message(&a, &b, "   "),
            Err(StoreError::InvalidMessage(_))
        ));
        let long = "x".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(matches!(
            db.create_message(&a, &b, &long),
            Err(StoreError::InvalidMessage(_))
        ));

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn thread_is_ascending_and_both_directions() {
        let db = test_db();
        let (a, b) = (UserId::new(), UserId::new());

        send(&db, &a, &b, "un");
        send(&db, &b, &a, "deux");
        send(&db, &a, &b, "trois");

        let thread = db.thread_messages(&a, &b, None, 50).unwrap();
        let contents: Vec<&str> = thread.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["un", "deux", "trois"]);
        for pair in thread.windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at);
        }
    }

    #[test]
    fn mark_read_is_idempotent() {
        let db = test_db();
        let (a, b) = (UserId::new(), UserId::new());

        send(&db, &a, &b, "un");
        send(&db, &a, &b, "deux");

        assert_eq!(db.count_unread(&b).unwrap(), 2);
        assert_eq!(db.mark_read_from(&b, &a).unwrap(), 2);
        assert_eq!(db.mark_read_from(&b, &a).unwrap(), 0);
        assert_eq!(db.count_unread(&b).unwrap(), 0);

        let thread = db.thread_messages(&b, &a, None, 50).unwrap();
        assert!(thread.iter().all(|m| m.read && m.read_at.is_some()));
    }

    #[test]
    fn mark_read_only_touches_that_peer() {
        let db = test_db();
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());

        send(&db, &a, &c, "de a");
        send(&db, &b, &c, "de b");

        assert_eq!(db.mark_read_from(&c, &a).unwrap(), 1);
        assert_eq!(db.count_unread(&c).unwrap(), 1);
        assert_eq!(db.count_unread_between(&c, &b).unwrap(), 1);
    }

    #[test]
    fn soft_delete_hides_for_viewer_only() {
        let db = test_db();
        let (a, b) = (UserId::new(), UserId::new());

        send(&db, &a, &b, "un");
        send(&db, &b, &a, "deux");

        assert_eq!(db.soft_delete_thread(&a, &b).unwrap(), 2);
        assert!(db.thread_messages(&a, &b, None, 50).unwrap().is_empty());

        // The peer still sees everything.
        assert_eq!(db.thread_messages(&b, &a, None, 50).unwrap().len(), 2);

        // Idempotent: nothing new to hide.
        assert_eq!(db.soft_delete_thread(&a, &b).unwrap(), 0);
    }

    #[test]
    fn tombstones_drop_out_of_unread_counts() {
        let db = test_db();
        let (a, b) = (UserId::new(), UserId::new());

        send(&db, &a, &b, "un");
        send(&db, &a, &b, "deux");
        assert_eq!(db.count_unread(&b).unwrap(), 2);

        db.soft_delete_thread(&b, &a).unwrap();
        assert_eq!(db.count_unread(&b).unwrap(), 0);
        assert_eq!(db.count_unread_between(&b, &a).unwrap(), 0);
    }

    #[test]
    fn soft_delete_messages_requires_participation() {
        let db = test_db();
        let (a, b, stranger) = (UserId::new(), UserId::new(), UserId::new());

        let msg = send(&db, &a, &b, "entre nous");

        assert_eq!(db.soft_delete_messages(&stranger, &[msg.id]).unwrap(), 0);
        assert_eq!(db.soft_delete_messages(&b, &[msg.id]).unwrap(), 1);
        // Unknown ids are skipped silently.
        assert_eq!(db.soft_delete_messages(&b, &[Uuid::new_v4()]).unwrap(), 0);
    }

    #[test]
    fn before_cursor_and_limit() {
        let db = test_db();
        let (a, b) = (UserId::new(), UserId::new());

        let first = send(&db, &a, &b, "un");
        send(&db, &a, &b, "deux");
        let third = send(&db, &a, &b, "trois");

        let limited = db.thread_messages(&b, &a, None, 2).unwrap();
        assert_eq!(limited.len(), 2);

        let page = db
            .thread_page_desc(&b, &a, third.created_at, 50)
            .unwrap();
        assert!(page.iter().all(|m| m.created_at < third.created_at));
        assert!(page.iter().any(|m| m.id == first.id));
        // Descending order.
        for pair in page.windows(2) {
            assert!(pair[0].created_at >= pair[1].created_at);
        }
    }

    #[test]
    fn latest_read_watermark() {
        let db = test_db();
        let (a, b) = (UserId::new(), UserId::new());

        assert!(db.latest_read_from(&b, &a).unwrap().is_none());

        send(&db, &a, &b, "un");
        let last = send(&db, &a, &b, "deux");
        db.mark_read_from(&b, &a).unwrap();

        let watermark = db.latest_read_from(&b, &a).unwrap().expect("watermark");
        assert_eq!(watermark, last.created_at);
    }

    #[test]
    fn purge_requires_both_tombstones_and_age() {
        let db = test_db();
        let (a, b) = (UserId::new(), UserId::new());

        let old = send(&db, &a, &b, "vieux");
        send(&db, &a, &b, "recent");

        // Backdate the first message well past any cutoff.
        let past = Utc::now() - chrono::Duration::days(90);
        db.conn()
            .execute(
                "UPDATE messages SET created_at = ?1 WHERE id = ?2",
                params![past.to_rfc3339(), old.id.to_string()],
            )
            .unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(30);

        // Only one side tombstoned: nothing purged.
        db.soft_delete_thread(&a, &b).unwrap();
        assert_eq!(db.purge_expired_messages(cutoff).unwrap(), 0);

        // Both sides tombstoned: only the old row goes.
        db.soft_delete_thread(&b, &a).unwrap();
        assert_eq!(db.purge_expired_messages(cutoff).unwrap(), 1);

        let remaining: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 1);

        // Cascade removed the purged message's tombstones.
        let orphaned: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM message_tombstones WHERE message_id = ?1",
                params![old.id.to_string()],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(orphaned, 0);
    }
}
