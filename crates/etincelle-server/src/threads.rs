//! Conversation operations between matched users.
//!
//! Everything stateful lives in the store; this service wires validation,
//! persistence, and live fan-out together. Events for a send are emitted
//! only after the row is durable.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use etincelle_shared::constants::{
    HISTORY_PAGE_DEFAULT, MAX_MESSAGE_CHARS, THREAD_PAGE_DEFAULT,
};
use etincelle_shared::{Message, NotificationKind, PeerProfile, ServerEvent, UserId};
use etincelle_store::SharedDb;

use crate::error::ServerError;
use crate::notify::Notifier;
use crate::oracle::{Directory, MatchOracle};
use crate::registry::Registry;

/// One page of a thread plus the peer's public projection.
pub struct ThreadView {
    pub peer: PeerProfile,
    pub items: Vec<Message>,
}

/// Result of a read-marking operation.
pub struct ReadSummary {
    /// Viewer's visible unread total after marking.
    pub unread: u64,
    /// Creation time of the newest message marked read, if any ever was.
    pub until: Option<DateTime<Utc>>,
}

/// Viewer's unread counts grouped by matched peer.
pub struct UnreadBreakdown {
    pub by: HashMap<UserId, u64>,
    pub total: u64,
}

/// Parsed bulk maintenance action.
pub enum BulkAction {
    DeleteThreads(Vec<UserId>),
    DeleteMessages(Vec<Uuid>),
}

#[derive(Clone)]
pub struct ThreadService {
    db: SharedDb,
    registry: Registry,
    oracle: Arc<dyn MatchOracle>,
    directory: Arc<dyn Directory>,
    notifier: Arc<dyn Notifier>,
}

impl ThreadService {
    pub fn new(
        db: SharedDb,
        registry: Registry,
        oracle: Arc<dyn MatchOracle>,
        directory: Arc<dyn Directory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            db,
            registry,
            oracle,
            directory,
            notifier,
        }
    }

    /// Validate, persist, and fan out one message.
    ///
    /// Content is trimmed and truncated to [`MAX_MESSAGE_CHARS`] before it
    /// reaches the store. The recipient must exist, be active, and be
    /// mutually matched with the sender.
    pub async fn send_message(
        &self,
        sender: &UserId,
        recipient: &UserId,
        content: &str,
    ) -> Result<Message, ServerError> {
        if sender == recipient {
            return Err(ServerError::SelfMessage);
        }

        let content = clip_chars(content.trim(), MAX_MESSAGE_CHARS);
        if content.is_empty() {
            return Err(ServerError::EmptyMessage);
        }

        let recipient_record = self
            .directory
            .user_by_id(recipient)
            .await?
            .ok_or(ServerError::BadRecipient)?;
        if !recipient_record.active {
            return Err(ServerError::RecipientUnavailable);
        }

        if !self.oracle.is_mutual(sender, recipient).await? {
            return Err(ServerError::NotMatched);
        }

        let (message, unread) = {
            let db = self.db.lock().await;
            let message = db.create_message(sender, recipient, content)?;
            let unread = db.count_unread(recipient)?;
            (message, unread)
        };

        self.registry
            .broadcast_to_user(recipient, &ServerEvent::ChatIncoming(message.clone()))
            .await;
        self.registry
            .broadcast_to_user(sender, &ServerEvent::ChatSent(message.clone()))
            .await;
        self.registry
            .broadcast_to_user(recipient, &ServerEvent::UnreadUpdate { unread })
            .await;

        self.notifier
            .notify(
                recipient,
                Some(sender),
                NotificationKind::Message,
                "sent you a message",
                Some(&format!("/messages?with={sender}")),
            )
            .await;

        debug!(message = %message.id, sender = %sender, "Message stored and fanned out");
        Ok(message)
    }

    /// Ascending thread page plus the peer's public projection.
    ///
    /// Opening a thread marks the peer's messages read; receipts go out
    /// only when something was actually unread.
    pub async fn load_thread(
        &self,
        viewer: &UserId,
        peer_id: &UserId,
        before: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> Result<ThreadView, ServerError> {
        let peer = self
            .directory
            .user_by_id(peer_id)
            .await?
            .ok_or(ServerError::PeerNotFound)?;
        if !peer.active {
            return Err(ServerError::RecipientUnavailable);
        }

        let limit = limit.unwrap_or(THREAD_PAGE_DEFAULT);
        let (items, receipts) = {
            let db = self.db.lock().await;
            let items = db.thread_messages(viewer, peer_id, before, limit)?;
            let marked = db.mark_read_from(viewer, peer_id)?;
            let receipts = if marked > 0 {
                Some((db.count_unread(viewer)?, db.latest_read_from(viewer, peer_id)?))
            } else {
                None
            };
            (items, receipts)
        };

        if let Some((unread, until)) = receipts {
            self.push_read_receipts(viewer, peer_id, unread, until).await;
        }

        Ok(ThreadView {
            peer: peer.profile(),
            items,
        })
    }

    /// Descending history page. Pure read, no receipts.
    pub async fn history_page(
        &self,
        viewer: &UserId,
        peer: &UserId,
        before: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> Result<Vec<Message>, ServerError> {
        let before = before.unwrap_or_else(Utc::now);
        let limit = limit.unwrap_or(HISTORY_PAGE_DEFAULT);
        let db = self.db.lock().await;
        Ok(db.thread_page_desc(viewer, peer, before, limit)?)
    }

    /// Mark everything the peer sent as read. Idempotent; receipts go out
    /// only when something was actually unread.
    pub async fn mark_thread_read(
        &self,
        viewer: &UserId,
        peer: &UserId,
    ) -> Result<ReadSummary, ServerError> {
        let (marked, unread, until) = {
            let db = self.db.lock().await;
            let marked = db.mark_read_from(viewer, peer)?;
            let unread = db.count_unread(viewer)?;
            let until = db.latest_read_from(viewer, peer)?;
            (marked, unread, until)
        };

        if marked > 0 {
            self.push_read_receipts(viewer, peer, unread, until).await;
        }

        Ok(ReadSummary { unread, until })
    }

    /// Soft-delete the whole thread for the viewer only. Hidden messages no
    /// longer count as unread, so the viewer's badge is republished.
    pub async fn clear_thread(&self, viewer: &UserId, peer: &UserId) -> Result<usize, ServerError> {
        let (cleared, unread) = {
            let db = self.db.lock().await;
            let cleared = db.soft_delete_thread(viewer, peer)?;
            (cleared, db.count_unread(viewer)?)
        };

        self.registry
            .broadcast_to_user(viewer, &ServerEvent::UnreadUpdate { unread })
            .await;

        Ok(cleared)
    }

    /// Bulk soft-delete. Ids that do not resolve are skipped silently.
    pub async fn bulk_clear(
        &self,
        viewer: &UserId,
        action: BulkAction,
    ) -> Result<usize, ServerError> {
        let db = self.db.lock().await;
        let modified = match action {
            BulkAction::DeleteThreads(peers) => {
                let mut total = 0;
                for peer in &peers {
                    total += db.soft_delete_thread(viewer, peer)?;
                }
                total
            }
            BulkAction::DeleteMessages(ids) => db.soft_delete_messages(viewer, &ids)?,
        };
        Ok(modified)
    }

    /// Viewer's visible unread total across all threads.
    pub async fn unread_total(&self, viewer: &UserId) -> Result<u64, ServerError> {
        let db = self.db.lock().await;
        Ok(db.count_unread(viewer)?)
    }

    /// Unread counts grouped by matched peer. Peers without unread are
    /// omitted; unmatched senders are not listed at all.
    pub async fn unread_by_thread(&self, viewer: &UserId) -> Result<UnreadBreakdown, ServerError> {
        let matched = self.oracle.matched_ids(viewer).await?;

        let db = self.db.lock().await;
        let mut by = HashMap::new();
        let mut total = 0;
        for peer in matched {
            let count = db.count_unread_between(viewer, &peer)?;
            if count > 0 {
                total += count;
                by.insert(peer, count);
            }
        }

        Ok(UnreadBreakdown { by, total })
    }

    async fn push_read_receipts(
        &self,
        viewer: &UserId,
        peer: &UserId,
        unread: u64,
        until: Option<DateTime<Utc>>,
    ) {
        self.registry
            .broadcast_to_user(viewer, &ServerEvent::UnreadUpdate { unread })
            .await;
        self.registry
            .broadcast_to_user(
                peer,
                &ServerEvent::ChatRead {
                    with: viewer.clone(),
                    until: until.unwrap_or_else(Utc::now),
                },
            )
            .await;
    }
}

/// Cut `s` after `max` characters, on a char boundary.
fn clip_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
