//! Best-effort notification fan-out.
//!
//! Notification delivery must never fail the operation that triggered it,
//! so the trait returns nothing and implementations log their own errors.

use async_trait::async_trait;
use tracing::{debug, warn};

use etincelle_shared::{
    NotificationKind, NotificationPush, NotificationSender, ServerEvent, UserId,
};
use etincelle_store::notifications::new_record;
use etincelle_store::SharedDb;

use crate::registry::Registry;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        recipient: &UserId,
        sender: Option<&UserId>,
        kind: NotificationKind,
        body: &str,
        link: Option<&str>,
    );
}

/// Persists the notification and pushes it to the recipient's room.
pub struct StoreNotifier {
    db: SharedDb,
    registry: Registry,
}

impl StoreNotifier {
    pub fn new(db: SharedDb, registry: Registry) -> Self {
        Self { db, registry }
    }
}

#[async_trait]
impl Notifier for StoreNotifier {
    async fn notify(
        &self,
        recipient: &UserId,
        sender: Option<&UserId>,
        kind: NotificationKind,
        body: &str,
        link: Option<&str>,
    ) {
        let record = new_record(recipient, sender, kind, body, link);

        let (unread, sender_record) = {
            let db = self.db.lock().await;

            if let Err(e) = db.insert_notification(&record) {
                warn!(recipient = %recipient, error = %e, "Failed to persist notification");
                return;
            }

            let unread = db.count_unread_notifications(recipient).unwrap_or(0);
            let sender_record = match sender {
                Some(id) => db.user_by_id(id).unwrap_or(None),
                None => None,
            };
            (unread, sender_record)
        };

        let push = NotificationPush {
            id: record.id,
            kind: record.kind,
            body: record.body,
            sender: sender_record.map(|u| NotificationSender {
                id: u.id,
                username: u.username,
                photo: u.photo,
            }),
            link: record.link,
            created_at: record.created_at,
        };

        let delivered = self
            .registry
            .broadcast_to_user(recipient, &ServerEvent::NewNotification(push))
            .await;
        self.registry
            .broadcast_to_user(recipient, &ServerEvent::NotifUpdate { unread })
            .await;

        debug!(recipient = %recipient, delivered, "Notification dispatched");
    }
}

/// Swallows every notification. Used by tests that only care about the
/// operation being notified about.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(
        &self,
        _recipient: &UserId,
        _sender: Option<&UserId>,
        _kind: NotificationKind,
        _body: &str,
        _link: Option<&str>,
    ) {
    }
}
