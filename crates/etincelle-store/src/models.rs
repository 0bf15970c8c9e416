//! Domain model structs persisted in the SQLite database.
//!
//! The [`Message`](etincelle_shared::Message) wire type lives in
//! `etincelle-shared`; this module holds the rows only the backend sees.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use etincelle_shared::{can_video_chat, NotificationKind, PeerProfile, Plan, UserId};

// ---------------------------------------------------------------------------
// UserRecord
// ---------------------------------------------------------------------------

/// The slice of an account this subsystem reads. Writes happen in the account
/// system; rows here are kept in sync by it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub plan: Plan,
    /// Explicit "accept video calls" toggle, independent of the plan.
    pub video_chat: bool,
    /// False for deactivated, deleted, or suspended accounts.
    pub active: bool,
    /// When identity verification passed, if ever.
    pub verified_at: Option<DateTime<Utc>>,
    pub photo: Option<String>,
    pub age: Option<u32>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    /// Public projection handed to the other side of a thread.
    pub fn profile(&self) -> PeerProfile {
        PeerProfile {
            id: self.id.clone(),
            username: self.username.clone(),
            photo: self.photo.clone(),
            age: self.age,
            city: self.city.clone(),
            country: self.country.clone(),
            verified: self.verified_at.is_some(),
            video_chat: self.video_chat,
            premium: self.plan.is_premium_or_better(),
        }
    }

    /// Video-call entitlement for this account.
    pub fn can_video_chat(&self) -> bool {
        can_video_chat(self.plan, self.video_chat)
    }
}

// ---------------------------------------------------------------------------
// NotificationRecord
// ---------------------------------------------------------------------------

/// A persisted notification feed entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub recipient: UserId,
    /// Absent for system notifications.
    pub sender: Option<UserId>,
    pub kind: NotificationKind,
    pub body: String,
    /// Optional deep link the client opens on tap.
    pub link: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}
