use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// UserId
// ---------------------------------------------------------------------------

/// Account identifier minted by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A direct message between two users.
///
/// Per-viewer deletion state lives in the store (tombstone rows), not on the
/// wire shape; clients never see who soft-deleted what.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message identifier (server-assigned).
    pub id: Uuid,
    pub sender: UserId,
    pub recipient: UserId,
    /// Trimmed plain text, at most `MAX_MESSAGE_CHARS` characters.
    pub content: String,
    /// Whether the recipient has read the message.
    pub read: bool,
    /// When the recipient read it, if ever.
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// PeerProfile
// ---------------------------------------------------------------------------

/// Public slice of an account, safe to hand to the other side of a thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PeerProfile {
    pub id: UserId,
    pub username: String,
    pub photo: Option<String>,
    pub age: Option<u32>,
    pub city: Option<String>,
    pub country: Option<String>,
    /// Identity verification badge.
    pub verified: bool,
    /// Whether this user accepts incoming video calls.
    pub video_chat: bool,
    pub premium: bool,
}

// ---------------------------------------------------------------------------
// NotificationKind
// ---------------------------------------------------------------------------

/// Categories the notification feed understands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Like,
    Match,
    Message,
    Favorite,
    Wave,
    Superlike,
    System,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Match => "match",
            Self::Message => "message",
            Self::Favorite => "favorite",
            Self::Wave => "wave",
            Self::Superlike => "superlike",
            Self::System => "system",
        }
    }

    /// Anything outside the known set collapses to `System`.
    pub fn parse(s: &str) -> Self {
        match s {
            "like" => Self::Like,
            "match" => Self::Match,
            "message" => Self::Message,
            "favorite" => Self::Favorite,
            "wave" => Self::Wave,
            "superlike" => Self::Superlike,
            _ => Self::System,
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_parse_roundtrip() {
        let id = UserId::new();
        let parsed = UserId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_user_id_rejects_garbage() {
        assert!(UserId::parse("not-a-uuid").is_err());
        assert!(UserId::parse("").is_err());
    }

    #[test]
    fn test_notification_kind_unknown_is_system() {
        assert_eq!(NotificationKind::parse("like"), NotificationKind::Like);
        assert_eq!(NotificationKind::parse("party"), NotificationKind::System);
        assert_eq!(NotificationKind::parse(""), NotificationKind::System);
    }

    #[test]
    fn test_message_wire_shape_is_camel_case() {
        let msg = Message {
            id: Uuid::new_v4(),
            sender: UserId::new(),
            recipient: UserId::new(),
            content: "salut".to_string(),
            read: false,
            read_at: None,
            created_at: Utc::now(),
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("createdAt").is_some());
        assert!(json.get("readAt").is_some());
        assert!(json.get("created_at").is_none());
    }
}
