use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Message, NotificationKind, UserId};

/// Everything a client may send over the socket.
///
/// Envelope: `{ "event": "<name>", "data": <payload> }`. Event names are the
/// wire contract; payloads that fail to parse are dropped by the socket loop,
/// never answered with a disconnect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Legacy handshake; the payload is the user id the client claims.
    /// The server only honors it when it matches the session identity.
    #[serde(rename = "register_for_notifications")]
    RegisterForNotifications(UserId),

    #[serde(rename = "chat:typing")]
    Typing { to: UserId },

    /// Realtime send channel. Ignored unless the server enables it.
    #[serde(rename = "chat_message")]
    ChatMessage { to: UserId, content: String },

    #[serde(rename = "rtc:call")]
    RtcCall {
        to: UserId,
        #[serde(default)]
        meta: serde_json::Value,
    },

    #[serde(rename = "rtc:offer")]
    RtcOffer { to: UserId, sdp: serde_json::Value },

    #[serde(rename = "rtc:answer")]
    RtcAnswer { to: UserId, sdp: serde_json::Value },

    #[serde(rename = "rtc:candidate")]
    RtcCandidate {
        to: UserId,
        candidate: serde_json::Value,
    },

    #[serde(rename = "rtc:end")]
    RtcEnd {
        to: UserId,
        #[serde(default)]
        reason: Option<String>,
    },

    /// Legacy alias for `rtc:end` with reason `hangup`.
    #[serde(rename = "rtc:hangup")]
    RtcHangup { to: UserId },

    /// Legacy alias for `rtc:end` with reason `declined`.
    #[serde(rename = "rtc:decline")]
    RtcDecline { to: UserId },
}

/// Everything the server may push to a connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// A message addressed to this user, pushed right after persistence.
    #[serde(rename = "chat:incoming")]
    ChatIncoming(Message),

    /// Echo of a message this user sent (other devices stay in sync).
    #[serde(rename = "chat:sent")]
    ChatSent(Message),

    /// Legacy event emitted for sends that originated on the socket.
    #[serde(rename = "new_message")]
    NewMessage(Message),

    /// New total of unread messages for the receiving user.
    #[serde(rename = "unread_update")]
    UnreadUpdate { unread: u64 },

    /// Read receipt: `with` read everything up to `until`.
    #[serde(rename = "chat:read")]
    ChatRead { with: UserId, until: DateTime<Utc> },

    #[serde(rename = "chat:typing")]
    Typing { from: UserId },

    /// Directed rejection of a socket-originated chat action.
    #[serde(rename = "chat:error")]
    ChatError { code: String, message: String },

    #[serde(rename = "new_notification")]
    NewNotification(NotificationPush),

    /// New total of unread notifications.
    #[serde(rename = "notif_update")]
    NotifUpdate { unread: u64 },

    #[serde(rename = "rtc:ring")]
    RtcRing {
        from: UserId,
        meta: serde_json::Value,
    },

    #[serde(rename = "rtc:offer")]
    RtcOffer { from: UserId, sdp: serde_json::Value },

    #[serde(rename = "rtc:answer")]
    RtcAnswer { from: UserId, sdp: serde_json::Value },

    #[serde(rename = "rtc:candidate")]
    RtcCandidate {
        from: UserId,
        candidate: serde_json::Value,
    },

    #[serde(rename = "rtc:end")]
    RtcEnd { from: UserId, reason: String },

    /// Directed signaling failure, e.g. the entitlement gate.
    #[serde(rename = "rtc:error")]
    RtcError { code: String, message: String },
}

/// Payload of `new_notification`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPush {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub body: String,
    pub sender: Option<NotificationSender>,
    pub link: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Public slice of the sender embedded in a notification push.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSender {
    pub id: UserId,
    pub username: String,
    pub photo: Option<String>,
}
