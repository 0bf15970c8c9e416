//! Shared vocabulary of the Étincelle realtime backend: identifiers, plan
//! tiers, socket event envelopes, session tokens, and protocol constants.

pub mod constants;
pub mod events;
pub mod plan;
pub mod session;
pub mod types;

pub use events::{ClientEvent, NotificationPush, NotificationSender, ServerEvent};
pub use plan::{can_video_chat, Plan};
pub use session::SessionToken;
pub use types::{Message, NotificationKind, PeerProfile, UserId};
