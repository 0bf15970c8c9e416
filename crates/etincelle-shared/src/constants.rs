/// Application name
pub const APP_NAME: &str = "Étincelle";

/// Maximum message length in characters; longer input is truncated at the
/// edge before it reaches the store.
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Default page size for the ascending thread view.
pub const THREAD_PAGE_DEFAULT: u32 = 50;

/// Hard cap for the ascending thread view.
pub const THREAD_PAGE_MAX: u32 = 200;

/// Default page size for descending history pagination.
pub const HISTORY_PAGE_DEFAULT: u32 = 30;

/// Hard cap for descending history pagination.
pub const HISTORY_PAGE_MAX: u32 = 100;

/// Sliding window for the realtime send channel.
pub const SOCKET_SEND_WINDOW_SECS: u64 = 15;

/// Sends allowed per connection inside one window.
pub const SOCKET_SEND_MAX: u32 = 8;

/// Depth of each connection's outbound event queue; publishers never block,
/// a full queue drops the event for that connection.
pub const EVENT_QUEUE_DEPTH: usize = 256;

/// Interval between server-initiated WebSocket pings.
pub const WS_PING_INTERVAL_SECS: u64 = 30;

/// Default HTTP listen port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Known call-end reasons. Unknown inbound reasons are relayed verbatim.
pub const END_REASON_HANGUP: &str = "hangup";
pub const END_REASON_DECLINED: &str = "declined";
pub const END_REASON_REMOTE_HANGUP: &str = "remote-hangup";
pub const END_REASON_DISCONNECT: &str = "disconnect";
pub const END_REASON_TIMEOUT: &str = "timeout";
