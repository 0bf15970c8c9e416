//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use etincelle_shared::constants::DEFAULT_HTTP_PORT;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Filesystem path of the SQLite database.
    /// Env: `DATABASE_PATH`
    /// Default: `./etincelle.db`
    pub database_path: PathBuf,

    /// Ed25519 public key of the session provider (hex-encoded, 64 chars).
    /// Session tokens presented by clients must be signed by this key.
    /// Env: `SESSION_PUBKEY`
    /// Default: all-zeros (development only).
    pub session_pubkey: [u8; 32],

    /// Whether messages may be sent over the realtime socket in addition
    /// to the HTTP endpoint.
    /// Env: `ENABLE_SOCKET_SEND` (`1` to enable)
    /// Default: `false`
    pub socket_send_enabled: bool,

    // -- Call signaling settings --

    /// Minimum delay between video-call requests for the same user pair.
    /// Env: `CALL_COOLDOWN_MS`
    /// Default: `20000` (20 seconds)
    pub call_cooldown_ms: u64,

    /// How long an unanswered call may ring before it is expired.
    /// Env: `RING_TIMEOUT_SECS`
    /// Default: `45`
    pub ring_timeout_secs: u64,

    // -- Retention settings --

    /// Age in days after which mutually deleted messages and read
    /// notifications are permanently removed. Zero or negative disables
    /// the retention sweep.
    /// Env: `HARD_DELETE_DAYS`
    /// Default: `30`
    pub hard_delete_days: i64,

    /// Interval between retention sweeps, in milliseconds.
    /// Env: `HARD_DELETE_INTERVAL_MS`
    /// Default: `21600000` (6 hours)
    pub hard_delete_interval_ms: u64,

    // -- HTTP rate limiting --

    /// Sustained request rate allowed per client IP, in requests/second.
    /// Env: `RATE_LIMIT_PER_SEC`
    /// Default: `10.0`
    pub rate_limit_per_sec: f64,

    /// Burst capacity per client IP.
    /// Env: `RATE_LIMIT_BURST`
    /// Default: `30.0`
    pub rate_limit_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./etincelle.db"),
            session_pubkey: [0u8; 32],
            socket_send_enabled: false,
            call_cooldown_ms: 20_000,
            ring_timeout_secs: 45,
            hard_delete_days: 30,
            hard_delete_interval_ms: 6 * 60 * 60 * 1000, // 6 hours
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(
                    value = %addr,
                    "Invalid HTTP_ADDR, using default"
                );
            }
        }

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Ok(hex_key) = std::env::var("SESSION_PUBKEY") {
            match parse_hex_pubkey(&hex_key) {
                Ok(key) => config.session_pubkey = key,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid SESSION_PUBKEY, using default (dev-only)"
                    );
                }
            }
        }

        if let Ok(val) = std::env::var("ENABLE_SOCKET_SEND") {
            config.socket_send_enabled = val == "1" || val == "true";
        }

        // -- Call signaling settings --

        if let Ok(val) = std::env::var("CALL_COOLDOWN_MS") {
            if let Ok(n) = val.parse::<u64>() {
                config.call_cooldown_ms = n;
            }
        }

        if let Ok(val) = std::env::var("RING_TIMEOUT_SECS") {
            if let Ok(n) = val.parse::<u64>() {
                config.ring_timeout_secs = n;
            }
        }

        // -- Retention settings --

        if let Ok(val) = std::env::var("HARD_DELETE_DAYS") {
            if let Ok(n) = val.parse::<i64>() {
                config.hard_delete_days = n;
            }
        }

        if let Ok(val) = std::env::var("HARD_DELETE_INTERVAL_MS") {
            if let Ok(n) = val.parse::<u64>() {
                config.hard_delete_interval_ms = n;
            }
        }

        // -- HTTP rate limiting --

        if let Ok(val) = std::env::var("RATE_LIMIT_PER_SEC") {
            if let Ok(n) = val.parse::<f64>() {
                config.rate_limit_per_sec = n;
            }
        }

        if let Ok(val) = std::env::var("RATE_LIMIT_BURST") {
            if let Ok(n) = val.parse::<f64>() {
                config.rate_limit_burst = n;
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    /// Whether the retention sweep is enabled at all.
    pub fn retention_enabled(&self) -> bool {
        self.hard_delete_days > 0
    }
}

/// Parse a 64-character hex string into a 32-byte array.
fn parse_hex_pubkey(raw: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(raw.trim()).map_err(|e| e.to_string())?;
    bytes
        .try_into()
        .map_err(|v: Vec<u8>| format!("expected 32 key bytes, got {}", v.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.session_pubkey, [0u8; 32]);
        assert!(!config.socket_send_enabled);
        assert_eq!(config.call_cooldown_ms, 20_000);
        assert!(config.retention_enabled());
    }

    #[test]
    fn test_parse_hex_pubkey() {
        let hex = "ab".repeat(32);
        let key = parse_hex_pubkey(&hex).unwrap();
        assert_eq!(key, [0xab; 32]);
    }

    #[test]
    fn test_parse_hex_pubkey_wrong_length() {
        assert!(parse_hex_pubkey("abcd").is_err());
    }

    #[test]
    fn test_retention_disabled_at_zero_days() {
        let mut config = ServerConfig::default();
        config.hard_delete_days = 0;
        assert!(!config.retention_enabled());
    }
}
