//! Session authentication for HTTP and socket clients.
//!
//! Clients present an encoded session token minted by the account provider.
//! The server only verifies the provider's Ed25519 signature; it never
//! issues tokens itself.

use axum::http::HeaderMap;

use etincelle_shared::session::check_session_token_with_key;
use etincelle_shared::{SessionToken, UserId};

use crate::config::ServerConfig;
use crate::error::ServerError;

/// Extract the bearer token from an `Authorization` header, if present.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("authorization")?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Decode an encoded session token and verify it against the provider key.
pub fn resolve_session(token: &str, provider_pubkey: &[u8; 32]) -> Option<UserId> {
    let session = SessionToken::decode(token).ok()?;
    if check_session_token_with_key(&session, provider_pubkey) {
        Some(session.user_id)
    } else {
        None
    }
}

/// Authenticate an HTTP request from its `Authorization` header.
pub fn authed_user(headers: &HeaderMap, config: &ServerConfig) -> Result<UserId, ServerError> {
    let token = bearer_token(headers).ok_or(ServerError::Unauthenticated)?;
    resolve_session(token, &config.session_pubkey).ok_or(ServerError::Unauthenticated)
}
