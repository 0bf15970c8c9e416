use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::types::UserId;

// Token signed by the identity provider, presented by clients on every HTTP
// request and on the WebSocket upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionToken {
    pub user_id: UserId,
    pub valid_until: DateTime<Utc>,
    pub signature: Vec<u8>,
}

pub fn check_session_token_with_key(token: &SessionToken, provider_pubkey: &[u8; 32]) -> bool {
    if Utc::now() > token.valid_until {
        return false;
    }

    let Ok(verifying_key) = VerifyingKey::from_bytes(provider_pubkey) else {
        return false;
    };

    // payload = user_id (16 raw bytes) || valid_until (rfc3339)
    let mut payload = Vec::new();
    payload.extend_from_slice(token.user_id.0.as_bytes());
    payload.extend_from_slice(token.valid_until.to_rfc3339().as_bytes());

    let Ok(signature) = Signature::from_slice(&token.signature) else {
        return false;
    };

    verifying_key.verify(&payload, &signature).is_ok()
}

pub fn create_session_token(
    user_id: &UserId,
    valid_until: DateTime<Utc>,
    provider_signing_key: &ed25519_dalek::SigningKey,
) -> SessionToken {
    use ed25519_dalek::Signer;

    let mut payload = Vec::new();
    payload.extend_from_slice(user_id.0.as_bytes());
    payload.extend_from_slice(valid_until.to_rfc3339().as_bytes());

    let signature = provider_signing_key.sign(&payload);

    SessionToken {
        user_id: user_id.clone(),
        valid_until,
        signature: signature.to_bytes().to_vec(),
    }
}

impl SessionToken {
    /// Encode the token as a base64url string for headers and query strings.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        base64_url_encode(&json)
    }

    /// Decode a base64url string back into a SessionToken.
    pub fn decode(s: &str) -> Result<Self, SessionDecodeError> {
        let bytes = base64_url_decode(s)?;
        serde_json::from_slice(&bytes).map_err(|_| SessionDecodeError::InvalidFormat)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionDecodeError {
    #[error("Invalid session token format")]
    InvalidFormat,

    #[error("Base64 decode error")]
    Base64Decode,
}

fn base64_url_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    URL_SAFE_NO_PAD.encode(data)
}

fn base64_url_decode(s: &str) -> Result<Vec<u8>, SessionDecodeError> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    URL_SAFE_NO_PAD
        .decode(s.trim())
        .map_err(|_| SessionDecodeError::Base64Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn test_session_token_valid() {
        let provider_key = SigningKey::generate(&mut OsRng);
        let provider_pubkey = provider_key.verifying_key().to_bytes();
        let user = UserId::new();

        let token = create_session_token(&user, Utc::now() + Duration::hours(12), &provider_key);

        assert!(check_session_token_with_key(&token, &provider_pubkey));
    }

    #[test]
    fn test_session_token_expired() {
        let provider_key = SigningKey::generate(&mut OsRng);
        let provider_pubkey = provider_key.verifying_key().to_bytes();
        let user = UserId::new();

        let token = create_session_token(&user, Utc::now() - Duration::hours(1), &provider_key);

        assert!(!check_session_token_with_key(&token, &provider_pubkey));
    }

    #[test]
    fn test_session_token_wrong_provider_key() {
        let provider_key = SigningKey::generate(&mut OsRng);
        let wrong_key = SigningKey::generate(&mut OsRng);
        let wrong_pubkey = wrong_key.verifying_key().to_bytes();
        let user = UserId::new();

        let token = create_session_token(&user, Utc::now() + Duration::hours(12), &provider_key);

        assert!(!check_session_token_with_key(&token, &wrong_pubkey));
    }

    #[test]
    fn test_session_token_encode_roundtrip() {
        let provider_key = SigningKey::generate(&mut OsRng);
        let user = UserId::new();

        let token = create_session_token(&user, Utc::now() + Duration::hours(12), &provider_key);
        let decoded = SessionToken::decode(&token.encode()).expect("decode should work");

        assert_eq!(decoded.user_id, user);
        assert_eq!(decoded.signature, token.signature);
    }

    #[test]
    fn test_session_token_tampered_user_fails() {
        let provider_key = SigningKey::generate(&mut OsRng);
        let provider_pubkey = provider_key.verifying_key().to_bytes();

        let mut token =
            create_session_token(&UserId::new(), Utc::now() + Duration::hours(12), &provider_key);
        token.user_id = UserId::new();

        assert!(!check_session_token_with_key(&token, &provider_pubkey));
    }
}
