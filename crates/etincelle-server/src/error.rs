use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use etincelle_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Unknown or invalid recipient")]
    BadRecipient,

    #[error("You cannot message yourself")]
    SelfMessage,

    #[error("Message content is empty")]
    EmptyMessage,

    #[error("Unknown bulk action")]
    BadAction,

    #[error("You can only message your matches")]
    NotMatched,

    #[error("This profile is no longer available")]
    RecipientUnavailable,

    #[error("Profile not found")]
    PeerNotFound,

    #[error("Upgrade required for video chat")]
    UpgradeRequired,

    #[error("Video chat is not available for this pair")]
    NotAllowed,

    #[error("Please wait before requesting another call")]
    Cooldown,

    #[error("Too many messages, slow down")]
    RateLimited,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Stable machine-readable code carried in every error payload, both
    /// HTTP bodies and socket error events.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::Unauthenticated => "unauthenticated",
            ServerError::BadRecipient => "bad_recipient",
            ServerError::SelfMessage => "self_message",
            ServerError::EmptyMessage => "empty_message",
            ServerError::BadAction => "bad_action",
            ServerError::NotMatched => "not_matched",
            ServerError::RecipientUnavailable => "recipient_unavailable",
            ServerError::PeerNotFound => "peer_not_found",
            ServerError::UpgradeRequired => "upgrade_required",
            ServerError::NotAllowed => "not_allowed",
            ServerError::Cooldown => "cooldown",
            ServerError::RateLimited => "rate_limited",
            ServerError::BadRequest(_) => "bad_request",
            ServerError::Store(StoreError::InvalidMessage(_)) => "bad_request",
            ServerError::Store(_) | ServerError::Internal(_) => "internal",
        }
    }

    /// Message safe to show to the client. Store and internal errors are
    /// never leaked verbatim.
    pub fn public_message(&self) -> String {
        match self {
            ServerError::Store(StoreError::InvalidMessage(reason)) => {
                format!("Invalid message: {reason}")
            }
            ServerError::Store(_) | ServerError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ServerError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ServerError::BadRecipient
            | ServerError::SelfMessage
            | ServerError::EmptyMessage
            | ServerError::BadAction
            | ServerError::NotAllowed
            | ServerError::BadRequest(_)
            | ServerError::Store(StoreError::InvalidMessage(_)) => StatusCode::BAD_REQUEST,
            ServerError::NotMatched => StatusCode::FORBIDDEN,
            ServerError::RecipientUnavailable => StatusCode::GONE,
            ServerError::PeerNotFound => StatusCode::NOT_FOUND,
            ServerError::UpgradeRequired => StatusCode::PAYMENT_REQUIRED,
            ServerError::Cooldown | ServerError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ServerError::Store(_) | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = serde_json::json!({
            "ok": false,
            "code": self.code(),
            "message": self.public_message(),
        });

        (status, axum::Json(body)).into_response()
    }
}
