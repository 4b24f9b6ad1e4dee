use crate::services::{
    content_store::ContentError, delegation_service::DelegationError, share_service::ShareError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<ShareError> for AppError {
    fn from(err: ShareError) -> Self {
        match err {
            ShareError::FileNotFound(_) => AppError::not_found("File not found"),
            ShareError::LinkNotFound => AppError::not_found("Share link not found"),
            ShareError::SharedFileMissing(_) => AppError::not_found("File no longer exists"),
            ShareError::Denied(reason) => AppError::new(StatusCode::FORBIDDEN, reason.to_string()),
            ShareError::Validation(msg) => AppError::bad_request(msg),
            ShareError::External(err) => AppError::from(err),
            other => {
                tracing::error!("share operation failed: {}", other);
                AppError::internal("Internal error")
            }
        }
    }
}

impl From<ContentError> for AppError {
    fn from(err: ContentError) -> Self {
        match err {
            ContentError::NotFound(_) => AppError::not_found("Content not found"),
            ContentError::InvalidAddress(_) => AppError::bad_request(err.to_string()),
            other => {
                tracing::error!("content store failure: {}", other);
                AppError::new(StatusCode::BAD_GATEWAY, "Content store request failed")
            }
        }
    }
}

impl From<DelegationError> for AppError {
    fn from(err: DelegationError) -> Self {
        match err {
            DelegationError::InvalidIdentity => AppError::bad_request(err.to_string()),
            DelegationError::External(err) => AppError::from(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::share_link::DenyReason;

    #[test]
    fn share_errors_map_to_statuses() {
        let cases = [
            (ShareError::FileNotFound("f".into()), StatusCode::NOT_FOUND),
            (ShareError::LinkNotFound, StatusCode::NOT_FOUND),
            (ShareError::SharedFileMissing("f".into()), StatusCode::NOT_FOUND),
            (ShareError::Denied(DenyReason::Expired), StatusCode::FORBIDDEN),
            (ShareError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (
                ShareError::External(ContentError::UnknownDelegation("d".into())),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn deny_messages_name_the_reason() {
        let err = AppError::from(ShareError::Denied(DenyReason::Revoked));
        assert_eq!(err.message, "This share link has been revoked");
        let err = AppError::from(ShareError::LinkNotFound);
        assert_eq!(err.message, "Share link not found");
    }
}
