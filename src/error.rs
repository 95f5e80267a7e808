use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::lifecycle::{ErrorKind, LifecycleError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Lifecycle(e) => match e.kind() {
                ErrorKind::Validation => (StatusCode::BAD_REQUEST, "validation"),
                ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
                ErrorKind::StateConflict => (StatusCode::CONFLICT, "state_conflict"),
                ErrorKind::Decode => (StatusCode::UNPROCESSABLE_ENTITY, "decode"),
                ErrorKind::GenerationExhausted => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "generation_exhausted",
                ),
                ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            },
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            AppError::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large"),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return AppError::PayloadTooLarge;
        }
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();

        let message = if status.is_server_error() {
            tracing::error!(error = ?self, "Request failed");
            match &self {
                AppError::Lifecycle(LifecycleError::GenerationExhausted(_)) => self.to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            tracing::debug!(error = %self, kind, "Request rejected");
            self.to_string()
        };

        let body = Json(json!({
            "error": kind,
            "message": message,
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::coordinates::CoordinateError;
    use crate::store::StoreError;

    async fn render(error: AppError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_lifecycle_errors_map_to_statuses() {
        let cases = [
            (LifecycleError::InvalidCount(0), StatusCode::BAD_REQUEST),
            (
                LifecycleError::InvalidCoordinate(CoordinateError::NotNumeric),
                StatusCode::BAD_REQUEST,
            ),
            (LifecycleError::TokenNotFound, StatusCode::NOT_FOUND),
            (LifecycleError::AlreadyOwned, StatusCode::CONFLICT),
            (LifecycleError::NotOwned, StatusCode::CONFLICT),
            (
                LifecycleError::DecodeFailed(crate::services::qr_decoder::DecodeError::NotFound),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                LifecycleError::GenerationExhausted(32),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            let (status, _) = render(error.into()).await;
            assert_eq!(status, expected);
        }
    }

    #[tokio::test]
    async fn test_body_carries_kind_and_message() {
        let (status, body) = render(LifecycleError::InactiveToken.into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "state_conflict");
        assert_eq!(body["message"], "QR code is not activated");
    }

    #[tokio::test]
    async fn test_payload_too_large() {
        let (status, body) = render(AppError::PayloadTooLarge).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"], "payload_too_large");
    }

    #[tokio::test]
    async fn test_store_failures_hide_details() {
        let error = LifecycleError::from(StoreError::CorruptRow("qr_tokens.token".into()));
        let (status, body) = render(error.into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "internal");
        assert_eq!(body["message"], "Internal server error");
    }
}
