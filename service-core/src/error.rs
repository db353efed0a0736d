use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(anyhow::Error),

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("Email error: {0}")]
    EmailError(String),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

/// Wire shape of every error answered by the transport boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub status: u16,
    pub title: String,
    pub message: String,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) | AppError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InternalError(_)
            | AppError::DatabaseError(_)
            | AppError::EmailError(_)
            | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn title(&self) -> &'static str {
        match self.status() {
            StatusCode::BAD_REQUEST => "bad-request",
            StatusCode::UNAUTHORIZED => "unauthorized",
            StatusCode::FORBIDDEN => "forbidden",
            StatusCode::NOT_FOUND => "not-found",
            StatusCode::CONFLICT => "conflict",
            _ => "internal-server",
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::ValidationError(err) => err.to_string(),
            AppError::BadRequest(err)
            | AppError::NotFound(err)
            | AppError::Unauthorized(err)
            | AppError::Forbidden(err)
            | AppError::Conflict(err)
            | AppError::InternalError(err)
            | AppError::DatabaseError(err)
            | AppError::ConfigError(err) => err.to_string(),
            AppError::InvalidToken(err) => err.to_string(),
            AppError::EmailError(msg) => msg.clone(),
        }
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            status: self.status().as_u16(),
            title: self.title().to_string(),
            message: self.message(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl From<mongodb::error::Error> for AppError {
    fn from(err: mongodb::error::Error) -> Self {
        AppError::DatabaseError(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let payload = self.payload();

        if self.status().is_server_error() {
            tracing::error!(
                status = payload.status,
                title = %payload.title,
                error = %self,
                "Request failed"
            );
        } else {
            tracing::debug!(
                status = payload.status,
                title = %payload.title,
                message = %payload.message,
                "Request rejected"
            );
        }

        (self.status(), Json(payload)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_maps_to_status_and_title() {
        let cases = [
            (AppError::BadRequest(anyhow::anyhow!("x")), 400, "bad-request"),
            (AppError::Unauthorized(anyhow::anyhow!("x")), 401, "unauthorized"),
            (AppError::Forbidden(anyhow::anyhow!("x")), 403, "forbidden"),
            (AppError::NotFound(anyhow::anyhow!("x")), 404, "not-found"),
            (AppError::Conflict(anyhow::anyhow!("x")), 409, "conflict"),
            (AppError::DatabaseError(anyhow::anyhow!("x")), 500, "internal-server"),
            (AppError::EmailError("x".to_string()), 500, "internal-server"),
        ];

        for (err, status, title) in cases {
            let payload = err.payload();
            assert_eq!(payload.status, status);
            assert_eq!(payload.title, title);
        }
    }

    #[test]
    fn test_payload_carries_message() {
        let err = AppError::Conflict(anyhow::anyhow!("email already exists"));
        assert_eq!(err.payload().message, "email already exists");
    }

    #[tokio::test]
    async fn test_into_response_writes_payload() {
        let response = AppError::NotFound(anyhow::anyhow!("route not found")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let payload: ErrorPayload = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            payload,
            ErrorPayload {
                status: 404,
                title: "not-found".to_string(),
                message: "route not found".to_string(),
            }
        );
    }
}
