use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::users::services::UserError;

/// Error returned by handlers and middleware; owns the mapping from domain
/// failures to HTTP status codes.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error(transparent)]
    User(#[from] UserError),

    #[error(transparent)]
    Body(#[from] JsonRejection),

    #[error(transparent)]
    Query(#[from] QueryRejection),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", (*msg).into()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", (*msg).into()),
            ApiError::Body(e) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", e.body_text()),
            ApiError::Query(e) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", e.body_text()),
            ApiError::User(e) => {
                let (status, code) = match e {
                    UserError::InvalidName
                    | UserError::InvalidEmail
                    | UserError::InvalidPassword
                    | UserError::InvalidId => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                    UserError::EmailExists | UserError::PasswordSame => {
                        (StatusCode::CONFLICT, "CONFLICT")
                    }
                    UserError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                    UserError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
                    UserError::TokenIssue(_)
                    | UserError::HashPassword(_)
                    | UserError::Storage { .. } => {
                        // Internal cause stays in the log, the caller gets the summary only.
                        tracing::error!(error = ?e, "request failed");
                        (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
                    }
                };
                (status, code, e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        let body = ErrorResponse {
            error: ErrorBody { code, message },
        };
        (status, Json(body)).into_response()
    }
}
