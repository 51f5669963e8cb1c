use std::collections::BTreeMap;

use actix_web::{http::StatusCode, ResponseError};
use log::error;
use thiserror::Error;

use crate::response::response_from_error;

/// field name -> messages, returned together so a client can fix
/// every invalid field in one round trip
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed")]
    Validation(FieldErrors),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    DetailBadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    DetailNotFound(String),
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Email is not verified.")]
    EmailNotVerified,
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("Failed to send verification email")]
    Transport,
    #[error("internal server error")]
    Internal,
}

impl AppError {
    pub fn field_error(field: &str, msg: &str) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![msg.to_string()]);
        Self::Validation(errors)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_credentials() -> Self {
        Self::Unauthorized("Invalid credentials.".to_string())
    }

    pub fn need_login() -> Self {
        Self::Unauthorized("Authentication credentials were not provided.".to_string())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        error!("database error: {}", err);
        Self::Internal
    }
}

impl From<sea_orm::TransactionError<AppError>> for AppError {
    fn from(err: sea_orm::TransactionError<AppError>) -> Self {
        match err {
            sea_orm::TransactionError::Connection(e) => e.into(),
            sea_orm::TransactionError::Transaction(app) => app,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::BadRequest(_)
            | Self::DetailBadRequest(_)
            | Self::InvalidToken => StatusCode::BAD_REQUEST,
            Self::NotFound(_) | Self::DetailNotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::EmailNotVerified | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Transport | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> actix_web::HttpResponse {
        response_from_error(self)
    }
}
