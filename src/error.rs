//! Error types for the auth service.
//!
//! All errors implement `ResponseError` for Actix-web integration,
//! converting domain errors into the HTTP status codes from the error
//! handling design: `MalformedToken`/`MissingClaim` 400, `UnknownKey`/
//! `SignatureInvalid` 401, `Upstream` collapses into `UnknownKey` 401,
//! `PersistenceFatal` 503.

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde::Serialize;
use thiserror::Error;

/// Service error type with structured error responses.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Missing claim: {0}")]
    MissingClaim(String),

    #[error("Unknown verification key")]
    UnknownKey,

    #[error("Signature invalid")]
    SignatureInvalid,

    /// Network/TLS/parse/timeout failure fetching a foreign JWKS. Collapsed
    /// into `UnknownKey` at the response boundary so callers never learn
    /// whether a key lookup failed locally or a federation fetch timed out.
    #[error("Upstream federation failure: {0}")]
    Upstream(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Grant not found: {0}")]
    GrantNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// A write that must succeed for correctness (e.g. persisting a newly
    /// generated signing key) failed.
    #[error("Persistence failure: {0}")]
    PersistenceFatal(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl AuthError {
    fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::MalformedToken(_) => Some("MALFORMED_TOKEN"),
            Self::MissingClaim(_) => Some("MISSING_CLAIM"),
            Self::UnknownKey | Self::Upstream(_) => Some("UNKNOWN_KEY"),
            Self::SignatureInvalid => Some("SIGNATURE_INVALID"),
            Self::SessionNotFound(_) => Some("SESSION_NOT_FOUND"),
            Self::GrantNotFound(_) => Some("GRANT_NOT_FOUND"),
            Self::InvalidInput(_) => Some("INVALID_INPUT"),
            Self::Storage(_) => Some("STORAGE_ERROR"),
            Self::PersistenceFatal(_) => Some("PERSISTENCE_FATAL"),
            Self::Serialization(_) => Some("SERIALIZATION_ERROR"),
            Self::Deserialization(_) => Some("DESERIALIZATION_ERROR"),
            Self::Internal(_) => None,
        }
    }
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedToken(_)
            | Self::MissingClaim(_)
            | Self::InvalidInput(_)
            | Self::Serialization(_)
            | Self::Deserialization(_) => StatusCode::BAD_REQUEST,

            Self::UnknownKey | Self::SignatureInvalid | Self::Upstream(_) => {
                StatusCode::UNAUTHORIZED
            }

            Self::SessionNotFound(_) | Self::GrantNotFound(_) => StatusCode::NOT_FOUND,

            Self::PersistenceFatal(_) => StatusCode::SERVICE_UNAVAILABLE,

            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            Self::Upstream(_) => "Unknown verification key".to_string(),
            other => other.to_string(),
        };

        let body = ErrorResponse {
            error: message,
            code: self.error_code().map(String::from),
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}

impl From<std::io::Error> for AuthError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::Deserialization(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}

impl From<redb::Error> for AuthError {
    fn from(err: redb::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::DatabaseError> for AuthError {
    fn from(err: redb::DatabaseError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::TableError> for AuthError {
    fn from(err: redb::TableError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::TransactionError> for AuthError {
    fn from(err: redb::TransactionError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::CommitError> for AuthError {
    fn from(err: redb::CommitError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::StorageError> for AuthError {
    fn from(err: redb::StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Upstream(format!("request timed out: {err}"))
        } else if err.is_connect() {
            Self::Upstream(format!("connection failed: {err}"))
        } else {
            Self::Upstream(err.to_string())
        }
    }
}

/// Result type alias for auth service operations.
pub type AuthResult<T> = Result<T, AuthError>;
