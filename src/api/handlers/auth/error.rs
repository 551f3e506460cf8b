//! HTTP-facing error taxonomy for the auth API.
//!
//! Each variant maps to one status and one stable `error` message. Internal causes
//! are logged here and never echoed to the client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use super::{
    password::PasswordError,
    token_store::{CacheError, LifecycleError},
    types::ErrorBody,
};

pub const MSG_INVALID_TOKEN: &str = "Invalid or expired token";
pub const MSG_INVALID_CREDENTIALS: &str = "Invalid email or password";
pub const MSG_INVALID_REFRESH: &str = "Invalid or expired refresh token";
pub const MSG_CONFLICT: &str = "Unable to create account";
pub const MSG_RATE_LIMITED: &str = "Too many requests. Please try again later.";
pub const MSG_UNAVAILABLE: &str = "Authentication service unavailable";
pub const MSG_FORBIDDEN: &str = "Forbidden";
pub const MSG_INTERNAL: &str = "Internal server error";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("forbidden")]
    Forbidden,
    #[error("{0}")]
    Conflict(&'static str),
    #[error("rate limited")]
    RateLimited,
    #[error("dependency unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0:#}")]
    Internal(anyhow::Error),
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the client.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Unauthorized(message) | Self::Conflict(message) => (*message).to_string(),
            Self::Forbidden => MSG_FORBIDDEN.to_string(),
            Self::RateLimited => MSG_RATE_LIMITED.to_string(),
            Self::Unavailable(_) => MSG_UNAVAILABLE.to_string(),
            Self::Internal(_) => MSG_INTERNAL.to_string(),
        }
    }

    pub fn invalid_token() -> Self {
        Self::Unauthorized(MSG_INVALID_TOKEN)
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Cache(err) => err.into(),
            LifecycleError::Generate => {
                Self::Internal(anyhow::anyhow!("failed to generate refresh token"))
            }
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        Self::Internal(err.into())
    }
}

/// Errors that mean the database could not be reached, as opposed to a failed query.
fn is_store_unavailable(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => true,
        // Class 08 is connection exceptions, 57P0x is server shutdown.
        sqlx::Error::Database(db_err) => db_err
            .code()
            .is_some_and(|code| code.starts_with("08") || code.starts_with("57P0")),
        _ => false,
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        let unavailable = err
            .chain()
            .filter_map(|cause| cause.downcast_ref::<sqlx::Error>())
            .any(is_store_unavailable);
        if unavailable {
            Self::Unavailable(format!("{err:#}"))
        } else {
            Self::Internal(err)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal(err) => error!("Internal error: {err:#}"),
            Self::Unavailable(err) => error!("Dependency unavailable: {err}"),
            _ => {}
        }

        let body = ErrorBody {
            error: self.public_message(),
        };
        (self.status(), Json(body)).into_response()
    }
}
