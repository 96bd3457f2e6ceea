//! qcflow - Quality-control workflow engine for construction projects.
//!
//! This library provides the core functionality for the `qc` CLI tool and its
//! RPC server: projects and tasks, checklist-based inspections, defect
//! (CAR/PAR/NCR) tracking, notifications, audit trail and dashboards.

pub mod audit;
pub mod cli;
pub mod commands;
pub mod config;
pub mod models;
pub mod notify;
pub mod permissions;
#[cfg(feature = "server")]
pub mod server;
pub mod storage;
pub mod workflow;


/// Error classification surfaced to RPC callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    BadRequest,
    NotFound,
    InternalServerError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }

    /// HTTP status code used by the RPC server.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::Unauthorized => 401,
            ErrorCode::Forbidden => 403,
            ErrorCode::BadRequest => 400,
            ErrorCode::NotFound => 404,
            ErrorCode::InternalServerError => 500,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Library-level error type for qcflow operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Not initialized: run `qc system init` first")]
    NotInitialized,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Classify this error for callers.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Unauthorized(_) => ErrorCode::Unauthorized,
            Error::Forbidden(_) => ErrorCode::Forbidden,
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::BadRequest(_) | Error::NotInitialized => ErrorCode::BadRequest,
            Error::Io(_)
            | Error::Json(_)
            | Error::Database(_)
            | Error::Config(_)
            | Error::Other(_) => ErrorCode::InternalServerError,
        }
    }

    /// Message safe to hand to a remote caller.
    ///
    /// Internal faults collapse to a generic message; the detail stays in the log.
    pub fn public_message(&self) -> String {
        match self.code() {
            ErrorCode::InternalServerError => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Result type alias for qcflow operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            Error::Forbidden("x".into()).code(),
            ErrorCode::Forbidden
        );
        assert_eq!(Error::NotFound("x".into()).code().http_status(), 404);
        assert_eq!(
            Error::BadRequest("bad".into()).code().as_str(),
            "BAD_REQUEST"
        );
        assert_eq!(
            Error::Unauthorized("no session".into()).code().http_status(),
            401
        );
    }

    #[test]
    fn test_internal_errors_are_masked() {
        let err = Error::Other("disk exploded at /var/lib/qc".into());
        assert_eq!(err.code(), ErrorCode::InternalServerError);
        assert_eq!(err.public_message(), "Internal server error");

        let err = Error::BadRequest("Root cause is required".into());
        assert_eq!(err.public_message(), "Root cause is required");
    }
}
