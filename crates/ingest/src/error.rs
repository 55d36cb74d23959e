//! Error taxonomy shared by remote clients, collectors and the run report

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Classified failure of one remote call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    /// Network failure, timeout or 5xx: retried on the next sweep
    #[error("transient remote error: {0}")]
    Transient(String),

    /// The addressed resource does not exist (or was deleted)
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote rejected a sync token as expired or gone
    #[error("sync token expired or invalid")]
    TokenGone,

    /// The subject itself does not exist upstream
    #[error("subject does not exist upstream: {0}")]
    SubjectMissing(String),

    /// Rate limit or quota exhausted
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("remote error (status {status:?}): {message}")]
    Other { status: Option<u16>, message: String },
}

impl ApiError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ApiError::Transient(_) => ErrorClass::Transient,
            ApiError::NotFound(_) => ErrorClass::NotFound,
            ApiError::TokenGone => ErrorClass::TokenInvalid,
            ApiError::SubjectMissing(_) => ErrorClass::SubjectMissing,
            ApiError::RateLimited { .. } => ErrorClass::RateLimited,
            ApiError::Other { .. } => ErrorClass::Other,
        }
    }
}

/// Failure while syncing one unit
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),

    #[error("sweep interrupted")]
    Interrupted,

    #[error("subject deadline exceeded")]
    DeadlineExceeded,
}

impl SyncError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::Api(e) => e.class(),
            SyncError::Storage(_) => ErrorClass::Storage,
            SyncError::Interrupted => ErrorClass::Interrupted,
            SyncError::DeadlineExceeded => ErrorClass::Transient,
        }
    }
}

/// Report-level projection of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transient,
    NotFound,
    TokenInvalid,
    SubjectMissing,
    RateLimited,
    Storage,
    Interrupted,
    Other,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::NotFound => "not_found",
            ErrorClass::TokenInvalid => "token_invalid",
            ErrorClass::SubjectMissing => "subject_missing",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::Storage => "storage",
            ErrorClass::Interrupted => "interrupted",
            ErrorClass::Other => "other",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wrap a storage failure for collector code paths
pub(crate) fn storage(err: anyhow::Error) -> SyncError {
    SyncError::Storage(err)
}
