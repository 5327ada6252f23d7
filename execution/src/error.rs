use thiserror::Error;

use crate::codec::CodecError;
use crate::store::StoreError;

/// Stable classification of an [`AuctionError`], suitable for clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Forbidden,
    Conflict,
    Expired,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Expired => "EXPIRED",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

#[derive(Debug, Error)]
pub enum AuctionError {
    #[error("bid of {offered} is below the minimum acceptable bid of {minimum}")]
    BidTooLow { minimum: u64, offered: u64 },
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// State changed underneath the request; re-fetch and retry.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("expired: {0}")]
    Expired(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuctionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuctionError::BidTooLow { .. } | AuctionError::Validation(_) => ErrorKind::Validation,
            AuctionError::NotFound { .. } => ErrorKind::NotFound,
            AuctionError::Forbidden(_) => ErrorKind::Forbidden,
            AuctionError::Conflict(_) => ErrorKind::Conflict,
            AuctionError::Expired(_) => ErrorKind::Expired,
            AuctionError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        AuctionError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<StoreError> for AuctionError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict { key } => {
                AuctionError::Conflict(format!("{key} was modified concurrently"))
            }
            StoreError::Backend(reason) => AuctionError::Internal(reason),
        }
    }
}

impl From<CodecError> for AuctionError {
    fn from(value: CodecError) -> Self {
        AuctionError::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for AuctionError {
    fn from(value: serde_json::Error) -> Self {
        AuctionError::Internal(format!("serialization failed: {value}"))
    }
}

pub type AuctionResult<T> = Result<T, AuctionError>;
