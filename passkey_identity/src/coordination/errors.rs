//! Error type surfaced by [`IdentityService`](super::IdentityService)

use thiserror::Error;

use crate::config::ConfigError;
use crate::ids::IdError;
use crate::passkey::VerificationError;
use crate::storage::StorageError;
use crate::token::TokenError;
use crate::utils::UtilError;

/// Errors returned by identity operations. Nothing is retried internally.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IdentityError {
    /// Another account already uses this email
    #[error("Email address already exists")]
    EmailConflict,

    /// The account does not exist
    #[error("Invalid account")]
    InvalidAccount,

    /// The credential is unknown, revoked, failed verification or was replayed
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// The challenge is missing, expired, consumed or bound to another account
    #[error("Challenge expired")]
    ChallengeExpired,

    /// The token is malformed or names an unknown key
    #[error("Invalid token")]
    InvalidToken,

    /// The token signature does not match
    #[error("Invalid token signature")]
    InvalidSignature,

    /// The session is missing, ended or past its expiry
    #[error("Session expired")]
    SessionExpired,

    /// The request failed validation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The store could not be reached or failed
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IdentityError {
    /// Log the error and return self
    ///
    /// Rejections caused by the caller are logged at warn level, failures of
    /// the service itself at error level.
    pub fn log(self) -> Self {
        match &self {
            Self::Unavailable(_) | Self::Config(_) | Self::Internal(_) => {
                tracing::error!("{}", self)
            }
            _ => tracing::warn!("{}", self),
        }
        self
    }
}

// Custom From implementations that automatically log errors

impl From<StorageError> for IdentityError {
    fn from(err: StorageError) -> Self {
        let error = match err {
            StorageError::EmailConflict => Self::EmailConflict,
            StorageError::ChallengeConsumed => Self::ChallengeExpired,
            StorageError::UseCountConflict => {
                Self::InvalidCredential("use count changed concurrently".to_string())
            }
            StorageError::Storage(msg) => Self::Unavailable(msg),
        };
        error.log()
    }
}

impl From<TokenError> for IdentityError {
    fn from(err: TokenError) -> Self {
        let error = match err {
            TokenError::InvalidToken => Self::InvalidToken,
            TokenError::InvalidSignature => Self::InvalidSignature,
            TokenError::Crypto(msg) => Self::Internal(msg),
            other => Self::Config(other.to_string()),
        };
        error.log()
    }
}

impl From<IdError> for IdentityError {
    fn from(err: IdError) -> Self {
        let error = match err {
            IdError::Generation(msg) => Self::Internal(msg),
            other => Self::InvalidInput(other.to_string()),
        };
        error.log()
    }
}

impl From<VerificationError> for IdentityError {
    fn from(err: VerificationError) -> Self {
        Self::InvalidCredential(err.to_string()).log()
    }
}

impl From<UtilError> for IdentityError {
    fn from(err: UtilError) -> Self {
        Self::Internal(err.to_string()).log()
    }
}

impl From<ConfigError> for IdentityError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string()).log()
    }
}
