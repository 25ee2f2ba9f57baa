use thiserror::Error;

use crate::utils::UtilError;

/// Errors raised while constructing a [`TokenSigner`](super::TokenSigner) or
/// verifying a token.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TokenError {
    /// The token is not valid base64url, is too short, or names a key index
    /// that is not configured.
    #[error("Invalid token")]
    InvalidToken,

    /// The token is well formed but its MAC does not match. Treat as tampering.
    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("At least one active signing key is required")]
    NoSigningKeys,

    #[error("At most {max} signing keys are supported, got {got}")]
    TooManyKeys { max: usize, got: usize },

    #[error("Signing key at index {0} is empty")]
    EmptyKey(usize),

    #[error("Retired key index {0} is not configured")]
    UnknownRetiredKey(usize),

    #[error("Crypto error: {0}")]
    Crypto(String),
}

impl From<UtilError> for TokenError {
    fn from(err: UtilError) -> Self {
        Self::Crypto(err.to_string())
    }
}
