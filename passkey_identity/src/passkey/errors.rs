use thiserror::Error;

/// Outcome of a failed credential verification.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VerificationError {
    /// Signature, challenge, origin or relying party did not check out.
    #[error("Credential rejected: {0}")]
    Rejected(String),

    /// The authenticator counter did not advance past the stored use count.
    #[error("Replayed credential: counter {received} is not greater than {stored}")]
    Replay { stored: u32, received: u32 },

    /// The response could not be decoded.
    #[error("Malformed credential response: {0}")]
    Malformed(String),
}
