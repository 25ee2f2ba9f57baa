use thiserror::Error;

/// Errors surfaced by an [`IdentityStore`](super::IdentityStore).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StorageError {
    /// The account email collided with an existing account. Raised from the
    /// database unique constraint, never from a pre-check.
    #[error("Email address already exists")]
    EmailConflict,

    /// The source challenge was already consumed (or never existed) when the
    /// write tried to delete it.
    #[error("Challenge already consumed")]
    ChallengeConsumed,

    /// The credential use count changed between read and conditional update.
    #[error("Credential use count changed concurrently")]
    UseCountConflict,

    /// The backing database failed or is unreachable.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Maps a failed account insert, turning a violation of the email constraint
/// into `EmailConflict`. Other unique violations (e.g. a duplicate id) stay
/// generic storage errors.
pub(super) fn classify_account_insert_error(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() && is_email_violation(db_err.constraint(), db_err.message())
        {
            return StorageError::EmailConflict;
        }
    }
    StorageError::Storage(err.to_string())
}

// PostgreSQL reports the constraint name; SQLite only names the column
// ("UNIQUE constraint failed: susi_accounts.email").
fn is_email_violation(constraint: Option<&str>, message: &str) -> bool {
    match constraint {
        Some(name) => name == super::config::EMAIL_CONSTRAINT.as_str(),
        None => message.ends_with(".email"),
    }
}
