use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use crate::ids::{AccountId, ChallengeId, SessionId};

use super::errors::StorageError;

/// Account fields supplied by the caller at creation time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAccountRecord {
    pub id: AccountId,
    pub email: String,
    pub display_name: String,
}

/// An account as stored, with server populated timestamps and version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AccountRecord {
    #[sqlx(try_from = "String")]
    pub id: AccountId,
    pub email: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewChallengeRecord {
    pub id: ChallengeId,
    pub value: Vec<u8>,
    pub account_id: AccountId,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ChallengeRecord {
    #[sqlx(try_from = "String")]
    pub id: ChallengeId,
    pub value: Vec<u8>,
    #[sqlx(try_from = "String")]
    pub account_id: AccountId,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ChallengeRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Kind of credential bound to an account. Stored as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CredentialType {
    #[default]
    #[serde(rename = "public-key")]
    PublicKey,
}

impl CredentialType {
    pub const fn as_str(self) -> &'static str {
        match self {
            CredentialType::PublicKey => "public-key",
        }
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for CredentialType {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "public-key" => Ok(CredentialType::PublicKey),
            other => Err(StorageError::Storage(format!(
                "Unknown credential type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCredentialRecord {
    /// Credential id assigned by the authenticator.
    pub id: Vec<u8>,
    pub account_id: AccountId,
    pub credential_type: CredentialType,
    pub public_key: Vec<u8>,
    pub use_count: u32,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct CredentialRecord {
    pub id: Vec<u8>,
    #[sqlx(try_from = "String")]
    pub account_id: AccountId,
    #[sqlx(try_from = "String")]
    pub credential_type: CredentialType,
    pub public_key: Vec<u8>,
    #[sqlx(try_from = "i64")]
    pub use_count: u32,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// Result of the atomic account (+ optional challenge) insert.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedAccount {
    pub account: AccountRecord,
    pub challenge: Option<ChallengeRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSessionRecord {
    pub id: SessionId,
    pub account_id: AccountId,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct SessionRecord {
    #[sqlx(try_from = "String")]
    pub id: SessionId,
    #[sqlx(try_from = "String")]
    pub account_id: AccountId,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// A session resolved together with the account it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionWithAccountRecord {
    pub session: SessionRecord,
    pub account: AccountRecord,
}

/// Flat row shape of the session/account join.
#[derive(Debug, FromRow)]
pub(super) struct SessionAccountRow {
    #[sqlx(try_from = "String")]
    session_id: SessionId,
    #[sqlx(try_from = "String")]
    account_id: AccountId,
    session_expires_at: DateTime<Utc>,
    session_created_at: DateTime<Utc>,
    account_email: String,
    account_display_name: String,
    account_created_at: DateTime<Utc>,
    account_updated_at: DateTime<Utc>,
    account_version: i64,
}

impl From<SessionAccountRow> for SessionWithAccountRecord {
    fn from(row: SessionAccountRow) -> Self {
        Self {
            session: SessionRecord {
                id: row.session_id,
                account_id: row.account_id.clone(),
                expires_at: row.session_expires_at,
                created_at: row.session_created_at,
            },
            account: AccountRecord {
                id: row.account_id,
                email: row.account_email,
                display_name: row.account_display_name,
                created_at: row.account_created_at,
                updated_at: row.account_updated_at,
                version: row.account_version,
            },
        }
    }
}
