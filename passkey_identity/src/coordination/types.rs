use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ids::{AccountId, ChallengeId};
use crate::passkey::{AuthenticationOptions, RegistrationOptions};
use crate::storage::{AccountRecord, CredentialRecord, CredentialType};

/// Sign-up request.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAccount {
    pub email: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub id: AccountId,
    pub email: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl From<AccountRecord> for Account {
    fn from(record: AccountRecord) -> Self {
        Self {
            id: record.id,
            email: record.email,
            display_name: record.display_name,
            created_at: record.created_at,
            updated_at: record.updated_at,
            version: record.version,
        }
    }
}

/// A credential bound to an account, without its key material.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub id: Vec<u8>,
    pub account_id: AccountId,
    pub credential_type: CredentialType,
    pub use_count: u32,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl From<CredentialRecord> for Credential {
    fn from(record: CredentialRecord) -> Self {
        Self {
            id: record.id,
            account_id: record.account_id,
            credential_type: record.credential_type,
            use_count: record.use_count,
            created_at: record.created_at,
            revoked_at: record.revoked_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateAccountOutcome {
    pub account: Account,
    pub challenge_id: ChallengeId,
    pub options: RegistrationOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationChallenge {
    pub account_id: AccountId,
    pub challenge_id: ChallengeId,
    pub options: RegistrationOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthenticationChallenge {
    pub account_id: AccountId,
    pub challenge_id: ChallengeId,
    pub options: AuthenticationOptions,
}
