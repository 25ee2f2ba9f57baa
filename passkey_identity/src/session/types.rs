use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::coordination::Account;
use crate::ids::{AccountId, SessionId};
use crate::storage::SessionRecord;
use crate::token::Token;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub account_id: AccountId,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<SessionRecord> for Session {
    fn from(record: SessionRecord) -> Self {
        Self {
            id: record.id,
            account_id: record.account_id,
            expires_at: record.expires_at,
            created_at: record.created_at,
        }
    }
}

/// A freshly issued session. `token` is what the caller hands back on later
/// requests, typically in a cookie whose lifetime is `max_age`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionGrant {
    pub token: Token,
    pub session: Session,
    pub account: Account,
    pub max_age: Duration,
}

/// A session token that checked out, with the account it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedSession {
    pub session: Session,
    pub account: Account,
}
