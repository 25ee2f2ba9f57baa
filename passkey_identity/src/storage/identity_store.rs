use async_trait::async_trait;

use crate::ids::{AccountId, ChallengeId, SessionId};

use super::errors::StorageError;
use super::types::{
    AccountRecord, ChallengeRecord, CreatedAccount, CredentialRecord, NewAccountRecord,
    NewChallengeRecord, NewCredentialRecord, NewSessionRecord, SessionRecord,
    SessionWithAccountRecord,
};

/// Durable state behind the identity service.
///
/// Every operation is durable when it returns. Atomicity and email
/// uniqueness are the store's responsibility; callers never pre-check.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Inserts the account and, when given, its first challenge in one
    /// transaction. A duplicate email yields [`StorageError::EmailConflict`].
    async fn create_account(
        &self,
        account: NewAccountRecord,
        challenge: Option<NewChallengeRecord>,
    ) -> Result<CreatedAccount, StorageError>;

    async fn get_account_by_id(&self, id: &AccountId)
    -> Result<Option<AccountRecord>, StorageError>;

    async fn get_account_by_email(&self, email: &str)
    -> Result<Option<AccountRecord>, StorageError>;

    async fn create_challenge(
        &self,
        challenge: NewChallengeRecord,
    ) -> Result<ChallengeRecord, StorageError>;

    /// Looks a challenge up. Rows past `expires_at` are hidden unless
    /// `include_expired` is set.
    async fn get_challenge(
        &self,
        id: &ChallengeId,
        include_expired: bool,
    ) -> Result<Option<ChallengeRecord>, StorageError>;

    /// Idempotent.
    async fn delete_challenge(&self, id: &ChallengeId) -> Result<(), StorageError>;

    /// Removes challenges that expired without being consumed and returns how
    /// many were deleted.
    async fn delete_expired_challenges(&self) -> Result<u64, StorageError>;

    /// Inserts a credential. With a source challenge the challenge is deleted
    /// in the same transaction, and [`StorageError::ChallengeConsumed`] is
    /// returned if it was already gone.
    async fn create_credential(
        &self,
        credential: NewCredentialRecord,
        source_challenge_id: Option<&ChallengeId>,
    ) -> Result<CredentialRecord, StorageError>;

    async fn get_credential(&self, id: &[u8]) -> Result<Option<CredentialRecord>, StorageError>;

    async fn get_account_credentials(
        &self,
        account_id: &AccountId,
    ) -> Result<Vec<CredentialRecord>, StorageError>;

    /// Unconditionally overwrites the use count.
    async fn update_credential_use_count(
        &self,
        id: &[u8],
        new_count: u32,
    ) -> Result<(), StorageError>;

    /// Consumes the source challenge and moves the use count from
    /// `expected_count` to `new_count` in one transaction.
    ///
    /// Fails with [`StorageError::ChallengeConsumed`] when the challenge is
    /// gone and [`StorageError::UseCountConflict`] when the stored count is no
    /// longer `expected_count`. Nothing is written in either case.
    async fn record_credential_use(
        &self,
        id: &[u8],
        expected_count: u32,
        new_count: u32,
        source_challenge_id: Option<&ChallengeId>,
    ) -> Result<(), StorageError>;

    async fn create_session(&self, session: NewSessionRecord)
    -> Result<SessionRecord, StorageError>;

    async fn get_session(
        &self,
        id: &SessionId,
        include_expired: bool,
    ) -> Result<Option<SessionWithAccountRecord>, StorageError>;

    /// Idempotent.
    async fn delete_session(&self, id: &SessionId) -> Result<(), StorageError>;
}
