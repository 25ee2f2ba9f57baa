use std::{env, sync::Arc};

use async_trait::async_trait;
use sqlx::{PgPool, SqlitePool};

use crate::ids::{AccountId, ChallengeId, SessionId};

use super::data_store::{DataStore, PostgresDataStore, SqliteDataStore, connect_data_store};
use super::errors::StorageError;
use super::identity_store::IdentityStore;
use super::postgres::*;
use super::sqlite::*;
use super::types::{
    AccountRecord, ChallengeRecord, CreatedAccount, CredentialRecord, NewAccountRecord,
    NewChallengeRecord, NewCredentialRecord, NewSessionRecord, SessionRecord,
    SessionWithAccountRecord,
};

/// [`IdentityStore`] backed by SQLite or PostgreSQL through `sqlx`.
#[derive(Clone)]
pub struct SqlIdentityStore {
    store: Arc<dyn DataStore>,
}

impl std::fmt::Debug for SqlIdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = if self.store.as_sqlite().is_some() {
            "sqlite"
        } else {
            "postgres"
        };
        f.debug_struct("SqlIdentityStore")
            .field("backend", &backend)
            .finish()
    }
}

impl SqlIdentityStore {
    pub fn from_sqlite_pool(pool: SqlitePool) -> Self {
        Self {
            store: Arc::new(SqliteDataStore { pool }),
        }
    }

    pub fn from_postgres_pool(pool: PgPool) -> Self {
        Self {
            store: Arc::new(PostgresDataStore { pool }),
        }
    }

    /// Creates a lazily connecting store. `store_type` is `sqlite` or
    /// `postgres`.
    pub fn connect(store_type: &str, store_url: &str) -> Result<Self, StorageError> {
        Ok(Self {
            store: Arc::from(connect_data_store(store_type, store_url)?),
        })
    }

    /// Reads `GENERIC_DATA_STORE_TYPE` and `GENERIC_DATA_STORE_URL`.
    pub fn from_env() -> Result<Self, StorageError> {
        let store_type = env::var("GENERIC_DATA_STORE_TYPE").map_err(|_| {
            StorageError::Storage("GENERIC_DATA_STORE_TYPE must be set".to_string())
        })?;
        let store_url = env::var("GENERIC_DATA_STORE_URL").map_err(|_| {
            StorageError::Storage("GENERIC_DATA_STORE_URL must be set".to_string())
        })?;
        Self::connect(&store_type, &store_url)
    }

    /// Creates the tables if needed and validates their schema.
    pub async fn init(&self) -> Result<(), StorageError> {
        match (self.store.as_sqlite(), self.store.as_postgres()) {
            (Some(pool), _) => {
                create_tables_sqlite(pool).await?;
                validate_tables_sqlite(pool).await?;
            }
            (_, Some(pool)) => {
                create_tables_postgres(pool).await?;
                validate_tables_postgres(pool).await?;
            }
            _ => return Err(StorageError::Storage("Unsupported database type".to_string())),
        }
        tracing::info!("Identity store tables initialized");
        Ok(())
    }

    /// Closes the underlying pool. Later operations fail with
    /// [`StorageError::Storage`].
    pub async fn close(&self) {
        if let Some(pool) = self.store.as_sqlite() {
            pool.close().await;
        } else if let Some(pool) = self.store.as_postgres() {
            pool.close().await;
        }
    }
}

#[async_trait]
impl IdentityStore for SqlIdentityStore {
    #[tracing::instrument(skip(self, account, challenge), fields(account_id = %account.id))]
    async fn create_account(
        &self,
        account: NewAccountRecord,
        challenge: Option<NewChallengeRecord>,
    ) -> Result<CreatedAccount, StorageError> {
        let result = if let Some(pool) = self.store.as_sqlite() {
            create_account_sqlite(pool, &account, challenge.as_ref()).await
        } else if let Some(pool) = self.store.as_postgres() {
            create_account_postgres(pool, &account, challenge.as_ref()).await
        } else {
            Err(StorageError::Storage("Unsupported database type".to_string()))
        };

        match &result {
            Ok(created) => tracing::debug!(
                with_challenge = created.challenge.is_some(),
                "Account inserted"
            ),
            Err(StorageError::EmailConflict) => {
                tracing::debug!("Account insert rejected by email constraint")
            }
            Err(e) => tracing::error!(error = %e, "Account insert failed"),
        }

        result
    }

    #[tracing::instrument(skip(self), fields(account_id = %id))]
    async fn get_account_by_id(
        &self,
        id: &AccountId,
    ) -> Result<Option<AccountRecord>, StorageError> {
        let result = if let Some(pool) = self.store.as_sqlite() {
            get_account_by_id_sqlite(pool, id).await
        } else if let Some(pool) = self.store.as_postgres() {
            get_account_by_id_postgres(pool, id).await
        } else {
            Err(StorageError::Storage("Unsupported database type".to_string()))
        };

        if let Ok(found) = &result {
            tracing::debug!(found = found.is_some(), "Account lookup completed");
        }
        result
    }

    #[tracing::instrument(skip(self, email))]
    async fn get_account_by_email(
        &self,
        email: &str,
    ) -> Result<Option<AccountRecord>, StorageError> {
        let result = if let Some(pool) = self.store.as_sqlite() {
            get_account_by_email_sqlite(pool, email).await
        } else if let Some(pool) = self.store.as_postgres() {
            get_account_by_email_postgres(pool, email).await
        } else {
            Err(StorageError::Storage("Unsupported database type".to_string()))
        };

        if let Ok(found) = &result {
            tracing::debug!(found = found.is_some(), "Account lookup by email completed");
        }
        result
    }

    #[tracing::instrument(
        skip(self, challenge),
        fields(challenge_id = %challenge.id, account_id = %challenge.account_id)
    )]
    async fn create_challenge(
        &self,
        challenge: NewChallengeRecord,
    ) -> Result<ChallengeRecord, StorageError> {
        if let Some(pool) = self.store.as_sqlite() {
            create_challenge_sqlite(pool, &challenge).await
        } else if let Some(pool) = self.store.as_postgres() {
            create_challenge_postgres(pool, &challenge).await
        } else {
            Err(StorageError::Storage("Unsupported database type".to_string()))
        }
    }

    #[tracing::instrument(skip(self), fields(challenge_id = %id))]
    async fn get_challenge(
        &self,
        id: &ChallengeId,
        include_expired: bool,
    ) -> Result<Option<ChallengeRecord>, StorageError> {
        if let Some(pool) = self.store.as_sqlite() {
            get_challenge_sqlite(pool, id, include_expired).await
        } else if let Some(pool) = self.store.as_postgres() {
            get_challenge_postgres(pool, id, include_expired).await
        } else {
            Err(StorageError::Storage("Unsupported database type".to_string()))
        }
    }

    #[tracing::instrument(skip(self), fields(challenge_id = %id))]
    async fn delete_challenge(&self, id: &ChallengeId) -> Result<(), StorageError> {
        if let Some(pool) = self.store.as_sqlite() {
            delete_challenge_sqlite(pool, id).await
        } else if let Some(pool) = self.store.as_postgres() {
            delete_challenge_postgres(pool, id).await
        } else {
            Err(StorageError::Storage("Unsupported database type".to_string()))
        }
    }

    #[tracing::instrument(skip(self))]
    async fn delete_expired_challenges(&self) -> Result<u64, StorageError> {
        let result = if let Some(pool) = self.store.as_sqlite() {
            delete_expired_challenges_sqlite(pool).await
        } else if let Some(pool) = self.store.as_postgres() {
            delete_expired_challenges_postgres(pool).await
        } else {
            Err(StorageError::Storage("Unsupported database type".to_string()))
        };

        if let Ok(removed) = &result {
            tracing::info!(removed, "Expired challenges removed");
        }
        result
    }

    #[tracing::instrument(
        skip(self, credential, source_challenge_id),
        fields(
            account_id = %credential.account_id,
            source_challenge_id = source_challenge_id.map(|id| id.as_str())
        )
    )]
    async fn create_credential(
        &self,
        credential: NewCredentialRecord,
        source_challenge_id: Option<&ChallengeId>,
    ) -> Result<CredentialRecord, StorageError> {
        let result = if let Some(pool) = self.store.as_sqlite() {
            create_credential_sqlite(pool, &credential, source_challenge_id).await
        } else if let Some(pool) = self.store.as_postgres() {
            create_credential_postgres(pool, &credential, source_challenge_id).await
        } else {
            Err(StorageError::Storage("Unsupported database type".to_string()))
        };

        if let Err(StorageError::ChallengeConsumed) = &result {
            tracing::warn!("Credential insert lost the race for its challenge");
        }
        result
    }

    #[tracing::instrument(skip(self, id))]
    async fn get_credential(&self, id: &[u8]) -> Result<Option<CredentialRecord>, StorageError> {
        if let Some(pool) = self.store.as_sqlite() {
            get_credential_sqlite(pool, id).await
        } else if let Some(pool) = self.store.as_postgres() {
            get_credential_postgres(pool, id).await
        } else {
            Err(StorageError::Storage("Unsupported database type".to_string()))
        }
    }

    #[tracing::instrument(skip(self), fields(account_id = %account_id))]
    async fn get_account_credentials(
        &self,
        account_id: &AccountId,
    ) -> Result<Vec<CredentialRecord>, StorageError> {
        if let Some(pool) = self.store.as_sqlite() {
            get_account_credentials_sqlite(pool, account_id).await
        } else if let Some(pool) = self.store.as_postgres() {
            get_account_credentials_postgres(pool, account_id).await
        } else {
            Err(StorageError::Storage("Unsupported database type".to_string()))
        }
    }

    #[tracing::instrument(skip(self, id))]
    async fn update_credential_use_count(
        &self,
        id: &[u8],
        new_count: u32,
    ) -> Result<(), StorageError> {
        if let Some(pool) = self.store.as_sqlite() {
            update_credential_use_count_sqlite(pool, id, new_count).await
        } else if let Some(pool) = self.store.as_postgres() {
            update_credential_use_count_postgres(pool, id, new_count).await
        } else {
            Err(StorageError::Storage("Unsupported database type".to_string()))
        }
    }

    #[tracing::instrument(
        skip(self, id, source_challenge_id),
        fields(source_challenge_id = source_challenge_id.map(|id| id.as_str()))
    )]
    async fn record_credential_use(
        &self,
        id: &[u8],
        expected_count: u32,
        new_count: u32,
        source_challenge_id: Option<&ChallengeId>,
    ) -> Result<(), StorageError> {
        let result = if let Some(pool) = self.store.as_sqlite() {
            record_credential_use_sqlite(pool, id, expected_count, new_count, source_challenge_id)
                .await
        } else if let Some(pool) = self.store.as_postgres() {
            record_credential_use_postgres(
                pool,
                id,
                expected_count,
                new_count,
                source_challenge_id,
            )
            .await
        } else {
            Err(StorageError::Storage("Unsupported database type".to_string()))
        };

        if let Err(e @ (StorageError::ChallengeConsumed | StorageError::UseCountConflict)) =
            &result
        {
            tracing::warn!(error = %e, "Credential use rejected");
        }
        result
    }

    #[tracing::instrument(
        skip(self, session),
        fields(account_id = %session.account_id)
    )]
    async fn create_session(
        &self,
        session: NewSessionRecord,
    ) -> Result<SessionRecord, StorageError> {
        if let Some(pool) = self.store.as_sqlite() {
            create_session_sqlite(pool, &session).await
        } else if let Some(pool) = self.store.as_postgres() {
            create_session_postgres(pool, &session).await
        } else {
            Err(StorageError::Storage("Unsupported database type".to_string()))
        }
    }

    // Session ids are bearer material and stay out of spans.
    #[tracing::instrument(skip(self, id))]
    async fn get_session(
        &self,
        id: &SessionId,
        include_expired: bool,
    ) -> Result<Option<SessionWithAccountRecord>, StorageError> {
        if let Some(pool) = self.store.as_sqlite() {
            get_session_sqlite(pool, id, include_expired).await
        } else if let Some(pool) = self.store.as_postgres() {
            get_session_postgres(pool, id, include_expired).await
        } else {
            Err(StorageError::Storage("Unsupported database type".to_string()))
        }
    }

    #[tracing::instrument(skip(self, id))]
    async fn delete_session(&self, id: &SessionId) -> Result<(), StorageError> {
        if let Some(pool) = self.store.as_sqlite() {
            delete_session_sqlite(pool, id).await
        } else if let Some(pool) = self.store.as_postgres() {
            delete_session_postgres(pool, id).await
        } else {
            Err(StorageError::Storage("Unsupported database type".to_string()))
        }
    }
}
