use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::ids::{AccountId, ChallengeId, SessionId};

use super::config::{
    DB_TABLE_ACCOUNTS, DB_TABLE_CHALLENGES, DB_TABLE_CREDENTIALS, DB_TABLE_SESSIONS,
    EMAIL_CONSTRAINT,
};
use super::errors::{StorageError, classify_account_insert_error};
use super::schema_validation::validate_postgres_table_schema;
use super::types::{
    AccountRecord, ChallengeRecord, CreatedAccount, CredentialRecord, NewAccountRecord,
    NewChallengeRecord, NewCredentialRecord, NewSessionRecord, SessionAccountRow, SessionRecord,
    SessionWithAccountRecord,
};

// PostgreSQL implementations
pub(super) async fn create_tables_postgres(pool: &Pool<Postgres>) -> Result<(), StorageError> {
    let accounts = DB_TABLE_ACCOUNTS.as_str();
    let challenges = DB_TABLE_CHALLENGES.as_str();
    let credentials = DB_TABLE_CREDENTIALS.as_str();
    let sessions = DB_TABLE_SESSIONS.as_str();
    let email_constraint = EMAIL_CONSTRAINT.as_str();

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {accounts} (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL,
            display_name TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            version BIGINT NOT NULL DEFAULT 0,
            CONSTRAINT {email_constraint} UNIQUE (email)
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {challenges} (
            id TEXT PRIMARY KEY,
            value BYTEA NOT NULL,
            account_id TEXT NOT NULL REFERENCES {accounts}(id) ON DELETE CASCADE,
            expires_at TIMESTAMPTZ NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {credentials} (
            id BYTEA PRIMARY KEY,
            account_id TEXT NOT NULL REFERENCES {accounts}(id) ON DELETE CASCADE,
            credential_type TEXT NOT NULL,
            public_key BYTEA NOT NULL,
            use_count BIGINT NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL,
            revoked_at TIMESTAMPTZ
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {sessions} (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL REFERENCES {accounts}(id) ON DELETE CASCADE,
            expires_at TIMESTAMPTZ NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#
    ))
    .execute(pool)
    .await?;

    for (table, column) in [
        (challenges, "expires_at"),
        (credentials, "account_id"),
        (sessions, "account_id"),
    ] {
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{}_{column} ON {table}({column})",
            table.replace('.', "_")
        ))
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Validates that the identity tables match what we expect
pub(super) async fn validate_tables_postgres(pool: &Pool<Postgres>) -> Result<(), StorageError> {
    validate_postgres_table_schema(
        pool,
        DB_TABLE_ACCOUNTS.as_str(),
        &[
            ("id", "text"),
            ("email", "text"),
            ("display_name", "text"),
            ("created_at", "timestamp with time zone"),
            ("updated_at", "timestamp with time zone"),
            ("version", "bigint"),
        ],
        StorageError::Storage,
    )
    .await?;

    validate_postgres_table_schema(
        pool,
        DB_TABLE_CHALLENGES.as_str(),
        &[
            ("id", "text"),
            ("value", "bytea"),
            ("account_id", "text"),
            ("expires_at", "timestamp with time zone"),
            ("created_at", "timestamp with time zone"),
        ],
        StorageError::Storage,
    )
    .await?;

    validate_postgres_table_schema(
        pool,
        DB_TABLE_CREDENTIALS.as_str(),
        &[
            ("id", "bytea"),
            ("account_id", "text"),
            ("credential_type", "text"),
            ("public_key", "bytea"),
            ("use_count", "bigint"),
            ("created_at", "timestamp with time zone"),
            ("revoked_at", "timestamp with time zone"),
        ],
        StorageError::Storage,
    )
    .await?;

    validate_postgres_table_schema(
        pool,
        DB_TABLE_SESSIONS.as_str(),
        &[
            ("id", "text"),
            ("account_id", "text"),
            ("expires_at", "timestamp with time zone"),
            ("created_at", "timestamp with time zone"),
        ],
        StorageError::Storage,
    )
    .await
}

async fn insert_challenge_postgres<'e, E>(
    executor: E,
    challenge: &NewChallengeRecord,
    now: DateTime<Utc>,
) -> Result<ChallengeRecord, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let table_name = DB_TABLE_CHALLENGES.as_str();

    sqlx::query(&format!(
        r#"
        INSERT INTO {table_name} (id, value, account_id, expires_at, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#
    ))
    .bind(challenge.id.as_str())
    .bind(challenge.value.as_slice())
    .bind(challenge.account_id.as_str())
    .bind(challenge.expires_at)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(ChallengeRecord {
        id: challenge.id.clone(),
        value: challenge.value.clone(),
        account_id: challenge.account_id.clone(),
        expires_at: challenge.expires_at,
        created_at: now,
    })
}

/// Deletes the challenge inside the caller's transaction. Zero affected rows
/// means another request consumed it first.
async fn consume_challenge_postgres(
    conn: &mut sqlx::PgConnection,
    challenge_id: &ChallengeId,
) -> Result<(), StorageError> {
    let table_name = DB_TABLE_CHALLENGES.as_str();

    let deleted = sqlx::query(&format!("DELETE FROM {table_name} WHERE id = $1"))
        .bind(challenge_id.as_str())
        .execute(conn)
        .await?;

    if deleted.rows_affected() != 1 {
        return Err(StorageError::ChallengeConsumed);
    }
    Ok(())
}

pub(super) async fn create_account_postgres(
    pool: &Pool<Postgres>,
    account: &NewAccountRecord,
    challenge: Option<&NewChallengeRecord>,
) -> Result<CreatedAccount, StorageError> {
    let table_name = DB_TABLE_ACCOUNTS.as_str();
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    sqlx::query(&format!(
        r#"
        INSERT INTO {table_name} (id, email, display_name, created_at, updated_at, version)
        VALUES ($1, $2, $3, $4, $5, 0)
        "#
    ))
    .bind(account.id.as_str())
    .bind(&account.email)
    .bind(&account.display_name)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(classify_account_insert_error)?;

    let challenge = match challenge {
        Some(challenge) => Some(insert_challenge_postgres(&mut *tx, challenge, now).await?),
        None => None,
    };

    tx.commit().await?;

    Ok(CreatedAccount {
        account: AccountRecord {
            id: account.id.clone(),
            email: account.email.clone(),
            display_name: account.display_name.clone(),
            created_at: now,
            updated_at: now,
            version: 0,
        },
        challenge,
    })
}

pub(super) async fn get_account_by_id_postgres(
    pool: &Pool<Postgres>,
    id: &AccountId,
) -> Result<Option<AccountRecord>, StorageError> {
    let table_name = DB_TABLE_ACCOUNTS.as_str();

    let account = sqlx::query_as::<_, AccountRecord>(&format!(
        "SELECT id, email, display_name, created_at, updated_at, version FROM {table_name} WHERE id = $1"
    ))
    .bind(id.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(account)
}

pub(super) async fn get_account_by_email_postgres(
    pool: &Pool<Postgres>,
    email: &str,
) -> Result<Option<AccountRecord>, StorageError> {
    let table_name = DB_TABLE_ACCOUNTS.as_str();

    let account = sqlx::query_as::<_, AccountRecord>(&format!(
        "SELECT id, email, display_name, created_at, updated_at, version FROM {table_name} WHERE email = $1"
    ))
    .bind(email)
    .fetch_optional(pool)
    .await?;

    Ok(account)
}

pub(super) async fn create_challenge_postgres(
    pool: &Pool<Postgres>,
    challenge: &NewChallengeRecord,
) -> Result<ChallengeRecord, StorageError> {
    Ok(insert_challenge_postgres(pool, challenge, Utc::now()).await?)
}

pub(super) async fn get_challenge_postgres(
    pool: &Pool<Postgres>,
    id: &ChallengeId,
    include_expired: bool,
) -> Result<Option<ChallengeRecord>, StorageError> {
    let table_name = DB_TABLE_CHALLENGES.as_str();
    let base = format!(
        "SELECT id, value, account_id, expires_at, created_at FROM {table_name} WHERE id = $1"
    );

    let challenge = if include_expired {
        sqlx::query_as::<_, ChallengeRecord>(&base)
            .bind(id.as_str())
            .fetch_optional(pool)
            .await?
    } else {
        sqlx::query_as::<_, ChallengeRecord>(&format!("{base} AND expires_at >= $2"))
            .bind(id.as_str())
            .bind(Utc::now())
            .fetch_optional(pool)
            .await?
    };

    Ok(challenge)
}

pub(super) async fn delete_challenge_postgres(
    pool: &Pool<Postgres>,
    id: &ChallengeId,
) -> Result<(), StorageError> {
    let table_name = DB_TABLE_CHALLENGES.as_str();

    sqlx::query(&format!("DELETE FROM {table_name} WHERE id = $1"))
        .bind(id.as_str())
        .execute(pool)
        .await?;

    Ok(())
}

pub(super) async fn delete_expired_challenges_postgres(
    pool: &Pool<Postgres>,
) -> Result<u64, StorageError> {
    let table_name = DB_TABLE_CHALLENGES.as_str();

    let result = sqlx::query(&format!("DELETE FROM {table_name} WHERE expires_at < $1"))
        .bind(Utc::now())
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

pub(super) async fn create_credential_postgres(
    pool: &Pool<Postgres>,
    credential: &NewCredentialRecord,
    source_challenge_id: Option<&ChallengeId>,
) -> Result<CredentialRecord, StorageError> {
    let table_name = DB_TABLE_CREDENTIALS.as_str();
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    if let Some(challenge_id) = source_challenge_id {
        // Dropping `tx` on the error path rolls the transaction back.
        consume_challenge_postgres(&mut tx, challenge_id).await?;
    }

    sqlx::query(&format!(
        r#"
        INSERT INTO {table_name} (id, account_id, credential_type, public_key, use_count, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#
    ))
    .bind(credential.id.as_slice())
    .bind(credential.account_id.as_str())
    .bind(credential.credential_type.as_str())
    .bind(credential.public_key.as_slice())
    .bind(i64::from(credential.use_count))
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(CredentialRecord {
        id: credential.id.clone(),
        account_id: credential.account_id.clone(),
        credential_type: credential.credential_type,
        public_key: credential.public_key.clone(),
        use_count: credential.use_count,
        created_at: now,
        revoked_at: None,
    })
}

pub(super) async fn get_credential_postgres(
    pool: &Pool<Postgres>,
    id: &[u8],
) -> Result<Option<CredentialRecord>, StorageError> {
    let table_name = DB_TABLE_CREDENTIALS.as_str();

    let credential = sqlx::query_as::<_, CredentialRecord>(&format!(
        r#"
        SELECT id, account_id, credential_type, public_key, use_count, created_at, revoked_at
        FROM {table_name} WHERE id = $1
        "#
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(credential)
}

pub(super) async fn get_account_credentials_postgres(
    pool: &Pool<Postgres>,
    account_id: &AccountId,
) -> Result<Vec<CredentialRecord>, StorageError> {
    let table_name = DB_TABLE_CREDENTIALS.as_str();

    let credentials = sqlx::query_as::<_, CredentialRecord>(&format!(
        r#"
        SELECT id, account_id, credential_type, public_key, use_count, created_at, revoked_at
        FROM {table_name} WHERE account_id = $1 ORDER BY created_at ASC
        "#
    ))
    .bind(account_id.as_str())
    .fetch_all(pool)
    .await?;

    Ok(credentials)
}

pub(super) async fn update_credential_use_count_postgres(
    pool: &Pool<Postgres>,
    id: &[u8],
    new_count: u32,
) -> Result<(), StorageError> {
    let table_name = DB_TABLE_CREDENTIALS.as_str();

    sqlx::query(&format!(
        "UPDATE {table_name} SET use_count = $1 WHERE id = $2"
    ))
    .bind(i64::from(new_count))
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

pub(super) async fn record_credential_use_postgres(
    pool: &Pool<Postgres>,
    id: &[u8],
    expected_count: u32,
    new_count: u32,
    source_challenge_id: Option<&ChallengeId>,
) -> Result<(), StorageError> {
    let table_name = DB_TABLE_CREDENTIALS.as_str();

    let mut tx = pool.begin().await?;

    if let Some(challenge_id) = source_challenge_id {
        consume_challenge_postgres(&mut tx, challenge_id).await?;
    }

    let updated = sqlx::query(&format!(
        "UPDATE {table_name} SET use_count = $1 WHERE id = $2 AND use_count = $3"
    ))
    .bind(i64::from(new_count))
    .bind(id)
    .bind(i64::from(expected_count))
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() != 1 {
        return Err(StorageError::UseCountConflict);
    }

    tx.commit().await?;
    Ok(())
}

pub(super) async fn create_session_postgres(
    pool: &Pool<Postgres>,
    session: &NewSessionRecord,
) -> Result<SessionRecord, StorageError> {
    let table_name = DB_TABLE_SESSIONS.as_str();
    let now = Utc::now();

    sqlx::query(&format!(
        "INSERT INTO {table_name} (id, account_id, expires_at, created_at) VALUES ($1, $2, $3, $4)"
    ))
    .bind(session.id.as_str())
    .bind(session.account_id.as_str())
    .bind(session.expires_at)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(SessionRecord {
        id: session.id.clone(),
        account_id: session.account_id.clone(),
        expires_at: session.expires_at,
        created_at: now,
    })
}

pub(super) async fn get_session_postgres(
    pool: &Pool<Postgres>,
    id: &SessionId,
    include_expired: bool,
) -> Result<Option<SessionWithAccountRecord>, StorageError> {
    let sessions = DB_TABLE_SESSIONS.as_str();
    let accounts = DB_TABLE_ACCOUNTS.as_str();
    let base = format!(
        r#"
        SELECT s.id AS session_id, s.account_id AS account_id,
               s.expires_at AS session_expires_at, s.created_at AS session_created_at,
               a.email AS account_email, a.display_name AS account_display_name,
               a.created_at AS account_created_at, a.updated_at AS account_updated_at,
               a.version AS account_version
        FROM {sessions} s JOIN {accounts} a ON a.id = s.account_id
        WHERE s.id = $1
        "#
    );

    let row = if include_expired {
        sqlx::query_as::<_, SessionAccountRow>(&base)
            .bind(id.as_str())
            .fetch_optional(pool)
            .await?
    } else {
        sqlx::query_as::<_, SessionAccountRow>(&format!("{base} AND s.expires_at >= $2"))
            .bind(id.as_str())
            .bind(Utc::now())
            .fetch_optional(pool)
            .await?
    };

    Ok(row.map(SessionWithAccountRecord::from))
}

pub(super) async fn delete_session_postgres(
    pool: &Pool<Postgres>,
    id: &SessionId,
) -> Result<(), StorageError> {
    let table_name = DB_TABLE_SESSIONS.as_str();

    sqlx::query(&format!("DELETE FROM {table_name} WHERE id = $1"))
        .bind(id.as_str())
        .execute(pool)
        .await?;

    Ok(())
}
