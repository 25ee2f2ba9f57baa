use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};

use crate::ids::{AccountId, ChallengeId, SessionId};

use super::config::{
    DB_TABLE_ACCOUNTS, DB_TABLE_CHALLENGES, DB_TABLE_CREDENTIALS, DB_TABLE_SESSIONS,
    EMAIL_CONSTRAINT,
};
use super::errors::{StorageError, classify_account_insert_error};
use super::schema_validation::validate_sqlite_table_schema;
use super::types::{
    AccountRecord, ChallengeRecord, CreatedAccount, CredentialRecord, NewAccountRecord,
    NewChallengeRecord, NewCredentialRecord, NewSessionRecord, SessionAccountRow, SessionRecord,
    SessionWithAccountRecord,
};

// SQLite implementations
pub(super) async fn create_tables_sqlite(pool: &Pool<Sqlite>) -> Result<(), StorageError> {
    let accounts = DB_TABLE_ACCOUNTS.as_str();
    let challenges = DB_TABLE_CHALLENGES.as_str();
    let credentials = DB_TABLE_CREDENTIALS.as_str();
    let sessions = DB_TABLE_SESSIONS.as_str();
    let email_constraint = EMAIL_CONSTRAINT.as_str();

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {accounts} (
            id TEXT PRIMARY KEY NOT NULL,
            email TEXT NOT NULL,
            display_name TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL,
            version INTEGER NOT NULL DEFAULT 0,
            CONSTRAINT {email_constraint} UNIQUE (email)
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {challenges} (
            id TEXT PRIMARY KEY NOT NULL,
            value BLOB NOT NULL,
            account_id TEXT NOT NULL REFERENCES {accounts}(id) ON DELETE CASCADE,
            expires_at TIMESTAMP NOT NULL,
            created_at TIMESTAMP NOT NULL
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {credentials} (
            id BLOB PRIMARY KEY NOT NULL,
            account_id TEXT NOT NULL REFERENCES {accounts}(id) ON DELETE CASCADE,
            credential_type TEXT NOT NULL,
            public_key BLOB NOT NULL,
            use_count INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL,
            revoked_at TIMESTAMP
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {sessions} (
            id TEXT PRIMARY KEY NOT NULL,
            account_id TEXT NOT NULL REFERENCES {accounts}(id) ON DELETE CASCADE,
            expires_at TIMESTAMP NOT NULL,
            created_at TIMESTAMP NOT NULL
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
pub(super) async fn validate_tables_sqlite(pool: &Pool<Sqlite>) -> Result<(), StorageError> {
    validate_sqlite_table_schema(
        pool,
        DB_TABLE_ACCOUNTS.as_str(),
        &[
            ("id", "TEXT"),
            ("email", "TEXT"),
            ("display_name", "TEXT"),
            ("created_at", "TIMESTAMP"),
            ("updated_at", "TIMESTAMP"),
            ("version", "INTEGER"),
        ],
        StorageError::Storage,
    )
    .await?;

    validate_sqlite_table_schema(
        pool,
        DB_TABLE_CHALLENGES.as_str(),
        &[
            ("id", "TEXT"),
            ("value", "BLOB"),
            ("account_id", "TEXT"),
            ("expires_at", "TIMESTAMP"),
            ("created_at", "TIMESTAMP"),
        ],
        StorageError::Storage,
    )
    .await?;

    validate_sqlite_table_schema(
        pool,
        DB_TABLE_CREDENTIALS.as_str(),
        &[
            ("id", "BLOB"),
            ("account_id", "TEXT"),
            ("credential_type", "TEXT"),
            ("public_key", "BLOB"),
            ("use_count", "INTEGER"),
            ("created_at", "TIMESTAMP"),
            ("revoked_at", "TIMESTAMP"),
        ],
        StorageError::Storage,
    )
    .await?;

    validate_sqlite_table_schema(
        pool,
        DB_TABLE_SESSIONS.as_str(),
        &[
            ("id", "TEXT"),
            ("account_id", "TEXT"),
            ("expires_at", "TIMESTAMP"),
            ("created_at", "TIMESTAMP"),
        ],
        StorageError::Storage,
    )
    .await
}

async fn insert_challenge_sqlite<'e, E>(
    executor: E,
    challenge: &NewChallengeRecord,
    now: DateTime<Utc>,
) -> Result<ChallengeRecord, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let table_name = DB_TABLE_CHALLENGES.as_str();

    sqlx::query(&format!(
        r#"
        INSERT INTO {table_name} (id, value, account_id, expires_at, created_at)
        VALUES (?, ?, ?, ?, ?)
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
async fn consume_challenge_sqlite(
    conn: &mut sqlx::SqliteConnection,
    challenge_id: &ChallengeId,
) -> Result<(), StorageError> {
    let table_name = DB_TABLE_CHALLENGES.as_str();

    let deleted = sqlx::query(&format!("DELETE FROM {table_name} WHERE id = ?"))
        .bind(challenge_id.as_str())
        .execute(conn)
        .await?;

    if deleted.rows_affected() != 1 {
        return Err(StorageError::ChallengeConsumed);
    }
    Ok(())
}

pub(super) async fn create_account_sqlite(
    pool: &Pool<Sqlite>,
    account: &NewAccountRecord,
    challenge: Option<&NewChallengeRecord>,
) -> Result<CreatedAccount, StorageError> {
    let table_name = DB_TABLE_ACCOUNTS.as_str();
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    sqlx::query(&format!(
        r#"
        INSERT INTO {table_name} (id, email, display_name, created_at, updated_at, version)
        VALUES (?, ?, ?, ?, ?, 0)
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
        Some(challenge) => Some(insert_challenge_sqlite(&mut *tx, challenge, now).await?),
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

pub(super) async fn get_account_by_id_sqlite(
    pool: &Pool<Sqlite>,
    id: &AccountId,
) -> Result<Option<AccountRecord>, StorageError> {
    let table_name = DB_TABLE_ACCOUNTS.as_str();

    let account = sqlx::query_as::<_, AccountRecord>(&format!(
        "SELECT id, email, display_name, created_at, updated_at, version FROM {table_name} WHERE id = ?"
    ))
    .bind(id.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(account)
}

pub(super) async fn get_account_by_email_sqlite(
    pool: &Pool<Sqlite>,
    email: &str,
) -> Result<Option<AccountRecord>, StorageError> {
    let table_name = DB_TABLE_ACCOUNTS.as_str();

    let account = sqlx::query_as::<_, AccountRecord>(&format!(
        "SELECT id, email, display_name, created_at, updated_at, version FROM {table_name} WHERE email = ?"
    ))
    .bind(email)
    .fetch_optional(pool)
    .await?;

    Ok(account)
}

pub(super) async fn create_challenge_sqlite(
    pool: &Pool<Sqlite>,
    challenge: &NewChallengeRecord,
) -> Result<ChallengeRecord, StorageError> {
    Ok(insert_challenge_sqlite(pool, challenge, Utc::now()).await?)
}

pub(super) async fn get_challenge_sqlite(
    pool: &Pool<Sqlite>,
    id: &ChallengeId,
    include_expired: bool,
) -> Result<Option<ChallengeRecord>, StorageError> {
    let table_name = DB_TABLE_CHALLENGES.as_str();
    let base = format!(
        "SELECT id, value, account_id, expires_at, created_at FROM {table_name} WHERE id = ?"
    );

    let challenge = if include_expired {
        sqlx::query_as::<_, ChallengeRecord>(&base)
            .bind(id.as_str())
            .fetch_optional(pool)
            .await?
    } else {
        sqlx::query_as::<_, ChallengeRecord>(&format!("{base} AND expires_at >= ?"))
            .bind(id.as_str())
            .bind(Utc::now())
            .fetch_optional(pool)
            .await?
    };

    Ok(challenge)
}

pub(super) async fn delete_challenge_sqlite(
    pool: &Pool<Sqlite>,
    id: &ChallengeId,
) -> Result<(), StorageError> {
    let table_name = DB_TABLE_CHALLENGES.as_str();

    sqlx::query(&format!("DELETE FROM {table_name} WHERE id = ?"))
        .bind(id.as_str())
        .execute(pool)
        .await?;

    Ok(())
}

pub(super) async fn delete_expired_challenges_sqlite(
    pool: &Pool<Sqlite>,
) -> Result<u64, StorageError> {
    let table_name = DB_TABLE_CHALLENGES.as_str();

    let result = sqlx::query(&format!("DELETE FROM {table_name} WHERE expires_at < ?"))
        .bind(Utc::now())
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

pub(super) async fn create_credential_sqlite(
    pool: &Pool<Sqlite>,
    credential: &NewCredentialRecord,
    source_challenge_id: Option<&ChallengeId>,
) -> Result<CredentialRecord, StorageError> {
    let table_name = DB_TABLE_CREDENTIALS.as_str();
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    if let Some(challenge_id) = source_challenge_id {
        // Dropping `tx` on the error path rolls the transaction back.
        consume_challenge_sqlite(&mut tx, challenge_id).await?;
    }

    sqlx::query(&format!(
        r#"
        INSERT INTO {table_name} (id, account_id, credential_type, public_key, use_count, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
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

pub(super) async fn get_credential_sqlite(
    pool: &Pool<Sqlite>,
    id: &[u8],
) -> Result<Option<CredentialRecord>, StorageError> {
    let table_name = DB_TABLE_CREDENTIALS.as_str();

    let credential = sqlx::query_as::<_, CredentialRecord>(&format!(
        r#"
        SELECT id, account_id, credential_type, public_key, use_count, created_at, revoked_at
        FROM {table_name} WHERE id = ?
        "#
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(credential)
}

pub(super) async fn get_account_credentials_sqlite(
    pool: &Pool<Sqlite>,
    account_id: &AccountId,
) -> Result<Vec<CredentialRecord>, StorageError> {
    let table_name = DB_TABLE_CREDENTIALS.as_str();

    let credentials = sqlx::query_as::<_, CredentialRecord>(&format!(
        r#"
        SELECT id, account_id, credential_type, public_key, use_count, created_at, revoked_at
        FROM {table_name} WHERE account_id = ? ORDER BY created_at ASC
        "#
    ))
    .bind(account_id.as_str())
    .fetch_all(pool)
    .await?;

    Ok(credentials)
}

pub(super) async fn update_credential_use_count_sqlite(
    pool: &Pool<Sqlite>,
    id: &[u8],
    new_count: u32,
) -> Result<(), StorageError> {
    let table_name = DB_TABLE_CREDENTIALS.as_str();

    sqlx::query(&format!(
        "UPDATE {table_name} SET use_count = ? WHERE id = ?"
    ))
    .bind(i64::from(new_count))
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

pub(super) async fn record_credential_use_sqlite(
    pool: &Pool<Sqlite>,
    id: &[u8],
    expected_count: u32,
    new_count: u32,
    source_challenge_id: Option<&ChallengeId>,
) -> Result<(), StorageError> {
    let table_name = DB_TABLE_CREDENTIALS.as_str();

    let mut tx = pool.begin().await?;

    if let Some(challenge_id) = source_challenge_id {
        consume_challenge_sqlite(&mut tx, challenge_id).await?;
    }

    let updated = sqlx::query(&format!(
        "UPDATE {table_name} SET use_count = ? WHERE id = ? AND use_count = ?"
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

pub(super) async fn create_session_sqlite(
    pool: &Pool<Sqlite>,
    session: &NewSessionRecord,
) -> Result<SessionRecord, StorageError> {
    let table_name = DB_TABLE_SESSIONS.as_str();
    let now = Utc::now();

    sqlx::query(&format!(
        "INSERT INTO {table_name} (id, account_id, expires_at, created_at) VALUES (?, ?, ?, ?)"
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

pub(super) async fn get_session_sqlite(
    pool: &Pool<Sqlite>,
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
        WHERE s.id = ?
        "#
    );

    let row = if include_expired {
        sqlx::query_as::<_, SessionAccountRow>(&base)
            .bind(id.as_str())
            .fetch_optional(pool)
            .await?
    } else {
        sqlx::query_as::<_, SessionAccountRow>(&format!("{base} AND s.expires_at >= ?"))
            .bind(id.as_str())
            .bind(Utc::now())
            .fetch_optional(pool)
            .await?
    };

    Ok(row.map(SessionWithAccountRecord::from))
}

pub(super) async fn delete_session_sqlite(
    pool: &Pool<Sqlite>,
    id: &SessionId,
) -> Result<(), StorageError> {
    let table_name = DB_TABLE_SESSIONS.as_str();

    sqlx::query(&format!("DELETE FROM {table_name} WHERE id = ?"))
        .bind(id.as_str())
        .execute(pool)
        .await?;

    Ok(())
}
