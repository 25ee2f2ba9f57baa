//! Database table configuration

use std::{env, sync::LazyLock};

/// Table prefix from environment variable
pub(crate) static DB_TABLE_PREFIX: LazyLock<String> =
    LazyLock::new(|| env::var("DB_TABLE_PREFIX").unwrap_or_else(|_| "susi_".to_string()));

pub(super) static DB_TABLE_ACCOUNTS: LazyLock<String> =
    LazyLock::new(|| format!("{}accounts", *DB_TABLE_PREFIX));

pub(super) static DB_TABLE_CHALLENGES: LazyLock<String> =
    LazyLock::new(|| format!("{}challenges", *DB_TABLE_PREFIX));

pub(super) static DB_TABLE_CREDENTIALS: LazyLock<String> =
    LazyLock::new(|| format!("{}credentials", *DB_TABLE_PREFIX));

pub(super) static DB_TABLE_SESSIONS: LazyLock<String> =
    LazyLock::new(|| format!("{}sessions", *DB_TABLE_PREFIX));

/// Name of the unique constraint on account emails. A violation of this
/// constraint, and only this one, becomes `StorageError::EmailConflict`.
pub(super) static EMAIL_CONSTRAINT: LazyLock<String> =
    LazyLock::new(|| format!("{}_email_must_be_unique", DB_TABLE_ACCOUNTS.replace('.', "_")));
