//! Persistent store for accounts, challenges, credentials and sessions.

mod config;
mod data_store;
mod errors;
mod identity_store;
mod postgres;
mod schema_validation;
mod sql_store;
mod sqlite;
mod types;

pub use errors::StorageError;
pub use identity_store::IdentityStore;
pub use sql_store::SqlIdentityStore;
pub use types::{
    AccountRecord, ChallengeRecord, CreatedAccount, CredentialRecord, CredentialType,
    NewAccountRecord, NewChallengeRecord, NewCredentialRecord, NewSessionRecord, SessionRecord,
    SessionWithAccountRecord,
};
