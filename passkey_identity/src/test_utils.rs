//! Shared test fixtures: an in-memory store, a deterministic verifier and
//! helpers that build browser-shaped credential responses.

use std::sync::{Arc, Once};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;

use crate::config::IdentityConfig;
use crate::coordination::IdentityService;
use crate::ids::{AccountId, ChallengeId};
use crate::passkey::{
    AuthenticationResponse, CredentialVerifier, RegistrationResponse, VerificationError,
    VerifiedAuthentication, VerifiedRegistration,
};
use crate::storage::{NewAccountRecord, NewChallengeRecord, SqlIdentityStore};
use crate::utils::{base64url_decode, base64url_encode};

pub(crate) const TEST_ORIGIN: &str = "https://example.com";

/// Installs a test subscriber once; `RUST_LOG` controls the output.
fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub(crate) fn test_config() -> IdentityConfig {
    IdentityConfig::new(
        vec![TEST_ORIGIN.to_string()],
        vec![b"test-key-zero".to_vec(), b"test-key-one".to_vec()],
    )
    .unwrap()
}

/// A fresh, initialised store on a private in-memory SQLite database.
///
/// A single connection that never idles out keeps the database alive for the
/// whole test.
pub(crate) async fn memory_store() -> SqlIdentityStore {
    init_tracing();
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = SqlIdentityStore::from_sqlite_pool(pool);
    store.init().await.unwrap();
    store
}

/// An initialised store on a SQLite file with several pooled connections, so
/// transactions from different tasks really overlap. The file lives as long
/// as the returned directory.
pub(crate) async fn file_store(max_connections: u32) -> (SqlIdentityStore, tempfile::TempDir) {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(dir.path().join("identity.db"))
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(10));
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .unwrap();
    let store = SqlIdentityStore::from_sqlite_pool(pool);
    store.init().await.unwrap();
    (store, dir)
}

pub(crate) async fn test_service() -> (IdentityService, Arc<SqlIdentityStore>) {
    test_service_with(test_config()).await
}

pub(crate) async fn test_service_with(
    config: IdentityConfig,
) -> (IdentityService, Arc<SqlIdentityStore>) {
    let store = Arc::new(memory_store().await);
    let service = IdentityService::new(config, store.clone(), Arc::new(FakeVerifier)).unwrap();
    (service, store)
}

pub(crate) fn new_account_record(email: &str) -> NewAccountRecord {
    NewAccountRecord {
        id: AccountId::new().unwrap(),
        email: email.to_string(),
        display_name: "Test User".to_string(),
    }
}

/// A challenge expiring `ttl` from now. A negative `ttl` makes it expired.
pub(crate) fn new_challenge_record(account_id: &AccountId, ttl: Duration) -> NewChallengeRecord {
    NewChallengeRecord {
        id: ChallengeId::new().unwrap(),
        value: crate::utils::gen_random_bytes(64).unwrap(),
        account_id: account_id.clone(),
        expires_at: Utc::now() + ttl,
    }
}

/// The public key [`FakeVerifier`] associates with a credential id.
pub(crate) fn fake_public_key(credential_id: &[u8]) -> Vec<u8> {
    [b"pk:".as_slice(), credential_id].concat()
}

pub(crate) fn registration_response(
    credential_id: &[u8],
    challenge: &[u8],
    origin: &str,
) -> RegistrationResponse {
    RegistrationResponse {
        id: base64url_encode(credential_id),
        raw_id: base64url_encode(credential_id),
        type_: "public-key".to_string(),
        response: json!({
            "challenge": base64url_encode(challenge),
            "origin": origin,
            "rpId": "example.com",
            "publicKey": base64url_encode(&fake_public_key(credential_id)),
        }),
        authenticator_attachment: Some("platform".to_string()),
    }
}

pub(crate) fn authentication_response(
    credential_id: &[u8],
    challenge: &[u8],
    origin: &str,
    sign_count: u32,
) -> AuthenticationResponse {
    AuthenticationResponse {
        id: base64url_encode(credential_id),
        raw_id: base64url_encode(credential_id),
        type_: "public-key".to_string(),
        response: json!({
            "challenge": base64url_encode(challenge),
            "origin": origin,
            "rpId": "example.com",
            "signature": base64url_encode(&fake_public_key(credential_id)),
            "signCount": sign_count,
        }),
        authenticator_attachment: None,
    }
}

/// Deterministic verifier: the "signature" is the public key itself.
pub(crate) struct FakeVerifier;

fn field<'a>(response: &'a serde_json::Value, name: &str) -> Result<&'a str, VerificationError> {
    response[name]
        .as_str()
        .ok_or_else(|| VerificationError::Malformed(format!("missing {name}")))
}

fn bytes_field(response: &serde_json::Value, name: &str) -> Result<Vec<u8>, VerificationError> {
    base64url_decode(field(response, name)?)
        .map_err(|e| VerificationError::Malformed(format!("{name}: {e}")))
}

fn check_client_data(
    type_: &str,
    response: &serde_json::Value,
    expected_challenge: &[u8],
    expected_rp_id: &str,
    expected_origins: &[String],
) -> Result<(), VerificationError> {
    if type_ != "public-key" {
        return Err(VerificationError::Malformed(format!("type {type_}")));
    }
    if bytes_field(response, "challenge")? != expected_challenge {
        return Err(VerificationError::Rejected("challenge mismatch".to_string()));
    }
    let origin = field(response, "origin")?;
    if !expected_origins.iter().any(|o| o == origin) {
        return Err(VerificationError::Rejected(format!("origin {origin}")));
    }
    if field(response, "rpId")? != expected_rp_id {
        return Err(VerificationError::Rejected("rp id mismatch".to_string()));
    }
    Ok(())
}

#[async_trait]
impl CredentialVerifier for FakeVerifier {
    async fn verify_registration_response(
        &self,
        response: &RegistrationResponse,
        expected_challenge: &[u8],
        expected_rp_id: &str,
        expected_origins: &[String],
    ) -> Result<VerifiedRegistration, VerificationError> {
        check_client_data(
            &response.type_,
            &response.response,
            expected_challenge,
            expected_rp_id,
            expected_origins,
        )?;
        Ok(VerifiedRegistration {
            credential_id: response.raw_id_bytes()?,
            public_key: bytes_field(&response.response, "publicKey")?,
        })
    }

    async fn verify_authentication_response(
        &self,
        response: &AuthenticationResponse,
        expected_challenge: &[u8],
        expected_rp_id: &str,
        expected_origins: &[String],
        stored_public_key: &[u8],
        stored_sign_count: u32,
    ) -> Result<VerifiedAuthentication, VerificationError> {
        check_client_data(
            &response.type_,
            &response.response,
            expected_challenge,
            expected_rp_id,
            expected_origins,
        )?;
        if bytes_field(&response.response, "signature")? != stored_public_key {
            return Err(VerificationError::Rejected("bad signature".to_string()));
        }

        let new_sign_count = response.response["signCount"]
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| VerificationError::Malformed("signCount".to_string()))?;
        if new_sign_count <= stored_sign_count && !(new_sign_count == 0 && stored_sign_count == 0)
        {
            return Err(VerificationError::Replay {
                stored: stored_sign_count,
                received: new_sign_count,
            });
        }

        Ok(VerifiedAuthentication { new_sign_count })
    }
}
