use std::sync::Arc;

use chrono::Utc;

use crate::config::IdentityConfig;
use crate::ids::{AccountId, ChallengeId};
use crate::passkey::{
    AuthenticationResponse, CredentialVerifier, RegistrationOptions, RegistrationResponse,
    RegistrationUser, VerificationError,
};
use crate::session::SessionGrant;
use crate::storage::{
    AccountRecord, ChallengeRecord, CredentialType, IdentityStore, NewAccountRecord,
    NewChallengeRecord, NewCredentialRecord,
};
use crate::token::TokenSigner;
use crate::utils::gen_random_bytes;

use super::errors::IdentityError;
use super::types::{
    Account, AuthenticationChallenge, CreateAccountOutcome, Credential, NewAccount,
    RegistrationChallenge,
};

/// Size of every challenge value in bytes.
const CHALLENGE_LEN: usize = 64;

/// Passkey sign-up and sign-in.
///
/// Holds configuration plus shared handles to the store, the verifier and the
/// token signer. Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct IdentityService {
    pub(crate) config: Arc<IdentityConfig>,
    pub(crate) store: Arc<dyn IdentityStore>,
    verifier: Arc<dyn CredentialVerifier>,
    pub(crate) signer: TokenSigner,
}

impl IdentityService {
    /// Builds the service. The token signer is created from the configured
    /// signing keys and fails fast when none are usable.
    pub fn new(
        config: IdentityConfig,
        store: Arc<dyn IdentityStore>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Result<Self, IdentityError> {
        let signer = TokenSigner::with_retired_keys(
            config.signing_keys().to_vec(),
            config.retired_key_indices(),
        )?;

        Ok(Self {
            config: Arc::new(config),
            store,
            verifier,
            signer,
        })
    }

    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    fn new_challenge(&self, account_id: &AccountId) -> Result<NewChallengeRecord, IdentityError> {
        Ok(NewChallengeRecord {
            id: ChallengeId::new()?,
            value: gen_random_bytes(CHALLENGE_LEN)?,
            account_id: account_id.clone(),
            expires_at: Utc::now() + self.config.challenge_ttl(),
        })
    }

    fn registration_options(
        &self,
        account: &AccountRecord,
        challenge: &ChallengeRecord,
    ) -> RegistrationOptions {
        let user = RegistrationUser {
            id: account.id.as_str(),
            name: &account.email,
            display_name: &account.display_name,
        };
        self.verifier.generate_registration_options(
            &self.config.relying_party(),
            user,
            &challenge.value,
        )
    }

    /// Returns the challenge if it is live and bound to `account_id`.
    async fn live_challenge(
        &self,
        challenge_id: &ChallengeId,
        account_id: &AccountId,
    ) -> Result<ChallengeRecord, IdentityError> {
        // Expired rows are fetched too so the expiry check happens here.
        match self.store.get_challenge(challenge_id, true).await? {
            Some(challenge) if challenge.is_expired_at(Utc::now()) => {
                tracing::warn!(%challenge_id, "Challenge past expiry");
                Err(IdentityError::ChallengeExpired)
            }
            Some(challenge) if &challenge.account_id == account_id => Ok(challenge),
            Some(_) => {
                tracing::warn!(%challenge_id, "Challenge belongs to another account");
                Err(IdentityError::ChallengeExpired)
            }
            None => {
                tracing::warn!(%challenge_id, "Challenge missing or consumed");
                Err(IdentityError::ChallengeExpired)
            }
        }
    }

    /// Creates an account together with its first registration challenge.
    ///
    /// Email uniqueness is enforced by the store; a duplicate yields
    /// [`IdentityError::EmailConflict`].
    #[tracing::instrument(skip(self, new_account))]
    pub async fn create_account(
        &self,
        new_account: NewAccount,
    ) -> Result<CreateAccountOutcome, IdentityError> {
        let email = new_account.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(
                IdentityError::InvalidInput("email must be a valid address".to_string()).log(),
            );
        }
        let display_name = new_account.display_name.trim();
        if display_name.is_empty() {
            return Err(
                IdentityError::InvalidInput("display name must not be empty".to_string()).log(),
            );
        }

        let account_id = AccountId::new()?;
        let challenge = self.new_challenge(&account_id)?;
        let account = NewAccountRecord {
            id: account_id,
            email: email.to_string(),
            display_name: display_name.to_string(),
        };

        let created = self.store.create_account(account, Some(challenge)).await?;
        let challenge = created.challenge.ok_or_else(|| {
            IdentityError::Internal("account stored without its challenge".to_string()).log()
        })?;

        let options = self.registration_options(&created.account, &challenge);
        tracing::info!(account_id = %created.account.id, "Account created");

        Ok(CreateAccountOutcome {
            account: created.account.into(),
            challenge_id: challenge.id,
            options,
        })
    }

    /// Issues registration options for another passkey on an existing account.
    #[tracing::instrument(skip(self), fields(account_id = %account_id))]
    pub async fn create_registration_challenge(
        &self,
        account_id: &AccountId,
    ) -> Result<RegistrationChallenge, IdentityError> {
        let account = self
            .store
            .get_account_by_id(account_id)
            .await?
            .ok_or_else(|| IdentityError::InvalidAccount.log())?;

        let challenge = self
            .store
            .create_challenge(self.new_challenge(&account.id)?)
            .await?;
        let options = self.registration_options(&account, &challenge);

        Ok(RegistrationChallenge {
            account_id: account.id,
            challenge_id: challenge.id,
            options,
        })
    }

    /// Verifies a registration response and binds the credential to the
    /// account, consuming the challenge in the same transaction.
    #[tracing::instrument(
        skip(self, response),
        fields(account_id = %account_id, challenge_id = %challenge_id)
    )]
    pub async fn add_passkey_credential(
        &self,
        account_id: &AccountId,
        challenge_id: &ChallengeId,
        response: RegistrationResponse,
    ) -> Result<Credential, IdentityError> {
        let challenge = self.live_challenge(challenge_id, account_id).await?;

        let verified = self
            .verifier
            .verify_registration_response(
                &response,
                &challenge.value,
                self.config.rp_id(),
                self.config.origins(),
            )
            .await?;

        let credential = NewCredentialRecord {
            id: verified.credential_id,
            account_id: account_id.clone(),
            credential_type: CredentialType::PublicKey,
            public_key: verified.public_key,
            use_count: 0,
        };
        let stored = self
            .store
            .create_credential(credential, Some(&challenge.id))
            .await?;

        tracing::info!("Passkey credential added");
        Ok(stored.into())
    }

    /// Issues authentication options for the account registered under
    /// `email`. Revoked credentials are left out of the allow list.
    #[tracing::instrument(skip(self, email))]
    pub async fn create_authentication_challenge(
        &self,
        email: &str,
    ) -> Result<AuthenticationChallenge, IdentityError> {
        let account = self
            .store
            .get_account_by_email(email.trim())
            .await?
            .ok_or_else(|| IdentityError::InvalidAccount.log())?;

        let challenge = self
            .store
            .create_challenge(self.new_challenge(&account.id)?)
            .await?;

        let allow_credential_ids: Vec<Vec<u8>> = self
            .store
            .get_account_credentials(&account.id)
            .await?
            .into_iter()
            .filter(|c| !c.is_revoked())
            .map(|c| c.id)
            .collect();
        tracing::debug!(
            account_id = %account.id,
            credentials = allow_credential_ids.len(),
            "Authentication challenge created"
        );

        let options = self.verifier.generate_authentication_options(
            &self.config.relying_party(),
            &challenge.value,
            &allow_credential_ids,
        );

        Ok(AuthenticationChallenge {
            account_id: account.id,
            challenge_id: challenge.id,
            options,
        })
    }

    /// Verifies an assertion against a live challenge.
    ///
    /// The challenge is consumed and the credential use count advanced in one
    /// transaction, so a challenge authenticates at most once and a stale
    /// count loses.
    #[tracing::instrument(
        skip(self, response),
        fields(account_id = %account_id, challenge_id = %challenge_id)
    )]
    pub async fn authenticate(
        &self,
        account_id: &AccountId,
        challenge_id: &ChallengeId,
        response: AuthenticationResponse,
    ) -> Result<Account, IdentityError> {
        let account = self
            .store
            .get_account_by_id(account_id)
            .await?
            .ok_or_else(|| IdentityError::InvalidAccount.log())?;

        let credential_id = response.raw_id_bytes()?;
        let credential = match self.store.get_credential(&credential_id).await? {
            Some(c) if c.account_id == account.id && !c.is_revoked() => c,
            _ => {
                return Err(IdentityError::InvalidCredential(
                    "credential does not exist for this account".to_string(),
                )
                .log());
            }
        };

        let challenge = self.live_challenge(challenge_id, &account.id).await?;

        let verified = self
            .verifier
            .verify_authentication_response(
                &response,
                &challenge.value,
                self.config.rp_id(),
                self.config.origins(),
                &credential.public_key,
                credential.use_count,
            )
            .await?;

        if !counter_advances(credential.use_count, verified.new_sign_count) {
            return Err(VerificationError::Replay {
                stored: credential.use_count,
                received: verified.new_sign_count,
            }
            .into());
        }

        self.store
            .record_credential_use(
                &credential.id,
                credential.use_count,
                verified.new_sign_count,
                Some(&challenge.id),
            )
            .await?;

        tracing::info!(use_count = verified.new_sign_count, "Account authenticated");
        Ok(account.into())
    }

    /// Authenticates and starts a session in one step.
    pub async fn create_session(
        &self,
        account_id: &AccountId,
        challenge_id: &ChallengeId,
        response: AuthenticationResponse,
    ) -> Result<SessionGrant, IdentityError> {
        let account = self.authenticate(account_id, challenge_id, response).await?;
        self.issue_session(&account).await
    }

    /// Deletes challenges that expired unused. Returns how many were removed.
    pub async fn purge_expired_challenges(&self) -> Result<u64, IdentityError> {
        Ok(self.store.delete_expired_challenges().await?)
    }
}

/// Authenticators without a counter always report 0.
fn counter_advances(stored: u32, received: u32) -> bool {
    received > stored || (stored == 0 && received == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passkey::{VerifiedAuthentication, VerifiedRegistration};
    use crate::test_utils::{
        FakeVerifier, TEST_ORIGIN, authentication_response, file_store, memory_store,
        registration_response, test_config, test_service,
    };
    use crate::utils::base64url_decode;

    /// Signs up `email` and registers one passkey with id `credential_id`.
    async fn registered_account(
        service: &IdentityService,
        email: &str,
        credential_id: &[u8],
    ) -> Account {
        let outcome = service
            .create_account(NewAccount {
                email: email.to_string(),
                display_name: "A".to_string(),
            })
            .await
            .unwrap();
        let challenge = base64url_decode(&outcome.options.challenge).unwrap();
        service
            .add_passkey_credential(
                &outcome.account.id,
                &outcome.challenge_id,
                registration_response(credential_id, &challenge, TEST_ORIGIN),
            )
            .await
            .unwrap();
        outcome.account
    }

    #[test]
    fn test_counter_advances() {
        assert!(counter_advances(0, 0));
        assert!(counter_advances(0, 1));
        assert!(counter_advances(4, 5));
        assert!(!counter_advances(5, 5));
        assert!(!counter_advances(5, 4));
        assert!(!counter_advances(5, 0));
    }

    #[tokio::test]
    async fn test_new_rejects_config_without_active_keys() {
        let config = test_config().with_retired_key_indices(vec![0, 1]);
        let store = Arc::new(memory_store().await);
        let result = IdentityService::new(config, store, Arc::new(FakeVerifier));
        assert!(matches!(result, Err(IdentityError::Config(_))));
    }

    #[tokio::test]
    async fn test_sign_up_and_register_passkey() {
        // Given a fresh service
        let (service, store) = test_service().await;

        // When an account is created
        let outcome = service
            .create_account(NewAccount {
                email: "a@x.com".to_string(),
                display_name: "A".to_string(),
            })
            .await
            .unwrap();

        // Then it starts at version 0 with options for the stored challenge
        assert_eq!(outcome.account.version, 0);
        assert_eq!(outcome.account.email, "a@x.com");
        let challenge = store
            .get_challenge(&outcome.challenge_id, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(challenge.value.len(), CHALLENGE_LEN);
        assert_eq!(
            base64url_decode(&outcome.options.challenge).unwrap(),
            challenge.value
        );
        assert_eq!(outcome.options.rp.id, "example.com");
        assert_eq!(
            base64url_decode(&outcome.options.user.id).unwrap(),
            outcome.account.id.as_str().as_bytes()
        );
        let lifetime = challenge.expires_at - challenge.created_at;
        assert!(lifetime <= chrono::Duration::minutes(2));
        assert!(lifetime > chrono::Duration::minutes(1));

        // When the passkey bound to that challenge is added
        let credential = service
            .add_passkey_credential(
                &outcome.account.id,
                &outcome.challenge_id,
                registration_response(b"cred-1", &challenge.value, TEST_ORIGIN),
            )
            .await
            .unwrap();

        // Then the challenge is gone and exactly one credential exists
        assert_eq!(credential.id, b"cred-1".to_vec());
        assert_eq!(credential.use_count, 0);
        assert!(
            store
                .get_challenge(&outcome.challenge_id, true)
                .await
                .unwrap()
                .is_none()
        );
        let credentials = store
            .get_account_credentials(&outcome.account.id)
            .await
            .unwrap();
        assert_eq!(credentials.len(), 1);
    }

    #[tokio::test]
    async fn test_create_account_validates_input() {
        let (service, _) = test_service().await;

        for (email, display_name) in [("", "A"), ("no-at-sign", "A"), ("a@x.com", "  ")] {
            let result = service
                .create_account(NewAccount {
                    email: email.to_string(),
                    display_name: display_name.to_string(),
                })
                .await;
            assert!(
                matches!(result, Err(IdentityError::InvalidInput(_))),
                "{email:?}/{display_name:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_create_account_duplicate_email() {
        let (service, _) = test_service().await;
        let new_account = NewAccount {
            email: "a@x.com".to_string(),
            display_name: "A".to_string(),
        };
        service.create_account(new_account.clone()).await.unwrap();

        let result = service.create_account(new_account).await;
        assert_eq!(result.unwrap_err(), IdentityError::EmailConflict);
    }

    #[tokio::test]
    async fn test_concurrent_sign_up_same_email() {
        let (service, _) = test_service().await;
        let new_account = NewAccount {
            email: "race@x.com".to_string(),
            display_name: "Racer".to_string(),
        };

        let (a, b) = tokio::join!(
            service.create_account(new_account.clone()),
            service.create_account(new_account.clone())
        );

        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(IdentityError::EmailConflict)))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_registration_challenge_for_existing_account() {
        let (service, store) = test_service().await;
        let account = registered_account(&service, "a@x.com", b"cred-1").await;

        let challenge = service
            .create_registration_challenge(&account.id)
            .await
            .unwrap();
        assert_eq!(challenge.account_id, account.id);
        assert_eq!(challenge.options.user.name, "a@x.com");

        let value = base64url_decode(&challenge.options.challenge).unwrap();
        service
            .add_passkey_credential(
                &account.id,
                &challenge.challenge_id,
                registration_response(b"cred-2", &value, TEST_ORIGIN),
            )
            .await
            .unwrap();
        assert_eq!(
            store.get_account_credentials(&account.id).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_registration_challenge_unknown_account() {
        let (service, _) = test_service().await;
        let result = service
            .create_registration_challenge(&AccountId::new().unwrap())
            .await;
        assert_eq!(result.unwrap_err(), IdentityError::InvalidAccount);
    }

    #[tokio::test]
    async fn test_add_credential_with_foreign_challenge() {
        let (service, _) = test_service().await;
        let first = service
            .create_account(NewAccount {
                email: "a@x.com".to_string(),
                display_name: "A".to_string(),
            })
            .await
            .unwrap();
        let second = service
            .create_account(NewAccount {
                email: "b@x.com".to_string(),
                display_name: "B".to_string(),
            })
            .await
            .unwrap();

        let value = base64url_decode(&first.options.challenge).unwrap();
        let result = service
            .add_passkey_credential(
                &second.account.id,
                &first.challenge_id,
                registration_response(b"cred", &value, TEST_ORIGIN),
            )
            .await;
        assert_eq!(result.unwrap_err(), IdentityError::ChallengeExpired);
    }

    #[tokio::test]
    async fn test_add_credential_rejected_by_verifier() {
        let (service, store) = test_service().await;
        let outcome = service
            .create_account(NewAccount {
                email: "a@x.com".to_string(),
                display_name: "A".to_string(),
            })
            .await
            .unwrap();

        let result = service
            .add_passkey_credential(
                &outcome.account.id,
                &outcome.challenge_id,
                registration_response(b"cred", b"some other challenge", TEST_ORIGIN),
            )
            .await;
        assert!(matches!(result, Err(IdentityError::InvalidCredential(_))));

        // The challenge survives a failed verification
        assert!(
            store
                .get_challenge(&outcome.challenge_id, false)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_add_credential_wrong_origin() {
        let (service, _) = test_service().await;
        let outcome = service
            .create_account(NewAccount {
                email: "a@x.com".to_string(),
                display_name: "A".to_string(),
            })
            .await
            .unwrap();
        let value = base64url_decode(&outcome.options.challenge).unwrap();

        let result = service
            .add_passkey_credential(
                &outcome.account.id,
                &outcome.challenge_id,
                registration_response(b"cred", &value, "https://evil.example"),
            )
            .await;
        assert!(matches!(result, Err(IdentityError::InvalidCredential(_))));
    }

    #[tokio::test]
    async fn test_challenge_consumed_once_under_concurrency() {
        let (service, store) = test_service().await;
        let outcome = service
            .create_account(NewAccount {
                email: "a@x.com".to_string(),
                display_name: "A".to_string(),
            })
            .await
            .unwrap();
        let value = base64url_decode(&outcome.options.challenge).unwrap();

        let (a, b) = tokio::join!(
            service.add_passkey_credential(
                &outcome.account.id,
                &outcome.challenge_id,
                registration_response(b"one", &value, TEST_ORIGIN),
            ),
            service.add_passkey_credential(
                &outcome.account.id,
                &outcome.challenge_id,
                registration_response(b"two", &value, TEST_ORIGIN),
            )
        );

        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(IdentityError::ChallengeExpired)))
        );
        assert_eq!(
            store
                .get_account_credentials(&outcome.account.id)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_authentication_challenge_unknown_email() {
        let (service, _) = test_service().await;
        let result = service.create_authentication_challenge("nobody@x.com").await;
        assert_eq!(result.unwrap_err(), IdentityError::InvalidAccount);
    }

    #[tokio::test]
    async fn test_authentication_challenge_allow_list() {
        let (service, _) = test_service().await;
        let account = registered_account(&service, "a@x.com", b"cred-1").await;

        let challenge = service
            .create_authentication_challenge("a@x.com")
            .await
            .unwrap();

        assert_eq!(challenge.account_id, account.id);
        assert_eq!(challenge.options.rp_id, "example.com");
        let allowed: Vec<Vec<u8>> = challenge
            .options
            .allow_credentials
            .iter()
            .map(|c| base64url_decode(&c.id).unwrap())
            .collect();
        assert_eq!(allowed, vec![b"cred-1".to_vec()]);
    }

    #[tokio::test]
    async fn test_authenticate_advances_use_count() {
        let (service, store) = test_service().await;
        let account = registered_account(&service, "a@x.com", b"cred-1").await;
        let challenge = service
            .create_authentication_challenge("a@x.com")
            .await
            .unwrap();
        let value = base64url_decode(&challenge.options.challenge).unwrap();

        let authenticated = service
            .authenticate(
                &account.id,
                &challenge.challenge_id,
                authentication_response(b"cred-1", &value, TEST_ORIGIN, 1),
            )
            .await
            .unwrap();

        assert_eq!(authenticated.id, account.id);
        let credential = store.get_credential(b"cred-1").await.unwrap().unwrap();
        assert_eq!(credential.use_count, 1);
        assert!(
            store
                .get_challenge(&challenge.challenge_id, true)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_authentication_challenge_is_single_use() {
        let (service, _) = test_service().await;
        let account = registered_account(&service, "a@x.com", b"cred-1").await;
        let challenge = service
            .create_authentication_challenge("a@x.com")
            .await
            .unwrap();
        let value = base64url_decode(&challenge.options.challenge).unwrap();

        service
            .authenticate(
                &account.id,
                &challenge.challenge_id,
                authentication_response(b"cred-1", &value, TEST_ORIGIN, 1),
            )
            .await
            .unwrap();

        let reused = service
            .authenticate(
                &account.id,
                &challenge.challenge_id,
                authentication_response(b"cred-1", &value, TEST_ORIGIN, 2),
            )
            .await;
        assert_eq!(reused.unwrap_err(), IdentityError::ChallengeExpired);
    }

    #[tokio::test]
    async fn test_authenticate_rejects_replayed_counter() {
        let (service, store) = test_service().await;
        let account = registered_account(&service, "a@x.com", b"cred-1").await;
        store.update_credential_use_count(b"cred-1", 5).await.unwrap();

        for replayed in [5, 3] {
            let challenge = service
                .create_authentication_challenge("a@x.com")
                .await
                .unwrap();
            let value = base64url_decode(&challenge.options.challenge).unwrap();

            let result = service
                .authenticate(
                    &account.id,
                    &challenge.challenge_id,
                    authentication_response(b"cred-1", &value, TEST_ORIGIN, replayed),
                )
                .await;
            assert!(matches!(result, Err(IdentityError::InvalidCredential(_))));
        }
        assert_eq!(
            store.get_credential(b"cred-1").await.unwrap().unwrap().use_count,
            5
        );
    }

    /// Accepts any assertion and reports its counter as is, leaving replay
    /// detection to the service.
    struct AnyCounterVerifier;

    #[async_trait::async_trait]
    impl CredentialVerifier for AnyCounterVerifier {
        async fn verify_registration_response(
            &self,
            response: &RegistrationResponse,
            expected_challenge: &[u8],
            expected_rp_id: &str,
            expected_origins: &[String],
        ) -> Result<VerifiedRegistration, VerificationError> {
            FakeVerifier
                .verify_registration_response(
                    response,
                    expected_challenge,
                    expected_rp_id,
                    expected_origins,
                )
                .await
        }

        async fn verify_authentication_response(
            &self,
            response: &AuthenticationResponse,
            _expected_challenge: &[u8],
            _expected_rp_id: &str,
            _expected_origins: &[String],
            _stored_public_key: &[u8],
            _stored_sign_count: u32,
        ) -> Result<VerifiedAuthentication, VerificationError> {
            let new_sign_count = response.response["signCount"]
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| VerificationError::Malformed("signCount".to_string()))?;
            Ok(VerifiedAuthentication { new_sign_count })
        }
    }

    #[tokio::test]
    async fn test_service_rejects_stale_counter_the_verifier_accepted() {
        let store = Arc::new(memory_store().await);
        let service =
            IdentityService::new(test_config(), store.clone(), Arc::new(AnyCounterVerifier))
                .unwrap();
        let account = account_with_stored_credential(&service).await;
        store.update_credential_use_count(b"cred-1", 5).await.unwrap();

        for replayed in [5, 4, 0] {
            let challenge = service
                .create_authentication_challenge("a@x.com")
                .await
                .unwrap();
            let value = base64url_decode(&challenge.options.challenge).unwrap();

            let result = service
                .authenticate(
                    &account.id,
                    &challenge.challenge_id,
                    authentication_response(b"cred-1", &value, TEST_ORIGIN, replayed),
                )
                .await;

            assert!(
                matches!(result, Err(IdentityError::InvalidCredential(_))),
                "counter {replayed} was accepted: {result:?}"
            );
            assert_eq!(
                store.get_credential(b"cred-1").await.unwrap().unwrap().use_count,
                5
            );
            // Nothing was persisted, so the challenge is still usable
            assert!(
                store
                    .get_challenge(&challenge.challenge_id, false)
                    .await
                    .unwrap()
                    .is_some()
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_challenge_consumed_once_across_connections() {
        let (store, _dir) = file_store(8).await;
        let store = Arc::new(store);
        let service =
            IdentityService::new(test_config(), store.clone(), Arc::new(FakeVerifier)).unwrap();
        let outcome = service
            .create_account(NewAccount {
                email: "a@x.com".to_string(),
                display_name: "A".to_string(),
            })
            .await
            .unwrap();
        let value = base64url_decode(&outcome.options.challenge).unwrap();

        let barrier = Arc::new(tokio::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let service = service.clone();
                let barrier = barrier.clone();
                let account_id = outcome.account.id.clone();
                let challenge_id = outcome.challenge_id.clone();
                let response = registration_response(&[b'c', i], &value, TEST_ORIGIN);
                tokio::spawn(async move {
                    barrier.wait().await;
                    service
                        .add_passkey_credential(&account_id, &challenge_id, response)
                        .await
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .filter(|r| r.is_err())
                .all(|r| matches!(r, Err(IdentityError::ChallengeExpired))),
            "unexpected failures: {results:?}"
        );
        assert_eq!(
            store
                .get_account_credentials(&outcome.account.id)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_add_credential_with_expired_challenge() {
        let config = test_config().with_challenge_timeout(0);
        let (service, store) = crate::test_utils::test_service_with(config).await;
        let outcome = service
            .create_account(NewAccount {
                email: "a@x.com".to_string(),
                display_name: "A".to_string(),
            })
            .await
            .unwrap();
        let value = base64url_decode(&outcome.options.challenge).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let result = service
            .add_passkey_credential(
                &outcome.account.id,
                &outcome.challenge_id,
                registration_response(b"cred", &value, TEST_ORIGIN),
            )
            .await;

        assert_eq!(result.unwrap_err(), IdentityError::ChallengeExpired);
        assert!(
            store
                .get_account_credentials(&outcome.account.id)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_authenticate_counterless_authenticator() {
        let (service, _) = test_service().await;
        let account = registered_account(&service, "a@x.com", b"cred-1").await;

        for _ in 0..2 {
            let challenge = service
                .create_authentication_challenge("a@x.com")
                .await
                .unwrap();
            let value = base64url_decode(&challenge.options.challenge).unwrap();
            service
                .authenticate(
                    &account.id,
                    &challenge.challenge_id,
                    authentication_response(b"cred-1", &value, TEST_ORIGIN, 0),
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_authenticate_unknown_account_and_credential() {
        let (service, _) = test_service().await;
        let account = registered_account(&service, "a@x.com", b"cred-1").await;
        let other = registered_account(&service, "b@x.com", b"cred-2").await;
        let challenge = service
            .create_authentication_challenge("a@x.com")
            .await
            .unwrap();
        let value = base64url_decode(&challenge.options.challenge).unwrap();

        let unknown_account = service
            .authenticate(
                &AccountId::new().unwrap(),
                &challenge.challenge_id,
                authentication_response(b"cred-1", &value, TEST_ORIGIN, 1),
            )
            .await;
        assert_eq!(unknown_account.unwrap_err(), IdentityError::InvalidAccount);

        let unknown_credential = service
            .authenticate(
                &account.id,
                &challenge.challenge_id,
                authentication_response(b"nope", &value, TEST_ORIGIN, 1),
            )
            .await;
        assert!(matches!(
            unknown_credential,
            Err(IdentityError::InvalidCredential(_))
        ));

        // A credential of another account is treated as unknown
        let foreign_credential = service
            .authenticate(
                &account.id,
                &challenge.challenge_id,
                authentication_response(b"cred-2", &value, TEST_ORIGIN, 1),
            )
            .await;
        assert!(matches!(
            foreign_credential,
            Err(IdentityError::InvalidCredential(_))
        ));
        assert_ne!(account.id, other.id);
    }

    #[tokio::test]
    async fn test_authenticate_with_expired_challenge() {
        let config = test_config().with_challenge_timeout(0);
        let (service, _) = crate::test_utils::test_service_with(config).await;
        let account = account_with_stored_credential(&service).await;
        let challenge = service
            .create_authentication_challenge("a@x.com")
            .await
            .unwrap();
        let value = base64url_decode(&challenge.options.challenge).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let result = service
            .authenticate(
                &account.id,
                &challenge.challenge_id,
                authentication_response(b"cred-1", &value, TEST_ORIGIN, 1),
            )
            .await;
        assert_eq!(result.unwrap_err(), IdentityError::ChallengeExpired);
    }

    /// Creates an account and binds `cred-1` through the store directly.
    async fn account_with_stored_credential(service: &IdentityService) -> Account {
        let outcome = service
            .create_account(NewAccount {
                email: "a@x.com".to_string(),
                display_name: "A".to_string(),
            })
            .await
            .unwrap();
        service
            .store
            .create_credential(
                NewCredentialRecord {
                    id: b"cred-1".to_vec(),
                    account_id: outcome.account.id.clone(),
                    credential_type: CredentialType::PublicKey,
                    public_key: crate::test_utils::fake_public_key(b"cred-1"),
                    use_count: 0,
                },
                None,
            )
            .await
            .unwrap();
        outcome.account
    }

    #[tokio::test]
    async fn test_purge_expired_challenges() {
        let config = test_config().with_challenge_timeout(0);
        let (service, _) = crate::test_utils::test_service_with(config).await;
        service
            .create_account(NewAccount {
                email: "a@x.com".to_string(),
                display_name: "A".to_string(),
            })
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        assert_eq!(service.purge_expired_challenges().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_store_outage_maps_to_unavailable() {
        let (service, store) = test_service().await;
        store.close().await;

        let result = service.create_authentication_challenge("a@x.com").await;
        assert!(matches!(result, Err(IdentityError::Unavailable(_))));
    }
}
