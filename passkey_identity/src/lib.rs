//! passkey_identity - passwordless sign-up and sign-in built on passkeys
//!
//! The [`IdentityService`] issues single-use WebAuthn challenges, binds
//! verified credentials to accounts, rejects replayed assertions and issues
//! signed session tokens. Persistence goes through the [`IdentityStore`]
//! trait ([`SqlIdentityStore`] for SQLite and PostgreSQL) and WebAuthn
//! signature checks through the [`CredentialVerifier`] trait.

mod config;
mod coordination;
mod ids;
mod passkey;
mod session;
mod storage;
mod token;
mod utils;

#[cfg(test)]
mod test_utils;

pub use config::{ConfigError, IdentityConfig};

pub use coordination::{
    Account, AuthenticationChallenge, CreateAccountOutcome, Credential, IdentityError,
    IdentityService, NewAccount, RegistrationChallenge,
};

pub use ids::{AccountId, ChallengeId, IdError, IdKind, SessionId};

pub use passkey::{
    AllowCredential, AuthenticationOptions, AuthenticationResponse, AuthenticatorSelection,
    CredentialVerifier, PubKeyCredParam, RegistrationOptions, RegistrationResponse,
    RegistrationUser, RelyingParty, RelyingPartyEntity, UserEntity, UserVerification,
    VerificationError, VerifiedAuthentication, VerifiedRegistration,
};

pub use session::{Session, SessionGrant, VerifiedSession};

pub use storage::{
    AccountRecord, ChallengeRecord, CreatedAccount, CredentialRecord, CredentialType,
    IdentityStore, NewAccountRecord, NewChallengeRecord, NewCredentialRecord, NewSessionRecord,
    SessionRecord, SessionWithAccountRecord, SqlIdentityStore, StorageError,
};

pub use token::{Token, TokenError, TokenSigner};

pub use utils::UtilError;
