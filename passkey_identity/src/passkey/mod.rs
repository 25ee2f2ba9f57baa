//! Passkey (WebAuthn) verification seam and option builders.

mod errors;
mod options;
mod types;
mod verifier;

pub use errors::VerificationError;
pub use options::{
    AllowCredential, AuthenticationOptions, AuthenticatorSelection, PubKeyCredParam,
    RegistrationOptions, RegistrationUser, RelyingParty, RelyingPartyEntity, UserEntity,
    UserVerification,
};
pub use types::{
    AuthenticationResponse, RegistrationResponse, VerifiedAuthentication, VerifiedRegistration,
};
pub use verifier::CredentialVerifier;
