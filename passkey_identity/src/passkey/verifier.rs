use async_trait::async_trait;

use super::errors::VerificationError;
use super::options::{
    AuthenticationOptions, RegistrationOptions, RegistrationUser, RelyingParty,
    build_authentication_options, build_registration_options,
};
use super::types::{
    AuthenticationResponse, RegistrationResponse, VerifiedAuthentication, VerifiedRegistration,
};

/// The WebAuthn verification capability.
///
/// Implementations check attestation and assertion signatures, the client
/// data challenge, the origin and the relying party id hash. Option building
/// has defaults that produce the standard WebAuthn JSON shape.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    fn generate_registration_options(
        &self,
        rp: &RelyingParty,
        user: RegistrationUser<'_>,
        challenge: &[u8],
    ) -> RegistrationOptions {
        build_registration_options(rp, user, challenge)
    }

    async fn verify_registration_response(
        &self,
        response: &RegistrationResponse,
        expected_challenge: &[u8],
        expected_rp_id: &str,
        expected_origins: &[String],
    ) -> Result<VerifiedRegistration, VerificationError>;

    fn generate_authentication_options(
        &self,
        rp: &RelyingParty,
        challenge: &[u8],
        allow_credential_ids: &[Vec<u8>],
    ) -> AuthenticationOptions {
        build_authentication_options(rp, challenge, allow_credential_ids)
    }

    /// Must reject with [`VerificationError::Replay`] when the reported
    /// counter does not exceed `stored_sign_count`.
    async fn verify_authentication_response(
        &self,
        response: &AuthenticationResponse,
        expected_challenge: &[u8],
        expected_rp_id: &str,
        expected_origins: &[String],
        stored_public_key: &[u8],
        stored_sign_count: u32,
    ) -> Result<VerifiedAuthentication, VerificationError>;
}
