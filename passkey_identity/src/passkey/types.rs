use serde::{Deserialize, Serialize};

use crate::utils::base64url_decode;

use super::errors::VerificationError;

/// Credential returned by `navigator.credentials.create()`.
///
/// The attestation payload under `response` is opaque here and only
/// interpreted by the [`CredentialVerifier`](super::CredentialVerifier).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub id: String,
    pub raw_id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub response: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticator_attachment: Option<String>,
}

impl RegistrationResponse {
    /// Credential id as assigned by the authenticator.
    pub fn raw_id_bytes(&self) -> Result<Vec<u8>, VerificationError> {
        decode_raw_id(&self.raw_id)
    }
}

/// Assertion returned by `navigator.credentials.get()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResponse {
    pub id: String,
    pub raw_id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub response: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticator_attachment: Option<String>,
}

impl AuthenticationResponse {
    pub fn raw_id_bytes(&self) -> Result<Vec<u8>, VerificationError> {
        decode_raw_id(&self.raw_id)
    }
}

fn decode_raw_id(raw_id: &str) -> Result<Vec<u8>, VerificationError> {
    let bytes = base64url_decode(raw_id)
        .map_err(|e| VerificationError::Malformed(format!("rawId: {e}")))?;
    if bytes.is_empty() {
        return Err(VerificationError::Malformed("rawId is empty".to_string()));
    }
    Ok(bytes)
}

/// A registration response that passed verification.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedRegistration {
    pub credential_id: Vec<u8>,
    pub public_key: Vec<u8>,
}

/// An assertion that passed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedAuthentication {
    /// Counter reported by the authenticator.
    pub new_sign_count: u32,
}
