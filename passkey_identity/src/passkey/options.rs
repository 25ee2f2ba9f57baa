use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::utils::base64url_encode;

/// COSE algorithm ids advertised at registration.
const ALG_ES256: i32 = -7;
const ALG_RS256: i32 = -257;

/// User verification requirement passed to the authenticator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserVerification {
    Required,
    #[default]
    Preferred,
    Discouraged,
}

impl UserVerification {
    pub const fn as_str(self) -> &'static str {
        match self {
            UserVerification::Required => "required",
            UserVerification::Preferred => "preferred",
            UserVerification::Discouraged => "discouraged",
        }
    }
}

impl fmt::Display for UserVerification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserVerification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "required" => Ok(UserVerification::Required),
            "preferred" => Ok(UserVerification::Preferred),
            "discouraged" => Ok(UserVerification::Discouraged),
            other => Err(format!("Invalid user verification: {other}")),
        }
    }
}

/// Relying party settings shared by every option builder.
#[derive(Debug, Clone, PartialEq)]
pub struct RelyingParty {
    pub id: String,
    pub name: String,
    /// Seconds the browser waits for the user.
    pub timeout: u32,
    pub user_verification: UserVerification,
}

/// The account a credential is being registered for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegistrationUser<'a> {
    /// Stable user handle, usually the account id.
    pub id: &'a str,
    pub name: &'a str,
    pub display_name: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelyingPartyEntity {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    /// base64url of the user handle bytes
    pub id: String,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PubKeyCredParam {
    #[serde(rename = "type")]
    pub type_: String,
    pub alg: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelection {
    pub resident_key: String,
    pub require_resident_key: bool,
    pub user_verification: UserVerification,
}

/// `PublicKeyCredentialCreationOptions` as sent to the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOptions {
    /// base64url of the challenge value
    pub challenge: String,
    pub rp: RelyingPartyEntity,
    pub user: UserEntity,
    pub pub_key_cred_params: Vec<PubKeyCredParam>,
    pub authenticator_selection: AuthenticatorSelection,
    /// Milliseconds
    pub timeout: u32,
    pub attestation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowCredential {
    #[serde(rename = "type")]
    pub type_: String,
    pub id: String,
}

/// `PublicKeyCredentialRequestOptions` as sent to the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationOptions {
    pub challenge: String,
    pub timeout: u32,
    pub rp_id: String,
    pub allow_credentials: Vec<AllowCredential>,
    pub user_verification: UserVerification,
}

pub(crate) fn build_registration_options(
    rp: &RelyingParty,
    user: RegistrationUser<'_>,
    challenge: &[u8],
) -> RegistrationOptions {
    RegistrationOptions {
        challenge: base64url_encode(challenge),
        rp: RelyingPartyEntity {
            id: rp.id.clone(),
            name: rp.name.clone(),
        },
        user: UserEntity {
            id: base64url_encode(user.id.as_bytes()),
            name: user.name.to_string(),
            display_name: user.display_name.to_string(),
        },
        pub_key_cred_params: [ALG_ES256, ALG_RS256]
            .into_iter()
            .map(|alg| PubKeyCredParam {
                type_: "public-key".to_string(),
                alg,
            })
            .collect(),
        authenticator_selection: AuthenticatorSelection {
            resident_key: "required".to_string(),
            require_resident_key: true,
            user_verification: rp.user_verification,
        },
        timeout: rp.timeout.saturating_mul(1000),
        attestation: "none".to_string(),
    }
}

pub(crate) fn build_authentication_options(
    rp: &RelyingParty,
    challenge: &[u8],
    allow_credential_ids: &[Vec<u8>],
) -> AuthenticationOptions {
    AuthenticationOptions {
        challenge: base64url_encode(challenge),
        timeout: rp.timeout.saturating_mul(1000),
        rp_id: rp.id.clone(),
        allow_credentials: allow_credential_ids
            .iter()
            .map(|id| AllowCredential {
                type_: "public-key".to_string(),
                id: base64url_encode(id),
            })
            .collect(),
        user_verification: rp.user_verification,
    }
}
