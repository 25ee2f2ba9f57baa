use std::fmt;
use std::sync::Arc;

use base64::{
    Engine as _, alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::errors::TokenError;
use crate::utils::gen_random_index;

type HmacSha256 = Hmac<Sha256>;

const KEY_INDEX_LEN: usize = 1;
const MAC_LEN: usize = 32;
/// Smallest decoded token: key index plus MAC with an empty payload.
const MIN_TOKEN_LEN: usize = KEY_INDEX_LEN + MAC_LEN;
const MAX_KEYS: usize = u8::MAX as usize + 1;

/// URL-safe alphabet, padded on output, padding optional on input.
const TOKEN_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// An opaque signed token. Callers store it and hand it back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token(String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Token> for String {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Signs and verifies tokens with one of several symmetric keys.
///
/// Every configured key verifies. Only active keys sign, so a key can be
/// retired (kept at its index for verification) before it is removed.
/// The key set is immutable; clones share it.
#[derive(Clone)]
pub struct TokenSigner {
    keys: Arc<[Vec<u8>]>,
    active: Arc<[u8]>,
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner")
            .field("keys", &self.keys.len())
            .field("active", &self.active)
            .finish()
    }
}

impl TokenSigner {
    /// Creates a signer where every key is active.
    pub fn new(keys: Vec<Vec<u8>>) -> Result<Self, TokenError> {
        Self::with_retired_keys(keys, &[])
    }

    /// Creates a signer whose keys at `retired` indices verify but never sign.
    pub fn with_retired_keys(keys: Vec<Vec<u8>>, retired: &[usize]) -> Result<Self, TokenError> {
        if keys.is_empty() {
            return Err(TokenError::NoSigningKeys);
        }
        if keys.len() > MAX_KEYS {
            return Err(TokenError::TooManyKeys {
                max: MAX_KEYS,
                got: keys.len(),
            });
        }
        if let Some(index) = keys.iter().position(|k| k.is_empty()) {
            return Err(TokenError::EmptyKey(index));
        }
        if let Some(index) = retired.iter().find(|i| **i >= keys.len()) {
            return Err(TokenError::UnknownRetiredKey(*index));
        }

        let active: Vec<u8> = (0..keys.len())
            .filter(|i| !retired.contains(i))
            .map(|i| i as u8)
            .collect();
        if active.is_empty() {
            return Err(TokenError::NoSigningKeys);
        }

        tracing::debug!(
            keys = keys.len(),
            active = active.len(),
            "Token signer configured"
        );

        Ok(Self {
            keys: keys.into(),
            active: active.into(),
        })
    }

    /// Number of configured keys, active or retired.
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Signs `payload` with a uniformly chosen active key.
    pub fn sign(&self, payload: &[u8]) -> Result<Token, TokenError> {
        let pick = gen_random_index(self.active.len())?;
        self.sign_with_index(self.active[pick], payload)
    }

    fn sign_with_index(&self, key_index: u8, payload: &[u8]) -> Result<Token, TokenError> {
        let digest = self.mac(key_index, payload)?;

        let mut combined = Vec::with_capacity(MIN_TOKEN_LEN + payload.len());
        combined.push(key_index);
        combined.extend_from_slice(&digest);
        combined.extend_from_slice(payload);

        Ok(Token(TOKEN_ENGINE.encode(combined)))
    }

    /// Verifies a token and returns its payload.
    pub fn verify(&self, token: &str) -> Result<Vec<u8>, TokenError> {
        let decoded = TOKEN_ENGINE
            .decode(token)
            .map_err(|_| TokenError::InvalidToken)?;

        if decoded.len() < MIN_TOKEN_LEN {
            return Err(TokenError::InvalidToken);
        }

        let key_index = decoded[0];
        if usize::from(key_index) >= self.keys.len() {
            return Err(TokenError::InvalidToken);
        }

        let digest = &decoded[KEY_INDEX_LEN..MIN_TOKEN_LEN];
        let payload = &decoded[MIN_TOKEN_LEN..];
        let expected = self.mac(key_index, payload)?;

        if bool::from(expected.as_slice().ct_eq(digest)) {
            Ok(payload.to_vec())
        } else {
            tracing::warn!(key_index, "Token signature mismatch");
            Err(TokenError::InvalidSignature)
        }
    }

    fn mac(&self, key_index: u8, payload: &[u8]) -> Result<[u8; MAC_LEN], TokenError> {
        let key = &self.keys[usize::from(key_index)];
        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|e| TokenError::Crypto(format!("Invalid HMAC key: {e}")))?;
        mac.update(payload);
        let mut digest = [0u8; MAC_LEN];
        digest.copy_from_slice(&mac.finalize().into_bytes());
        Ok(digest)
    }
}
