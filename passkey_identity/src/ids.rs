//! Prefix-tagged identifiers
//!
//! Every entity gets its own nominal id type whose string form is
//! `{prefix}_{base36}`. Accounts and challenges use UUIDv7 values so ids sort
//! by creation time; session ids are 128 fully random bits because they act as
//! bearer material.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::gen_random_bytes;

const PREFIX_SEPARATOR: char = '_';
const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
/// Number of base36 digits needed for any u128.
const ENCODED_LEN: usize = 25;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum IdError {
    #[error("Id '{id}' does not have expected prefix '{expected}'")]
    PrefixMismatch { id: String, expected: &'static str },

    #[error("Id '{0}' does not match a known id prefix")]
    UnknownPrefix(String),

    #[error("Id '{0}' is malformed")]
    Malformed(String),

    #[error("Failed to generate id: {0}")]
    Generation(String),
}

/// The closed set of id kinds known to the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    Account,
    Challenge,
    Session,
}

impl IdKind {
    pub const ALL: [IdKind; 3] = [IdKind::Account, IdKind::Challenge, IdKind::Session];

    pub const fn prefix(self) -> &'static str {
        match self {
            IdKind::Account => "ac",
            IdKind::Challenge => "ch",
            IdKind::Session => "sn",
        }
    }

    /// Ordered kinds start with a timestamp; unordered kinds are unguessable.
    pub const fn is_ordered(self) -> bool {
        match self {
            IdKind::Account | IdKind::Challenge => true,
            IdKind::Session => false,
        }
    }

    /// Resolves the kind of an encoded id by its prefix.
    pub fn of(encoded: &str) -> Result<IdKind, IdError> {
        let (prefix, _) = encoded
            .split_once(PREFIX_SEPARATOR)
            .ok_or_else(|| IdError::UnknownPrefix(encoded.to_string()))?;
        Self::ALL
            .into_iter()
            .find(|kind| kind.prefix() == prefix)
            .ok_or_else(|| IdError::UnknownPrefix(encoded.to_string()))
    }

    fn generate(self) -> Result<String, IdError> {
        let value = if self.is_ordered() {
            uuid::Uuid::now_v7().as_u128()
        } else {
            let bytes = gen_random_bytes(16).map_err(|e| IdError::Generation(e.to_string()))?;
            let mut buf = [0u8; 16];
            buf.copy_from_slice(&bytes);
            u128::from_be_bytes(buf)
        };
        Ok(format!(
            "{}{}{}",
            self.prefix(),
            PREFIX_SEPARATOR,
            encode_base36(value)
        ))
    }

    fn validate(self, encoded: &str) -> Result<(), IdError> {
        let body = encoded
            .strip_prefix(self.prefix())
            .and_then(|rest| rest.strip_prefix(PREFIX_SEPARATOR))
            .ok_or_else(|| IdError::PrefixMismatch {
                id: encoded.to_string(),
                expected: self.prefix(),
            })?;

        if body.is_empty()
            || body.len() > ENCODED_LEN
            || !body.bytes().all(|b| ALPHABET.contains(&b))
        {
            return Err(IdError::Malformed(encoded.to_string()));
        }
        Ok(())
    }
}

/// Fixed-width base36 so that lexicographic order equals numeric order.
fn encode_base36(mut value: u128) -> String {
    let mut digits = [b'0'; ENCODED_LEN];
    for slot in digits.iter_mut().rev() {
        *slot = ALPHABET[(value % 36) as usize];
        value /= 36;
    }
    digits.iter().map(|b| *b as char).collect()
}

macro_rules! prefixed_id {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub const KIND: IdKind = $kind;

            /// Allocates a new, globally unique id.
            pub fn new() -> Result<Self, IdError> {
                Ok(Self(Self::KIND.generate()?))
            }

            /// Rehydrates an encoded id, checking its prefix.
            pub fn parse(encoded: &str) -> Result<Self, IdError> {
                Self::KIND.validate(encoded)?;
                Ok(Self(encoded.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::KIND.validate(&value)?;
                Ok(Self(value))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

prefixed_id!(
    /// Identifier of an account (`ac_...`), time-ordered.
    AccountId,
    IdKind::Account
);

prefixed_id!(
    /// Identifier of a challenge (`ch_...`), time-ordered.
    ChallengeId,
    IdKind::Challenge
);

prefixed_id!(
    /// Identifier of a session (`sn_...`), fully random.
    SessionId,
    IdKind::Session
);
