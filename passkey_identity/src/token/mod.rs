//! Signed, URL-safe bearer tokens
//!
//! A token is `base64url(key_index || hmac_sha256(key, payload) || payload)`.
//! The key index byte lets verification pick the right key in O(1) while
//! several keys are configured during rotation.

mod errors;
mod signer;

pub use errors::TokenError;
pub use signer::{Token, TokenSigner};
