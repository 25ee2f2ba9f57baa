use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use ring::rand::SecureRandom;
use thiserror::Error;

pub(crate) fn base64url_decode(input: &str) -> Result<Vec<u8>, UtilError> {
    let decoded = URL_SAFE_NO_PAD
        .decode(input.trim_end_matches('='))
        .map_err(|_| UtilError::Format("Failed to decode base64url".to_string()))?;
    Ok(decoded)
}

pub(crate) fn base64url_encode(input: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(input)
}

/// Fills a fresh buffer of `len` bytes from the system CSPRNG.
pub(crate) fn gen_random_bytes(len: usize) -> Result<Vec<u8>, UtilError> {
    let rng = ring::rand::SystemRandom::new();
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes)
        .map_err(|_| UtilError::Crypto("Failed to generate random bytes".to_string()))?;
    Ok(bytes)
}

/// Picks an index uniformly from `[0, upper)`.
///
/// Rejection sampling keeps the distribution flat for bounds that do not
/// divide 2^32.
pub(crate) fn gen_random_index(upper: usize) -> Result<usize, UtilError> {
    let upper = u32::try_from(upper)
        .ok()
        .filter(|u| *u > 0)
        .ok_or_else(|| UtilError::Crypto(format!("Invalid random index bound: {upper}")))?;

    let limit = u32::MAX - (u32::MAX % upper);
    let rng = ring::rand::SystemRandom::new();
    loop {
        let mut buf = [0u8; 4];
        rng.fill(&mut buf)
            .map_err(|_| UtilError::Crypto("Failed to generate random index".to_string()))?;
        let value = u32::from_le_bytes(buf);
        if value < limit {
            return Ok((value % upper) as usize);
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum UtilError {
    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Invalid format: {0}")]
    Format(String),
}
