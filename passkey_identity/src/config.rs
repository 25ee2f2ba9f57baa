//! Service configuration
//!
//! [`IdentityConfig::from_env`] reads the process environment (after loading a
//! `.env` file if present). Tests and embedders can build one directly with
//! [`IdentityConfig::new`] and the `with_*` setters.

use std::{env, fmt};

use chrono::Duration;
use thiserror::Error;

use crate::passkey::{RelyingParty, UserVerification};

const DEFAULT_PASSKEY_TIMEOUT: u32 = 60;
const DEFAULT_CHALLENGE_TIMEOUT: u32 = 120;
const DEFAULT_SESSION_DURATION: u64 = 12 * 60 * 60;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Clone)]
pub struct IdentityConfig {
    origins: Vec<String>,
    rp_id: String,
    rp_name: String,
    passkey_timeout: u32,
    challenge_timeout: u32,
    user_verification: UserVerification,
    session_duration: u64,
    signing_keys: Vec<Vec<u8>>,
    retired_key_indices: Vec<usize>,
}

impl fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("origins", &self.origins)
            .field("rp_id", &self.rp_id)
            .field("rp_name", &self.rp_name)
            .field("passkey_timeout", &self.passkey_timeout)
            .field("challenge_timeout", &self.challenge_timeout)
            .field("user_verification", &self.user_verification)
            .field("session_duration", &self.session_duration)
            .field("signing_keys", &self.signing_keys.len())
            .field("retired_key_indices", &self.retired_key_indices)
            .finish()
    }
}

impl IdentityConfig {
    /// Builds a configuration with defaults. The relying party id is the host
    /// of the first origin.
    pub fn new(origins: Vec<String>, signing_keys: Vec<Vec<u8>>) -> Result<Self, ConfigError> {
        let first = origins.first().ok_or(ConfigError::Missing("ORIGIN"))?;
        let rp_id = host_of(first)?;

        Ok(Self {
            origins,
            rp_name: rp_id.clone(),
            rp_id,
            passkey_timeout: DEFAULT_PASSKEY_TIMEOUT,
            challenge_timeout: DEFAULT_CHALLENGE_TIMEOUT,
            user_verification: UserVerification::default(),
            session_duration: DEFAULT_SESSION_DURATION,
            signing_keys,
            retired_key_indices: Vec::new(),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let origins = list_var("ORIGIN").ok_or(ConfigError::Missing("ORIGIN"))?;
        let signing_keys = list_var("SESSION_SIGNING_KEYS")
            .ok_or(ConfigError::Missing("SESSION_SIGNING_KEYS"))?
            .into_iter()
            .map(String::into_bytes)
            .collect();

        let mut config = Self::new(origins, signing_keys)?;

        if let Ok(rp_id) = env::var("PASSKEY_RP_ID") {
            config.rp_name = rp_id.clone();
            config.rp_id = rp_id;
        }
        if let Ok(rp_name) = env::var("PASSKEY_RP_NAME") {
            config.rp_name = rp_name;
        }

        config.passkey_timeout = number_var("PASSKEY_TIMEOUT", DEFAULT_PASSKEY_TIMEOUT);
        config.challenge_timeout =
            number_var("PASSKEY_CHALLENGE_TIMEOUT", DEFAULT_CHALLENGE_TIMEOUT);
        config.session_duration = number_var("SESSION_DURATION", DEFAULT_SESSION_DURATION);

        config.user_verification = match env::var("PASSKEY_USER_VERIFICATION") {
            Err(_) => UserVerification::default(),
            Ok(v) => v.parse().unwrap_or_else(|e| {
                tracing::warn!("{}. Using default 'preferred'", e);
                UserVerification::default()
            }),
        };

        if let Some(indices) = list_var("SESSION_RETIRED_KEY_INDICES") {
            config.retired_key_indices = indices
                .iter()
                .map(|i| {
                    i.parse::<usize>().map_err(|e| ConfigError::Invalid {
                        var: "SESSION_RETIRED_KEY_INDICES",
                        reason: format!("'{i}': {e}"),
                    })
                })
                .collect::<Result<_, _>>()?;
        }

        tracing::info!(
            rp_id = %config.rp_id,
            origins = config.origins.len(),
            signing_keys = config.signing_keys.len(),
            "Identity configuration loaded"
        );

        Ok(config)
    }

    pub fn with_rp_id(mut self, rp_id: impl Into<String>) -> Self {
        self.rp_id = rp_id.into();
        self
    }

    pub fn with_rp_name(mut self, rp_name: impl Into<String>) -> Self {
        self.rp_name = rp_name.into();
        self
    }

    /// Seconds the browser waits for the authenticator.
    pub fn with_passkey_timeout(mut self, seconds: u32) -> Self {
        self.passkey_timeout = seconds;
        self
    }

    pub fn with_challenge_timeout(mut self, seconds: u32) -> Self {
        self.challenge_timeout = seconds;
        self
    }

    pub fn with_user_verification(mut self, user_verification: UserVerification) -> Self {
        self.user_verification = user_verification;
        self
    }

    pub fn with_session_duration(mut self, seconds: u64) -> Self {
        self.session_duration = seconds;
        self
    }

    pub fn with_retired_key_indices(mut self, indices: Vec<usize>) -> Self {
        self.retired_key_indices = indices;
        self
    }

    pub fn origins(&self) -> &[String] {
        &self.origins
    }

    pub fn rp_id(&self) -> &str {
        &self.rp_id
    }

    pub fn challenge_ttl(&self) -> Duration {
        Duration::seconds(i64::from(self.challenge_timeout))
    }

    pub fn session_ttl(&self) -> Duration {
        let seconds = i64::try_from(self.session_duration).unwrap_or(i64::MAX);
        Duration::seconds(seconds.min(i64::MAX / 1000))
    }

    pub(crate) fn signing_keys(&self) -> &[Vec<u8>] {
        &self.signing_keys
    }

    pub(crate) fn retired_key_indices(&self) -> &[usize] {
        &self.retired_key_indices
    }

    pub fn relying_party(&self) -> RelyingParty {
        RelyingParty {
            id: self.rp_id.clone(),
            name: self.rp_name.clone(),
            timeout: self.passkey_timeout,
            user_verification: self.user_verification,
        }
    }
}

fn host_of(origin: &str) -> Result<String, ConfigError> {
    let url = url::Url::parse(origin).map_err(|e| ConfigError::Invalid {
        var: "ORIGIN",
        reason: format!("'{origin}': {e}"),
    })?;
    url.host_str()
        .map(str::to_string)
        .ok_or_else(|| ConfigError::Invalid {
            var: "ORIGIN",
            reason: format!("'{origin}' has no host"),
        })
}

/// Comma separated list, `None` when unset or empty.
fn list_var(name: &str) -> Option<Vec<String>> {
    let items: Vec<String> = env::var(name)
        .ok()?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    (!items.is_empty()).then_some(items)
}

fn number_var<T: std::str::FromStr + fmt::Display + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Err(_) => default,
        Ok(v) => v.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid {}: {}. Using default {}", name, v, default);
            default
        }),
    }
}
