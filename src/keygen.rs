//! Date-salted API key derivation.
//!
//! A key is the SHA-256 digest of `YYYYMMDD + userName + secretPhrase`,
//! encoded as lowercase hex. The date is the current UTC calendar date, so
//! re-deriving on a later day yields a *different* key: the derived value is
//! only authoritative at creation time. Once written to the secret store the
//! stored record is the single source of truth and the key is never
//! recomputed for an existing user (see [`crate::provision`]).

use chrono::Utc;
use sha2::{Digest, Sha256};

/// Derives per-user API keys from a configured secret phrase.
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    secret_phrase: String,
}

impl KeyDeriver {
    /// Create a deriver with the given secret phrase.
    #[must_use]
    pub fn new(secret_phrase: impl Into<String>) -> Self {
        Self {
            secret_phrase: secret_phrase.into(),
        }
    }

    /// Derive the API key for `user_name` using today's UTC date as salt.
    #[must_use]
    pub fn derive(&self, user_name: &str) -> String {
        let date = Utc::now().format("%Y%m%d").to_string();
        self.derive_with_date(&date, user_name)
    }

    /// Derive with an explicit `YYYYMMDD` date. Pure function of its inputs.
    #[must_use]
    pub fn derive_with_date(&self, date: &str, user_name: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(date.as_bytes());
        hasher.update(user_name.as_bytes());
        hasher.update(self.secret_phrase.as_bytes());
        hex::encode(hasher.finalize())
    }
}
