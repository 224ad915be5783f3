//! Secret store facade — per-user API key records.
//!
//! The [`SecretStore`] trait abstracts the key-value backend that durably
//! owns each user's [`ApiKeyRecord`]. The production implementation is
//! [`VaultClient`] over Vault KV v1; tests substitute in-memory fakes.
//!
//! A record is written once per user and never mutated afterwards: the
//! reconciliation layer gates every write on a prior [`SecretStore::exists`]
//! lookup, so repeated provisioning always returns the originally stored key.

pub mod vault;

use chrono::Utc;
use thiserror::Error;

pub use vault::VaultClient;

/// A per-user API key record as stored in the secret store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyRecord {
    /// The API key value
    pub api_key: String,
    /// Creation timestamp, `%Y/%m/%d %H:%M:%S` in UTC
    pub created_at: String,
}

impl ApiKeyRecord {
    /// Create a record stamped with the current UTC time.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            created_at: Utc::now().format("%Y/%m/%d %H:%M:%S").to_string(),
        }
    }
}

/// Outcome of a secret store read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretLookup {
    /// A record exists for the user.
    Found(ApiKeyRecord),
    /// No record for the user — a normal negative result, not an error.
    NotFound,
    /// The backend answered but does not support this read (e.g. HTTP 405
    /// from an older KV engine). Distinct from [`SecretLookup::NotFound`] so
    /// callers can log the version mismatch instead of masking it; the
    /// reconciliation layer otherwise treats it like a missing record.
    Unsupported,
}

/// Error variants for secret store operations.
///
/// "Record not found" is not an error — see [`SecretLookup::NotFound`].
#[derive(Debug, Error)]
pub enum SecretStoreError {
    /// The store cannot be reached (transport failure, timeout, or an
    /// unexpected status). Recoverable by caller retry; never retried here.
    #[error("secret store unreachable: {0}")]
    Unreachable(String),

    /// The store answered with a payload this client cannot interpret.
    #[error("secret store returned a malformed response: {0}")]
    Malformed(String),
}

/// Facade over the key-value secrets backend.
#[async_trait::async_trait]
pub trait SecretStore: Send + Sync + 'static {
    /// Look up the record for `user_name`.
    async fn exists(&self, user_name: &str) -> Result<SecretLookup, SecretStoreError>;

    /// Write the record for `user_name` unconditionally (last-write-wins).
    ///
    /// Callers must gate on [`exists`](SecretStore::exists) first; this
    /// method does not guard against overwriting.
    async fn store(
        &self,
        user_name: &str,
        record: &ApiKeyRecord,
    ) -> Result<(), SecretStoreError>;

    /// Probe backend liveness.
    async fn health(&self) -> Result<(), SecretStoreError>;
}
