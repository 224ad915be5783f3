//! Vault KV v1 implementation of the secret store facade.
//!
//! Wire format (one secret per user under the configured mount):
//!
//! - `GET  {url}/v1/{base_path}/{user}` → `{"data": {"<key_name>": "...", "date": "..."}}`
//!   or 404 when the user has no record yet.
//! - `PUT  {url}/v1/{base_path}/{user}` with body `{"<key_name>": "...", "date": "..."}`.
//!
//! Every request carries the `X-Vault-Token` header. A 405 on the read path
//! means the mounted engine does not expose this operation; it is reported
//! as [`SecretLookup::Unsupported`] and logged, not silently mapped to
//! "user not found".

use reqwest::StatusCode;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{ApiKeyRecord, SecretLookup, SecretStore, SecretStoreError};
use crate::config::VaultConfig;
use crate::{Error, Result};

/// Vault KV client.
pub struct VaultClient {
    http: reqwest::Client,
    url: String,
    token: String,
    base_path: String,
    key_name: String,
}

impl VaultClient {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: &VaultConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build Vault HTTP client: {e}")))?;

        Ok(Self {
            http,
            url: config.url.trim_end_matches('/').to_string(),
            token: config.resolve_token(),
            base_path: config.base_path.trim_matches('/').to_string(),
            key_name: config.key_name.clone(),
        })
    }

    fn record_url(&self, user_name: &str) -> String {
        format!("{}/v1/{}/{user_name}", self.url, self.base_path)
    }

    fn record_payload(key_name: &str, record: &ApiKeyRecord) -> Value {
        json!({
            key_name: record.api_key,
            "date": record.created_at,
        })
    }

    fn parse_record(key_name: &str, body: &Value) -> std::result::Result<ApiKeyRecord, String> {
        let data = body
            .get("data")
            .ok_or_else(|| "missing 'data' object".to_string())?;
        let api_key = data
            .get(key_name)
            .and_then(Value::as_str)
            .ok_or_else(|| format!("missing '{key_name}' field"))?;
        let created_at = data
            .get("date")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing 'date' field".to_string())?;

        Ok(ApiKeyRecord {
            api_key: api_key.to_string(),
            created_at: created_at.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl SecretStore for VaultClient {
    async fn exists(&self, user_name: &str) -> std::result::Result<SecretLookup, SecretStoreError> {
        let url = self.record_url(user_name);
        debug!(user = %user_name, "Reading api key record from Vault");

        let response = self
            .http
            .get(&url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .map_err(|e| SecretStoreError::Unreachable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(SecretLookup::NotFound),
            StatusCode::METHOD_NOT_ALLOWED => {
                // Older KV engines answer 405 here. Possibly a version
                // mismatch rather than a missing user, so keep the signal
                // distinct and let the caller decide.
                warn!(
                    user = %user_name,
                    "Vault backend does not support reads on this path; treating as no record"
                );
                Ok(SecretLookup::Unsupported)
            }
            status if status.is_success() => {
                let body: Value = response
                    .json()
                    .await
                    .map_err(|e| SecretStoreError::Malformed(e.to_string()))?;
                let record = Self::parse_record(&self.key_name, &body)
                    .map_err(SecretStoreError::Malformed)?;
                Ok(SecretLookup::Found(record))
            }
            status => Err(SecretStoreError::Unreachable(format!(
                "unexpected status {status} from {url}"
            ))),
        }
    }

    async fn store(
        &self,
        user_name: &str,
        record: &ApiKeyRecord,
    ) -> std::result::Result<(), SecretStoreError> {
        let url = self.record_url(user_name);
        debug!(user = %user_name, "Writing api key record to Vault");

        let response = self
            .http
            .put(&url)
            .header("X-Vault-Token", &self.token)
            .json(&Self::record_payload(&self.key_name, record))
            .send()
            .await
            .map_err(|e| SecretStoreError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SecretStoreError::Unreachable(format!(
                "unexpected status {status} from {url}"
            )))
        }
    }

    async fn health(&self) -> std::result::Result<(), SecretStoreError> {
        let url = format!("{}/v1/sys/health", self.url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SecretStoreError::Unreachable(e.to_string()))?;

        let status = response.status();
        // 429/472/473 are standby/DR codes: the node answered, so it is up.
        if status.is_success() || matches!(status.as_u16(), 429 | 472 | 473) {
            Ok(())
        } else {
            Err(SecretStoreError::Unreachable(format!(
                "health probe returned {status}"
            )))
        }
    }
}
