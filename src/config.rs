//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Loaded in order, later files override earlier. Variables are set into
    /// the process environment for `env:VAR` resolution.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Inbound token verification configuration
    pub auth: AuthConfig,
    /// Vault secret store configuration
    pub vault: VaultConfig,
    /// APISIX admin plane configuration
    pub apisix: ApisixConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (APIKEY_PORTAL_ prefix)
        figment = figment.merge(Env::prefixed("APIKEY_PORTAL_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before `env:` resolution)
        config.load_env_files();
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let path = Path::new(path_str);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {path_str}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {path_str}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {path_str}");
            }
        }
    }

    /// Validate cross-field constraints that figment cannot express.
    fn validate(&self) -> Result<()> {
        if self.vault.secret_phrase.is_empty() {
            return Err(Error::Config(
                "vault.secret_phrase must be set - API keys cannot be derived without it".into(),
            ));
        }
        if self.auth.jwks_url.is_empty() {
            return Err(Error::Config(
                "auth.jwks_url must be set - inbound tokens cannot be verified without it".into(),
            ));
        }
        if self.vault.key_name != self.apisix.key_name {
            return Err(Error::Config(format!(
                "key name mismatch: vault.key_name '{}' != apisix.key_name '{}' - \
                 the gateway resolves consumer keys by the name the store writes",
                self.vault.key_name, self.apisix.key_name
            )));
        }
        for (field, value) in [
            ("auth.jwks_url", &self.auth.jwks_url),
            ("vault.url", &self.vault.url),
            ("apisix.consumers_url", &self.apisix.consumers_url),
            ("apisix.routes_url", &self.apisix.routes_url),
            ("apisix.gateway_url", &self.apisix.gateway_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| Error::Config(format!("{field} is not a valid URL: {e}")))?;
        }
        Ok(())
    }
}

/// Resolve a config value that may be an `env:VAR_NAME` indirection.
/// Returns the literal value if the prefix is absent or the variable unset.
#[must_use]
pub fn resolve_secret(value: &str) -> String {
    if let Some(var_name) = value.strip_prefix("env:") {
        env::var(var_name).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Allowed CORS origins (`*` = any)
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8082,
            allowed_origins: vec!["*".to_string()],
        }
    }
}

/// Inbound token verification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// JWKS endpoint of the identity provider
    /// (Keycloak: `{base}/realms/{realm}/protocol/openid-connect/certs`)
    pub jwks_url: String,
    /// Expected `iss` claim. Empty disables the issuer check.
    pub issuer: String,
    /// Expected `aud` claim
    pub audience: String,
    /// Claim carrying the portal username
    pub username_claim: String,
    /// Realm role required to call the provisioning endpoints
    pub required_role: String,
    /// Clock skew tolerance for `exp`/`nbf` validation
    pub leeway_secs: u64,
    /// Per-identity rate limit (requests per minute, 0 = unlimited)
    pub rate_limit_per_minute: u32,
    /// Paths that bypass authentication
    pub public_paths: Vec<String>,
    /// How long to cache a fetched JWKS
    #[serde(with = "humantime_serde")]
    pub jwks_cache_ttl: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwks_url: String::new(),
            issuer: String::new(),
            audience: "account".to_string(),
            username_claim: "preferred_username".to_string(),
            required_role: "ADMIN".to_string(),
            leeway_secs: 60,
            rate_limit_per_minute: 0,
            public_paths: vec!["/health".to_string()],
            jwks_cache_ttl: Duration::from_secs(3600),
        }
    }
}

/// Vault secret store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Vault base URL
    pub url: String,
    /// Vault token (supports `env:VAR_NAME`)
    pub token: String,
    /// KV mount path under which user records live
    pub base_path: String,
    /// Field name the API key is stored under
    pub key_name: String,
    /// Secret phrase mixed into key derivation
    pub secret_phrase: String,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8200".to_string(),
            token: "env:VAULT_TOKEN".to_string(),
            base_path: "apisix".to_string(),
            key_name: "api-key".to_string(),
            secret_phrase: String::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl VaultConfig {
    /// Resolve the Vault token (`env:VAR` indirection)
    #[must_use]
    pub fn resolve_token(&self) -> String {
        resolve_secret(&self.token)
    }

    /// Resolve the derivation secret phrase (`env:VAR` indirection)
    #[must_use]
    pub fn resolve_secret_phrase(&self) -> String {
        resolve_secret(&self.secret_phrase)
    }
}

/// APISIX admin plane configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApisixConfig {
    /// Admin API consumers endpoint
    pub consumers_url: String,
    /// Admin API routes endpoint
    pub routes_url: String,
    /// Static admin API key sent as `X-API-KEY` (supports `env:VAR_NAME`)
    pub admin_api_key: String,
    /// Prefix of the consumer key-auth credential
    /// (e.g. `$secret://vault/dev/` to have the gateway resolve the key from
    /// Vault). Empty embeds the literal API key in the consumer.
    pub key_path: String,
    /// Suffix of the consumer key-auth credential; matches `vault.key_name`
    pub key_name: String,
    /// Public base URL routes are exposed under
    pub gateway_url: String,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ApisixConfig {
    fn default() -> Self {
        Self {
            consumers_url: "http://127.0.0.1:9180/apisix/admin/consumers".to_string(),
            routes_url: "http://127.0.0.1:9180/apisix/admin/routes".to_string(),
            admin_api_key: "env:APISIX_ADMIN_API_KEY".to_string(),
            key_path: "$secret://vault/dev/".to_string(),
            key_name: "api-key".to_string(),
            gateway_url: "http://127.0.0.1:9080".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl ApisixConfig {
    /// Resolve the admin API key (`env:VAR` indirection)
    #[must_use]
    pub fn resolve_admin_api_key(&self) -> String {
        resolve_secret(&self.admin_api_key)
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else if let Some(hours) = s.strip_suffix('h') {
            hours
                .parse::<u64>()
                .map(|h| Duration::from_secs(h * 3600))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(yaml: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portal.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(yaml.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn load_minimal_config_applies_defaults() {
        // GIVEN: a config file that only sets the required values
        let (_dir, path) = write_config(
            r#"
auth:
  jwks_url: "https://idp.local/realms/portal/protocol/openid-connect/certs"
vault:
  secret_phrase: "test-phrase"
"#,
        );

        // WHEN: loading
        let config = Config::load(Some(&path)).unwrap();

        // THEN: defaults fill the rest
        assert_eq!(config.server.port, 8082);
        assert_eq!(config.vault.key_name, "api-key");
        assert_eq!(config.auth.required_role, "ADMIN");
        assert_eq!(config.auth.username_claim, "preferred_username");
        assert_eq!(config.apisix.timeout, Duration::from_secs(10));
    }

    #[test]
    fn load_rejects_missing_secret_phrase() {
        // GIVEN: a config file without a secret phrase
        let (_dir, path) = write_config("server:\n  port: 9000\n");

        // THEN: load fails with a config error
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("secret_phrase"));
    }

    #[test]
    fn load_rejects_key_name_mismatch() {
        // GIVEN: vault and apisix disagree on the key field name
        let (_dir, path) = write_config(
            r#"
auth:
  jwks_url: "https://idp.local/certs"
vault:
  secret_phrase: "test-phrase"
  key_name: "auth-key"
apisix:
  key_name: "api-key"
"#,
        );

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("key name mismatch"));
    }

    #[test]
    fn load_rejects_invalid_url() {
        let (_dir, path) = write_config(
            r#"
auth:
  jwks_url: "https://idp.local/certs"
vault:
  secret_phrase: "test-phrase"
  url: "not a url"
"#,
        );

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("vault.url"));
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/portal.yaml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn resolve_secret_passes_through_literals() {
        assert_eq!(resolve_secret("plain-value"), "plain-value");
    }

    #[test]
    fn resolve_secret_reads_environment() {
        // GIVEN: a variable set in the environment
        // env::set_var is unsafe in edition 2024 and the crate forbids unsafe,
        // so read one the test runner already has.
        let path = env::var("PATH").unwrap();

        // THEN: env: indirection resolves it
        assert_eq!(resolve_secret("env:PATH"), path);
    }

    #[test]
    fn resolve_secret_keeps_unset_indirection_verbatim() {
        assert_eq!(
            resolve_secret("env:APIKEY_PORTAL_TEST_UNSET_VAR"),
            "env:APIKEY_PORTAL_TEST_UNSET_VAR"
        );
    }

    #[test]
    fn humantime_roundtrip() {
        // GIVEN: a duration field in yaml-ish forms
        #[derive(Deserialize)]
        struct T {
            #[serde(with = "humantime_serde")]
            d: Duration,
        }

        let t: T = serde_json::from_str(r#"{"d": "30s"}"#).unwrap();
        assert_eq!(t.d, Duration::from_secs(30));
        let t: T = serde_json::from_str(r#"{"d": "5m"}"#).unwrap();
        assert_eq!(t.d, Duration::from_secs(300));
        let t: T = serde_json::from_str(r#"{"d": "100ms"}"#).unwrap();
        assert_eq!(t.d, Duration::from_millis(100));
        let t: T = serde_json::from_str(r#"{"d": "1h"}"#).unwrap();
        assert_eq!(t.d, Duration::from_secs(3600));
        let t: T = serde_json::from_str(r#"{"d": "10"}"#).unwrap();
        assert_eq!(t.d, Duration::from_secs(10));
    }

    #[test]
    fn load_env_files_skips_missing() {
        let config = Config {
            env_files: vec!["/nonexistent/path/.env".to_string()],
            ..Default::default()
        };
        // Should not panic
        config.load_env_files();
    }
}
