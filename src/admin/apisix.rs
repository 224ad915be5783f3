//! APISIX admin API implementation of the gateway facade.
//!
//! Wire format:
//!
//! - `GET {consumers_url}/{user}` → `{"value": {"username": "...", ...}}`
//!   or 404 when the consumer does not exist.
//! - `PUT {consumers_url}/{user}` with body
//!   `{"username": "...", "plugins": {"key-auth": {"key": "<keyPath><user>/<keyName>"}}}`
//!   (an upsert).
//! - `GET {routes_url}` → `{"total": n, "list": [{"value": {"uri": "...",
//!   "plugins": {...}}}]}`.
//!
//! Every request carries the static `X-API-KEY` admin header. The consumer's
//! key-auth credential normally references the secret store
//! (`$secret://...`), so the gateway resolves the actual key at request
//! time; with an empty `key_path` the literal key is embedded instead.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{GatewayAdmin, GatewayError, RouteDescriptor};
use crate::config::ApisixConfig;
use crate::{Error, Result};

// ── Wire types ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct Consumer {
    username: String,
    plugins: ConsumerPlugins,
}

#[derive(Debug, Serialize)]
struct ConsumerPlugins {
    #[serde(rename = "key-auth")]
    key_auth: KeyAuth,
}

#[derive(Debug, Serialize)]
struct KeyAuth {
    key: String,
}

#[derive(Debug, Deserialize)]
struct ConsumerEnvelope {
    value: ConsumerValue,
}

#[derive(Debug, Deserialize)]
struct ConsumerValue {
    username: String,
}

#[derive(Debug, Deserialize)]
struct RoutesResponse {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    list: Vec<RouteEntry>,
}

#[derive(Debug, Deserialize)]
struct RouteEntry {
    value: RouteValue,
}

#[derive(Debug, Deserialize)]
struct RouteValue {
    #[serde(default)]
    uri: String,
    #[serde(default)]
    plugins: RoutePlugins,
}

#[derive(Debug, Default, Deserialize)]
struct RoutePlugins {
    #[serde(rename = "key-auth")]
    key_auth: Option<serde_json::Value>,
}

// ── Client ─────────────────────────────────────────────────────────────────

/// APISIX admin API client.
pub struct ApisixClient {
    http: reqwest::Client,
    consumers_url: String,
    routes_url: String,
    admin_api_key: String,
    key_path: String,
    key_name: String,
    gateway_url: String,
}

impl ApisixClient {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: &ApisixConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build APISIX HTTP client: {e}")))?;

        Ok(Self {
            http,
            consumers_url: config.consumers_url.trim_end_matches('/').to_string(),
            routes_url: config.routes_url.clone(),
            admin_api_key: config.resolve_admin_api_key(),
            key_path: config.key_path.clone(),
            key_name: config.key_name.clone(),
            gateway_url: config.gateway_url.trim_end_matches('/').to_string(),
        })
    }

    /// The key-auth credential for a consumer: the configured
    /// `<key_path><user>/<key_name>` secret reference, or the literal key
    /// when no key path is configured.
    fn consumer_key(&self, user_name: &str, api_key: &str) -> String {
        if self.key_path.is_empty() {
            api_key.to_string()
        } else {
            format!("{}{user_name}/{}", self.key_path, self.key_name)
        }
    }

    fn consumer_body(&self, user_name: &str, api_key: &str) -> Consumer {
        Consumer {
            username: user_name.to_string(),
            plugins: ConsumerPlugins {
                key_auth: KeyAuth {
                    key: self.consumer_key(user_name, api_key),
                },
            },
        }
    }

    fn filter_key_auth_routes(gateway_url: &str, routes: RoutesResponse) -> Vec<RouteDescriptor> {
        routes
            .list
            .into_iter()
            .filter(|entry| entry.value.plugins.key_auth.is_some())
            .map(|entry| RouteDescriptor {
                public_url: format!("{gateway_url}{}", entry.value.uri),
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl GatewayAdmin for ApisixClient {
    async fn consumer_exists(&self, user_name: &str) -> std::result::Result<bool, GatewayError> {
        let url = format!("{}/{user_name}", self.consumers_url);
        debug!(user = %user_name, "Checking gateway consumer");

        let response = self
            .http
            .get(&url)
            .header("X-API-KEY", &self.admin_api_key)
            .send()
            .await
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => {
                let envelope: ConsumerEnvelope = response
                    .json()
                    .await
                    .map_err(|e| GatewayError::Malformed(e.to_string()))?;
                Ok(envelope.value.username == user_name)
            }
            status => Err(GatewayError::Unreachable(format!(
                "unexpected status {status} from {url}"
            ))),
        }
    }

    async fn create_consumer(
        &self,
        user_name: &str,
        api_key: &str,
    ) -> std::result::Result<(), GatewayError> {
        let url = format!("{}/{user_name}", self.consumers_url);
        debug!(user = %user_name, "Upserting gateway consumer");

        let response = self
            .http
            .put(&url)
            .header("X-API-KEY", &self.admin_api_key)
            .json(&self.consumer_body(user_name, api_key))
            .send()
            .await
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(GatewayError::Unreachable(format!(
                "unexpected status {status} from {url}"
            )))
        }
    }

    async fn list_key_auth_routes(
        &self,
    ) -> std::result::Result<Vec<RouteDescriptor>, GatewayError> {
        let response = self
            .http
            .get(&self.routes_url)
            .header("X-API-KEY", &self.admin_api_key)
            .send()
            .await
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Unreachable(format!(
                "unexpected status {status} from {}",
                self.routes_url
            )));
        }

        let routes: RoutesResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;

        let total = routes.total;
        let descriptors = Self::filter_key_auth_routes(&self.gateway_url, routes);
        debug!(
            total = total,
            key_auth = descriptors.len(),
            "Fetched gateway routes"
        );

        Ok(descriptors)
    }

    async fn health(&self) -> std::result::Result<(), GatewayError> {
        let response = self
            .http
            .get(&self.routes_url)
            .header("X-API-KEY", &self.admin_api_key)
            .send()
            .await
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(GatewayError::Unreachable(format!(
                "health probe returned {status}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::config::ApisixConfig;

    fn client(key_path: &str) -> ApisixClient {
        ApisixClient::new(&ApisixConfig {
            consumers_url: "http://apisix.local:9180/apisix/admin/consumers".to_string(),
            routes_url: "http://apisix.local:9180/apisix/admin/routes".to_string(),
            admin_api_key: "edd1c9f034335f136f87ad84b625c8f1".to_string(),
            key_path: key_path.to_string(),
            key_name: "api-key".to_string(),
            gateway_url: "http://apisix.local:9080/".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn consumer_key_uses_secret_reference_template() {
        // GIVEN: a configured key path
        let client = client("$secret://vault/dev/");

        // WHEN: building the credential
        let key = client.consumer_key("alice", "deadbeef");

        // THEN: it references the store, not the literal key
        assert_eq!(key, "$secret://vault/dev/alice/api-key");
    }

    #[test]
    fn consumer_key_embeds_literal_when_key_path_empty() {
        // GIVEN: no key path configured
        let client = client("");

        // THEN: the literal API key is used
        assert_eq!(client.consumer_key("alice", "deadbeef"), "deadbeef");
    }

    #[test]
    fn consumer_body_serializes_to_admin_api_shape() {
        // GIVEN: a consumer body for alice
        let client = client("$secret://vault/dev/");
        let body = client.consumer_body("alice", "deadbeef");

        // WHEN: serialized
        let value = serde_json::to_value(&body).unwrap();

        // THEN: it matches the admin API consumer shape
        assert_eq!(
            value,
            json!({
                "username": "alice",
                "plugins": {
                    "key-auth": {"key": "$secret://vault/dev/alice/api-key"}
                }
            })
        );
    }

    #[test]
    fn filter_keeps_key_auth_routes_only() {
        // GIVEN: one key-auth route and one jwt-auth-only route
        let routes: RoutesResponse = serde_json::from_value(json!({
            "total": 2,
            "list": [
                {"value": {"uri": "/pets", "plugins": {"key-auth": {"header": "apikey"}}}},
                {"value": {"uri": "/cats", "plugins": {"jwt-auth": {}}}}
            ]
        }))
        .unwrap();

        // WHEN: filtering
        let descriptors =
            ApisixClient::filter_key_auth_routes("http://apisix.local:9080", routes);

        // THEN: exactly the key-auth route survives, fully qualified
        assert_eq!(
            descriptors,
            vec![RouteDescriptor {
                public_url: "http://apisix.local:9080/pets".to_string()
            }]
        );
    }

    #[test]
    fn filter_preserves_backend_order() {
        // GIVEN: several key-auth routes
        let routes: RoutesResponse = serde_json::from_value(json!({
            "total": 3,
            "list": [
                {"value": {"uri": "/b", "plugins": {"key-auth": {}}}},
                {"value": {"uri": "/a", "plugins": {"key-auth": {}}}},
                {"value": {"uri": "/c", "plugins": {"key-auth": {}}}}
            ]
        }))
        .unwrap();

        let urls: Vec<String> = ApisixClient::filter_key_auth_routes("http://gw", routes)
            .into_iter()
            .map(|r| r.public_url)
            .collect();

        // THEN: no sorting is applied
        assert_eq!(urls, vec!["http://gw/b", "http://gw/a", "http://gw/c"]);
    }

    #[test]
    fn filter_handles_routes_without_plugins() {
        // GIVEN: a route with no plugins object at all
        let routes: RoutesResponse = serde_json::from_value(json!({
            "total": 1,
            "list": [{"value": {"uri": "/bare"}}]
        }))
        .unwrap();

        // THEN: it is dropped
        assert!(ApisixClient::filter_key_auth_routes("http://gw", routes).is_empty());
    }

    #[test]
    fn consumer_envelope_parses_admin_response() {
        // GIVEN: an admin API consumer read response
        let envelope: ConsumerEnvelope = serde_json::from_value(json!({
            "key": "/apisix/consumers/alice",
            "value": {
                "create_time": 1_710_165_806u64,
                "username": "alice",
                "plugins": {"key-auth": {"key": "$secret://vault/dev/alice/api-key"}}
            }
        }))
        .unwrap();

        assert_eq!(envelope.value.username, "alice");
    }
}
