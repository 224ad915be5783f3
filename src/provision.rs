//! Dual-backend reconciliation — the heart of the portal.
//!
//! Each provisioning request compares the state of two independently-failing
//! systems (the secret store owning the key record, the gateway owning the
//! consumer credential) and decides idempotently whether to create, fetch,
//! or fail:
//!
//! ```text
//! provision(user)
//!   -> check both backends concurrently          (CheckingAvailability)
//!   -> either unreachable: fail, naming it       (Failed)
//!   -> resolve key: stored record wins, else derive a fresh one
//!   -> gateway missing the consumer: upsert it   (CreatingConsumer)
//!   -> store missing the record: write it once   (GeneratingKey)
//!   -> fetch key-auth routes                     (FetchingRoutes)
//!   <- {userName, apiKey, routes}                (Done)
//! ```
//!
//! The stored key is authoritative: it is never regenerated or overwritten,
//! which is what makes repeated provisioning return the same key even though
//! derivation itself is date-salted. No state survives across requests; two
//! concurrent first-time calls for the same user are tolerated because the
//! consumer write is an upsert and the store writes the same derivable
//! value (a midnight-boundary race can still write two different keys, a
//! known gap inherited from the date salt).

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::admin::{GatewayAdmin, GatewayError};
use crate::keygen::KeyDeriver;
use crate::secrets::{ApiKeyRecord, SecretLookup, SecretStore, SecretStoreError};

/// The two external dependencies a provisioning request relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// The key-value secret store
    SecretStore,
    /// The gateway admin plane
    Gateway,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SecretStore => write!(f, "secret store"),
            Self::Gateway => write!(f, "gateway admin API"),
        }
    }
}

/// Provisioning failure, naming the dependency that caused it.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A required backend could not be reached, before or during
    /// reconciliation. The request fails whole; no partial results.
    #[error("backend unavailable: {0}")]
    Unavailable(Backend),
}

/// Per-request snapshot of both backends, recomputed on every call.
#[derive(Debug, Clone)]
pub struct BackendAvailability {
    /// Secret store answered the existence check
    pub secret_store_up: bool,
    /// Gateway admin plane answered the existence check
    pub gateway_up: bool,
    /// The stored record, when the secret store has one
    pub secret_store_record: Option<ApiKeyRecord>,
    /// Whether the gateway already has a consumer for the user
    pub gateway_has_user: bool,
}

/// The value returned to the caller on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionResult {
    /// The provisioned user
    pub user_name: String,
    /// The user's API key
    pub api_key: String,
    /// Public URLs of all key-auth routes
    pub routes: Vec<String>,
}

/// Orchestrates the secret store and the gateway admin plane.
pub struct Provisioner {
    secrets: Arc<dyn SecretStore>,
    gateway: Arc<dyn GatewayAdmin>,
    keys: KeyDeriver,
}

impl Provisioner {
    /// Create a provisioner over the two backend facades.
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        gateway: Arc<dyn GatewayAdmin>,
        keys: KeyDeriver,
    ) -> Self {
        Self {
            secrets,
            gateway,
            keys,
        }
    }

    /// Snapshot both backends: reachability and per-user existence.
    ///
    /// The two checks are independent and run concurrently; failure of one
    /// never prevents evaluating the other.
    async fn check_backends(&self, user_name: &str) -> BackendAvailability {
        let (store_result, gateway_result) = tokio::join!(
            self.secrets.exists(user_name),
            self.gateway.consumer_exists(user_name)
        );

        let (secret_store_up, secret_store_record) = match store_result {
            Ok(SecretLookup::Found(record)) => (true, Some(record)),
            // An unsupported read was already logged by the client; for
            // reconciliation it means "no durable record".
            Ok(SecretLookup::NotFound | SecretLookup::Unsupported) => (true, None),
            Err(e) => {
                warn!(user = %user_name, error = %e, "Secret store availability check failed");
                (false, None)
            }
        };

        let (gateway_up, gateway_has_user) = match gateway_result {
            Ok(found) => (true, found),
            Err(e) => {
                warn!(user = %user_name, error = %e, "Gateway availability check failed");
                (false, false)
            }
        };

        BackendAvailability {
            secret_store_up,
            gateway_up,
            secret_store_record,
            gateway_has_user,
        }
    }

    /// Provision `user_name`: resolve their API key (creating the record and
    /// the gateway consumer on first contact) and list the key-auth routes.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Unavailable`] naming the failing backend.
    /// Gateway unavailability takes precedence over secret store state.
    pub async fn provision(
        &self,
        user_name: &str,
    ) -> Result<ProvisionResult, ProvisionError> {
        debug!(user = %user_name, "Checking backend availability");
        let availability = self.check_backends(user_name).await;

        // No partial answers: without the gateway there are no routes and no
        // consumer; without the store a fresh key would not be durable.
        if !availability.gateway_up {
            return Err(ProvisionError::Unavailable(Backend::Gateway));
        }
        if !availability.secret_store_up {
            return Err(ProvisionError::Unavailable(Backend::SecretStore));
        }

        // The stored key is used verbatim; derivation happens at most once
        // per user, on first contact.
        let (api_key, newly_derived) = match availability.secret_store_record {
            Some(record) => (record.api_key, false),
            None => (self.keys.derive(user_name), true),
        };

        if !availability.gateway_has_user {
            self.gateway
                .create_consumer(user_name, &api_key)
                .await
                .map_err(|e| fail_gateway(user_name, &e))?;
            info!(user = %user_name, "Created gateway consumer");
        }

        if newly_derived {
            let record = ApiKeyRecord::new(api_key.clone());
            self.secrets
                .store(user_name, &record)
                .await
                .map_err(|e| fail_secret_store(user_name, &e))?;
            info!(user = %user_name, "Stored new api key record");
        }

        let routes = self
            .gateway
            .list_key_auth_routes()
            .await
            .map_err(|e| fail_gateway(user_name, &e))?;

        Ok(ProvisionResult {
            user_name: user_name.to_string(),
            api_key,
            routes: routes.into_iter().map(|r| r.public_url).collect(),
        })
    }

    /// List the public URLs of all key-auth routes.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Unavailable`] when the gateway cannot be
    /// reached.
    pub async fn list_routes(&self) -> Result<Vec<String>, ProvisionError> {
        let routes = self
            .gateway
            .list_key_auth_routes()
            .await
            .map_err(|e| fail_gateway("-", &e))?;

        Ok(routes.into_iter().map(|r| r.public_url).collect())
    }

    /// Probe both backends; returns the list of unhealthy ones.
    pub async fn health(&self) -> Vec<Backend> {
        let (store, gateway) = tokio::join!(self.secrets.health(), self.gateway.health());

        let mut down = Vec::new();
        if let Err(e) = store {
            warn!(error = %e, "Secret store health probe failed");
            down.push(Backend::SecretStore);
        }
        if let Err(e) = gateway {
            warn!(error = %e, "Gateway health probe failed");
            down.push(Backend::Gateway);
        }
        down
    }
}

/// A gateway call failed after availability was confirmed: a race or flake,
/// surfaced as unavailability rather than a partial result.
fn fail_gateway(user_name: &str, e: &GatewayError) -> ProvisionError {
    match e {
        GatewayError::Malformed(_) => {
            error!(user = %user_name, error = %e, "Gateway returned a malformed response");
        }
        GatewayError::Unreachable(_) => {
            warn!(user = %user_name, error = %e, "Gateway became unreachable mid-request");
        }
    }
    ProvisionError::Unavailable(Backend::Gateway)
}

fn fail_secret_store(user_name: &str, e: &SecretStoreError) -> ProvisionError {
    match e {
        SecretStoreError::Malformed(_) => {
            error!(user = %user_name, error = %e, "Secret store returned a malformed response");
        }
        SecretStoreError::Unreachable(_) => {
            warn!(user = %user_name, error = %e, "Secret store became unreachable mid-request");
        }
    }
    ProvisionError::Unavailable(Backend::SecretStore)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provision_result_serializes_camel_case() {
        // GIVEN: a result
        let result = ProvisionResult {
            user_name: "alice".to_string(),
            api_key: "deadbeef".to_string(),
            routes: vec!["http://gw/pets".to_string()],
        };

        // WHEN: serialized for the wire
        let value = serde_json::to_value(&result).unwrap();

        // THEN: field names are camelCase as the UI expects
        assert_eq!(
            value,
            serde_json::json!({
                "userName": "alice",
                "apiKey": "deadbeef",
                "routes": ["http://gw/pets"]
            })
        );
    }

    #[test]
    fn backend_display_names_the_dependency() {
        assert_eq!(Backend::SecretStore.to_string(), "secret store");
        assert_eq!(Backend::Gateway.to_string(), "gateway admin API");
        assert_eq!(
            ProvisionError::Unavailable(Backend::Gateway).to_string(),
            "backend unavailable: gateway admin API"
        );
    }
}
