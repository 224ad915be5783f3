//! Gateway admin plane facade — consumers and key-auth routes.
//!
//! The [`GatewayAdmin`] trait abstracts the API gateway's admin API. The
//! production implementation is [`ApisixClient`]; tests substitute in-memory
//! fakes. Consumer creation is an upsert at the gateway, so repeating it for
//! the same user is safe.

pub mod apisix;

use thiserror::Error;

pub use apisix::ApisixClient;

/// A gateway route that accepts key authentication, addressed by its
/// public URL (gateway base URL + route path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDescriptor {
    /// Fully-qualified public URL of the route
    pub public_url: String,
}

/// Error variants for gateway admin operations.
///
/// "Consumer not found" is not an error — [`GatewayAdmin::consumer_exists`]
/// reports it as a normal `false`.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The admin plane cannot be reached (transport failure, timeout, or an
    /// unexpected status). Recoverable by caller retry; never retried here.
    #[error("gateway admin API unreachable: {0}")]
    Unreachable(String),

    /// The admin plane answered with a payload this client cannot interpret.
    #[error("gateway admin API returned a malformed response: {0}")]
    Malformed(String),
}

/// Facade over the API gateway admin plane.
#[async_trait::async_trait]
pub trait GatewayAdmin: Send + Sync + 'static {
    /// Whether a consumer record exists for `user_name`.
    async fn consumer_exists(&self, user_name: &str) -> Result<bool, GatewayError>;

    /// Upsert the consumer for `user_name`, credentialed with `api_key`.
    async fn create_consumer(&self, user_name: &str, api_key: &str) -> Result<(), GatewayError>;

    /// All routes whose plugin set includes key authentication, in the order
    /// the backend returns them.
    async fn list_key_auth_routes(&self) -> Result<Vec<RouteDescriptor>, GatewayError>;

    /// Probe admin plane liveness.
    async fn health(&self) -> Result<(), GatewayError>;
}
