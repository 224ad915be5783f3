//! Developer-portal backend for gateway API key provisioning.
//!
//! Given a user identity verified against an external identity provider
//! (Keycloak-style JWT + JWKS), this service provisions and returns a
//! per-user API key and the list of gateway routes that accept it, by
//! coordinating two external systems:
//!
//! - a **Vault** key-value store holding the per-user key record, and
//! - an **APISIX** admin plane holding the matching consumer credential.
//!
//! # Request flow
//!
//! ```text
//! GET /apikey (Bearer JWT)
//!   -> verify token against the provider JWKS, extract username
//!   -> check both backends concurrently (reachable? user known?)
//!   -> reconcile: reuse the stored key, or derive + persist a new one
//!   -> upsert the gateway consumer if missing
//!   -> list key-auth routes
//!   <- {userName, apiKey, routes}
//! ```
//!
//! Either backend being unreachable fails the whole request with a 503
//! naming the dependency; the service never returns a partial answer.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admin;
pub mod cli;
pub mod config;
pub mod error;
pub mod keygen;
pub mod portal;
pub mod provision;
pub mod secrets;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
