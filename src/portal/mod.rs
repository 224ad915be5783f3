//! Inbound HTTP plane — server, router, and token verification.
//!
//! The portal exposes three endpoints:
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/apikey` | Provision/retrieve the caller's API key and routes |
//! | `GET` | `/routes` | List key-auth gateway routes |
//! | `GET` | `/health` | Probe both backends (public) |
//!
//! `/apikey` and `/routes` require a bearer JWT from the identity provider;
//! the auth middleware verifies it against the provider's JWKS, enforces the
//! required realm role, and threads the resulting [`auth::VerifiedUser`]
//! into the handlers as a request extension.

pub mod auth;
pub mod router;
pub mod server;

pub use auth::{TokenVerifier, VerifiedUser};
pub use router::{AppState, create_router};
pub use server::Portal;
