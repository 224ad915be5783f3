//! Inbound token verification — JWT signature validation against the
//! identity provider's JWKS, role gating, and per-identity rate limiting.
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) to extract `kid` and `alg`.
//! 2. Fetch the provider's JWKS (cached; refreshed once on unknown `kid`).
//! 3. Verify the signature and standard claims (`exp`, `iss`, `aud`).
//! 4. Require the configured realm role (Keycloak `realm_access.roles`).
//! 5. Extract the username from the configured claim, falling back to `sub`.
//!
//! The verified username is threaded into handlers as a request extension;
//! nothing downstream reads ambient authentication state.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use jsonwebtoken::{
    Algorithm, DecodingKey, Header, TokenData, Validation,
    jwk::{AlgorithmParameters, JwkSet},
};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::AuthConfig;

/// Type alias for a per-identity rate limiter
type IdentityRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Error variants for inbound token verification failures.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// JWT decode / signature verification failed.
    #[error("JWT verification failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// The JWT header contains no `kid` field.
    #[error("JWT missing 'kid' field in header")]
    MissingKeyId,

    /// The `kid` in the JWT header is not in the provider's JWKS.
    #[error("Unknown key ID: {0}")]
    UnknownKeyId(String),

    /// Network or HTTP error while fetching the JWKS.
    #[error("JWKS fetch error: {0}")]
    Http(#[from] reqwest::Error),

    /// The token lacks the realm role required for provisioning.
    #[error("Missing required role: {0}")]
    MissingRole(String),

    /// Neither the configured claim nor `sub` yields a username.
    #[error("Token carries no usable identity claim")]
    MissingUsername,
}

/// Verified identity extracted from a valid token.
///
/// `username` is the opaque identity string the provisioning core keys
/// everything on.
#[derive(Debug, Clone)]
pub struct VerifiedUser {
    /// Portal username (from the configured claim, or `sub`)
    pub username: String,
    /// Raw `sub` claim
    pub subject: String,
    /// Realm roles carried by the token
    pub roles: Vec<String>,
}

/// Cached JWKS entry.
struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
    ttl: Duration,
}

impl CachedJwks {
    fn is_stale(&self) -> bool {
        self.fetched_at.elapsed() >= self.ttl
    }
}

/// JWKS cache — one entry per JWKS URL.
struct JwksCache {
    inner: DashMap<String, CachedJwks>,
    http: reqwest::Client,
    ttl: Duration,
}

impl JwksCache {
    fn new(ttl: Duration) -> Self {
        Self {
            inner: DashMap::new(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            ttl,
        }
    }

    /// Return the cached JWKS, or fetch if stale.
    ///
    /// If `force_refresh` is `true`, the cache is bypassed regardless of TTL.
    async fn get_or_fetch(&self, jwks_url: &str, force_refresh: bool) -> Result<JwkSet, AuthError> {
        if !force_refresh {
            if let Some(cached) = self.inner.get(jwks_url) {
                if !cached.is_stale() {
                    return Ok(cached.keys.clone());
                }
            }
        }

        debug!(url = %jwks_url, "Fetching JWKS");
        let jwks: JwkSet = self.http.get(jwks_url).send().await?.json().await?;

        self.inner.insert(
            jwks_url.to_string(),
            CachedJwks {
                keys: jwks.clone(),
                fetched_at: Instant::now(),
                ttl: self.ttl,
            },
        );

        Ok(jwks)
    }
}

/// Inbound token verifier — holds the auth config, the JWKS cache, and the
/// per-identity rate limiters.
pub struct TokenVerifier {
    config: AuthConfig,
    jwks: JwksCache,
    rate_limiters: DashMap<String, Arc<IdentityRateLimiter>>,
}

impl TokenVerifier {
    /// Create a verifier from configuration.
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        let jwks = JwksCache::new(config.jwks_cache_ttl);
        Self {
            config,
            jwks,
            rate_limiters: DashMap::new(),
        }
    }

    /// Check if a path is public (bypasses auth)
    #[must_use]
    pub fn is_public_path(&self, path: &str) -> bool {
        self.config.public_paths.iter().any(|p| path.starts_with(p))
    }

    /// Check the per-identity rate limit. Returns true if allowed.
    #[must_use]
    pub fn check_rate_limit(&self, username: &str) -> bool {
        let Some(quota) = NonZeroU32::new(self.config.rate_limit_per_minute) else {
            // 0 = unlimited
            return true;
        };

        let limiter = self
            .rate_limiters
            .entry(username.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::direct(Quota::per_minute(quota))))
            .clone();
        limiter.check().is_ok()
    }

    /// Verify a bearer token and return the extracted identity.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] if the token is invalid, expired, signed with an
    /// unknown key, lacks the required role, or the JWKS cannot be fetched.
    pub async fn verify(&self, token: &str) -> Result<VerifiedUser, AuthError> {
        let header = jsonwebtoken::decode_header(token)?;
        let kid = header.kid.clone().ok_or(AuthError::MissingKeyId)?;

        let decoding_key = self.find_decoding_key(&kid).await?;
        let validation = self.build_validation(&header);

        let token_data: TokenData<Value> =
            jsonwebtoken::decode(token, &decoding_key, &validation)?;
        let claims = token_data.claims;

        if !self.config.required_role.is_empty() {
            let roles = extract_roles(&claims);
            if !roles.iter().any(|r| r == &self.config.required_role) {
                return Err(AuthError::MissingRole(self.config.required_role.clone()));
            }
        }

        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let username = extract_username(&claims, &self.config.username_claim)
            .ok_or(AuthError::MissingUsername)?;

        Ok(VerifiedUser {
            username,
            subject,
            roles: extract_roles(&claims),
        })
    }

    /// Find a decoding key by `kid`, refreshing the JWKS cache if not found.
    async fn find_decoding_key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        let jwks = self
            .jwks
            .get_or_fetch(&self.config.jwks_url, false)
            .await?;
        if let Some(key) = find_key_in_jwks(&jwks, kid) {
            return Ok(key);
        }

        // Unknown kid: refresh once and retry (key rotation)
        debug!(kid = %kid, "Key not found in cached JWKS, refreshing");
        let jwks = self.jwks.get_or_fetch(&self.config.jwks_url, true).await?;
        find_key_in_jwks(&jwks, kid).ok_or_else(|| AuthError::UnknownKeyId(kid.to_string()))
    }

    /// Build a [`Validation`] from the JWT header algorithm and the config.
    fn build_validation(&self, header: &Header) -> Validation {
        let alg = match header.alg {
            Algorithm::RS256 => Algorithm::RS256,
            Algorithm::RS384 => Algorithm::RS384,
            Algorithm::RS512 => Algorithm::RS512,
            Algorithm::ES256 => Algorithm::ES256,
            Algorithm::ES384 => Algorithm::ES384,
            other => {
                warn!(alg = ?other, "Unsupported JWT algorithm, defaulting to RS256");
                Algorithm::RS256
            }
        };

        let mut v = Validation::new(alg);
        v.leeway = self.config.leeway_secs;
        if self.config.audience.is_empty() {
            v.validate_aud = false;
        } else {
            v.set_audience(&[&self.config.audience]);
        }
        if !self.config.issuer.is_empty() {
            v.set_issuer(&[&self.config.issuer]);
        }
        v
    }
}

/// Extract Keycloak-style realm roles from the claims.
fn extract_roles(claims: &Value) -> Vec<String> {
    claims
        .get("realm_access")
        .and_then(|ra| ra.get("roles"))
        .and_then(Value::as_array)
        .map(|roles| {
            roles
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Extract the username from the configured claim, falling back to `sub`.
fn extract_username(claims: &Value, claim: &str) -> Option<String> {
    claims
        .get(claim)
        .and_then(Value::as_str)
        .or_else(|| claims.get("sub").and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Find a JWK by `kid` in a `JwkSet` and convert it to a `DecodingKey`.
fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    for jwk in &jwks.keys {
        let jwk_kid = jwk.common.key_id.as_deref().unwrap_or("");
        if jwk_kid != kid {
            continue;
        }

        return match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
            AlgorithmParameters::EllipticCurve(ec) => {
                DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
            }
            AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
        };
    }
    None
}

// ── Middleware ─────────────────────────────────────────────────────────────

/// Authentication middleware: verify the bearer token, enforce the rate
/// limit, and inject the [`VerifiedUser`] for downstream handlers.
pub async fn auth_middleware(
    State(verifier): State<Arc<TokenVerifier>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    if verifier.is_public_path(&path) {
        debug!(path = %path, "Public path, skipping auth");
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(str::to_string);

    let Some(token) = token else {
        warn!(path = %path, "Missing Authorization header");
        return unauthorized_response("Token has not been provided");
    };

    match verifier.verify(&token).await {
        Ok(user) => {
            if !verifier.check_rate_limit(&user.username) {
                warn!(user = %user.username, path = %path, "Rate limit exceeded");
                return rate_limited_response(&user.username);
            }

            debug!(user = %user.username, path = %path, "Authenticated request");
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(AuthError::Http(e)) => {
            warn!(path = %path, error = %e, "JWKS fetch failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"message": "Identity provider error"})),
            )
                .into_response()
        }
        Err(e @ AuthError::MissingRole(_)) => {
            warn!(path = %path, error = %e, "Role check failed");
            (
                StatusCode::FORBIDDEN,
                Json(json!({"message": "Insufficient role"})),
            )
                .into_response()
        }
        Err(e) => {
            warn!(path = %path, error = %e, "Invalid token");
            unauthorized_response("Invalid token")
        }
    }
}

/// Create a 401 Unauthorized response
fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [("WWW-Authenticate", "Bearer")],
        Json(json!({"message": message})),
    )
        .into_response()
}

/// Create a 429 Rate Limited response
fn rate_limited_response(username: &str) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [("Retry-After", "60")],
        Json(json!({
            "message": format!("Rate limit exceeded for '{username}'. Try again later.")
        })),
    )
        .into_response()
}
