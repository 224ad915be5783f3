//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::State,
    http::{HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, warn};

use super::auth::{TokenVerifier, VerifiedUser, auth_middleware};
use crate::provision::{Backend, ProvisionError, Provisioner};

/// Shared application state
pub struct AppState {
    /// The reconciliation core
    pub provisioner: Provisioner,
    /// Inbound token verifier
    pub verifier: Arc<TokenVerifier>,
}

/// Create the router
pub fn create_router(state: Arc<AppState>, allowed_origins: &[String]) -> Router {
    let verifier = Arc::clone(&state.verifier);

    Router::new()
        .route("/apikey", get(apikey_handler))
        .route("/routes", get(routes_handler))
        .route("/health", get(health_handler))
        // Authentication middleware (applied before other layers)
        .layer(middleware::from_fn_with_state(verifier, auth_middleware))
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

/// Build the CORS layer from the configured origins (`*` = any).
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_headers(Any);

    if allowed_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(origin = %o, error = %e, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// `GET /apikey` — provision or retrieve the caller's API key and the
/// key-auth routes it unlocks.
async fn apikey_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<VerifiedUser>,
) -> Response {
    debug!(user = %user.username, "Got request to retrieve API key");

    match state.provisioner.provision(&user.username).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(ProvisionError::Unavailable(which)) => backend_unavailable_response(which),
    }
}

/// `GET /routes` — list the key-auth gateway routes.
async fn routes_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<VerifiedUser>,
) -> Response {
    debug!(user = %user.username, "Got request to list key-auth routes");

    match state.provisioner.list_routes().await {
        Ok(routes) => (StatusCode::OK, Json(json!({"routes": routes}))).into_response(),
        Err(ProvisionError::Unavailable(which)) => backend_unavailable_response(which),
    }
}

/// `GET /health` — probe both backends. Public.
async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let down = state.provisioner.health().await;

    if down.is_empty() {
        (StatusCode::OK, Json(json!({"message": "OK"}))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"message": "Vault and/or APISIX instances are not healthy"})),
        )
            .into_response()
    }
}

/// Map a failed backend to the operator-facing 503 body.
fn backend_error_message(which: Backend) -> &'static str {
    match which {
        Backend::SecretStore => "Vault server error",
        Backend::Gateway => "APISIX server error",
    }
}

fn backend_unavailable_response(which: Backend) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"message": backend_error_message(which)})),
    )
        .into_response()
}
