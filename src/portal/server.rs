//! Portal server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

use super::auth::TokenVerifier;
use super::router::{AppState, create_router};
use crate::admin::ApisixClient;
use crate::config::Config;
use crate::keygen::KeyDeriver;
use crate::provision::Provisioner;
use crate::secrets::VaultClient;
use crate::{Error, Result};

/// Portal HTTP server
pub struct Portal {
    /// Configuration
    config: Config,
}

impl Portal {
    /// Create a new portal from configuration
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the portal until a shutdown signal arrives
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let secrets = Arc::new(VaultClient::new(&self.config.vault)?);
        let gateway = Arc::new(ApisixClient::new(&self.config.apisix)?);
        let keys = KeyDeriver::new(self.config.vault.resolve_secret_phrase());

        let state = Arc::new(AppState {
            provisioner: Provisioner::new(secrets, gateway, keys),
            verifier: Arc::new(TokenVerifier::new(self.config.auth.clone())),
        });

        let app = create_router(state, &self.config.server.allowed_origins);

        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("APIKEY PORTAL v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(vault = %self.config.vault.url, "Secret store");
        info!(
            consumers = %self.config.apisix.consumers_url,
            gateway = %self.config.apisix.gateway_url,
            "Gateway admin plane"
        );
        info!(
            jwks = %self.config.auth.jwks_url,
            role = %self.config.auth.required_role,
            "Inbound auth"
        );
        info!("============================================================");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
