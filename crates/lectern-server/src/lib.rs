#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod access;
pub mod admin;
mod error;
mod health;

use std::net::SocketAddr;

use axum::Router;
use lectern_cache::CacheService;
use lectern_config::Config;
use tower_http::trace::TraceLayer;

pub use access::{Caller, Role};
pub use admin::CLEAR_ALL_CONFIRMATION;
pub use error::AdminError;

/// Assembled server with all routes and middleware
pub struct Server {
    router: Router,
    listen_address: SocketAddr,
}

impl Server {
    /// Build the server from configuration, creating the configured store
    ///
    /// # Errors
    ///
    /// Returns an error if the cache backend cannot be configured
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let cache = lectern_cache::create_cache_service(&config.cache)?;
        Self::with_cache(config, cache)
    }

    /// Build the server around an existing cache service
    ///
    /// # Errors
    ///
    /// Returns an error if the admin endpoints are enabled without a secret
    pub fn with_cache(config: &Config, cache: CacheService) -> anyhow::Result<Self> {
        let listen_address = config
            .server
            .listen_address
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

        let mut app = Router::new();

        // Health check
        if config.server.health.enabled {
            app = app.route(&config.server.health.path, axum::routing::get(health::health_handler));
        }

        // Admin cache endpoints
        let admin_config = &config.server.admin;
        if admin_config.enabled {
            let gateway_secret = admin_config
                .gateway_secret
                .clone()
                .ok_or_else(|| anyhow::anyhow!("server.admin.gateway_secret is required"))?;

            let state = admin::AdminState {
                cache,
                gateway_secret,
                cleanup_days: config.cache.cleanup_days,
            };
            app = app.nest(&admin_config.path_prefix, admin::router(state));
        }

        app = app.layer(TraceLayer::new_for_http());

        Ok(Self {
            router: app,
            listen_address,
        })
    }

    /// Override the configured listen address
    #[must_use]
    pub const fn with_listen_address(mut self, listen_address: SocketAddr) -> Self {
        self.listen_address = listen_address;
        self
    }

    /// Get the configured listen address
    #[must_use]
    pub const fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    /// Consume the server and return the inner router
    ///
    /// Useful for testing when the caller manages the listener
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Start serving requests
    ///
    /// Blocks until the cancellation token is triggered.
    ///
    /// # Errors
    ///
    /// Returns an error if binding the TCP listener or serving fails
    pub async fn serve(self, shutdown: tokio_util::sync::CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen_address).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "server listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                tracing::info!("graceful shutdown initiated");
            })
            .await?;

        Ok(())
    }
}
