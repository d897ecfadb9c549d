//! Test server wrapper that starts Lectern on a random port

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use jiff::Timestamp;
use lectern_cache::{CacheService, ManualClock, MemoryStore};
use lectern_config::Config;
use lectern_server::Server;
use tokio_util::sync::CancellationToken;

pub const GATEWAY_SECRET: &str = "integration-secret";

/// Configuration with admin endpoints enabled and an in-memory store
pub fn admin_config() -> Config {
    let raw = format!(
        "[server.admin]\nenabled = true\ngateway_secret = \"{GATEWAY_SECRET}\"\n\n[cache]\ncleanup_days = 15\n"
    );
    Config::parse(&raw).expect("test config must be valid")
}

/// A running test server instance
pub struct TestServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    client: reqwest::Client,
    /// Cache shared with the server, for seeding and assertions
    pub cache: CacheService,
    pub store: MemoryStore,
    /// Clock driving the shared cache, starting at the current time
    pub clock: Arc<ManualClock>,
}

impl TestServer {
    /// Start a test server with the given configuration
    ///
    /// Binds to port 0 for automatic port assignment
    pub async fn start(config: Config) -> anyhow::Result<Self> {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(Timestamp::now()));
        let cache = CacheService::new(Arc::new(store.clone())).with_clock(clock.clone());
        let server = Server::with_cache(&config, cache.clone())?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        tokio::spawn(async move {
            axum::serve(listener, server.into_router())
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self {
            addr,
            shutdown,
            client: reqwest::Client::new(),
            cache,
            store,
            clock,
        })
    }

    /// Base URL of the running test server
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Request builder carrying gateway credentials for `role`
    pub fn admin_request(&self, method: reqwest::Method, path: &str, role: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(&format!("/admin/cache{path}")))
            .header("x-gateway-secret", GATEWAY_SECRET)
            .header("x-user-role", role)
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
