use std::net::SocketAddr;

use secrecy::SecretString;
use serde::Deserialize;

use crate::health::HealthConfig;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub listen_address: Option<SocketAddr>,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

/// Administrative cache endpoints
///
/// Callers are authenticated upstream; the gateway forwards the caller's
/// role in `x-user-role` alongside the shared `x-gateway-secret`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    /// Secret the upstream gateway presents on every admin request
    #[serde(default)]
    pub gateway_secret: Option<SecretString>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path_prefix: default_path_prefix(),
            gateway_secret: None,
        }
    }
}

fn default_path_prefix() -> String {
    "/admin/cache".to_owned()
}
