//! Tunable configuration for the sync core, mirroring the way the Consul
//! HTTP client this crate grew out of loaded its own settings.

use std::env;
use std::time::Duration;

/// Configuration for [`crate::producer::SyncCore`] and the [`crate::catalog::http::HttpCatalogAgent`]
/// it is typically constructed with.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base address of the local service-catalog agent, e.g. `http://127.0.0.1:8500`.
    pub catalog_address: String,
    /// Optional ACL token sent as `X-Consul-Token` on every request.
    pub catalog_token: Option<String>,
    /// How long to wait before retrying a failed reconcile cycle.
    pub retry_interval: Duration,
    /// Added to a SCRIPT check's interval to derive its TTL.
    pub ttl_buffer: Duration,
    /// Upper bound on how long [`crate::producer::SyncCore::shutdown`] waits
    /// for the sync loop and running probes to exit.
    pub shutdown_wait: Duration,
    /// Timeout applied to individual catalog read/write calls during reconcile.
    pub query_wait: Duration,
    /// Capacity of the bounded submission channel between producers and the
    /// sync loop.
    pub submission_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_address: "http://127.0.0.1:8500".to_string(),
            catalog_token: None,
            retry_interval: Duration::from_secs(6),
            ttl_buffer: Duration::from_secs(31),
            shutdown_wait: Duration::from_secs(60),
            query_wait: Duration::from_secs(2),
            submission_capacity: 8,
        }
    }
}

impl Config {
    /// Manually create a new `Config`, leaving the tunables at their defaults.
    pub fn new(catalog_address: String, catalog_token: Option<String>) -> Self {
        Self {
            catalog_address,
            catalog_token,
            ..Self::default()
        }
    }

    /// Create a new `Config` from environment variables, following the same
    /// `CONSUL_HTTP_ADDR` / `CONSUL_HTTP_TOKEN` convention as the Consul CLI
    /// and API clients. `NOMAD_CONSUL_HTTP_ADDR` takes precedence when set,
    /// mirroring how an embedding agent overrides the ambient environment.
    pub fn from_env() -> Self {
        let catalog_address = env::var("NOMAD_CONSUL_HTTP_ADDR")
            .or_else(|_| env::var("CONSUL_HTTP_ADDR"))
            .unwrap_or_else(|_| Self::default().catalog_address);
        let catalog_token = env::var("CONSUL_HTTP_TOKEN").ok();
        Self::new(catalog_address, catalog_token)
    }
}

/// The fixed prefix every id this crate manages begins with. An id is
/// "core-owned" iff it starts with this string — see [`crate::id::is_core_owned`].
pub const NOMAD_PREFIX: &str = "_nomad";
