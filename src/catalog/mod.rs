//! The boundary between the reconciler and the external service-catalog
//! agent.
//!
//! [`CatalogAgent`] is the only thing the sync loop depends on; the HTTP
//! implementation in [`http`] is one concrete collaborator among possibly
//! several (a test double is used throughout this crate's own test suite).

pub mod http;

use async_trait::async_trait;
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;

pub use http::HttpCatalogAgent;

/// Errors raised by a [`CatalogAgent`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The request never reached the agent, or its response never came back
    /// (connection refused, DNS failure, timeout, ...).
    #[error("transport error talking to catalog agent: {0}")]
    Transport(#[from] reqwest::Error),
    /// The agent replied, but its body didn't match the expected shape.
    #[error("could not decode catalog agent response: {0}")]
    Decode(String),
    /// The agent replied with a non-2xx status.
    #[error("catalog agent returned {code}: {body}")]
    Status { code: u16, body: String },
}

/// A service as currently registered with the external agent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteService {
    #[serde(rename = "ID")]
    pub id: String,
    pub service: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub address: String,
    pub port: u16,
}

/// A check as currently registered with the external agent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteCheck {
    #[serde(rename = "CheckID")]
    pub check_id: String,
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    pub status: String,
}

/// What to register for a service, as the catalog agent's wire format
/// expects it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Tags")]
    pub tags: Vec<String>,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Port")]
    pub port: u16,
}

/// What to register for a check, as the catalog agent's wire format
/// expects it. Exactly one of `http`, `tcp`, `ttl` is set, per which
/// [`crate::model::CheckKind`] [`crate::check::build`] was given.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Interval", skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(rename = "Timeout", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(rename = "HTTP", skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,
    #[serde(rename = "TCP", skip_serializing_if = "Option::is_none")]
    pub tcp: Option<String>,
    #[serde(rename = "TTL", skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

/// Status reported by an [`CatalogAgent::update_ttl`] call, after a script
/// probe execution completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStatus {
    Passing,
    Warning,
    Critical,
}

impl TtlStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            TtlStatus::Passing => "passing",
            TtlStatus::Warning => "warning",
            TtlStatus::Critical => "critical",
        }
    }
}

/// The capability set the sync loop needs from the external service
/// catalog: list/register/deregister services and checks, and refresh a
/// TTL check. Modeled as an `async_trait` so both the production HTTP
/// client and in-memory test doubles can implement it uniformly.
#[async_trait]
pub trait CatalogAgent: Send + Sync {
    /// Services currently registered with the agent, keyed by id.
    async fn list_services(&self) -> Result<HashMap<String, RemoteService>, CatalogError>;
    /// Checks currently registered with the agent, keyed by id.
    async fn list_checks(&self) -> Result<HashMap<String, RemoteCheck>, CatalogError>;
    /// Registers or overwrites a service.
    async fn register_service(&self, registration: ServiceRegistration) -> Result<(), CatalogError>;
    /// Deregisters a service by id. Deregistering a nonexistent id is not
    /// an error, matching the real agent's idempotent semantics.
    async fn deregister_service(&self, id: &str) -> Result<(), CatalogError>;
    /// Registers or overwrites a check.
    async fn register_check(&self, registration: CheckRegistration) -> Result<(), CatalogError>;
    /// Deregisters a check by id.
    async fn deregister_check(&self, id: &str) -> Result<(), CatalogError>;
    /// Refreshes a TTL check's deadline and reports the outcome of the
    /// most recent script probe execution.
    async fn update_ttl(&self, check_id: &str, status: TtlStatus, output: &str) -> Result<(), CatalogError>;
}
