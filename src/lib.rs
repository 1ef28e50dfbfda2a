//! # service-sync-core
//!
//! Reconciles a node's desired service registrations and health checks
//! against a local service-catalog agent (e.g. Consul), the way a Nomad
//! client keeps the agent's view of a node in sync with the allocations
//! scheduled on it.
//!
//! ## Overview
//!
//! Callers never touch the agent directly. They describe what they want
//! registered through the [`producer::SyncCore`] API — [`producer::SyncCore::register_agent`]
//! for the host agent's own services, [`producer::SyncCore::register_task`]/
//! [`producer::SyncCore::update_task`]/[`producer::SyncCore::remove_task`]
//! for workload services — and a background sync loop owns the only path
//! that actually writes to the catalog agent, retrying as a unit on
//! failure and converging idempotently once the agent catches up.
//!
//! SCRIPT checks are handled specially: the catalog agent only understands
//! HTTP, TCP, and TTL checks, so a SCRIPT check is registered as a TTL
//! check and kept alive by a task started with [`probe::spawn`] that runs
//! the command on its interval and reports the outcome back.
//!
//! ## Usage
//!
//! ```no_run
//! # async fn example() -> service_sync_core::Result<()> {
//! use service_sync_core::{Config, SyncCore};
//!
//! let core = SyncCore::new(Config::from_env())?;
//! // core.register_agent(...).await?;
//! core.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! [1]: https://www.consul.io/docs

mod batch;
mod check;
pub mod catalog;
mod config;
mod error;
mod id;
mod model;
pub mod probe;
pub mod producer;
mod store;
mod sync;

pub use catalog::{CatalogAgent, CatalogError, HttpCatalogAgent};
pub use config::Config;
pub use error::{Error, Result, ShutdownErrors};
pub use model::{CheckDescriptor, CheckKind, ServiceDescriptor, TaskServices};
pub use probe::{NativeExecutor, ScriptExecutor};
pub use producer::{PortResolver, SyncCore};
