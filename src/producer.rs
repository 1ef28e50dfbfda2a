//! The Producer API: [`SyncCore`] and the externally callable operations
//! that translate caller intent into [`OperationBatch`]es.
//!
//! Every mutation of the Desired-State Store is deferred to the sync loop;
//! these calls only ever build a batch, submit it, and (for
//! [`SyncCore::register_agent`]) update the Agent Registry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::batch::OperationBatch;
use crate::catalog::{CatalogAgent, CatalogError, ServiceRegistration};
use crate::check;
use crate::config::Config;
use crate::error::{Error, Result, ShutdownErrors};
use crate::id;
use crate::model::{CheckDescriptor, CheckKind, ServiceDescriptor};
use crate::probe::{RunningProbe, ScriptExecutor};
use crate::sync::{self, SyncHandle};

/// A callback resolving a port label — bare or an explicit `host:port`
/// override — to a concrete address. Plain `Fn`, not a trait object tied to
/// a particular workload model: each task supplies its own closure over
/// whatever port map its driver already has in hand.
pub type PortResolver<'a> = dyn Fn(&str) -> Result<(String, u16)> + 'a;

/// The set of ids registered on behalf of the host agent itself, tracked
/// separately from the Desired-State Store so [`SyncCore::shutdown`] can
/// explicitly clean them up — agent registrations have no producer around
/// to remove them the way a task's allocation lifecycle does.
#[derive(Default)]
struct AgentRegistry {
    services: HashSet<String>,
    checks: HashSet<String>,
}

/// The Service Sync Core: owns the sync loop and exposes the producer
/// operations described in the module overview. Cheap to clone — intended
/// to be shared (typically behind an `Arc`) across every task and the
/// agent-registration call site.
pub struct SyncCore {
    config: Arc<Config>,
    catalog: Arc<dyn CatalogAgent>,
    handle: SyncHandle,
    join: Mutex<Option<JoinHandle<HashMap<String, RunningProbe>>>>,
    agent_registry: Mutex<AgentRegistry>,
}

impl SyncCore {
    /// Builds a `SyncCore` talking to the real catalog agent over HTTP, per
    /// `config.catalog_address`.
    pub fn new(config: Config) -> Result<Self> {
        let catalog = Arc::new(crate::catalog::http::HttpCatalogAgent::new(&config)?);
        Ok(Self::with_catalog(config, catalog))
    }

    /// Builds a `SyncCore` against an arbitrary [`CatalogAgent`]; the seam
    /// tests use to inject an in-memory fake.
    pub fn with_catalog(config: Config, catalog: Arc<dyn CatalogAgent>) -> Self {
        let config = Arc::new(config);
        let (handle, join) = sync::spawn(catalog.clone(), config.clone());
        Self {
            config,
            catalog,
            handle,
            join: Mutex::new(Some(join)),
            agent_registry: Mutex::new(AgentRegistry::default()),
        }
    }

    /// Registers services on behalf of the host agent itself, under `role`
    /// (e.g. `"server"`, `"client"`). Rejects any SCRIPT check — agent
    /// registrations have no driver to run scripts through. Port labels
    /// must be explicit `host:port` pairs; there is no resolver callback at
    /// this call site the way there is for task services.
    #[instrument(skip(self, services))]
    pub async fn register_agent(&self, role: &str, services: &[ServiceDescriptor]) -> Result<()> {
        let mut batch = OperationBatch::new();
        let mut new_service_ids = Vec::new();
        let mut new_check_ids = Vec::new();

        for service in services {
            if service.checks.iter().any(|c| c.kind == CheckKind::Script) {
                return Err(Error::AgentScriptCheckUnsupported);
            }

            let service_id = id::agent_service_id(role, &service.name, &service.tags);
            let (host, port) = parse_host_port(&service.port_label)?;

            batch.register_service(
                service_id.clone(),
                ServiceRegistration {
                    id: service_id.clone(),
                    name: service.name.clone(),
                    tags: service.tags.clone(),
                    address: host.clone(),
                    port,
                },
            );
            new_service_ids.push(service_id.clone());

            for check in &service.checks {
                let (check_host, check_port) = match &check.port_label {
                    Some(label) => parse_host_port(label)?,
                    None => (host.clone(), port),
                };
                let (check_id, registration) =
                    check::build_with_id(&self.config, &service_id, check, &check_host, check_port)?;
                batch.register_check(check_id.clone(), registration);
                new_check_ids.push(check_id);
            }
        }

        if batch.is_empty() {
            return Ok(());
        }

        self.handle.submit(batch).await?;

        let mut registry = self.agent_registry.lock().await;
        registry.services.extend(new_service_ids);
        registry.checks.extend(new_check_ids);
        Ok(())
    }

    /// Registers every service in `services` on behalf of task `task_name`
    /// under allocation `alloc_id`. `resolve` maps a port label (bare or
    /// `host:port`) to a concrete `(host, port)`; `executor` is required if
    /// any service carries a SCRIPT check.
    #[instrument(skip(self, services, executor, resolve))]
    pub async fn register_task<F>(
        &self,
        alloc_id: &str,
        task_name: &str,
        services: &[ServiceDescriptor],
        executor: Option<Arc<dyn ScriptExecutor>>,
        resolve: F,
    ) -> Result<()>
    where
        F: Fn(&str) -> Result<(String, u16)>,
    {
        let mut batch = OperationBatch::new();
        for service in services {
            self.add_task_service(&mut batch, alloc_id, task_name, service, executor.as_ref(), &resolve)?;
        }
        if batch.is_empty() {
            return Ok(());
        }
        self.handle.submit(batch).await
    }

    /// Reconciles a task's desired services from `existing` to `new`:
    /// services present only in `existing` are deregistered along with
    /// their checks; services in both have their checks diffed by id
    /// (unchanged checks are left alone, matching the idempotence law);
    /// services present only in `new` are registered as in
    /// [`SyncCore::register_task`].
    #[instrument(skip(self, existing, new, executor, resolve))]
    pub async fn update_task<F>(
        &self,
        alloc_id: &str,
        task_name: &str,
        existing: &[ServiceDescriptor],
        new: &[ServiceDescriptor],
        executor: Option<Arc<dyn ScriptExecutor>>,
        resolve: F,
    ) -> Result<()>
    where
        F: Fn(&str) -> Result<(String, u16)>,
    {
        let existing_index = index_services(alloc_id, task_name, existing);
        let new_by_id: HashMap<String, &ServiceDescriptor> = new
            .iter()
            .map(|service| (id::task_service_id(alloc_id, task_name, &service.name, &service.tags), service))
            .collect();
        let new_index = index_services(alloc_id, task_name, new);

        let mut batch = OperationBatch::new();

        // existing \ new: deregister the whole service plus all its checks.
        for (service_id, checks) in &existing_index {
            if !new_index.contains_key(service_id) {
                batch.deregister_service(service_id.clone());
                for check_id in checks.keys() {
                    batch.deregister_check(check_id.clone());
                }
            }
        }

        // existing ∩ new: diff checks by id, leaving unchanged ids alone.
        for (service_id, existing_checks) in &existing_index {
            let Some(new_checks) = new_index.get(service_id) else { continue };

            for (check_id, check) in new_checks {
                if existing_checks.contains_key(check_id) {
                    continue;
                }
                if check.kind == CheckKind::Script && executor.is_none() {
                    return Err(Error::ScriptExecutorRequired);
                }
                let service = new_by_id[service_id];
                let (host, port) = resolve(&service.port_label)?;
                let (check_host, check_port) = match &check.port_label {
                    Some(label) => resolve(label)?,
                    None => (host, port),
                };
                let (built_id, registration) =
                    check::build(&self.config, service_id, check_id, check, &check_host, check_port)
                        .map(|reg| (check_id.clone(), reg))?;
                batch.register_check(built_id.clone(), registration);
                if check.kind == CheckKind::Script {
                    batch.start_probe(built_id, check.clone(), executor.clone().expect("checked above"));
                }
            }

            for check_id in existing_checks.keys() {
                if !new_checks.contains_key(check_id) {
                    batch.deregister_check(check_id.clone());
                }
            }
        }

        // new \ existing: register as in register_task.
        for (service_id, service) in &new_by_id {
            if !existing_index.contains_key(service_id) {
                self.add_task_service(&mut batch, alloc_id, task_name, service, executor.as_ref(), &resolve)?;
            }
        }

        if batch.is_empty() {
            return Ok(());
        }
        self.handle.submit(batch).await
    }

    /// Deregisters every service and check belonging to `services` under
    /// `(alloc_id, task_name)`.
    #[instrument(skip(self, services))]
    pub async fn remove_task(&self, alloc_id: &str, task_name: &str, services: &[ServiceDescriptor]) -> Result<()> {
        let mut batch = OperationBatch::new();
        for service in services {
            let service_id = id::task_service_id(alloc_id, task_name, &service.name, &service.tags);
            batch.deregister_service(service_id.clone());
            for check in &service.checks {
                batch.deregister_check(id::check_id(&service_id, check));
            }
        }
        if batch.is_empty() {
            return Ok(());
        }
        self.handle.submit(batch).await
    }

    /// Cooperative, bounded shutdown: deregisters the Agent Registry's
    /// entries, waits for the sync loop to exit, then cancels any still
    /// running Script Probes. A second call after the first has completed
    /// is a no-op returning `Ok(())`.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        if self.handle.is_shutting_down() {
            return Ok(());
        }
        self.handle.signal_shutdown();

        let mut errors = ShutdownErrors::default();

        {
            let mut registry = self.agent_registry.lock().await;
            for service_id in registry.services.drain() {
                if let Err(error) = self.catalog.deregister_service(&service_id).await {
                    errors.deregister_errors.push(error);
                }
            }
            for check_id in registry.checks.drain() {
                if let Err(error) = self.catalog.deregister_check(&check_id).await {
                    errors.deregister_errors.push(error);
                }
            }
        }

        let join_handle = self.join.lock().await.take();
        let remaining_probes = match join_handle {
            Some(join_handle) => match tokio::time::timeout(self.config.shutdown_wait, join_handle).await {
                Ok(Ok(probes)) => probes,
                Ok(Err(join_error)) => {
                    tracing::warn!(%join_error, "sync loop task panicked during shutdown");
                    HashMap::new()
                }
                Err(_elapsed) => {
                    errors.timed_out = true;
                    HashMap::new()
                }
            },
            None => HashMap::new(),
        };

        for (_check_id, running) in remaining_probes {
            if !running.cancel_and_wait(self.config.shutdown_wait).await {
                errors.timed_out = true;
            }
        }

        errors.into_result()
    }

    fn add_task_service<F>(
        &self,
        batch: &mut OperationBatch,
        alloc_id: &str,
        task_name: &str,
        service: &ServiceDescriptor,
        executor: Option<&Arc<dyn ScriptExecutor>>,
        resolve: &F,
    ) -> Result<String>
    where
        F: Fn(&str) -> Result<(String, u16)>,
    {
        if service.checks.iter().any(|c| c.kind == CheckKind::Script) && executor.is_none() {
            return Err(Error::ScriptExecutorRequired);
        }

        let service_id = id::task_service_id(alloc_id, task_name, &service.name, &service.tags);
        let (host, port) = resolve(&service.port_label)?;

        batch.register_service(
            service_id.clone(),
            ServiceRegistration {
                id: service_id.clone(),
                name: service.name.clone(),
                tags: service.tags.clone(),
                address: host.clone(),
                port,
            },
        );

        for check in &service.checks {
            let (check_host, check_port) = match &check.port_label {
                Some(label) => resolve(label)?,
                None => (host.clone(), port),
            };
            let (check_id, registration) =
                check::build_with_id(&self.config, &service_id, check, &check_host, check_port)?;
            batch.register_check(check_id.clone(), registration);
            if check.kind == CheckKind::Script {
                let executor = executor.expect("validated above").clone();
                batch.start_probe(check_id, check.clone(), executor);
            }
        }

        Ok(service_id)
    }
}

/// Maps each service in `services` to its derived id and the id→descriptor
/// map of its checks, without resolving any address. Used to diff the id
/// sets in [`SyncCore::update_task`] — check ids never depend on a
/// resolved host/port, so this needs no resolver callback.
fn index_services(
    alloc_id: &str,
    task_name: &str,
    services: &[ServiceDescriptor],
) -> HashMap<String, HashMap<String, CheckDescriptor>> {
    services
        .iter()
        .map(|service| {
            let service_id = id::task_service_id(alloc_id, task_name, &service.name, &service.tags);
            let checks = service
                .checks
                .iter()
                .map(|check| (id::check_id(&service_id, check), check.clone()))
                .collect();
            (service_id, checks)
        })
        .collect()
}

/// Parses an explicit `host:port` port label, as used directly by
/// [`SyncCore::register_agent`] (task services instead go through a
/// resolver callback).
fn parse_host_port(label: &str) -> Result<(String, u16)> {
    let (host, port) = label
        .rsplit_once(':')
        .ok_or_else(|| Error::InvalidPortLabel(label.to_string(), "expected host:port".to_string()))?;
    if host.is_empty() {
        return Err(Error::InvalidPortLabel(label.to_string(), "host is empty".to_string()));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| Error::InvalidPortLabel(label.to_string(), "port is not a valid number".to_string()))?;
    Ok((host.to_string(), port))
}
