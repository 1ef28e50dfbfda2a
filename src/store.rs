//! The Desired-State Store: the four maps mutated exclusively by the sync
//! loop, and the merge algorithm that folds an [`OperationBatch`] into them.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::batch::{OperationBatch, PendingProbe};
use crate::catalog::{CheckRegistration, ServiceRegistration};
use crate::probe::RunningProbe;

/// In-memory desired state: what the sync loop wants the catalog agent to
/// reflect, plus the probes that back SCRIPT checks.
#[derive(Default)]
pub struct Store {
    pub services: HashMap<String, ServiceRegistration>,
    pub checks: HashMap<String, CheckRegistration>,
    pub probes: HashMap<String, PendingProbe>,
    pub running_probes: HashMap<String, RunningProbe>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds `batch` into the store: registrations first (services,
    /// checks, probes), then deregistrations (services, then checks —
    /// cancelling any running probe a deregistered check owned).
    ///
    /// Cancellation is fire-and-forget here: the probe notices and exits on
    /// its own time, detached from the store. Merge is on the sync loop's
    /// hot path and must not block it waiting for a probe to confirm it
    /// stopped — that bounded wait belongs to shutdown instead.
    ///
    /// Total and non-failing: a malformed or redundant batch never leaves
    /// the store in a partial state.
    pub async fn merge(&mut self, batch: OperationBatch) {
        for (id, service) in batch.reg_services {
            self.services.insert(id, service);
        }
        for (id, check) in batch.reg_checks {
            self.checks.insert(id, check);
        }
        for probe in batch.new_probes {
            self.probes.insert(probe.check_id.clone(), probe);
        }
        for id in batch.dereg_services {
            self.services.remove(&id);
        }
        for id in batch.dereg_checks {
            if let Some(running) = self.running_probes.remove(&id) {
                running.cancel();
            }
            self.probes.remove(&id);
            self.checks.remove(&id);
        }
    }

    /// Cancels and waits for every running probe, bounded by `deadline`
    /// per probe. Used by shutdown; does not touch `self.checks` or
    /// `self.services` since the process is exiting anyway.
    pub async fn cancel_all_probes(&mut self, deadline: Duration) {
        for (check_id, running) in self.running_probes.drain() {
            if !running.cancel_and_wait(deadline).await {
                debug!(check_id = %check_id, "probe did not confirm cancellation before shutdown deadline");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ServiceRegistration;

    fn service(id: &str) -> ServiceRegistration {
        ServiceRegistration { id: id.to_string(), name: id.to_string(), tags: vec![], address: "10.0.0.1".to_string(), port: 80 }
    }

    #[tokio::test]
    async fn merge_registers_services() {
        let mut store = Store::new();
        let mut batch = OperationBatch::new();
        batch.register_service("svc".to_string(), service("svc"));
        store.merge(batch).await;
        assert!(store.services.contains_key("svc"));
    }

    #[tokio::test]
    async fn merge_deregisters_services() {
        let mut store = Store::new();
        store.services.insert("svc".to_string(), service("svc"));
        let mut batch = OperationBatch::new();
        batch.deregister_service("svc".to_string());
        store.merge(batch).await;
        assert!(!store.services.contains_key("svc"));
    }

    #[tokio::test]
    async fn merge_is_idempotent_for_identical_registrations() {
        let mut store = Store::new();
        let mut batch = OperationBatch::new();
        batch.register_service("svc".to_string(), service("svc"));
        store.merge(batch.clone()).await;
        store.merge(batch).await;
        assert_eq!(store.services.len(), 1);
    }

    #[tokio::test]
    async fn dereg_check_without_running_probe_is_a_noop_removal() {
        let mut store = Store::new();
        store.checks.insert("chk".to_string(), CheckRegistration::default());
        let mut batch = OperationBatch::new();
        batch.deregister_check("chk".to_string());
        store.merge(batch).await;
        assert!(!store.checks.contains_key("chk"));
    }

    mod merge_does_not_block_on_probe_cancellation {
        use super::*;
        use crate::catalog::{CatalogAgent, CatalogError, RemoteCheck, RemoteService, TtlStatus};
        use crate::model::CheckDescriptor;
        use crate::probe::{ExecutionOutcome, ScriptExecutor};
        use async_trait::async_trait;
        use std::sync::Arc;
        use tokio_util::sync::CancellationToken;

        #[derive(Default)]
        struct NoopCatalog;

        #[async_trait]
        impl CatalogAgent for NoopCatalog {
            async fn list_services(&self) -> Result<HashMap<String, RemoteService>, CatalogError> {
                Ok(HashMap::new())
            }
            async fn list_checks(&self) -> Result<HashMap<String, RemoteCheck>, CatalogError> {
                Ok(HashMap::new())
            }
            async fn register_service(&self, _: ServiceRegistration) -> Result<(), CatalogError> {
                Ok(())
            }
            async fn deregister_service(&self, _: &str) -> Result<(), CatalogError> {
                Ok(())
            }
            async fn register_check(&self, _: CheckRegistration) -> Result<(), CatalogError> {
                Ok(())
            }
            async fn deregister_check(&self, _: &str) -> Result<(), CatalogError> {
                Ok(())
            }
            async fn update_ttl(&self, _: &str, _: TtlStatus, _: &str) -> Result<(), CatalogError> {
                Ok(())
            }
        }

        struct NeverRespondingExecutor;

        #[async_trait]
        impl ScriptExecutor for NeverRespondingExecutor {
            async fn run(
                &self,
                _command: &str,
                _args: &[String],
                _timeout: Duration,
                cancel: &CancellationToken,
            ) -> std::io::Result<ExecutionOutcome> {
                // Ignores cancellation entirely, so a bounded wait for this
                // probe to confirm it stopped would hit its full timeout.
                std::future::pending::<()>().await;
                unreachable!("cancelled before pending resolves: {}", cancel.is_cancelled());
            }
        }

        #[tokio::test]
        async fn merge_returns_promptly_even_if_the_probe_ignores_cancellation() {
            let mut store = Store::new();
            store.checks.insert("chk".to_string(), CheckRegistration::default());
            let check = CheckDescriptor {
                name: "script".to_string(),
                kind: crate::model::CheckKind::Script,
                interval: Duration::from_secs(60),
                timeout: Duration::from_secs(60),
                initial_status: "critical".to_string(),
                path: None,
                protocol: None,
                port_label: None,
                command: Some("true".to_string()),
                args: vec![],
            };
            let running = crate::probe::spawn(
                "chk".to_string(),
                check,
                Arc::new(NeverRespondingExecutor),
                Arc::new(NoopCatalog::default()),
            );
            store.running_probes.insert("chk".to_string(), running);

            let mut batch = OperationBatch::new();
            batch.deregister_check("chk".to_string());

            tokio::time::timeout(Duration::from_millis(100), store.merge(batch))
                .await
                .expect("merge must not block waiting on a non-cooperating probe");

            assert!(!store.checks.contains_key("chk"));
        }
    }
}
