//! The Operation Batch: the unit of desired-state mutation producers submit
//! to the sync loop.

use std::sync::Arc;

use crate::catalog::{CheckRegistration, ServiceRegistration};
use crate::model::CheckDescriptor;
use crate::probe::ScriptExecutor;

/// A pending Script Probe, not yet started. Carried in a batch until the
/// sync loop observes its check id registered with the catalog agent, at
/// which point it is spawned and moved into the running-probes map.
///
/// Carries its own executor rather than relying on one shared by the sync
/// loop: each task supplies the driver-side executor it was registered
/// with, so two tasks' SCRIPT checks may run through different executors.
#[derive(Clone)]
pub struct PendingProbe {
    pub check_id: String,
    pub check: CheckDescriptor,
    pub executor: Arc<dyn ScriptExecutor>,
}

impl std::fmt::Debug for PendingProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingProbe").field("check_id", &self.check_id).field("check", &self.check).finish()
    }
}

/// A bundle of desired-state mutations, submitted atomically. The sync
/// loop never observes a partially-merged batch.
#[derive(Debug, Clone, Default)]
pub struct OperationBatch {
    pub reg_services: Vec<(String, ServiceRegistration)>,
    pub reg_checks: Vec<(String, CheckRegistration)>,
    pub new_probes: Vec<PendingProbe>,
    pub dereg_services: Vec<String>,
    pub dereg_checks: Vec<String>,
}

impl OperationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if this batch carries no mutations at all. Producers use this
    /// to skip submission entirely for no-op calls, e.g. an empty service
    /// list.
    pub fn is_empty(&self) -> bool {
        self.reg_services.is_empty()
            && self.reg_checks.is_empty()
            && self.new_probes.is_empty()
            && self.dereg_services.is_empty()
            && self.dereg_checks.is_empty()
    }

    pub fn register_service(&mut self, id: String, registration: ServiceRegistration) {
        self.reg_services.push((id, registration));
    }

    pub fn register_check(&mut self, id: String, registration: CheckRegistration) {
        self.reg_checks.push((id, registration));
    }

    pub fn start_probe(&mut self, check_id: String, check: CheckDescriptor, executor: Arc<dyn ScriptExecutor>) {
        self.new_probes.push(PendingProbe { check_id, check, executor });
    }

    pub fn deregister_service(&mut self, id: String) {
        self.dereg_services.push(id);
    }

    pub fn deregister_check(&mut self, id: String) {
        self.dereg_checks.push(id);
    }

    /// Appends every mutation in `other` to `self`, preserving order.
    pub fn extend(&mut self, other: OperationBatch) {
        self.reg_services.extend(other.reg_services);
        self.reg_checks.extend(other.reg_checks);
        self.new_probes.extend(other.new_probes);
        self.dereg_services.extend(other.dereg_services);
        self.dereg_checks.extend(other.dereg_checks);
    }
}
