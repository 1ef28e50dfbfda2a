//! The Sync Loop: the single-threaded reconciler that owns the
//! Desired-State Store and is the sole issuer of writes to the external
//! catalog agent.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::batch::OperationBatch;
use crate::catalog::{CatalogAgent, CatalogError};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::id;
use crate::probe::{self, RunningProbe};
use crate::store::Store;

/// A handle held by producers: the submission side of the sync loop's
/// bounded channel, plus the shutdown signal.
#[derive(Clone)]
pub struct SyncHandle {
    sender: mpsc::Sender<OperationBatch>,
    shutdown: CancellationToken,
}

impl SyncHandle {
    /// Submits `batch` to the sync loop, blocking if the channel is full.
    /// Returns [`Error::ShuttingDown`] without enqueueing anything if
    /// shutdown has already been signalled, or if it is signalled while
    /// this call is blocked on a full channel.
    pub async fn submit(&self, batch: OperationBatch) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(Error::ShuttingDown),
            result = self.sender.send(batch) => result.map_err(|_| Error::ShuttingDown),
        }
    }

    /// Signals shutdown. Idempotent: a second call is a no-op.
    pub fn signal_shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Spawns the sync loop as a dedicated task. Returns a [`SyncHandle`] for
/// producers and a [`JoinHandle`] that resolves, once shutdown has been
/// signalled and the loop has exited, to whatever Script Probes were still
/// running — ownership of their handles passes to the caller (normally
/// [`crate::producer::SyncCore::shutdown`]) so it can cancel and wait for
/// each one under its own deadline.
pub fn spawn(
    catalog: Arc<dyn CatalogAgent>,
    config: Arc<Config>,
) -> (SyncHandle, JoinHandle<HashMap<String, RunningProbe>>) {
    let (sender, receiver) = mpsc::channel(config.submission_capacity);
    let shutdown = CancellationToken::new();
    let join = tokio::spawn(run_loop(receiver, catalog, config, shutdown.clone()));
    (SyncHandle { sender, shutdown }, join)
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(instant) => tokio::time::sleep_until(instant).await,
        None => std::future::pending::<()>().await,
    }
}

#[instrument(name = "sync_loop", skip_all)]
async fn run_loop(
    mut receiver: mpsc::Receiver<OperationBatch>,
    catalog: Arc<dyn CatalogAgent>,
    config: Arc<Config>,
    shutdown: CancellationToken,
) -> HashMap<String, RunningProbe> {
    let mut store = Store::new();
    let mut retry_deadline: Option<Instant> = None;
    let mut failing = false;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            maybe_batch = receiver.recv() => {
                match maybe_batch {
                    Some(batch) => store.merge(batch).await,
                    None => break,
                }
            }
            _ = sleep_until_opt(retry_deadline) => {}
        }

        if shutdown.is_cancelled() {
            break;
        }

        match reconcile(&catalog, &mut store).await {
            Ok(()) => {
                if failing {
                    tracing::info!("reconcile recovered after a failure streak");
                    failing = false;
                }
                retry_deadline = None;
            }
            Err(error) => {
                if !failing {
                    warn!(%error, "reconcile failed, will retry");
                    failing = true;
                }
                retry_deadline = Some(Instant::now() + config.retry_interval);
            }
        }
    }

    store.running_probes
}

/// One reconcile cycle: fetch external state, diff against the desired
/// store, and issue the writes needed to converge. Aborts (and returns the
/// offending error) on the first failed catalog call; later steps are
/// skipped — the whole cycle is retried as a unit rather than resumed
/// partway through.
#[instrument(name = "reconcile", skip_all)]
async fn reconcile(
    catalog: &Arc<dyn CatalogAgent>,
    store: &mut Store,
) -> std::result::Result<(), CatalogError> {
    let remote_services = catalog.list_services().await?;
    let remote_checks = catalog.list_checks().await?;

    for id in remote_services.keys() {
        if id::is_core_owned(id) && !store.services.contains_key(id) {
            catalog.deregister_service(id).await?;
        }
    }

    for (id, service) in store.services.iter() {
        if !remote_services.contains_key(id) {
            catalog.register_service(service.clone()).await?;
        }
    }

    for (id, remote_check) in remote_checks.iter() {
        if id::is_core_owned(&remote_check.service_id) && !store.checks.contains_key(id) {
            catalog.deregister_check(id).await?;
        }
    }

    for (id, check) in store.checks.iter() {
        if !remote_checks.contains_key(id) {
            catalog.register_check(check.clone()).await?;
            if !store.running_probes.contains_key(id) {
                if let Some(pending) = store.probes.get(id).cloned() {
                    let running = probe::spawn(id.clone(), pending.check, pending.executor, catalog.clone());
                    store.running_probes.insert(id.clone(), running);
                    store.probes.remove(id);
                }
            }
        }
    }

    Ok(())
}
