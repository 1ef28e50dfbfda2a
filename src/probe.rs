//! The Script Executor boundary and the Script Probe worker that uses it.
//!
//! [`spawn`] starts the only "active" piece of this crate: once called it
//! owns a `tokio::task` that ticks on the check's interval, runs a command
//! through an injected [`ScriptExecutor`], and reports the outcome to the
//! catalog agent via [`CatalogAgent::update_ttl`]. The returned
//! [`RunningProbe`] is the handle callers use to stop it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::catalog::{CatalogAgent, TtlStatus};
use crate::model::{truncate_utf8, CheckDescriptor, MAX_CHECK_OUTPUT};

/// Result of running a check's script once.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub exit_code: Option<i32>,
    pub output: Vec<u8>,
    pub timed_out: bool,
}

/// The capability the Script Probe needs from whatever runs commands on its
/// behalf. Modeled as an `async_trait` so the production
/// [`NativeExecutor`] and in-memory test doubles share one boundary.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// Runs `command args...`, bounded by `timeout` and `cancel`. Never
    /// returns `Err` for a nonzero exit code or a timeout — those are
    /// reported through [`ExecutionOutcome`]; `Err` is reserved for cases
    /// the command could not even be spawned.
    async fn run(
        &self,
        command: &str,
        args: &[String],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> std::io::Result<ExecutionOutcome>;
}

/// The production [`ScriptExecutor`], running commands as child processes
/// via `tokio::process::Command`.
#[derive(Debug, Default)]
pub struct NativeExecutor;

#[async_trait]
impl ScriptExecutor for NativeExecutor {
    async fn run(
        &self,
        command: &str,
        args: &[String],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> std::io::Result<ExecutionOutcome> {
        let child = tokio::process::Command::new(command)
            .args(args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        tokio::select! {
            result = child.wait_with_output() => {
                let output = result?;
                let mut combined = output.stdout;
                combined.extend_from_slice(&output.stderr);
                Ok(ExecutionOutcome {
                    exit_code: output.status.code(),
                    output: combined,
                    timed_out: false,
                })
            }
            _ = tokio::time::sleep(timeout) => {
                Ok(ExecutionOutcome { exit_code: None, output: Vec::new(), timed_out: true })
            }
            _ = cancel.cancelled() => {
                Ok(ExecutionOutcome { exit_code: None, output: Vec::new(), timed_out: false })
            }
        }
    }
}

/// A handle to a running Script Probe. Owned by the Desired-State Store's
/// running-probes map; dropping it does not stop the probe — call
/// [`RunningProbe::cancel_and_wait`] for that.
pub struct RunningProbe {
    cancel: CancellationToken,
    completion: oneshot::Receiver<()>,
    task: tokio::task::JoinHandle<()>,
}

impl RunningProbe {
    /// Cancels the probe's task and waits for its completion signal,
    /// bounded by `deadline`. Returns `true` if the probe confirmed it
    /// stopped within the deadline.
    pub async fn cancel_and_wait(mut self, deadline: Duration) -> bool {
        self.cancel.cancel();
        let waited = tokio::time::timeout(deadline, &mut self.completion).await;
        let _ = self.task.await;
        waited.is_ok()
    }

    /// Signals cancellation and returns immediately without waiting for the
    /// task to confirm it stopped. The task notices on its next cancellation
    /// check and exits on its own; dropping the join handle here lets it
    /// keep running detached in the background until then.
    pub fn cancel(self) {
        self.cancel.cancel();
    }
}

/// Starts a Script Probe for `check_id`, returning a [`RunningProbe`]
/// handle. The probe ticks on `check.interval`, executing `check.command`
/// with `check.args` via `executor`, each run bounded by `check.timeout`,
/// and reports the result to `catalog` via `update_ttl`.
///
/// Panics if `check.command` is `None`; callers are expected to have
/// already validated the check is a SCRIPT check before calling this.
pub fn spawn(
    check_id: String,
    check: CheckDescriptor,
    executor: Arc<dyn ScriptExecutor>,
    catalog: Arc<dyn CatalogAgent>,
) -> RunningProbe {
    let command = check.command.clone().expect("spawn called on a non-SCRIPT check");
    let cancel = CancellationToken::new();
    let (completion_tx, completion_rx) = oneshot::channel();
    let task_cancel = cancel.clone();

    let task = tokio::spawn(async move {
        run_loop(check_id, command, check.args, check.interval, check.timeout, executor, catalog, task_cancel)
            .await;
        let _ = completion_tx.send(());
    });

    RunningProbe { cancel, completion: completion_rx, task }
}

#[instrument(skip(executor, catalog, cancel), fields(check_id = %check_id))]
async fn run_loop(
    check_id: String,
    command: String,
    args: Vec<String>,
    interval: Duration,
    timeout: Duration,
    executor: Arc<dyn ScriptExecutor>,
    catalog: Arc<dyn CatalogAgent>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if cancel.is_cancelled() {
            return;
        }

        let outcome = match executor.run(&command, &args, timeout, &cancel).await {
            Ok(outcome) => outcome,
            Err(error) => {
                debug!(%error, "script probe execution failed to spawn");
                continue;
            }
        };

        if cancel.is_cancelled() {
            return;
        }

        let status = status_for(&outcome);
        let output = truncate_output(&outcome.output);
        if let Err(error) = catalog.update_ttl(&check_id, status, &output).await {
            debug!(%error, "TTL update failed, will retry next tick");
        }
    }
}

fn status_for(outcome: &ExecutionOutcome) -> TtlStatus {
    if outcome.timed_out {
        return TtlStatus::Critical;
    }
    match outcome.exit_code {
        Some(0) => TtlStatus::Passing,
        Some(1) => TtlStatus::Warning,
        _ => TtlStatus::Critical,
    }
}

fn truncate_output(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    truncate_utf8(&text, MAX_CHECK_OUTPUT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogError, CheckRegistration, RemoteCheck, RemoteService, ServiceRegistration};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct FakeCatalog {
        updates: Mutex<Vec<(String, TtlStatus, String)>>,
    }

    #[async_trait]
    impl CatalogAgent for FakeCatalog {
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
        async fn update_ttl(&self, check_id: &str, status: TtlStatus, output: &str) -> Result<(), CatalogError> {
            self.updates.lock().unwrap().push((check_id.to_string(), status, output.to_string()));
            Ok(())
        }
    }

    struct ScriptedExecutor {
        outcomes: Mutex<Vec<ExecutionOutcome>>,
        ran: mpsc::UnboundedSender<()>,
    }

    #[async_trait]
    impl ScriptExecutor for ScriptedExecutor {
        async fn run(
            &self,
            _command: &str,
            _args: &[String],
            _timeout: Duration,
            _cancel: &CancellationToken,
        ) -> std::io::Result<ExecutionOutcome> {
            let mut outcomes = self.outcomes.lock().unwrap();
            let outcome = if outcomes.len() > 1 { outcomes.remove(0) } else { outcomes[0].clone() };
            let _ = self.ran.send(());
            Ok(outcome)
        }
    }

    fn passing() -> ExecutionOutcome {
        ExecutionOutcome { exit_code: Some(0), output: b"ok".to_vec(), timed_out: false }
    }

    #[test]
    fn status_for_maps_exit_codes() {
        assert_eq!(status_for(&passing()), TtlStatus::Passing);
        assert_eq!(
            status_for(&ExecutionOutcome { exit_code: Some(1), output: vec![], timed_out: false }),
            TtlStatus::Warning
        );
        assert_eq!(
            status_for(&ExecutionOutcome { exit_code: Some(2), output: vec![], timed_out: false }),
            TtlStatus::Critical
        );
        assert_eq!(
            status_for(&ExecutionOutcome { exit_code: None, output: vec![], timed_out: true }),
            TtlStatus::Critical
        );
    }

    #[test]
    fn truncate_output_caps_length() {
        let long = vec![b'a'; MAX_CHECK_OUTPUT + 10];
        assert_eq!(truncate_output(&long).len(), MAX_CHECK_OUTPUT);
    }

    #[test]
    fn truncate_output_caps_length_with_multi_byte_and_invalid_bytes() {
        // Invalid bytes get lossily replaced with a 3-byte replacement
        // character; the final truncation must still land at or under the
        // byte cap rather than splitting one of those wider characters.
        let mut long = vec![0xFFu8; MAX_CHECK_OUTPUT];
        long.extend(vec![b'a'; 100]);
        let truncated = truncate_output(&long);
        assert!(truncated.len() <= MAX_CHECK_OUTPUT);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_reports_ttl_update_after_execution() {
        let catalog = Arc::new(FakeCatalog::default());
        let (ran_tx, mut ran_rx) = mpsc::unbounded_channel();
        let executor = Arc::new(ScriptedExecutor { outcomes: Mutex::new(vec![passing()]), ran: ran_tx });

        let check = CheckDescriptor {
            name: "script".to_string(),
            kind: crate::model::CheckKind::Script,
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(2),
            initial_status: "critical".to_string(),
            path: None,
            protocol: None,
            port_label: None,
            command: Some("true".to_string()),
            args: vec![],
        };

        let probe = spawn("check-1".to_string(), check, executor.clone(), catalog.clone());

        tokio::time::advance(Duration::from_secs(5)).await;
        ran_rx.recv().await.expect("probe should have executed once");

        let stopped = probe.cancel_and_wait(Duration::from_secs(1)).await;
        assert!(stopped);

        let updates = catalog.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "check-1");
        assert_eq!(updates[0].1, TtlStatus::Passing);
    }

    #[tokio::test]
    async fn cancel_and_wait_completes_promptly_with_no_ticks_elapsed() {
        let catalog = Arc::new(FakeCatalog::default());
        let (ran_tx, _ran_rx) = mpsc::unbounded_channel();
        let executor = Arc::new(ScriptedExecutor { outcomes: Mutex::new(vec![passing()]), ran: ran_tx });
        let check = CheckDescriptor {
            name: "script".to_string(),
            kind: crate::model::CheckKind::Script,
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(2),
            initial_status: "critical".to_string(),
            path: None,
            protocol: None,
            port_label: None,
            command: Some("true".to_string()),
            args: vec![],
        };
        let probe = spawn("check-1".to_string(), check, executor, catalog);
        let stopped = tokio::time::timeout(Duration::from_secs(1), probe.cancel_and_wait(Duration::from_secs(1)))
            .await
            .expect("cancel_and_wait should not itself hang");
        assert!(stopped);
    }
}
