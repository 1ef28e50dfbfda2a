//! Crate-wide error type.

use crate::catalog::CatalogError;

/// Type alias for `Result` with the error type [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// An enumeration of errors that can occur while reconciling desired state
/// against the external service-catalog agent.
///
/// Producer-facing calls ([`crate::producer::SyncCore::register_agent`] and
/// friends) only ever return the `Validation`-shaped variants below; the rest
/// surface through logs or the return value of
/// [`crate::producer::SyncCore::shutdown`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A port label could not be parsed as either a bare label or an
    /// explicit `host:port` pair.
    #[error("invalid port label {0:?}: {1}")]
    InvalidPortLabel(String, String),

    /// An HTTP check's path could not be resolved against its base URL.
    #[error("invalid check URL: {0}")]
    InvalidCheckUrl(#[from] url::ParseError),

    /// A service registered through [`crate::producer::SyncCore::register_agent`]
    /// carried a script check, which agent registrations do not support.
    #[error("agent checks do not support scripts")]
    AgentScriptCheckUnsupported,

    /// A task registered a script check but no [`crate::probe::ScriptExecutor`]
    /// was supplied.
    #[error("driver doesn't support script checks")]
    ScriptExecutorRequired,

    /// The submission channel is gone because the sync loop has already
    /// shut down.
    #[error("sync core is shutting down, batch was not committed")]
    ShuttingDown,

    /// An error from the external catalog agent, surfaced only through
    /// logs during reconcile; kept as a variant so `CatalogError` can
    /// convert into `Error` at call sites that do propagate it (e.g. the
    /// initial probe registration check in reconcile).
    #[error("catalog agent error: {0}")]
    Catalog(#[from] CatalogError),

    /// The aggregate error returned by [`crate::producer::SyncCore::shutdown`].
    /// Carries every deregistration failure encountered while draining the
    /// Agent Registry, plus an optional timeout marker.
    #[error("shutdown encountered {0} error(s)")]
    Shutdown(ShutdownErrors),
}

/// Accumulated errors from a [`crate::producer::SyncCore::shutdown`] call.
#[derive(Debug, Default)]
pub struct ShutdownErrors {
    /// Errors raised while deregistering agent-owned services/checks.
    pub deregister_errors: Vec<CatalogError>,
    /// Set if the sync loop or a probe did not exit within `SHUTDOWN_WAIT`.
    pub timed_out: bool,
}

impl ShutdownErrors {
    fn count(&self) -> usize {
        self.deregister_errors.len() + usize::from(self.timed_out)
    }

    /// Returns `None` if shutdown completed cleanly, or `Some(self)` wrapped
    /// in [`Error::Shutdown`] otherwise.
    pub fn into_result(self) -> Result<()> {
        if self.count() == 0 {
            Ok(())
        } else {
            Err(Error::Shutdown(self))
        }
    }
}

impl std::fmt::Display for ShutdownErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.count())
    }
}
