//! Input descriptors the core never mutates.
//!
//! These mirror the narrow slice of the workload/task/service schema the
//! sync core actually needs; the full model lives upstream of this crate
//! and is consumed here only as plain data.

use std::time::Duration;

/// A service a producer wants registered, along with its checks.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    /// Logical service name, e.g. `"nomad"`.
    pub name: String,
    /// Tags to attach to the registration, preserved verbatim and in order.
    pub tags: Vec<String>,
    /// Port label: either a bare label resolved through a [`crate::producer::PortResolver`]
    /// callback, or an explicit `host:port` pair.
    pub port_label: String,
    /// Health checks attached to this service.
    pub checks: Vec<CheckDescriptor>,
}

/// The kind of probe a [`CheckDescriptor`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckKind {
    Http,
    Tcp,
    Script,
}

impl CheckKind {
    fn as_str(self) -> &'static str {
        match self {
            CheckKind::Http => "http",
            CheckKind::Tcp => "tcp",
            CheckKind::Script => "script",
        }
    }
}

/// A logical health-check descriptor, independent of any resolved address.
#[derive(Debug, Clone)]
pub struct CheckDescriptor {
    pub name: String,
    pub kind: CheckKind,
    pub interval: Duration,
    pub timeout: Duration,
    /// Status the check starts in before the agent has evaluated it once,
    /// e.g. `"critical"`.
    pub initial_status: String,
    /// HTTP only: the path to probe, resolved against the service's base URL.
    pub path: Option<String>,
    /// HTTP only: defaults to `"http"` when empty.
    pub protocol: Option<String>,
    /// Overrides the owning service's port label when set.
    pub port_label: Option<String>,
    /// SCRIPT only: the command to execute.
    pub command: Option<String>,
    /// SCRIPT only: arguments passed to `command`.
    pub args: Vec<String>,
}

impl CheckDescriptor {
    /// Fields mixed into the check id hash, in a fixed order, so that any
    /// change to the descriptor's observable shape changes the id.
    pub(crate) fn hash_fields(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.kind.as_str().to_string(),
            format_duration(self.interval),
            format_duration(self.timeout),
            self.initial_status.clone(),
            self.path.clone().unwrap_or_default(),
            self.protocol.clone().unwrap_or_default(),
            self.port_label.clone().unwrap_or_default(),
            self.command.clone().unwrap_or_default(),
            self.args.join(","),
        ]
    }
}

/// Renders a duration in the canonical `"10s"` / `"1m30s"` form the catalog
/// agent's HTTP API expects.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs == 0 {
        return format!("{}ms", d.as_millis());
    }
    if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

/// A task's own view of a service, as the task driver would hand it to the
/// producer API. Identical in shape to [`ServiceDescriptor`]; kept as a
/// distinct type so `RegisterTask`/`UpdateTask`/`RemoveTask` signatures read
/// clearly, matching how the upstream workload model distinguishes task
/// services from agent self-registrations.
pub type TaskServices = Vec<ServiceDescriptor>;

/// The documented output limit for Consul check output. Shared by the
/// script probe (truncating raw process output) and the HTTP catalog
/// client (truncating a TTL update's output field).
pub const MAX_CHECK_OUTPUT: usize = 4096;

/// Truncates `s` to at most `limit` bytes, cutting at the nearest UTF-8
/// character boundary at or before `limit` rather than splitting a
/// multi-byte character.
pub fn truncate_utf8(s: &str, limit: usize) -> &str {
    if s.len() <= limit {
        return s;
    }
    let mut end = limit;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
