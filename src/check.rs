//! Pure translation from a [`CheckDescriptor`] plus a resolved `(host, port)`
//! to the wire-level [`CheckRegistration`] the catalog agent expects.
//!
//! Nothing here performs I/O; SCRIPT checks are built as TTL checks, the
//! actual probing is [`crate::probe::spawn`]'s job.

use crate::catalog::CheckRegistration;
use crate::config::Config;
use crate::error::Result;
use crate::id;
use crate::model::{format_duration, CheckDescriptor, CheckKind};

/// Builds the [`CheckRegistration`] for `check`, owned by `service_id` and
/// resolved against `(host, port)`.
///
/// `check_id` is passed in rather than recomputed here so callers can derive
/// it once via [`id::check_id`] and reuse it for both the registration and
/// any accompanying call to [`crate::probe::spawn`].
pub fn build(
    config: &Config,
    service_id: &str,
    check_id: &str,
    check: &CheckDescriptor,
    host: &str,
    port: u16,
) -> Result<CheckRegistration> {
    let mut registration = CheckRegistration {
        id: check_id.to_string(),
        name: check.name.clone(),
        service_id: service_id.to_string(),
        status: check.initial_status.clone(),
        interval: None,
        timeout: None,
        http: None,
        tcp: None,
        ttl: None,
    };

    match check.kind {
        CheckKind::Http => {
            let protocol = match check.protocol.as_deref() {
                None | Some("") => "http",
                Some(p) => p,
            };
            let base = url::Url::parse(&format!("{protocol}://{host}:{port}"))?;
            let path = check.path.as_deref().unwrap_or("/");
            let resolved = base.join(path)?;
            registration.http = Some(resolved.to_string());
            registration.interval = Some(format_duration(check.interval));
            registration.timeout = Some(format_duration(check.timeout));
        }
        CheckKind::Tcp => {
            registration.tcp = Some(format!("{host}:{port}"));
            registration.interval = Some(format_duration(check.interval));
            registration.timeout = Some(format_duration(check.timeout));
        }
        CheckKind::Script => {
            let ttl = check.interval + config.ttl_buffer;
            registration.ttl = Some(format_duration(ttl));
        }
    }

    Ok(registration)
}

/// Derives the check id for `check` under `service_id` and builds its
/// registration in one step. Convenience wrapper used by the producer API.
pub fn build_with_id(
    config: &Config,
    service_id: &str,
    check: &CheckDescriptor,
    host: &str,
    port: u16,
) -> Result<(String, CheckRegistration)> {
    let check_id = id::check_id(service_id, check);
    let registration = build(config, service_id, &check_id, check, host, port)?;
    Ok((check_id, registration))
}
