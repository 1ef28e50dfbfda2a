//! Stable, deterministic id derivation for services and checks.
//!
//! Pure functions only: nothing here touches the Desired-State Store or the
//! external agent.

use crate::config::NOMAD_PREFIX;
use crate::model::CheckDescriptor;

const SEPARATOR: char = '-';

/// Builds the id for a service registered on behalf of the host agent
/// itself: `_nomad-{role}-{name}[-{tag}]*`.
pub fn agent_service_id(role: &str, name: &str, tags: &[String]) -> String {
    join(&[NOMAD_PREFIX, role, name], tags)
}

/// Builds the id for a service registered on behalf of a workload task:
/// `_nomad-executor-{alloc_id}-{task_name}-{name}[-{tag}]*`.
pub fn task_service_id(alloc_id: &str, task_name: &str, name: &str, tags: &[String]) -> String {
    join(&[NOMAD_PREFIX, "executor", alloc_id, task_name, name], tags)
}

fn join(head: &[&str], tags: &[String]) -> String {
    let mut parts: Vec<&str> = head.to_vec();
    for tag in tags {
        parts.push(tag.as_str());
    }
    parts.join(&SEPARATOR.to_string())
}

/// Returns `true` iff `id` begins with [`NOMAD_PREFIX`] — the sync loop only
/// ever deregisters ids for which this holds.
pub fn is_core_owned(id: &str) -> bool {
    id.starts_with(NOMAD_PREFIX)
}

/// Derives a stable check id from a check descriptor and its owning
/// service id. Two checks with identical descriptors under the same
/// service id always produce the same id; any observable difference in
/// the descriptor changes the id with overwhelming probability.
///
/// The id is opaque and never parsed back by the core; it is prefixed with
/// the owning service id purely so it remains human-traceable in logs and
/// in the catalog agent's UI.
pub fn check_id(service_id: &str, check: &CheckDescriptor) -> String {
    let mut hasher = Fnv1a::new();
    hasher.write(service_id.as_bytes());
    for field in check.hash_fields() {
        hasher.write(&[0]); // field separator, distinguishes "ab","c" from "a","bc"
        hasher.write(field.as_bytes());
    }
    format!("{service_id}{SEPARATOR}{:016x}", hasher.finish())
}

/// A minimal 64-bit FNV-1a hasher. Not cryptographic; chosen because it is
/// simple, dependency-free, and — unlike `DefaultHasher` — has a fixed,
/// documented algorithm, so check ids stay stable across Rust versions.
struct Fnv1a(u64);

impl Fnv1a {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    fn new() -> Self {
        Self(Self::OFFSET_BASIS)
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= u64::from(*byte);
            self.0 = self.0.wrapping_mul(Self::PRIME);
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}
