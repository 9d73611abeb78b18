use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which mechanism currently provides mutual exclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    /// Atomic create-if-absent in the shared cache
    Cache,
    /// OS-level exclusive file lock under the lock directory
    File,
}

/// Lifecycle of a single acquisition.
///
/// ```text
/// Idle -> Acquiring -> Held -> Releasing -> Idle
///             \-> Failed (deadline exceeded)
/// ```
///
/// A [`LockGuard`](crate::lock::LockGuard) only ever reports `Held`,
/// `Releasing` and `Idle`. `Acquiring` is the time spent inside
/// `DistributedLock::acquire`, and `Failed` is that call returning
/// [`LockError`](crate::error::LockError); neither has a guard to carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockState {
    Idle,
    Acquiring,
    Held,
    Releasing,
    Failed,
}

/// Result of releasing a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseOutcome {
    Released,
    /// The stored token no longer matched ours; nothing was deleted.
    StolenOrExpired,
    /// The cache could not be reached; the entry lapses with its TTL.
    Expiring,
    AlreadyReleased,
}

/// Snapshot of an acquisition, detached from the native resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockHandle {
    pub resource_id: String,
    pub holder_token: String,
    /// ms since epoch
    pub acquired_at: u64,
    pub ttl: Duration,
    pub backend: LockBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockHealth {
    pub backend_in_use: LockBackend,
    pub active_lock_count: usize,
}
