//! Crash-safe cross-process mutual exclusion.
//!
//! The primary path is an atomic create-if-absent with expiry in the shared
//! cache (`lock:{resource_id}` holding an opaque holder token), so a crashed
//! holder's lock heals itself once the TTL runs out. When the cache is not
//! available the lock falls back to a non-blocking `flock(2)` on
//! `{lock_dir}/{resource_id}.lock`.
//!
//! Mutual exclusion only holds among processes using the same mechanism. A
//! process that fell back to file locks does not see cache locks, and vice
//! versa.

use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheBackend;
use crate::error::{LockError, LockResult};
use crate::gateway::CacheGateway;
use crate::time::Clock;
use crate::types::{
    encode_file_component, KeySpace, LockBackend, LockHandle, LockHealth, LockState,
    ReleaseOutcome,
};

#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Directory holding the fallback lock files
    pub lock_dir: PathBuf,
    /// Expiry of the cache entry; bounds how long a crashed holder blocks others
    pub ttl: Duration,
    pub acquire_timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            lock_dir: std::env::temp_dir().join("bastion-locks"),
            ttl: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(10),
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// `{pid}:{random}`, unique per acquisition.
pub fn holder_token() -> String {
    format!("{}:{}", std::process::id(), nanoid::nanoid!(12))
}

pub struct DistributedLock {
    gateway: Arc<CacheGateway>,
    options: LockOptions,
    clock: Arc<dyn Clock>,
    /// File-backed guards currently alive in this process
    file_locks_held: Arc<AtomicUsize>,
}

impl DistributedLock {
    pub fn new(gateway: Arc<CacheGateway>, options: LockOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            gateway,
            options,
            clock,
            file_locks_held: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Acquire with the configured timeout and retry delay.
    pub async fn acquire_default(
        &self,
        resource_id: &str,
        cancel: &CancellationToken,
    ) -> LockResult<LockGuard> {
        self.acquire(
            resource_id,
            self.options.acquire_timeout,
            self.options.retry_delay,
            cancel,
        )
        .await
    }

    /// Polls for the lock every `retry_delay` until it is granted, `timeout`
    /// elapses, or `cancel` fires.
    ///
    /// The mechanism (cache or file) is chosen once per call. A cache failure
    /// in the middle of the loop switches the remaining attempts to the file
    /// lock.
    pub async fn acquire(
        &self,
        resource_id: &str,
        timeout: Duration,
        retry_delay: Duration,
        cancel: &CancellationToken,
    ) -> LockResult<LockGuard> {
        let started = Instant::now();
        let deadline = started + timeout;
        let token = holder_token();
        let key = KeySpace::Lock.key(resource_id);
        let mut cache = self.gateway.get().await;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            match cache.clone() {
                Some(c) => match c.set_if_absent(&key, &token, self.options.ttl).await {
                    Ok(true) => {
                        tracing::debug!(resource_id, attempts, "Lock acquired via shared cache");
                        return Ok(self.cache_guard(resource_id, token, c));
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(
                            resource_id,
                            error = %e,
                            "Shared cache failed during lock acquisition, switching to file lock"
                        );
                        self.gateway.mark_unavailable().await;
                        cache = None;
                        continue;
                    }
                },
                None => match self.try_file_lock(resource_id) {
                    Ok(Some(file)) => {
                        tracing::debug!(resource_id, attempts, "Lock acquired via file lock");
                        return Ok(self.file_guard(resource_id, token, file));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::debug!(resource_id, error = %e, "File lock attempt failed");
                    }
                },
            }

            let now = Instant::now();
            if now >= deadline {
                let holder = self.describe_holder(resource_id, cache.as_deref()).await;
                tracing::warn!(resource_id, attempts, holder = %holder, "Lock acquisition timed out");
                return Err(LockError::AcquireTimeout {
                    resource_id: resource_id.to_string(),
                    waited: started.elapsed(),
                    holder,
                });
            }

            let pause = retry_delay.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(resource_id, "Lock acquisition cancelled");
                    return Err(LockError::Cancelled { resource_id: resource_id.to_string() });
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Idempotent release. See [`LockGuard::release`].
    pub async fn release(&self, guard: &mut LockGuard) -> ReleaseOutcome {
        guard.release().await
    }

    /// Runs `work` while holding the lock and releases it afterwards.
    ///
    /// If the returned future is dropped mid-way the guard's `Drop` still
    /// releases the lock.
    pub async fn with_lock<F, Fut, T>(
        &self,
        resource_id: &str,
        cancel: &CancellationToken,
        work: F,
    ) -> LockResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut guard = self.acquire_default(resource_id, cancel).await?;
        let out = work().await;
        guard.release().await;
        Ok(out)
    }

    /// Point-in-time check. Racy by nature: the answer may be stale by the
    /// time the caller looks at it.
    pub async fn is_locked(&self, resource_id: &str) -> bool {
        if let Some(cache) = self.gateway.get().await {
            match cache.get(&KeySpace::Lock.key(resource_id)).await {
                Ok(holder) => return holder.is_some(),
                Err(e) => {
                    tracing::warn!(resource_id, error = %e, "Shared cache failed, checking file lock");
                }
            }
        }

        let path = self.lock_path(resource_id);
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(f) => f,
            Err(_) => return false,
        };
        match try_flock(&file, libc::LOCK_EX) {
            Ok(true) => {
                let _ = try_flock(&file, libc::LOCK_UN);
                false
            }
            Ok(false) => true,
            Err(_) => false,
        }
    }

    /// Administrative bypass for recovering from a crashed holder. Deletes the
    /// cache entry and unlinks the lock file regardless of who holds them.
    pub async fn force_release(&self, resource_id: &str) -> bool {
        tracing::warn!(resource_id, "Force-releasing lock");
        let mut removed = false;

        if let Some(cache) = self.gateway.get().await {
            match cache.delete(&KeySpace::Lock.key(resource_id)).await {
                Ok(deleted) => removed |= deleted,
                Err(e) => tracing::warn!(resource_id, error = %e, "Could not delete cache lock"),
            }
        }

        match std::fs::remove_file(self.lock_path(resource_id)) {
            Ok(()) => removed = true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(resource_id, error = %e, "Could not remove lock file"),
        }

        removed
    }

    pub async fn health_check(&self) -> LockHealth {
        if let Some(cache) = self.gateway.get().await {
            match cache.scan(&KeySpace::Lock.pattern()).await {
                Ok(keys) => {
                    return LockHealth {
                        backend_in_use: LockBackend::Cache,
                        active_lock_count: keys.len(),
                    };
                }
                Err(e) => tracing::warn!(error = %e, "Could not count cache locks"),
            }
        }
        LockHealth {
            backend_in_use: LockBackend::File,
            active_lock_count: self.file_locks_held.load(Ordering::SeqCst),
        }
    }

    fn lock_path(&self, resource_id: &str) -> PathBuf {
        self.options
            .lock_dir
            .join(format!("{}.lock", encode_file_component(resource_id)))
    }

    /// One non-blocking attempt. Returns the locked file, or `None` if someone
    /// else holds it. Any descriptor opened here is closed before returning
    /// unless it is handed to a guard.
    fn try_file_lock(&self, resource_id: &str) -> io::Result<Option<File>> {
        std::fs::create_dir_all(&self.options.lock_dir)?;
        let path = self.lock_path(resource_id);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if !try_flock(&file, libc::LOCK_EX)? {
            return Ok(None);
        }

        // The path may have been unlinked (force_release) between open and
        // flock, in which case we locked an orphan.
        if !same_file(&file, &path)? {
            return Ok(None);
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;
        Ok(Some(file))
    }

    async fn describe_holder(&self, resource_id: &str, cache: Option<&dyn CacheBackend>) -> String {
        if let Some(cache) = cache {
            if let Ok(Some(token)) = cache.get(&KeySpace::Lock.key(resource_id)).await {
                return format!("token {}", token);
            }
        }
        let mut contents = String::new();
        if let Ok(mut f) = File::open(self.lock_path(resource_id)) {
            if f.read_to_string(&mut contents).is_ok() {
                let pid = contents.trim();
                if !pid.is_empty() {
                    return format!("pid {}", pid);
                }
            }
        }
        "unknown".to_string()
    }

    fn cache_guard(
        &self,
        resource_id: &str,
        token: String,
        cache: Arc<dyn CacheBackend>,
    ) -> LockGuard {
        LockGuard {
            handle: self.handle(resource_id, token, LockBackend::Cache),
            state: LockState::Held,
            inner: GuardInner::Cache(cache),
            file_locks_held: Arc::clone(&self.file_locks_held),
        }
    }

    fn file_guard(&self, resource_id: &str, token: String, file: File) -> LockGuard {
        self.file_locks_held.fetch_add(1, Ordering::SeqCst);
        LockGuard {
            handle: self.handle(resource_id, token, LockBackend::File),
            state: LockState::Held,
            inner: GuardInner::File {
                file,
                path: self.lock_path(resource_id),
            },
            file_locks_held: Arc::clone(&self.file_locks_held),
        }
    }

    fn handle(&self, resource_id: &str, token: String, backend: LockBackend) -> LockHandle {
        LockHandle {
            resource_id: resource_id.to_string(),
            holder_token: token,
            acquired_at: self.clock.now_ms(),
            ttl: self.options.ttl,
            backend,
        }
    }
}

// ─── Guard ──────────────────────────────────────────────────────────────────

enum GuardInner {
    Cache(Arc<dyn CacheBackend>),
    File { file: File, path: PathBuf },
    Released,
}

/// A held lock. Releasing is explicit via [`LockGuard::release`]; a guard
/// that is dropped while still held releases on a best-effort basis.
pub struct LockGuard {
    handle: LockHandle,
    state: LockState,
    inner: GuardInner,
    file_locks_held: Arc<AtomicUsize>,
}

impl LockGuard {
    pub fn handle(&self) -> &LockHandle {
        &self.handle
    }

    pub fn resource_id(&self) -> &str {
        &self.handle.resource_id
    }

    pub fn token(&self) -> &str {
        &self.handle.holder_token
    }

    pub fn backend(&self) -> LockBackend {
        self.handle.backend
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    /// Releases the lock if we still own it.
    ///
    /// A cache lock is removed only while it still holds our token. If it
    /// expired and was re-acquired by someone else the release is a no-op
    /// and reports [`ReleaseOutcome::StolenOrExpired`].
    pub async fn release(&mut self) -> ReleaseOutcome {
        let inner = std::mem::replace(&mut self.inner, GuardInner::Released);
        self.state = LockState::Releasing;
        let resource_id = self.handle.resource_id.as_str();

        let outcome = match inner {
            GuardInner::Released => ReleaseOutcome::AlreadyReleased,
            GuardInner::Cache(cache) => {
                let key = KeySpace::Lock.key(resource_id);
                match cache.delete_if_equals(&key, &self.handle.holder_token).await {
                    Ok(true) => ReleaseOutcome::Released,
                    Ok(false) => {
                        tracing::warn!(resource_id, "Lock was stolen or expired before release");
                        ReleaseOutcome::StolenOrExpired
                    }
                    Err(e) => {
                        tracing::warn!(
                            resource_id,
                            error = %e,
                            "Could not release cache lock, it will expire with its TTL"
                        );
                        ReleaseOutcome::Expiring
                    }
                }
            }
            GuardInner::File { file, path } => {
                let ours = same_file(&file, &path).unwrap_or(false);
                let _ = try_flock(&file, libc::LOCK_UN);
                drop(file);
                self.file_locks_held.fetch_sub(1, Ordering::SeqCst);
                if ours {
                    ReleaseOutcome::Released
                } else {
                    tracing::warn!(resource_id, "Lock file was removed while held (stolen or expired)");
                    ReleaseOutcome::StolenOrExpired
                }
            }
        };

        self.state = LockState::Idle;
        outcome
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.inner, GuardInner::Released) {
            GuardInner::Released => {}
            GuardInner::File { file, .. } => {
                // Closing the descriptor drops the flock.
                drop(file);
                self.file_locks_held.fetch_sub(1, Ordering::SeqCst);
            }
            GuardInner::Cache(cache) => {
                let key = KeySpace::Lock.key(&self.handle.resource_id);
                let token = std::mem::take(&mut self.handle.holder_token);
                match tokio::runtime::Handle::try_current() {
                    Ok(rt) => {
                        rt.spawn(async move {
                            let _ = cache.delete_if_equals(&key, &token).await;
                        });
                    }
                    Err(_) => {
                        tracing::debug!(key = %key, "Lock guard dropped outside a runtime, leaving it to expire");
                    }
                }
            }
        }
    }
}

// ─── flock helpers (unix only) ──────────────────────────────────────────────

fn try_flock(file: &File, op: libc::c_int) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file` and stays open for the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), op | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(false)
    } else {
        Err(err)
    }
}

fn same_file(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match std::fs::metadata(path) {
        Ok(on_disk) => Ok(held.dev() == on_disk.dev() && held.ino() == on_disk.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
