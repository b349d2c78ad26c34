//! The session manager.
//!
//! Owns the pool of live provider handles and coordinates everything that
//! touches it: single-flight initialization per key, the pairing handshake,
//! capacity eviction, the health sweeper and the per-owner request queue.
//!
//! Lock order: `inflight` / `pairing` before `store`.  No lock is held across
//! an `.await`; provider calls always run on a cloned handle.

mod events;
mod init;
mod pairing;
mod send;
mod sweep;

pub use send::MAX_BULK_MESSAGES;
pub use sweep::SweepReport;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use pl_domain::config::{Config, SessionsConfig};
use pl_domain::notify::AssociationNotifier;
use pl_domain::trace::TraceEvent;

use crate::error::SessionError;
use crate::persisted;
use crate::provider::{
    ConnectionState, HandleEventEnvelope, InstanceId, SessionHandle, SessionProvider,
};
use crate::queue::OwnerQueue;
use crate::session_key::{owner_of, validate_session_key};
use crate::state::{HandshakeView, SessionState};
use crate::status::{ManagerStats, PairingOutcome, PersistedSession, SessionStatus, StatusKind};
use crate::store::{SessionEntry, SessionStore};

/// Upper bound on a single association / billing call.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

type SharedResult<T> = Shared<BoxFuture<'static, Result<T, SessionError>>>;

/// A per-key single-flight marker.  `id` guards removal so a delayed
/// release never drops a newer marker for the same key.
struct Marker<T> {
    id: u64,
    fut: SharedResult<T>,
}

/// Why a handle left the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetireReason {
    Capacity,
    Idle,
    Replaced,
    InitFailed,
    Explicit,
    Shutdown,
}

impl RetireReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Capacity => "capacity",
            Self::Idle => "idle",
            Self::Replaced => "replaced",
            Self::InitFailed => "init_failed",
            Self::Explicit => "explicit",
            Self::Shutdown => "shutdown",
        }
    }
}

/// A live handle handed back by [`SessionManager::acquire`].
#[derive(Clone)]
pub struct SessionLease {
    session_key: String,
    instance: InstanceId,
    handle: Arc<dyn SessionHandle>,
}

impl SessionLease {
    fn from_entry(entry: &SessionEntry) -> Self {
        Self {
            session_key: entry.session_key.clone(),
            instance: entry.instance,
            handle: entry.handle.clone(),
        }
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub fn handle(&self) -> &Arc<dyn SessionHandle> {
        &self.handle
    }
}

impl fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLease")
            .field("session_key", &self.session_key)
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) struct Inner {
    config: SessionsConfig,
    provider: Arc<dyn SessionProvider>,
    notifier: Arc<dyn AssociationNotifier>,
    store: Mutex<SessionStore>,
    /// One permit per live entry.
    slots: Arc<Semaphore>,
    /// Signalled whenever a new entry is admitted and becomes evictable.
    admitted: Notify,
    inflight: Mutex<HashMap<String, Marker<SessionLease>>>,
    pairing: Mutex<HashMap<String, Marker<PairingOutcome>>>,
    next_instance: AtomicU64,
    next_marker: AtomicU64,
    events_tx: mpsc::UnboundedSender<HandleEventEnvelope>,
    queue: OwnerQueue,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Inner {
    fn ensure_running(&self) -> Result<(), SessionError> {
        if self.shutdown.is_cancelled() {
            return Err(SessionError::ShuttingDown);
        }
        Ok(())
    }

    /// Drop single-flight markers so the next caller starts over.
    fn forget_markers(&self, session_key: &str) {
        self.inflight.lock().remove(session_key);
        self.pairing.lock().remove(session_key);
    }

    /// Destroy a handle that has already been removed from the store.
    ///
    /// Destroy failures are logged; the capacity slot is released either
    /// way once `entry` is dropped.
    async fn retire(&self, entry: SessionEntry, reason: RetireReason) {
        let idle_secs = entry.idle_for(Instant::now()).as_secs();
        tracing::info!(
            session_key = %entry.session_key,
            instance = entry.instance,
            reason = reason.as_str(),
            idle_secs,
            "retiring session"
        );
        TraceEvent::SessionEvicted {
            session_key: entry.session_key.clone(),
            instance: entry.instance,
            reason: reason.as_str().into(),
            idle_secs,
        }
        .emit();

        if let Err(e) = entry.handle.destroy().await {
            tracing::warn!(
                session_key = %entry.session_key,
                instance = entry.instance,
                error = %e,
                "handle destroy failed"
            );
        }
    }

    /// Run a notifier call in the background.  Failures never touch
    /// session state.
    fn notify_in_background<F>(&self, what: &'static str, session_key: &str, call: F)
    where
        F: Future<Output = pl_domain::error::Result<()>> + Send + 'static,
    {
        let session_key = session_key.to_owned();
        tokio::spawn(async move {
            match tokio::time::timeout(NOTIFY_TIMEOUT, call).await {
                Ok(Ok(())) => {
                    tracing::debug!(session_key = %session_key, what, "notification delivered");
                }
                Ok(Err(e)) => {
                    tracing::warn!(session_key = %session_key, what, error = %e, "notification failed");
                }
                Err(_) => {
                    tracing::warn!(session_key = %session_key, what, "notification timed out");
                }
            }
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cheap to clone; all clones drive the same pool.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Build the manager and start its event loop and health sweeper.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(
        config: &Config,
        provider: Arc<dyn SessionProvider>,
        notifier: Arc<dyn AssociationNotifier>,
    ) -> Self {
        let sessions = config.sessions.clone();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            slots: Arc::new(Semaphore::new(sessions.capacity)),
            queue: OwnerQueue::new(config.queue.max_concurrent_per_owner),
            config: sessions,
            provider,
            notifier,
            store: Mutex::new(SessionStore::default()),
            admitted: Notify::new(),
            inflight: Mutex::new(HashMap::new()),
            pairing: Mutex::new(HashMap::new()),
            next_instance: AtomicU64::new(0),
            next_marker: AtomicU64::new(0),
            events_tx,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&inner);
        let event_loop = tokio::spawn(events::run_event_loop(
            weak.clone(),
            events_rx,
            inner.shutdown.clone(),
        ));
        let sweeper = tokio::spawn(sweep::run_sweeper(
            weak,
            inner.config.sweep_interval(),
            inner.shutdown.clone(),
        ));
        inner.tasks.lock().extend([event_loop, sweeper]);

        tracing::info!(
            capacity = inner.config.capacity,
            staleness_secs = inner.config.staleness_secs,
            sweep_interval_secs = inner.config.sweep_interval_secs,
            "session manager started"
        );
        Self { inner }
    }

    pub fn config(&self) -> &SessionsConfig {
        &self.inner.config
    }

    /// Return a live handle for `session_key`, creating one if needed.
    ///
    /// Concurrent calls for the same key share one creation.  A fresh,
    /// non-disconnected handle is reused; a stale or disconnected one is
    /// replaced.  Admitting a new handle at capacity evicts the least
    /// recently active session first.
    pub async fn acquire(&self, session_key: &str) -> Result<SessionLease, SessionError> {
        self.inner.acquire(session_key).await
    }

    /// Open a session from pairing material persisted by an earlier run.
    pub async fn load_session(&self, session_key: &str) -> Result<SessionLease, SessionError> {
        validate_session_key(session_key)?;
        let live = self.inner.store.lock().get(session_key).is_some();
        let dir = self.inner.config.session_dir(session_key);
        if !live && !dir.is_dir() {
            return Err(SessionError::PersistedSessionMissing(dir));
        }
        self.inner.acquire(session_key).await
    }

    /// Destroy the handle for `session_key`.  Returns whether one existed.
    pub async fn disconnect(&self, session_key: &str) -> bool {
        let entry = self.inner.store.lock().remove(session_key);
        self.inner.forget_markers(session_key);
        match entry {
            Some(entry) => {
                self.inner.retire(entry, RetireReason::Explicit).await;
                true
            }
            None => false,
        }
    }

    /// Stop background tasks, then destroy every live handle.
    ///
    /// Every later call fails with [`SessionError::ShuttingDown`].
    pub async fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();
        self.inner.slots.close();

        let tasks: Vec<_> = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }

        self.inner.inflight.lock().clear();
        self.inner.pairing.lock().clear();
        let entries = self.inner.store.lock().drain();
        let count = entries.len();
        futures_util::future::join_all(
            entries
                .into_iter()
                .map(|e| self.inner.retire(e, RetireReason::Shutdown)),
        )
        .await;
        tracing::info!(disconnected = count, "session manager stopped");
    }

    /// Run one health sweep now instead of waiting for the next tick.
    pub async fn sweep_now(&self) -> SweepReport {
        self.inner.sweep().await
    }

    // ── Views ────────────────────────────────────────────────────────

    pub fn status(&self, session_key: &str) -> SessionStatus {
        let store = self.inner.store.lock();
        match store.get(session_key) {
            Some(entry) => SessionStatus::from_entry(entry, Instant::now()),
            None => SessionStatus::not_initialized(session_key),
        }
    }

    /// Follow the handshake of a live session.  The sender closes when the
    /// handle leaves the pool.
    pub fn watch(&self, session_key: &str) -> Option<watch::Receiver<HandshakeView>> {
        self.inner.store.lock().get(session_key).map(|e| e.subscribe())
    }

    /// All live sessions, most recently active first.
    pub fn list_sessions(&self) -> Vec<SessionStatus> {
        let now = Instant::now();
        let store = self.inner.store.lock();
        store
            .recent_first()
            .into_iter()
            .map(|e| SessionStatus::from_entry(e, now))
            .collect()
    }

    /// Keys of sessions that can send right now.
    pub fn connected_senders(&self) -> Vec<String> {
        let store = self.inner.store.lock();
        let mut keys: Vec<_> = store
            .values()
            .filter(|e| e.state() == SessionState::Ready)
            .map(|e| e.session_key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn sessions_for_owner(&self, owner_id: &str) -> Vec<SessionStatus> {
        let now = Instant::now();
        let store = self.inner.store.lock();
        let mut owned: Vec<_> = store
            .values()
            .filter(|e| {
                e.owner_id.as_deref() == Some(owner_id)
                    || (e.owner_id.is_none() && owner_of(&e.session_key) == Some(owner_id))
            })
            .map(|e| SessionStatus::from_entry(e, now))
            .collect();
        owned.sort_by(|a, b| a.session_key.cmp(&b.session_key));
        owned
    }

    pub fn stats(&self) -> ManagerStats {
        let mut stats = ManagerStats {
            capacity: self.inner.config.capacity,
            available_slots: self.inner.slots.available_permits(),
            inflight_initializations: self.inner.inflight.lock().len(),
            active_owner_queues: self.inner.queue.active_owners(),
            ..Default::default()
        };
        let now = Instant::now();
        let staleness = self.inner.config.staleness();
        let store = self.inner.store.lock();
        stats.live_sessions = store.len();
        stats.recency_len = store.recency_len();
        for entry in store.values() {
            if entry.is_healthy(now, staleness) {
                stats.healthy_sessions += 1;
            }
            match entry.state() {
                SessionState::Ready => stats.ready_sessions += 1,
                SessionState::Disconnected => stats.disconnected_sessions += 1,
                _ => stats.pairing_sessions += 1,
            }
        }
        stats
    }

    /// Ask the provider for its own view of a live handle's connection.
    pub async fn connection_state(&self, session_key: &str) -> Result<ConnectionState, SessionError> {
        let handle = self
            .inner
            .store
            .lock()
            .get(session_key)
            .map(|e| e.handle.clone())
            .ok_or_else(|| SessionError::SessionNotFound(session_key.to_owned()))?;
        handle
            .connection_state()
            .await
            .map_err(|e| SessionError::provider(session_key, e))
    }

    // ── Persisted sessions ───────────────────────────────────────────

    /// Session directories on disk, joined with their in-memory status.
    pub fn persisted_sessions(&self) -> Result<Vec<PersistedSession>, SessionError> {
        let dirs = persisted::scan(&self.inner.config.data_dir, &self.inner.config.dir_prefix)
            .map_err(|e| SessionError::Scan(e.to_string()))?;
        let store = self.inner.store.lock();
        Ok(dirs
            .into_iter()
            .map(|dir| {
                let live = store.get(&dir.session_key);
                PersistedSession {
                    owner_id: live
                        .and_then(|e| e.owner_id.clone())
                        .or_else(|| owner_of(&dir.session_key).map(str::to_owned)),
                    exists_in_memory: live.is_some(),
                    status: live.map_or(StatusKind::NotInitialized, |e| e.state().into()),
                    session_key: dir.session_key,
                    path: dir.path,
                }
            })
            .collect())
    }

    pub fn has_persisted(&self, session_key: &str) -> bool {
        validate_session_key(session_key).is_ok()
            && self.inner.config.session_dir(session_key).is_dir()
    }
}
