//! Single-flight handle creation and capacity enforcement.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, TryAcquireError};
use tokio::time::Instant;

use pl_domain::trace::TraceEvent;

use super::{Inner, Marker, RetireReason, SessionLease, SharedResult};
use crate::error::SessionError;
use crate::provider::{EventSink, HandleSpec, ProviderError};
use crate::session_key::validate_session_key;
use crate::store::SessionEntry;

impl Inner {
    pub(super) async fn acquire(
        self: &Arc<Self>,
        session_key: &str,
    ) -> Result<SessionLease, SessionError> {
        validate_session_key(session_key)?;
        self.ensure_running()?;

        let pending = {
            let mut inflight = self.inflight.lock();
            match inflight.get(session_key) {
                Some(marker) if self.marker_still_valid(session_key, marker) => {
                    tracing::debug!(session_key = %session_key, "joining in-flight initialization");
                    marker.fut.clone()
                }
                _ => {
                    inflight.remove(session_key);
                    if let Some(lease) = self.reuse(session_key) {
                        return Ok(lease);
                    }
                    let id = self.next_marker.fetch_add(1, Ordering::Relaxed);
                    let fut = self.spawn_creation(session_key, id);
                    inflight.insert(
                        session_key.to_owned(),
                        Marker {
                            id,
                            fut: fut.clone(),
                        },
                    );
                    fut
                }
            }
        };
        pending.await
    }

    /// A marker is worth joining while its creation runs, or while it
    /// holds a failure to share.  A resolved success only counts while the
    /// handle it produced is still live and reusable.
    fn marker_still_valid(&self, session_key: &str, marker: &Marker<SessionLease>) -> bool {
        match marker.fut.peek() {
            None | Some(Err(_)) => true,
            Some(Ok(lease)) => {
                let store = self.store.lock();
                store.get(session_key).is_some_and(|entry| {
                    entry.instance == lease.instance
                        && entry.is_reusable(Instant::now(), self.config.staleness())
                })
            }
        }
    }

    /// Hand back the existing handle when it is fresh and still connected.
    fn reuse(&self, session_key: &str) -> Option<SessionLease> {
        let mut store = self.store.lock();
        let entry = store.get(session_key)?;
        if !entry.is_reusable(Instant::now(), self.config.staleness()) {
            return None;
        }
        let lease = SessionLease::from_entry(entry);
        store.touch(session_key);
        drop(store);

        tracing::debug!(session_key = %session_key, instance = lease.instance, "reusing live session");
        TraceEvent::SessionReused {
            session_key: session_key.to_owned(),
            instance: lease.instance,
        }
        .emit();
        Some(lease)
    }

    /// Run the creation on its own task so it completes even if every
    /// caller gives up waiting.
    fn spawn_creation(self: &Arc<Self>, session_key: &str, marker: u64) -> SharedResult<SessionLease> {
        let inner = self.clone();
        let key = session_key.to_owned();
        let task = tokio::spawn(async move {
            let result = inner.create(&key).await;
            inner.release_inflight_after_grace(key, marker);
            result
        });

        let weak = Arc::downgrade(self);
        let key = session_key.to_owned();
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.release_inflight(&key, marker);
                    }
                    Err(SessionError::provider(
                        &key,
                        ProviderError::new(format!("initialization task failed: {e}")),
                    ))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Keep a resolved creation visible to late callers for the grace
    /// window, then drop the marker.
    fn release_inflight_after_grace(self: &Arc<Self>, session_key: String, marker: u64) {
        let grace = self.config.init_grace();
        if grace.is_zero() {
            self.release_inflight(&session_key, marker);
            return;
        }
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(inner) = weak.upgrade() {
                inner.release_inflight(&session_key, marker);
            }
        });
    }

    fn release_inflight(&self, session_key: &str, marker: u64) {
        let mut inflight = self.inflight.lock();
        if inflight.get(session_key).is_some_and(|m| m.id == marker) {
            inflight.remove(session_key);
        }
    }

    async fn create(self: &Arc<Self>, session_key: &str) -> Result<SessionLease, SessionError> {
        let previous = self.store.lock().remove(session_key);
        if let Some(previous) = previous {
            self.retire(previous, RetireReason::Replaced).await;
        }

        let slot = self.reserve_slot(session_key).await?;
        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed) + 1;
        let spec = HandleSpec {
            session_key: session_key.to_owned(),
            data_dir: self.config.session_dir(session_key),
        };
        let sink = EventSink::new(session_key, instance, self.events_tx.clone());

        tracing::debug!(session_key = %session_key, instance, "opening provider handle");
        let handle = match self.provider.connect(spec, sink).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(session_key = %session_key, error = %e, "provider connect failed");
                return Err(SessionError::provider(session_key, e));
            }
        };

        // Register before initialize so no early event is lost.
        let entry = SessionEntry::new(session_key, instance, handle.clone(), slot);
        let lease = SessionLease::from_entry(&entry);
        let admitted = {
            let mut store = self.store.lock();
            // Shutdown drains the store under this lock after cancelling, so
            // an entry is either drained by it or never inserted.
            if self.shutdown.is_cancelled() {
                Err(entry)
            } else {
                let displaced = store.insert(entry);
                Ok((displaced, store.len()))
            }
        };
        let (displaced, live_sessions) = match admitted {
            Ok(admitted) => admitted,
            Err(entry) => {
                tracing::debug!(session_key = %session_key, instance, "manager stopped while connecting");
                self.retire(entry, RetireReason::Shutdown).await;
                return Err(SessionError::ShuttingDown);
            }
        };
        self.admitted.notify_waiters();
        if let Some(displaced) = displaced {
            self.retire(displaced, RetireReason::Replaced).await;
        }

        TraceEvent::SessionCreated {
            session_key: session_key.to_owned(),
            instance,
            live_sessions,
        }
        .emit();

        if let Err(e) = handle.initialize().await {
            tracing::warn!(session_key = %session_key, instance, error = %e, "handle initialization failed");
            let orphan = self.store.lock().remove_instance(session_key, instance);
            if let Some(orphan) = orphan {
                self.retire(orphan, RetireReason::InitFailed).await;
            }
            return Err(SessionError::provider(session_key, e));
        }

        let mut store = self.store.lock();
        let Some(entry) = store.get_instance_mut(session_key, instance) else {
            tracing::debug!(session_key = %session_key, instance, "session evicted during initialization");
            self.ensure_running()?;
            return Err(SessionError::SessionNotFound(session_key.to_owned()));
        };
        entry.transition(|hs| hs.begin_pairing());
        store.touch(session_key);
        Ok(lease)
    }

    /// Take a capacity slot, evicting the least recently active session
    /// while the pool is full.
    async fn reserve_slot(&self, session_key: &str) -> Result<OwnedSemaphorePermit, SessionError> {
        loop {
            let admitted = self.admitted.notified();
            tokio::pin!(admitted);
            admitted.as_mut().enable();

            match self.slots.clone().try_acquire_owned() {
                Ok(permit) => return Ok(permit),
                Err(TryAcquireError::Closed) => return Err(SessionError::ShuttingDown),
                Err(TryAcquireError::NoPermits) => {}
            }

            let victim = self.store.lock().pop_least_recent();
            if let Some(victim) = victim {
                tracing::info!(
                    session_key = %session_key,
                    evicted = %victim.session_key,
                    "pool at capacity; evicting least recently active session"
                );
                self.forget_markers(&victim.session_key);
                self.retire(victim, RetireReason::Capacity).await;
                continue;
            }

            // Every slot belongs to a creation that has not registered yet.
            tracing::debug!(session_key = %session_key, "waiting for a capacity slot");
            tokio::select! {
                permit = self.slots.clone().acquire_owned() => {
                    return permit.map_err(|_| SessionError::ShuttingDown);
                }
                _ = &mut admitted => {}
                _ = self.shutdown.cancelled() => return Err(SessionError::ShuttingDown),
            }
        }
    }
}
