use std::future::Future;

use futures_util::future::join_all;
use tokio::time::Instant;

use super::SessionManager;
use crate::error::SessionError;
use crate::outbound::OutboundMessage;
use crate::session_key::validate_session_key;
use crate::state::SessionState;
use crate::status::{BulkOutcome, BulkReport, OwnerQueueStats, SendReport};

/// Largest batch [`SessionManager::send_bulk`] accepts.
pub const MAX_BULK_MESSAGES: usize = 1000;

impl SessionManager {
    /// Deliver `message` to `target` through a ready session.
    ///
    /// Never opens a session: the key must already be live and ready.  The
    /// target is resolved to its canonical id first, and every planned part
    /// goes to that id in order.  Stops at the first failing part.
    pub async fn send(
        &self,
        session_key: &str,
        target: &str,
        message: &OutboundMessage,
    ) -> Result<SendReport, SessionError> {
        validate_session_key(session_key)?;
        self.inner.ensure_running()?;

        let plan = message.plan();
        if plan.is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        let (instance, handle) = {
            let store = self.inner.store.lock();
            let entry = store
                .get(session_key)
                .ok_or_else(|| SessionError::SessionNotFound(session_key.to_owned()))?;
            if entry.state() != SessionState::Ready {
                return Err(SessionError::NotAuthenticated {
                    session_key: session_key.to_owned(),
                    state: entry.state(),
                });
            }
            (entry.instance, entry.handle.clone())
        };

        let resolved = handle
            .resolve_target(target)
            .await
            .map_err(|e| SessionError::provider(session_key, e))?
            .ok_or_else(|| SessionError::TargetNotRegistered(target.to_owned()))?;

        let mut deliveries = Vec::with_capacity(plan.len());
        for part in &plan {
            let receipt = handle
                .send(&resolved, &part.content, &part.options)
                .await
                .map_err(|e| SessionError::provider(session_key, e))?;
            deliveries.push(receipt);
        }

        {
            let mut store = self.inner.store.lock();
            if store.get_instance_mut(session_key, instance).is_some() {
                store.touch(session_key);
            }
        }

        tracing::debug!(
            session_key = %session_key,
            target = %target,
            parts = deliveries.len(),
            "message delivered"
        );
        Ok(SendReport {
            session_key: session_key.to_owned(),
            target: target.to_owned(),
            resolved_target: resolved,
            deliveries,
        })
    }

    /// [`send`](Self::send) through the owner's request queue.
    ///
    /// Queued immediately; the returned future resolves when the send has
    /// run.
    pub fn send_queued(
        &self,
        owner_id: &str,
        session_key: &str,
        target: &str,
        message: OutboundMessage,
    ) -> impl Future<Output = Result<SendReport, SessionError>> + Send + 'static {
        let manager = self.clone();
        let session_key = session_key.to_owned();
        let target = target.to_owned();
        let queued = self.inner.queue.enqueue(owner_id, async move {
            manager.send(&session_key, &target, &message).await
        });
        async move { queued.await.and_then(|sent| sent) }
    }

    /// Run any operation through the owner's request queue.
    pub fn run_for_owner<F, T>(
        &self,
        owner_id: &str,
        op: F,
    ) -> impl Future<Output = Result<T, SessionError>> + Send + 'static
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.queue.enqueue(owner_id, op)
    }

    /// Send many messages from one session through the owner's queue.
    ///
    /// Every message is queued up front, so they run in the owner's
    /// batches.  A failed message does not stop the rest; each gets its
    /// own outcome in the report.
    pub async fn send_bulk(
        &self,
        owner_id: &str,
        session_key: &str,
        messages: Vec<(String, OutboundMessage)>,
    ) -> Result<BulkReport, SessionError> {
        validate_session_key(session_key)?;
        self.inner.ensure_running()?;
        if messages.is_empty() {
            return Err(SessionError::EmptyBatch);
        }
        if messages.len() > MAX_BULK_MESSAGES {
            return Err(SessionError::BatchTooLarge {
                count: messages.len(),
                max: MAX_BULK_MESSAGES,
            });
        }

        let started = Instant::now();
        let (targets, sends): (Vec<_>, Vec<_>) = messages
            .into_iter()
            .map(|(target, message)| {
                let send = self.send_queued(owner_id, session_key, &target, message);
                (target, send)
            })
            .unzip();
        let results: Vec<BulkOutcome> = targets
            .into_iter()
            .zip(join_all(sends).await)
            .map(|(target, result)| BulkOutcome { target, result })
            .collect();

        let successful = results.iter().filter(|r| r.is_sent()).count();
        let report = BulkReport {
            session_key: session_key.to_owned(),
            owner_id: owner_id.to_owned(),
            total: results.len(),
            successful,
            failed: results.len() - successful,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            results,
        };
        tracing::info!(
            session_key = %session_key,
            owner_id = %owner_id,
            total = report.total,
            failed = report.failed,
            "bulk send finished"
        );
        Ok(report)
    }

    /// Queue depth for `owner_id` plus the status of every session it owns.
    pub fn owner_queue_stats(&self, owner_id: &str) -> OwnerQueueStats {
        OwnerQueueStats {
            owner_id: owner_id.to_owned(),
            pending: self.inner.queue.pending(owner_id),
            sessions: self.sessions_for_owner(owner_id),
        }
    }
}
