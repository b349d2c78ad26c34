//! Pairing handshake coordination.
//!
//! One pairing wait per key at a time; concurrent requests share it.  The
//! marker is released as soon as the wait settles, including on timeout,
//! while the handle keeps running and later events still update its state.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::time::Instant;

use pl_domain::notify::Association;

use super::{Inner, Marker, SessionManager, SharedResult};
use crate::error::SessionError;
use crate::session_key::validate_session_key;
use crate::state::{HandshakeView, SessionState};
use crate::status::PairingOutcome;

impl SessionManager {
    /// Start (or join) pairing for `session_key` and return the challenge
    /// the user must consume, or report that the session is already ready.
    ///
    /// With `owner_id` set, the owner is recorded on the session and the
    /// association notifier is called in the background.
    pub async fn request_pairing(
        &self,
        session_key: &str,
        owner_id: Option<&str>,
    ) -> Result<PairingOutcome, SessionError> {
        let outcome = self.inner.request_pairing(session_key).await?;
        if let Some(owner_id) = owner_id {
            self.associate_owner(session_key, owner_id);
        }
        Ok(outcome)
    }

    /// Record `owner_id` as the owner of a live session and tell the
    /// notifier.  Returns `false` when the session is not live.
    pub fn associate_owner(&self, session_key: &str, owner_id: &str) -> bool {
        {
            let mut store = self.inner.store.lock();
            let Some(entry) = store.get_mut(session_key) else {
                tracing::debug!(session_key = %session_key, owner_id = %owner_id, "cannot associate owner with unknown session");
                return false;
            };
            entry.owner_id = Some(owner_id.to_owned());
        }

        let notifier = self.inner.notifier.clone();
        let association = Association {
            owner_id: owner_id.to_owned(),
            session_key: session_key.to_owned(),
        };
        self.inner
            .notify_in_background("associate", session_key, async move {
                notifier.associate(&association).await
            });
        true
    }
}

impl Inner {
    async fn request_pairing(self: &Arc<Self>, session_key: &str) -> Result<PairingOutcome, SessionError> {
        validate_session_key(session_key)?;
        self.ensure_running()?;

        let pending = {
            let mut pairing = self.pairing.lock();
            if let Some(marker) = pairing.get(session_key) {
                tracing::debug!(session_key = %session_key, "joining pairing in progress");
                marker.fut.clone()
            } else {
                if let Some(outcome) = self.settled_pairing(session_key) {
                    return Ok(outcome);
                }
                let id = self.next_marker.fetch_add(1, Ordering::Relaxed);
                let fut = self.spawn_pairing(session_key, id);
                pairing.insert(
                    session_key.to_owned(),
                    Marker {
                        id,
                        fut: fut.clone(),
                    },
                );
                fut
            }
        };
        pending.await
    }

    /// Answer straight from the store when the handle is already ready or
    /// already showing a challenge.
    fn settled_pairing(&self, session_key: &str) -> Option<PairingOutcome> {
        let mut store = self.store.lock();
        let entry = store.get(session_key)?;
        let outcome = outcome_from(session_key, &entry.handshake().view())?;
        store.touch(session_key);
        Some(outcome)
    }

    fn spawn_pairing(self: &Arc<Self>, session_key: &str, marker: u64) -> SharedResult<PairingOutcome> {
        let inner = self.clone();
        let key = session_key.to_owned();
        let task = tokio::spawn(async move {
            let result = inner.pair(&key).await;
            inner.release_pairing(&key, marker);
            result
        });

        let key = session_key.to_owned();
        async move {
            task.await.unwrap_or_else(|e| {
                tracing::error!(session_key = %key, error = %e, "pairing task failed");
                Err(SessionError::PairingAborted(key))
            })
        }
        .boxed()
        .shared()
    }

    fn release_pairing(&self, session_key: &str, marker: u64) {
        let mut pairing = self.pairing.lock();
        if pairing.get(session_key).is_some_and(|m| m.id == marker) {
            pairing.remove(session_key);
        }
    }

    async fn pair(self: &Arc<Self>, session_key: &str) -> Result<PairingOutcome, SessionError> {
        let lease = self.acquire(session_key).await?;
        let mut views = self
            .store
            .lock()
            .get_instance_mut(session_key, lease.instance)
            .map(|e| e.subscribe())
            .ok_or_else(|| SessionError::PairingAborted(session_key.to_owned()))?;

        let timeout = self.config.pairing_timeout();
        let started = Instant::now();
        let waited = tokio::time::timeout(
            timeout,
            views.wait_for(|v| outcome_from(session_key, v).is_some()),
        )
        .await
        .map(|r| r.map(|view| (*view).clone()));

        match waited {
            Ok(Ok(view)) => {
                tracing::debug!(
                    session_key = %session_key,
                    state = %view.state,
                    waited = ?started.elapsed(),
                    "pairing settled"
                );
                outcome_from(session_key, &view)
                    .ok_or_else(|| SessionError::PairingAborted(session_key.to_owned()))
            }
            Ok(Err(_)) => {
                tracing::info!(session_key = %session_key, "session closed while waiting for pairing");
                Err(SessionError::PairingAborted(session_key.to_owned()))
            }
            Err(_) => {
                tracing::warn!(
                    session_key = %session_key,
                    timeout_secs = timeout.as_secs(),
                    "no pairing challenge before timeout"
                );
                Err(SessionError::HandshakeTimeout {
                    session_key: session_key.to_owned(),
                    waited_secs: timeout.as_secs(),
                })
            }
        }
    }
}

fn outcome_from(session_key: &str, view: &HandshakeView) -> Option<PairingOutcome> {
    match (view.state, &view.challenge) {
        (SessionState::Ready, _) => Some(PairingOutcome::AlreadyReady {
            session_key: session_key.to_owned(),
        }),
        (SessionState::PairingReady, Some(challenge)) => Some(PairingOutcome::Challenge {
            session_key: session_key.to_owned(),
            challenge: challenge.clone(),
        }),
        _ => None,
    }
}
