use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use pl_domain::notify::ConnectedNotice;
use pl_domain::trace::TraceEvent;

use super::Inner;
use crate::provider::{HandleEvent, HandleEventEnvelope};
use crate::state::{SessionState, Transition};

/// Apply handle events one at a time, in arrival order.
pub(super) async fn run_event_loop(
    inner: Weak<Inner>,
    mut events: mpsc::UnboundedReceiver<HandleEventEnvelope>,
    shutdown: CancellationToken,
) {
    loop {
        let envelope = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = events.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.apply_event(envelope);
    }
    tracing::debug!("handle event loop stopped");
}

impl Inner {
    fn apply_event(self: &Arc<Self>, envelope: HandleEventEnvelope) {
        let HandleEventEnvelope {
            session_key,
            instance,
            event,
        } = envelope;

        let (transition, owner_id) = {
            let mut store = self.store.lock();
            let Some(entry) = store.get_instance_mut(&session_key, instance) else {
                tracing::debug!(
                    session_key = %session_key,
                    instance,
                    ?event,
                    "dropping event from a handle that is no longer live"
                );
                return;
            };
            let transition = entry.transition(|hs| hs.apply(&event));
            let owner_id = entry.owner_id.clone();
            store.touch(&session_key);
            (transition, owner_id)
        };

        let (from, to) = match transition {
            Transition::Ignored { state, reason } => {
                tracing::debug!(session_key = %session_key, instance, %state, reason, "handle event ignored");
                return;
            }
            Transition::Moved { from, to } => (from, to),
        };
        tracing::debug!(session_key = %session_key, instance, %from, %to, "handshake transition");

        match &event {
            HandleEvent::PairingChallenge(_) => {
                TraceEvent::PairingChallengeIssued {
                    session_key: session_key.clone(),
                    instance,
                }
                .emit();
            }
            HandleEvent::Authenticated => {
                TraceEvent::SessionAuthenticated {
                    session_key: session_key.clone(),
                    instance,
                    owner_id: owner_id.clone(),
                }
                .emit();
            }
            HandleEvent::Ready => {
                tracing::info!(session_key = %session_key, instance, "session ready");
                TraceEvent::SessionReady {
                    session_key: session_key.clone(),
                    instance,
                }
                .emit();
            }
            HandleEvent::AuthFailure(reason) => {
                tracing::warn!(session_key = %session_key, instance, reason = %reason, "authentication failed; awaiting a new challenge");
            }
            HandleEvent::Disconnected(reason) => {
                tracing::warn!(session_key = %session_key, instance, reason = %reason, "handle disconnected");
                TraceEvent::SessionDisconnected {
                    session_key: session_key.clone(),
                    instance,
                    reason: reason.clone(),
                }
                .emit();
            }
        }

        // A consumed challenge is what gets billed; restored sessions that
        // authenticate without one are not.
        let challenge_consumed = from == SessionState::PairingReady
            && matches!(to, SessionState::Authenticated | SessionState::Ready);
        if challenge_consumed {
            let notifier = self.notifier.clone();
            let notice = ConnectedNotice {
                session_key: session_key.clone(),
                owner_id,
            };
            self.notify_in_background("session_connected", &session_key, async move {
                notifier.session_connected(&notice).await
            });
        }
    }
}
