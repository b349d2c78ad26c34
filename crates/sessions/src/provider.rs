//! The seam between the pool and the messaging network.
//!
//! A [`SessionProvider`] opens one [`SessionHandle`] per session key.  The
//! handle reports lifecycle changes asynchronously through the [`EventSink`]
//! it was opened with; the manager tags every event with the handle's
//! instance id so events from a replaced handle are ignored.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::outbound::Attachment;

/// Monotonic id distinguishing successive handles for the same key.
pub type InstanceId = u64;

/// Failure reported by a provider or one of its handles.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Lifecycle notification raised by a handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum HandleEvent {
    /// A pairing challenge (QR payload) the user must scan.
    PairingChallenge(String),
    Authenticated,
    Ready,
    AuthFailure(String),
    Disconnected(String),
}

/// The provider's own view of its connection, independent of the
/// handshake state the manager tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Opening,
    Pairing,
    Connected,
    Conflict,
    Closed,
    Unknown,
}

/// Everything a provider needs to open a handle.
#[derive(Debug, Clone)]
pub struct HandleSpec {
    pub session_key: String,
    /// Directory holding (or receiving) the session's pairing material.
    pub data_dir: PathBuf,
}

/// A handle event tagged with the handle that raised it.
#[derive(Debug, Clone)]
pub struct HandleEventEnvelope {
    pub session_key: String,
    pub instance: InstanceId,
    pub event: HandleEvent,
}

/// Where a handle reports its lifecycle events.
#[derive(Debug, Clone)]
pub struct EventSink {
    session_key: String,
    instance: InstanceId,
    tx: mpsc::UnboundedSender<HandleEventEnvelope>,
}

impl EventSink {
    pub(crate) fn new(
        session_key: &str,
        instance: InstanceId,
        tx: mpsc::UnboundedSender<HandleEventEnvelope>,
    ) -> Self {
        Self {
            session_key: session_key.to_owned(),
            instance,
            tx,
        }
    }

    /// A detached sink plus the receiving end, for driving a provider
    /// outside a manager.
    pub fn channel(
        session_key: &str,
        instance: InstanceId,
    ) -> (Self, mpsc::UnboundedReceiver<HandleEventEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(session_key, instance, tx), rx)
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Report an event.  Returns `false` once the manager has gone away.
    pub fn emit(&self, event: HandleEvent) -> bool {
        self.tx
            .send(HandleEventEnvelope {
                session_key: self.session_key.clone(),
                instance: self.instance,
                event,
            })
            .is_ok()
    }
}

/// One piece of content delivered in a single provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    Media(Attachment),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    #[serde(default)]
    pub message_id: Option<String>,
}

/// Opens handles against the messaging network.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Open a handle for `spec.session_key`.
    ///
    /// The handle must not emit events before [`SessionHandle::initialize`]
    /// is called; the manager registers it between the two calls.
    async fn connect(
        &self,
        spec: HandleSpec,
        events: EventSink,
    ) -> Result<Arc<dyn SessionHandle>, ProviderError>;
}

/// A live connection for one session key.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    /// Start the handshake.  Pairing challenges and readiness arrive later
    /// as events.
    async fn initialize(&self) -> Result<(), ProviderError>;

    async fn send(
        &self,
        target: &str,
        content: &MessageContent,
        options: &SendOptions,
    ) -> Result<DeliveryReceipt, ProviderError>;

    /// Map a user-facing address to the network's canonical id, or `None`
    /// when the address is not registered.
    async fn resolve_target(&self, address: &str) -> Result<Option<String>, ProviderError>;

    async fn connection_state(&self) -> Result<ConnectionState, ProviderError>;

    /// Tear the handle down.  Called at most once per handle by the manager.
    async fn destroy(&self) -> Result<(), ProviderError>;
}
