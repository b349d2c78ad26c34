//! Outbound association / billing notifications.
//!
//! The session manager calls these fire-and-forget: a failure is logged by
//! the caller and never changes session state.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

/// Payload linking a session to the owner that requested it.
#[derive(Debug, Clone, Serialize)]
pub struct Association {
    pub owner_id: String,
    pub session_key: String,
}

/// Payload sent once a pairing challenge has been consumed.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectedNotice {
    pub session_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

/// External service told about owner associations and successful pairings.
#[async_trait]
pub trait AssociationNotifier: Send + Sync {
    /// Record that `owner_id` owns `session_key`.
    async fn associate(&self, association: &Association) -> Result<()>;

    /// Report that a session authenticated (used for billing).
    async fn session_connected(&self, notice: &ConnectedNotice) -> Result<()>;
}

/// Notifier that accepts everything and does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl AssociationNotifier for NoopNotifier {
    async fn associate(&self, _association: &Association) -> Result<()> {
        Ok(())
    }

    async fn session_connected(&self, _notice: &ConnectedNotice) -> Result<()> {
        Ok(())
    }
}
