use std::path::PathBuf;

use crate::provider::ProviderError;
use crate::state::SessionState;

/// Errors returned by the session manager.
///
/// Cloneable so a single initialization or pairing outcome can be handed to
/// every caller that joined it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("invalid session key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("no live session for {0}")]
    SessionNotFound(String),

    #[error("session {session_key} is not ready (state: {state})")]
    NotAuthenticated {
        session_key: String,
        state: SessionState,
    },

    #[error("no pairing challenge for {session_key} within {waited_secs}s")]
    HandshakeTimeout { session_key: String, waited_secs: u64 },

    #[error("session {0} was closed while waiting for pairing")]
    PairingAborted(String),

    #[error("target {0} is not registered on the network")]
    TargetNotRegistered(String),

    #[error("message has neither text nor a supported attachment")]
    EmptyMessage,

    #[error("provider error for {session_key}: {source}")]
    Provider {
        session_key: String,
        source: ProviderError,
    },

    #[error("bulk send needs at least one message")]
    EmptyBatch,

    #[error("bulk send of {count} messages exceeds the limit of {max}")]
    BatchTooLarge { count: usize, max: usize },

    #[error("no persisted session at {}", .0.display())]
    PersistedSessionMissing(PathBuf),

    #[error("failed to scan session directory: {0}")]
    Scan(String),

    #[error("queued operation for owner {0} was dropped before completing")]
    QueueDropped(String),

    #[error("session manager is shutting down")]
    ShuttingDown,
}

impl SessionError {
    pub(crate) fn provider(session_key: &str, source: ProviderError) -> Self {
        Self::Provider {
            session_key: session_key.to_owned(),
            source,
        }
    }

    /// Whether repeating the same call later may succeed.
    ///
    /// Timeouts and provider failures are transient; everything else needs
    /// the caller to change something first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout { .. } | Self::PairingAborted(_) | Self::Provider { .. }
        )
    }
}

impl From<SessionError> for pl_domain::error::Error {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::HandshakeTimeout { .. } => Self::Timeout(e.to_string()),
            other => Self::Other(other.to_string()),
        }
    }
}
