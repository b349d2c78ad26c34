//! Read-only views handed out by the manager.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tokio::time::Instant;

use crate::error::SessionError;
use crate::provider::{DeliveryReceipt, InstanceId};
use crate::state::SessionState;
use crate::store::SessionEntry;

/// Coarse status of a session as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    NotInitialized,
    Waiting,
    ChallengeReady,
    Authenticated,
    Disconnected,
}

impl From<SessionState> for StatusKind {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::Uninitialized | SessionState::PairingPending => Self::Waiting,
            SessionState::PairingReady => Self::ChallengeReady,
            SessionState::Authenticated | SessionState::Ready => Self::Authenticated,
            SessionState::Disconnected => Self::Disconnected,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_key: String,
    pub status: StatusKind,
    pub state: Option<SessionState>,
    pub ready: bool,
    pub authenticated: bool,
    pub has_challenge: bool,
    pub instance: Option<InstanceId>,
    pub owner_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub idle_secs: Option<u64>,
}

impl SessionStatus {
    pub(crate) fn not_initialized(session_key: &str) -> Self {
        Self {
            session_key: session_key.to_owned(),
            status: StatusKind::NotInitialized,
            state: None,
            ready: false,
            authenticated: false,
            has_challenge: false,
            instance: None,
            owner_id: None,
            created_at: None,
            last_activity: None,
            idle_secs: None,
        }
    }

    pub(crate) fn from_entry(entry: &SessionEntry, now: Instant) -> Self {
        let state = entry.state();
        Self {
            session_key: entry.session_key.clone(),
            status: state.into(),
            state: Some(state),
            ready: state == SessionState::Ready,
            authenticated: matches!(state, SessionState::Authenticated | SessionState::Ready),
            has_challenge: entry.handshake().challenge().is_some(),
            instance: Some(entry.instance),
            owner_id: entry.owner_id.clone(),
            created_at: Some(entry.created_at),
            last_activity: Some(entry.last_activity_at()),
            idle_secs: Some(entry.idle_for(now).as_secs()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ManagerStats {
    pub live_sessions: usize,
    pub ready_sessions: usize,
    /// Ready and within the staleness window.
    pub healthy_sessions: usize,
    pub pairing_sessions: usize,
    pub disconnected_sessions: usize,
    pub capacity: usize,
    pub available_slots: usize,
    pub recency_len: usize,
    pub inflight_initializations: usize,
    pub active_owner_queues: usize,
}

/// What a pairing request produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PairingOutcome {
    /// A challenge the user must consume (e.g. render as a QR code).
    Challenge {
        session_key: String,
        challenge: String,
    },
    AlreadyReady { session_key: String },
}

impl PairingOutcome {
    pub fn session_key(&self) -> &str {
        match self {
            Self::Challenge { session_key, .. } | Self::AlreadyReady { session_key } => session_key,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SendReport {
    pub session_key: String,
    pub target: String,
    pub resolved_target: String,
    pub deliveries: Vec<DeliveryReceipt>,
}

/// How one message of a bulk send went.
#[derive(Debug, Clone, Serialize)]
pub struct BulkOutcome {
    pub target: String,
    #[serde(serialize_with = "serialize_send_result")]
    pub result: Result<SendReport, SessionError>,
}

impl BulkOutcome {
    pub fn is_sent(&self) -> bool {
        self.result.is_ok()
    }
}

fn serialize_send_result<S: Serializer>(
    result: &Result<SendReport, SessionError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    enum Wire<'a> {
        Sent { report: &'a SendReport },
        Failed { error: String },
    }
    match result {
        Ok(report) => Wire::Sent { report }.serialize(serializer),
        Err(e) => Wire::Failed {
            error: e.to_string(),
        }
        .serialize(serializer),
    }
}

/// Per-message results of a bulk send, in submission order.
#[derive(Debug, Clone, Serialize)]
pub struct BulkReport {
    pub session_key: String,
    pub owner_id: String,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
    pub results: Vec<BulkOutcome>,
}

/// One owner's queue depth alongside the sessions it owns.
#[derive(Debug, Clone, Serialize)]
pub struct OwnerQueueStats {
    pub owner_id: String,
    /// Queued operations that have not started yet.
    pub pending: usize,
    pub sessions: Vec<SessionStatus>,
}

/// A session directory on disk joined with its in-memory status.
#[derive(Debug, Clone, Serialize)]
pub struct PersistedSession {
    pub session_key: String,
    pub path: PathBuf,
    pub owner_id: Option<String>,
    pub exists_in_memory: bool,
    pub status: StatusKind,
}
