use serde::Serialize;

/// Structured trace events emitted across all pairlink crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionCreated {
        session_key: String,
        instance: u64,
        live_sessions: usize,
    },
    SessionReused {
        session_key: String,
        instance: u64,
    },
    SessionEvicted {
        session_key: String,
        instance: u64,
        reason: String,
        idle_secs: u64,
    },
    PairingChallengeIssued {
        session_key: String,
        instance: u64,
    },
    SessionAuthenticated {
        session_key: String,
        instance: u64,
        owner_id: Option<String>,
    },
    SessionReady {
        session_key: String,
        instance: u64,
    },
    SessionDisconnected {
        session_key: String,
        instance: u64,
        reason: String,
    },
    NotificationSent {
        endpoint: String,
        session_key: String,
        status: u16,
        duration_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "pl_event");
    }
}
