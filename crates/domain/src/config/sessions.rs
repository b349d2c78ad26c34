use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session pool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Limits and timers for the session pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Maximum number of live provider handles.  Admitting one more evicts
    /// the least-recently-active session.
    #[serde(default = "d_capacity")]
    pub capacity: usize,

    /// A session idle for longer than this is considered abandoned and is
    /// evicted by the health sweeper.
    #[serde(default = "d_staleness_secs")]
    pub staleness_secs: u64,

    /// How often the health sweeper runs.
    #[serde(default = "d_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// How long a pairing request waits for a challenge (or readiness)
    /// before failing with a handshake timeout.
    #[serde(default = "d_pairing_timeout_secs")]
    pub pairing_timeout_secs: u64,

    /// How long a resolved initialization stays shared with late callers
    /// before the in-flight marker is dropped.
    #[serde(default = "d_init_grace_ms")]
    pub init_grace_ms: u64,

    /// Root directory holding one pairing-material directory per session.
    #[serde(default = "d_data_dir")]
    pub data_dir: PathBuf,

    /// Prefix of each per-session directory under `data_dir`.
    #[serde(default = "d_dir_prefix")]
    pub dir_prefix: String,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            capacity: d_capacity(),
            staleness_secs: d_staleness_secs(),
            sweep_interval_secs: d_sweep_interval_secs(),
            pairing_timeout_secs: d_pairing_timeout_secs(),
            init_grace_ms: d_init_grace_ms(),
            data_dir: d_data_dir(),
            dir_prefix: d_dir_prefix(),
        }
    }
}

impl SessionsConfig {
    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_secs(self.pairing_timeout_secs)
    }

    pub fn init_grace(&self) -> Duration {
        Duration::from_millis(self.init_grace_ms)
    }

    /// Directory holding the persisted pairing material for `session_key`.
    pub fn session_dir(&self, session_key: &str) -> PathBuf {
        self.data_dir
            .join(format!("{}{}", self.dir_prefix, session_key))
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_capacity() -> usize {
    10
}
fn d_staleness_secs() -> u64 {
    30 * 60
}
fn d_sweep_interval_secs() -> u64 {
    5 * 60
}
fn d_pairing_timeout_secs() -> u64 {
    30
}
fn d_init_grace_ms() -> u64 {
    2_000
}
fn d_data_dir() -> PathBuf {
    PathBuf::from("./sessions")
}
fn d_dir_prefix() -> String {
    "session-".into()
}
