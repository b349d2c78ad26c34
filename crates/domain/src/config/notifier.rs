use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Association / billing notifier
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// When `false` the gateway wires a no-op notifier.
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Environment variable holding the shared secret sent with every call.
    #[serde(default = "d_secret_env")]
    pub secret_env: String,
    #[serde(default = "d_5000")]
    pub timeout_ms: u64,
    #[serde(default = "d_associate_path")]
    pub associate_path: String,
    #[serde(default = "d_connected_path")]
    pub connected_path: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: d_base_url(),
            secret_env: d_secret_env(),
            timeout_ms: 5000,
            associate_path: d_associate_path(),
            connected_path: d_connected_path(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_base_url() -> String {
    "http://localhost:8080".into()
}
fn d_secret_env() -> String {
    "PL_NOTIFIER_SECRET".into()
}
fn d_5000() -> u64 {
    5000
}
fn d_associate_path() -> String {
    "/api/associate-session".into()
}
fn d_connected_path() -> String {
    "/api/session-connected".into()
}
