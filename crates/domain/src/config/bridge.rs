use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How to launch the helper process that speaks the messaging network's
/// protocol on behalf of one session.
///
/// The helper is spawned once per live session with the session key and
/// its pairing-material directory appended to `args`
/// (`--session <key> --data-dir <dir>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Executable to run (e.g. `node`).  Empty means "not configured".
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Per-request timeout for calls into the helper.
    #[serde(default = "d_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            request_timeout_secs: d_request_timeout_secs(),
        }
    }
}

fn d_request_timeout_secs() -> u64 {
    30
}
