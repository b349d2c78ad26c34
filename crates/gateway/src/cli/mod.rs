pub mod config;
pub mod pair;
pub mod send;
pub mod sessions;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use pl_sessions::{SessionManager, SessionState};

/// pairlink: many messaging sessions behind one bounded pool.
#[derive(Debug, Parser)]
#[command(name = "pairlink", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the session manager until interrupted (default when no subcommand is given).
    Serve {
        /// Reopen every session found in the data directory on startup.
        #[arg(long)]
        restore: bool,
    },
    /// Start pairing a session and print the challenge to scan.
    Pair {
        /// Session key to pair.  Minted from `--owner` when omitted.
        #[arg(long)]
        key: Option<String>,
        /// Owner to associate the session with.
        #[arg(long)]
        owner: Option<String>,
        /// Exit after printing the challenge instead of waiting for authentication.
        #[arg(long)]
        no_wait: bool,
    },
    /// Send a message through a previously paired session.
    Send {
        /// Session key to send from.
        #[arg(long)]
        key: String,
        /// Recipient address.
        #[arg(long)]
        to: String,
        /// Message text (used as the caption when images are attached).
        #[arg(long)]
        text: Option<String>,
        /// Files to attach (images and documents).
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,
    },
    /// List sessions persisted in the data directory.
    Sessions {
        /// Only show sessions belonging to this owner.
        #[arg(long)]
        owner: Option<String>,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Open a persisted session and report its status.
    Status {
        /// Session key to inspect.
        key: String,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path in `PL_CONFIG` (or `config.toml`),
/// then apply environment overrides.  Returns the config and the path used.
pub fn load_config() -> anyhow::Result<(pl_domain::config::Config, String)> {
    let config_path = std::env::var("PL_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let mut config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        pl_domain::config::Config::default()
    };
    config.apply_env_overrides();

    Ok((config, config_path))
}

/// Wait until `session_key` reaches [`SessionState::Ready`].
///
/// Fails when the handle leaves the pool or disconnects, or after `limit`.
pub async fn wait_until_ready(
    manager: &SessionManager,
    session_key: &str,
    limit: Duration,
) -> anyhow::Result<()> {
    let mut rx = manager
        .watch(session_key)
        .ok_or_else(|| anyhow::anyhow!("session {session_key} is not live"))?;

    let waited = tokio::time::timeout(
        limit,
        rx.wait_for(|view| {
            matches!(view.state, SessionState::Ready | SessionState::Disconnected)
        }),
    )
    .await;

    match waited {
        Ok(Ok(view)) if view.state == SessionState::Ready => Ok(()),
        Ok(Ok(_)) => anyhow::bail!("session {session_key} disconnected"),
        Ok(Err(_)) => anyhow::bail!("session {session_key} was closed"),
        Err(_) => anyhow::bail!(
            "session {session_key} not ready after {}s",
            limit.as_secs()
        ),
    }
}
