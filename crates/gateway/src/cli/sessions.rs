//! `pairlink sessions` and `pairlink status`.

use anyhow::Context;
use serde::Serialize;

use pl_domain::config::Config;
use pl_sessions::{owner_of, persisted, ConnectionState, SessionStatus};

use crate::bootstrap;

#[derive(Debug, Serialize)]
struct Listed {
    session_key: String,
    owner_id: Option<String>,
    path: String,
}

/// List session directories without opening any of them.
pub fn list(config: &Config, owner: Option<&str>, json: bool) -> anyhow::Result<()> {
    let dirs = persisted::scan(&config.sessions.data_dir, &config.sessions.dir_prefix)
        .with_context(|| format!("scanning {}", config.sessions.data_dir.display()))?;

    let listed: Vec<Listed> = dirs
        .into_iter()
        .map(|d| Listed {
            owner_id: owner_of(&d.session_key).map(str::to_owned),
            path: d.path.display().to_string(),
            session_key: d.session_key,
        })
        .filter(|l| owner.is_none() || l.owner_id.as_deref() == owner)
        .collect();

    if json {
        let out = serde_json::to_string_pretty(&listed)
            .map_err(|e| anyhow::anyhow!("serializing sessions: {e}"))?;
        println!("{out}");
        return Ok(());
    }

    if listed.is_empty() {
        println!("no sessions in {}", config.sessions.data_dir.display());
        return Ok(());
    }
    for l in &listed {
        println!(
            "{:<40} {:<16} {}",
            l.session_key,
            l.owner_id.as_deref().unwrap_or("-"),
            l.path
        );
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusReport {
    #[serde(flatten)]
    status: SessionStatus,
    connection: Option<ConnectionState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Open a persisted session, give it one pairing window to come up, and
/// report where it got to.
pub async fn status(config: &Config, session_key: &str) -> anyhow::Result<()> {
    let manager = bootstrap::build_manager(config)?;

    let mut error = None;
    match manager.load_session(session_key).await {
        Ok(_) => {
            if let Err(e) =
                super::wait_until_ready(&manager, session_key, config.sessions.pairing_timeout())
                    .await
            {
                error = Some(e.to_string());
            }
        }
        Err(e) => error = Some(e.to_string()),
    }

    let connection = manager.connection_state(session_key).await.ok();
    let report = StatusReport {
        status: manager.status(session_key),
        connection,
        error,
    };
    manager.shutdown().await;

    let out = serde_json::to_string_pretty(&report)
        .map_err(|e| anyhow::anyhow!("serializing status: {e}"))?;
    println!("{out}");
    Ok(())
}
