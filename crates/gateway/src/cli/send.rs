//! `pairlink send`: deliver one message through a persisted session.

use std::path::PathBuf;

use anyhow::Context;

use pl_domain::config::Config;
use pl_sessions::{owner_of, OutboundMessage, SessionManager};

use crate::bootstrap;
use crate::media::load_attachment;

pub async fn send(
    config: &Config,
    session_key: String,
    to: String,
    text: Option<String>,
    attachments: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let mut message = OutboundMessage {
        text,
        attachments: Vec::new(),
    };
    for path in &attachments {
        message = message.with_attachment(load_attachment(path)?);
    }
    if message.plan().is_empty() {
        anyhow::bail!("nothing to send: pass --text or a supported --attach");
    }

    let manager = bootstrap::build_manager(config)?;
    let result = run(&manager, config, &session_key, &to, message).await;
    manager.shutdown().await;
    result
}

async fn run(
    manager: &SessionManager,
    config: &Config,
    session_key: &str,
    to: &str,
    message: OutboundMessage,
) -> anyhow::Result<()> {
    manager
        .load_session(session_key)
        .await
        .with_context(|| format!("opening {session_key}"))?;
    super::wait_until_ready(manager, session_key, config.sessions.pairing_timeout()).await?;

    // Owner-keyed sessions go through that owner's queue.
    let report = match owner_of(session_key) {
        Some(owner) => {
            manager
                .send_queued(owner, session_key, to, message)
                .await
        }
        None => manager.send(session_key, to, &message).await,
    }
    .with_context(|| format!("sending from {session_key} to {to}"))?;

    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| anyhow::anyhow!("serializing report: {e}"))?;
    println!("{json}");
    Ok(())
}
