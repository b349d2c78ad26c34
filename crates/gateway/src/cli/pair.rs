//! `pairlink pair`: start a handshake and follow it to authentication.

use anyhow::Context;

use pl_domain::config::Config;
use pl_sessions::{mint_session_key, PairingOutcome, SessionManager, SessionState};

use crate::bootstrap;

pub async fn pair(
    config: &Config,
    key: Option<String>,
    owner: Option<String>,
    no_wait: bool,
) -> anyhow::Result<()> {
    let session_key = match (key, owner.as_deref()) {
        (Some(key), _) => key,
        (None, Some(owner)) => mint_session_key(owner).context("minting session key")?,
        (None, None) => anyhow::bail!("pass --key or --owner"),
    };

    let manager = bootstrap::build_manager(config)?;
    let result = run(&manager, config, &session_key, owner.as_deref(), no_wait).await;
    manager.shutdown().await;
    result
}

async fn run(
    manager: &SessionManager,
    config: &Config,
    session_key: &str,
    owner: Option<&str>,
    no_wait: bool,
) -> anyhow::Result<()> {
    let outcome = manager
        .request_pairing(session_key, owner)
        .await
        .with_context(|| format!("pairing {session_key}"))?;

    let mut last = match outcome {
        PairingOutcome::AlreadyReady { .. } => {
            println!("{session_key}: already paired");
            return Ok(());
        }
        PairingOutcome::Challenge { challenge, .. } => {
            println!("session: {session_key}");
            println!("challenge: {challenge}");
            challenge
        }
    };
    if no_wait {
        return Ok(());
    }

    let mut rx = manager
        .watch(session_key)
        .ok_or_else(|| anyhow::anyhow!("session {session_key} was evicted"))?;
    let deadline = tokio::time::Instant::now() + config.sessions.staleness();

    loop {
        let view = rx.borrow_and_update().clone();
        match view.state {
            SessionState::Authenticated | SessionState::Ready => {
                println!("{session_key}: authenticated");
                return Ok(());
            }
            SessionState::Disconnected => anyhow::bail!("{session_key}: disconnected while pairing"),
            _ => {}
        }
        // A new challenge replaces the one already shown.
        if let Some(challenge) = view.challenge.filter(|c| *c != last) {
            println!("challenge: {challenge}");
            last = challenge;
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    anyhow::bail!("{session_key}: session closed before authenticating");
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                anyhow::bail!("{session_key}: not authenticated in time");
            }
            _ = tokio::signal::ctrl_c() => {
                anyhow::bail!("{session_key}: interrupted");
            }
        }
    }
}
