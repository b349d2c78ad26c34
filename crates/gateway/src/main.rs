use std::time::Duration;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use pl_domain::config::{Config, LogFormat, ObservabilityConfig};
use pl_gateway::bootstrap;
use pl_gateway::cli::{Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None => {
            let (config, _) = pl_gateway::cli::load_config()?;
            init_tracing(&config.observability);
            serve(config, false).await
        }
        Some(Command::Serve { restore }) => {
            let (config, _) = pl_gateway::cli::load_config()?;
            init_tracing(&config.observability);
            serve(config, restore).await
        }
        Some(Command::Pair { key, owner, no_wait }) => {
            init_cli_tracing();
            let (config, _) = pl_gateway::cli::load_config()?;
            pl_gateway::cli::pair::pair(&config, key, owner, no_wait).await
        }
        Some(Command::Send {
            key,
            to,
            text,
            attachments,
        }) => {
            init_cli_tracing();
            let (config, _) = pl_gateway::cli::load_config()?;
            pl_gateway::cli::send::send(&config, key, to, text, attachments).await
        }
        Some(Command::Sessions { owner, json }) => {
            init_cli_tracing();
            let (config, _) = pl_gateway::cli::load_config()?;
            pl_gateway::cli::sessions::list(&config, owner.as_deref(), json)
        }
        Some(Command::Status { key }) => {
            init_cli_tracing();
            let (config, _) = pl_gateway::cli::load_config()?;
            pl_gateway::cli::sessions::status(&config, &key).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = pl_gateway::cli::load_config()?;
            if !pl_gateway::cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _) = pl_gateway::cli::load_config()?;
            pl_gateway::cli::config::show(&config)
        }
        Some(Command::Version) => {
            println!("pairlink {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Tracing for the long-running `serve` command.
fn init_tracing(obs: &ObservabilityConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&obs.default_filter));

    match obs.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .init(),
    }
}

/// Initialize compact stderr-only tracing for CLI one-shot commands.
///
/// Defaults to `warn` level so diagnostic output does not pollute stdout.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn serve(config: Config, restore: bool) -> anyhow::Result<()> {
    tracing::info!("pairlink starting");
    for issue in config.validate() {
        tracing::warn!(%issue, "config issue");
    }

    let manager = bootstrap::build_manager(&config)?;

    if restore {
        let persisted = manager.persisted_sessions()?;
        let limit = config.sessions.capacity;
        if persisted.len() > limit {
            tracing::warn!(found = persisted.len(), capacity = limit, "more persisted sessions than capacity; restoring the first ones");
        }
        for session in persisted.into_iter().take(limit) {
            match manager.load_session(&session.session_key).await {
                Ok(lease) => {
                    tracing::info!(session_key = %lease.session_key(), instance = lease.instance(), "restored session");
                }
                Err(e) => {
                    tracing::warn!(session_key = %session.session_key, error = %e, "failed to restore session");
                }
            }
        }
    }

    let report_every = Duration::from_secs(config.sessions.sweep_interval_secs.max(1));
    let mut ticker = tokio::time::interval(report_every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stats = manager.stats();
                tracing::info!(
                    live = stats.live_sessions,
                    ready = stats.ready_sessions,
                    pairing = stats.pairing_sessions,
                    available_slots = stats.available_slots,
                    owner_queues = stats.active_owner_queues,
                    "session pool"
                );
            }
            _ = &mut shutdown => break,
        }
    }

    manager.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}

/// Wait for SIGINT (or SIGTERM on unix).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                let _ = ctrl_c.await;
                tracing::info!("received SIGINT, shutting down");
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("received SIGINT, shutting down");
    }
}
