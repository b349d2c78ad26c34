//! Builds the session manager and its collaborators from config.

use std::sync::Arc;

use anyhow::Context;

use pl_bridge::StdioProvider;
use pl_domain::config::Config;
use pl_domain::notify::{AssociationNotifier, NoopNotifier};
use pl_notifier::HttpNotifier;
use pl_sessions::SessionManager;

/// Pick the notifier: HTTP when enabled, otherwise a no-op.
pub fn build_notifier(config: &Config) -> anyhow::Result<Arc<dyn AssociationNotifier>> {
    if !config.notifier.enabled {
        tracing::info!("association notifier disabled");
        return Ok(Arc::new(NoopNotifier));
    }
    let notifier = HttpNotifier::new(&config.notifier).context("building association notifier")?;
    tracing::info!(
        base_url = %config.notifier.base_url,
        timeout_ms = config.notifier.timeout_ms,
        "association notifier ready"
    );
    Ok(Arc::new(notifier))
}

/// Start a manager backed by the stdio helper bridge.
///
/// Must run inside a tokio runtime: the manager spawns its event loop and
/// sweeper immediately.
pub fn build_manager(config: &Config) -> anyhow::Result<SessionManager> {
    if config.bridge.command.is_empty() {
        anyhow::bail!("bridge.command is not set; configure the helper in [bridge]");
    }
    std::fs::create_dir_all(&config.sessions.data_dir).with_context(|| {
        format!("creating session data dir {}", config.sessions.data_dir.display())
    })?;

    let provider = Arc::new(StdioProvider::new(config.bridge.clone()));
    let notifier = build_notifier(config)?;
    let manager = SessionManager::start(config, provider, notifier);

    tracing::info!(
        capacity = config.sessions.capacity,
        data_dir = %config.sessions.data_dir.display(),
        helper = %config.bridge.command,
        "session manager started"
    );
    Ok(manager)
}
