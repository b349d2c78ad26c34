#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use pl_domain::config::Config;
use pl_domain::error::{Error, Result as DomainResult};
use pl_domain::notify::{Association, AssociationNotifier, ConnectedNotice};
use pl_sessions::{
    ConnectionState, DeliveryReceipt, EventSink, HandleEvent, HandleSpec, InstanceId,
    MessageContent, ProviderError, SendOptions, SessionHandle, SessionManager, SessionProvider,
};

// ── Scripted provider ───────────────────────────────────────────────

/// Behaviour of handles opened after the script is set.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub connect_delay: Duration,
    pub init_delay: Duration,
    /// Emit a challenge this long after `initialize`.
    pub challenge_after: Option<Duration>,
    pub fail_connect: bool,
    pub fail_initialize: bool,
    pub fail_destroy: bool,
    pub unregistered: Vec<String>,
}

#[derive(Debug, Default)]
pub struct Log {
    pub attempts: usize,
    pub connects: Vec<(String, InstanceId)>,
    pub destroyed: Vec<(String, InstanceId)>,
    pub sent: Vec<(String, String, MessageContent, SendOptions)>,
    pub live: usize,
    pub peak_live: usize,
}

#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<Script>,
    log: Arc<Mutex<Log>>,
    sinks: Mutex<HashMap<(String, InstanceId), EventSink>>,
}

impl ScriptedProvider {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            ..Default::default()
        })
    }

    pub fn set_script(&self, f: impl FnOnce(&mut Script)) {
        f(&mut self.script.lock());
    }

    /// Emit through the newest handle opened for `key`.
    pub fn emit(&self, key: &str, event: HandleEvent) -> bool {
        let sinks = self.sinks.lock();
        let newest = sinks
            .iter()
            .filter(|((k, _), _)| k == key)
            .max_by_key(|((_, instance), _)| *instance)
            .map(|(_, sink)| sink.clone());
        drop(sinks);
        newest.is_some_and(|sink| sink.emit(event))
    }

    pub fn emit_from(&self, key: &str, instance: InstanceId, event: HandleEvent) -> bool {
        let sink = self.sinks.lock().get(&(key.to_owned(), instance)).cloned();
        sink.is_some_and(|sink| sink.emit(event))
    }

    pub fn attempts(&self) -> usize {
        self.log.lock().attempts
    }

    pub fn connects(&self, key: &str) -> usize {
        self.log.lock().connects.iter().filter(|(k, _)| k == key).count()
    }

    pub fn total_connects(&self) -> usize {
        self.log.lock().connects.len()
    }

    pub fn destroyed(&self) -> Vec<(String, InstanceId)> {
        self.log.lock().destroyed.clone()
    }

    pub fn destroyed_keys(&self) -> Vec<String> {
        self.log.lock().destroyed.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn sent(&self) -> Vec<(String, String, MessageContent, SendOptions)> {
        self.log.lock().sent.clone()
    }

    pub fn peak_live(&self) -> usize {
        self.log.lock().peak_live
    }
}

#[async_trait]
impl SessionProvider for ScriptedProvider {
    async fn connect(
        &self,
        spec: HandleSpec,
        events: EventSink,
    ) -> Result<Arc<dyn SessionHandle>, ProviderError> {
        let script = self.script.lock().clone();
        self.log.lock().attempts += 1;
        pause(script.connect_delay).await;
        if script.fail_connect {
            return Err(ProviderError::new("connect refused"));
        }

        {
            let mut log = self.log.lock();
            log.connects.push((spec.session_key.clone(), events.instance()));
            log.live += 1;
            log.peak_live = log.peak_live.max(log.live);
        }
        self.sinks
            .lock()
            .insert((spec.session_key.clone(), events.instance()), events.clone());

        Ok(Arc::new(ScriptedHandle {
            key: spec.session_key,
            events,
            script,
            log: self.log.clone(),
        }))
    }
}

struct ScriptedHandle {
    key: String,
    events: EventSink,
    script: Script,
    log: Arc<Mutex<Log>>,
}

#[async_trait]
impl SessionHandle for ScriptedHandle {
    async fn initialize(&self) -> Result<(), ProviderError> {
        pause(self.script.init_delay).await;
        if self.script.fail_initialize {
            return Err(ProviderError::new("browser failed to launch"));
        }
        if let Some(after) = self.script.challenge_after {
            let events = self.events.clone();
            let challenge = format!("qr:{}:{}", self.key, events.instance());
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                events.emit(HandleEvent::PairingChallenge(challenge));
            });
        }
        Ok(())
    }

    async fn send(
        &self,
        target: &str,
        content: &MessageContent,
        options: &SendOptions,
    ) -> Result<DeliveryReceipt, ProviderError> {
        let mut log = self.log.lock();
        log.sent.push((self.key.clone(), target.to_owned(), content.clone(), options.clone()));
        Ok(DeliveryReceipt {
            message_id: Some(format!("m{}", log.sent.len())),
        })
    }

    async fn resolve_target(&self, address: &str) -> Result<Option<String>, ProviderError> {
        if self.script.unregistered.iter().any(|a| a == address) {
            return Ok(None);
        }
        Ok(Some(format!("{address}@c.us")))
    }

    async fn connection_state(&self) -> Result<ConnectionState, ProviderError> {
        Ok(ConnectionState::Connected)
    }

    async fn destroy(&self) -> Result<(), ProviderError> {
        let mut log = self.log.lock();
        log.destroyed.push((self.key.clone(), self.events.instance()));
        log.live -= 1;
        if self.script.fail_destroy {
            return Err(ProviderError::new("already closed"));
        }
        Ok(())
    }
}

// ── Recording notifier ──────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    pub fail: bool,
    pub associations: Mutex<Vec<(String, String)>>,
    pub connected: Mutex<Vec<(String, Option<String>)>>,
}

impl RecordingNotifier {
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }
}

#[async_trait]
impl AssociationNotifier for RecordingNotifier {
    async fn associate(&self, association: &Association) -> DomainResult<()> {
        self.associations
            .lock()
            .push((association.owner_id.clone(), association.session_key.clone()));
        if self.fail {
            return Err(Error::Http("503 Service Unavailable".into()));
        }
        Ok(())
    }

    async fn session_connected(&self, notice: &ConnectedNotice) -> DomainResult<()> {
        self.connected
            .lock()
            .push((notice.session_key.clone(), notice.owner_id.clone()));
        if self.fail {
            return Err(Error::Http("503 Service Unavailable".into()));
        }
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

async fn pause(d: Duration) {
    if !d.is_zero() {
        tokio::time::sleep(d).await;
    }
}

pub fn config(capacity: usize, data_dir: &Path) -> Config {
    let mut config = Config::default();
    config.sessions.capacity = capacity;
    config.sessions.data_dir = data_dir.to_path_buf();
    config
}

pub fn start(
    config: &Config,
    provider: &Arc<ScriptedProvider>,
    notifier: &Arc<RecordingNotifier>,
) -> SessionManager {
    SessionManager::start(config, provider.clone(), notifier.clone())
}

/// Let the event loop and spawned notifications catch up.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub async fn make_ready(provider: &ScriptedProvider, key: &str) {
    assert!(provider.emit(key, HandleEvent::Authenticated));
    assert!(provider.emit(key, HandleEvent::Ready));
    settle().await;
}
