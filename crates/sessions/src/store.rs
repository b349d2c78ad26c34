//! In-memory table of live sessions.
//!
//! Each entry owns one capacity permit, so the number of entries can never
//! exceed the pool's capacity.  `last_activity` is only updated through
//! [`SessionStore::touch`], which keeps the recency list in step with it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, OwnedSemaphorePermit};
use tokio::time::Instant;

use crate::provider::{InstanceId, SessionHandle};
use crate::recency::RecencyList;
use crate::state::{Handshake, HandshakeView, SessionState, Transition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) struct SessionEntry {
    pub session_key: String,
    pub instance: InstanceId,
    pub handle: Arc<dyn SessionHandle>,
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    handshake: Handshake,
    last_activity: Instant,
    last_activity_at: DateTime<Utc>,
    view_tx: watch::Sender<HandshakeView>,
    _slot: OwnedSemaphorePermit,
}

impl SessionEntry {
    pub fn new(
        session_key: &str,
        instance: InstanceId,
        handle: Arc<dyn SessionHandle>,
        slot: OwnedSemaphorePermit,
    ) -> Self {
        let handshake = Handshake::new();
        let (view_tx, _) = watch::channel(handshake.view());
        Self {
            session_key: session_key.to_owned(),
            instance,
            handle,
            owner_id: None,
            created_at: Utc::now(),
            handshake,
            last_activity: Instant::now(),
            last_activity_at: Utc::now(),
            view_tx,
            _slot: slot,
        }
    }

    pub fn state(&self) -> SessionState {
        self.handshake.state()
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// Apply a handshake change and publish it to pairing waiters.
    pub fn transition(&mut self, f: impl FnOnce(&mut Handshake) -> Transition) -> Transition {
        let t = f(&mut self.handshake);
        if let Transition::Moved { .. } = t {
            self.view_tx.send_replace(self.handshake.view());
        }
        t
    }

    pub fn subscribe(&self) -> watch::Receiver<HandshakeView> {
        self.view_tx.subscribe()
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    pub fn is_stale(&self, now: Instant, staleness: Duration) -> bool {
        self.idle_for(now) > staleness
    }

    /// Ready and recently active.
    pub fn is_healthy(&self, now: Instant, staleness: Duration) -> bool {
        self.state() == SessionState::Ready && !self.is_stale(now, staleness)
    }

    /// Worth handing back to `acquire` instead of opening a new handle:
    /// fresh and not disconnected.
    pub fn is_reusable(&self, now: Instant, staleness: Duration) -> bool {
        self.state() != SessionState::Disconnected && !self.is_stale(now, staleness)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub(crate) struct SessionStore {
    entries: HashMap<String, SessionEntry>,
    recency: RecencyList,
}

impl SessionStore {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn recency_len(&self) -> usize {
        self.recency.len()
    }

    pub fn get(&self, session_key: &str) -> Option<&SessionEntry> {
        self.entries.get(session_key)
    }

    pub fn get_mut(&mut self, session_key: &str) -> Option<&mut SessionEntry> {
        self.entries.get_mut(session_key)
    }

    /// Entry for `session_key` only if it is still `instance`.
    pub fn get_instance_mut(
        &mut self,
        session_key: &str,
        instance: InstanceId,
    ) -> Option<&mut SessionEntry> {
        self.entries
            .get_mut(session_key)
            .filter(|e| e.instance == instance)
    }

    pub fn values(&self) -> impl Iterator<Item = &SessionEntry> {
        self.entries.values()
    }

    /// Entries from most to least recently active.
    pub fn recent_first(&self) -> Vec<&SessionEntry> {
        let mut ordered: Vec<_> = self
            .recency
            .iter_oldest_first()
            .filter_map(|k| self.entries.get(k))
            .collect();
        ordered.reverse();
        ordered
    }

    /// Insert a new entry as the most recently active.  Returns the entry
    /// it replaced, if any.
    pub fn insert(&mut self, entry: SessionEntry) -> Option<SessionEntry> {
        let key = entry.session_key.clone();
        self.recency.touch(&key);
        self.entries.insert(key, entry)
    }

    pub fn remove(&mut self, session_key: &str) -> Option<SessionEntry> {
        self.recency.remove(session_key);
        self.entries.remove(session_key)
    }

    /// Remove `session_key` only if it is still `instance`.
    pub fn remove_instance(
        &mut self,
        session_key: &str,
        instance: InstanceId,
    ) -> Option<SessionEntry> {
        match self.entries.get(session_key) {
            Some(e) if e.instance == instance => self.remove(session_key),
            _ => None,
        }
    }

    /// Refresh activity for `session_key`.  Returns `false` when absent.
    pub fn touch(&mut self, session_key: &str) -> bool {
        let Some(entry) = self.entries.get_mut(session_key) else {
            return false;
        };
        entry.last_activity = Instant::now();
        entry.last_activity_at = Utc::now();
        self.recency.touch(session_key);
        true
    }

    /// Remove and return the least recently active entry.
    pub fn pop_least_recent(&mut self) -> Option<SessionEntry> {
        loop {
            let key = self.recency.least_recent()?.to_owned();
            match self.remove(&key) {
                Some(entry) => return Some(entry),
                // Orphaned recency slot; already unlinked by `remove`.
                None => continue,
            }
        }
    }

    /// Keys whose idle time exceeds `staleness`.
    pub fn stale_keys(&self, now: Instant, staleness: Duration) -> Vec<(String, InstanceId)> {
        self.entries
            .values()
            .filter(|e| e.is_stale(now, staleness))
            .map(|e| (e.session_key.clone(), e.instance))
            .collect()
    }

    /// Drop recency slots without a matching entry.
    pub fn prune_recency(&mut self) -> usize {
        let entries = &self.entries;
        self.recency.retain(|k| entries.contains_key(k))
    }

    pub fn drain(&mut self) -> Vec<SessionEntry> {
        self.recency = RecencyList::new();
        self.entries.drain().map(|(_, e)| e).collect()
    }
}
