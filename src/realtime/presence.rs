use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub id: Uuid,
    pub username: String,
    pub online_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// The full membership after a change.
    Sync(Vec<PresenceEntry>),
    Join(PresenceEntry),
    Leave(PresenceEntry),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Named presence channels, created on first use.
#[derive(Default)]
pub struct PresenceHub {
    channels: Mutex<HashMap<String, PresenceChannel>>,
}

impl PresenceHub {
    pub fn channel(&self, name: &str) -> PresenceChannel {
        lock(&self.channels)
            .entry(name.to_owned())
            .or_insert_with(|| PresenceChannel::new(name))
            .clone()
    }
}

struct Shared {
    name: String,
    members: Mutex<BTreeMap<Uuid, PresenceEntry>>,
    events: broadcast::Sender<PresenceEvent>,
}

#[derive(Clone)]
pub struct PresenceChannel {
    shared: Arc<Shared>,
}

impl PresenceChannel {
    fn new(name: &str) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.to_owned(),
                members: Mutex::new(BTreeMap::new()),
                events: broadcast::channel(EVENT_CAPACITY).0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn subscribe(&self) -> PresenceEvents {
        PresenceEvents {
            channel: self.shared.name.clone(),
            rx: self.shared.events.subscribe(),
        }
    }

    /// Announces `entry` until the returned guard is dropped. One user may
    /// hold several entries at once, one per open view.
    pub fn track(&self, entry: PresenceEntry) -> PresenceGuard {
        let key = Uuid::now_v7();
        debug!(channel = %self.shared.name, user = %entry.id, "presence tracked");

        let mut members = lock(&self.shared.members);
        members.insert(key, entry.clone());
        // sent under the lock so syncs reach subscribers in order
        let _ = self.shared.events.send(PresenceEvent::Join(entry));
        let _ = self.shared.events.send(PresenceEvent::Sync(members.values().cloned().collect()));

        PresenceGuard { channel: self.clone(), key }
    }

    fn untrack(&self, key: Uuid) {
        let mut members = lock(&self.shared.members);
        if let Some(entry) = members.remove(&key) {
            debug!(channel = %self.shared.name, user = %entry.id, "presence untracked");
            let _ = self.shared.events.send(PresenceEvent::Leave(entry));
            let _ = self.shared.events.send(PresenceEvent::Sync(members.values().cloned().collect()));
        }
    }

    pub fn state(&self) -> Vec<PresenceEntry> {
        lock(&self.shared.members).values().cloned().collect()
    }

    /// Number of tracked entries.
    #[cfg(test)]
    pub(crate) fn online_count(&self) -> usize {
        lock(&self.shared.members).len()
    }

    /// Number of distinct users behind the tracked entries.
    pub fn distinct_users(&self) -> usize {
        let members = lock(&self.shared.members);
        let mut ids: Vec<Uuid> = members.values().map(|entry| entry.id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }
}

/// Keeps an entry tracked while alive.
pub struct PresenceGuard {
    channel: PresenceChannel,
    key: Uuid,
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        self.channel.untrack(self.key);
    }
}

pub struct PresenceEvents {
    channel: String,
    rx: broadcast::Receiver<PresenceEvent>,
}

impl PresenceEvents {
    /// Next event, or `None` when the channel is gone. Skipped events are
    /// made up for by the next sync.
    pub async fn recv(&mut self) -> Option<PresenceEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "presence listener lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
