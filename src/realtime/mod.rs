//! In-process fan-out of committed row changes, plus presence channels.

mod presence;

pub use presence::{PresenceChannel, PresenceEntry, PresenceEvent, PresenceEvents, PresenceGuard, PresenceHub};

use std::ops::BitOr;

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::backend::{Collection, Row};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Which change kinds a subscriber wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMask(u8);

impl EventMask {
    pub const INSERT: Self = Self(0b001);
    pub const UPDATE: Self = Self(0b010);
    pub const DELETE: Self = Self(0b100);
    pub const ALL: Self = Self(0b111);

    pub fn contains(self, kind: ChangeKind) -> bool {
        let bit = match kind {
            ChangeKind::Insert => Self::INSERT,
            ChangeKind::Update => Self::UPDATE,
            ChangeKind::Delete => Self::DELETE,
        };
        self.0 & bit.0 != 0
    }
}

impl BitOr for EventMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A committed change. `new` is set for inserts and updates, `old` for
/// updates and deletes.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub collection: Collection,
    pub kind: ChangeKind,
    pub new: Option<Row>,
    pub old: Option<Row>,
}

impl ChangeEvent {
    pub fn inserted(collection: Collection, row: Row) -> Self {
        Self { collection, kind: ChangeKind::Insert, new: Some(row), old: None }
    }

    pub fn updated(collection: Collection, old: Row, new: Row) -> Self {
        Self { collection, kind: ChangeKind::Update, new: Some(new), old: Some(old) }
    }

    pub fn deleted(collection: Collection, old: Row) -> Self {
        Self { collection, kind: ChangeKind::Delete, new: None, old: Some(old) }
    }
}

pub struct ChangeHub {
    senders: [broadcast::Sender<ChangeEvent>; 3],
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeHub {
    pub fn new() -> Self {
        Self {
            senders: Collection::ALL.map(|_| broadcast::channel(CHANNEL_CAPACITY).0),
        }
    }

    pub fn publish(&self, event: ChangeEvent) {
        let collection = event.collection;
        let kind = event.kind;
        // an error only means nobody is listening
        if let Ok(receivers) = self.senders[collection.index()].send(event) {
            debug!(%collection, ?kind, receivers, "change published");
        }
    }

    pub fn subscribe(&self, collection: Collection, mask: EventMask) -> Subscription {
        debug!(%collection, "subscription opened");
        Subscription {
            collection,
            mask,
            rx: self.senders[collection.index()].subscribe(),
        }
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self, collection: Collection) -> usize {
        self.senders[collection.index()].receiver_count()
    }
}

/// A live feed of one collection's changes. Dropping it releases the feed.
pub struct Subscription {
    collection: Collection,
    mask: EventMask,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
    /// Next event matching the mask, or `None` once the hub is gone.
    ///
    /// A subscriber that falls behind skips the overwritten events.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.mask.contains(event.kind) => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(collection = %self.collection, skipped, "subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        debug!(collection = %self.collection, "subscription released");
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn row(id: &str) -> Row {
        match json!({ "id": id }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn mask_filters_kinds() {
        let hub = ChangeHub::new();
        let mut inserts = hub.subscribe(Collection::Posts, EventMask::INSERT);

        hub.publish(ChangeEvent::deleted(Collection::Posts, row("a")));
        hub.publish(ChangeEvent::inserted(Collection::Posts, row("b")));

        let event = inserts.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.new.unwrap()["id"], "b");
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let hub = ChangeHub::new();
        let mut chat = hub.subscribe(Collection::ChatMessages, EventMask::ALL);

        hub.publish(ChangeEvent::inserted(Collection::Posts, row("post")));
        hub.publish(ChangeEvent::inserted(Collection::ChatMessages, row("msg")));

        let event = chat.recv().await.unwrap();
        assert_eq!(event.collection, Collection::ChatMessages);
    }

    #[test]
    fn unsubscribe_releases_receiver() {
        let hub = ChangeHub::new();
        let sub = hub.subscribe(Collection::Profiles, EventMask::INSERT | EventMask::UPDATE);
        assert_eq!(hub.subscriber_count(Collection::Profiles), 1);

        sub.unsubscribe();
        assert_eq!(hub.subscriber_count(Collection::Profiles), 0);
    }

    #[test]
    fn combined_mask() {
        let mask = EventMask::INSERT | EventMask::DELETE;
        assert!(mask.contains(ChangeKind::Insert));
        assert!(!mask.contains(ChangeKind::Update));
        assert!(EventMask::ALL.contains(ChangeKind::Update));
    }
}
