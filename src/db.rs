//! Typed access to the store for page and socket code.
//!
//! Failures are logged here and surface as empty results, so a broken
//! backend degrades a view instead of failing the request.

use std::{marker::PhantomData, sync::Arc};

use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};
use uuid::Uuid;

use crate::{
    backend::{Filter, Query, Row, Store, StoreError},
    realtime::{ChangeEvent, ChangeKind, EventMask, PresenceChannel, Subscription},
    records::Record,
};

#[derive(Clone)]
pub struct Db {
    store: Arc<dyn Store>,
}

fn to_row<R: Serialize + ?Sized>(record: &R) -> Result<Row, StoreError> {
    match serde_json::to_value(record)? {
        Value::Object(row) => Ok(row),
        _ => Err(StoreError::NotAnObject),
    }
}

fn decode<T: Record>(row: Row) -> Option<T> {
    match serde_json::from_value(Value::Object(row)) {
        Ok(record) => Some(record),
        Err(err) => {
            warn!(collection = %T::COLLECTION, error = %err, "skipping undecodable row");
            None
        }
    }
}

impl Db {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn list<T: Record>(&self, query: &Query) -> Vec<T> {
        match self.store.list(T::COLLECTION, query).await {
            Ok(rows) => rows.into_iter().filter_map(decode).collect(),
            Err(err) => {
                error!(collection = %T::COLLECTION, error = %err, "list failed");
                Vec::new()
            }
        }
    }

    pub async fn find<T: Record>(&self, id: Uuid) -> Option<T> {
        self.list(&Query::new().eq("id", id).limit(1)).await.into_iter().next()
    }

    pub async fn count<T: Record>(&self, filter: &Filter) -> u64 {
        self.store.count(T::COLLECTION, filter).await.unwrap_or_else(|err| {
            error!(collection = %T::COLLECTION, error = %err, "count failed");
            0
        })
    }

    pub async fn insert<T: Record, R: Serialize + Sync + ?Sized>(&self, record: &R) -> Option<T> {
        let result = match to_row(record) {
            Ok(row) => self.store.insert(T::COLLECTION, row).await,
            Err(err) => Err(err),
        };
        self.stored(result, "insert")
    }

    pub async fn upsert<T: Record, R: Serialize + Sync + ?Sized>(&self, record: &R) -> Option<T> {
        let result = match to_row(record) {
            Ok(row) => self.store.upsert(T::COLLECTION, row).await,
            Err(err) => Err(err),
        };
        self.stored(result, "upsert")
    }

    pub async fn update<T: Record, R: Serialize + Sync + ?Sized>(&self, id: Uuid, patch: &R) -> Option<T> {
        let result = match to_row(patch) {
            Ok(row) => self.store.update(T::COLLECTION, &id.to_string(), row).await,
            Err(err) => Err(err),
        };
        self.stored(result, "update")
    }

    /// Deletes the matching rows and returns those that were removed.
    pub async fn delete_where<T: Record>(&self, filter: &Filter) -> Vec<T> {
        match self.store.delete(T::COLLECTION, filter).await {
            Ok(rows) => rows.into_iter().filter_map(decode).collect(),
            Err(err) => {
                error!(collection = %T::COLLECTION, error = %err, "delete failed");
                Vec::new()
            }
        }
    }

    fn stored<T: Record>(&self, result: Result<Row, StoreError>, op: &'static str) -> Option<T> {
        match result {
            Ok(row) => decode(row),
            Err(err) => {
                error!(collection = %T::COLLECTION, op, error = %err, "write failed");
                None
            }
        }
    }

    pub fn subscribe<T: Record>(&self, mask: EventMask) -> Changes<T> {
        Changes {
            subscription: self.store.subscribe(T::COLLECTION, mask),
            record: PhantomData,
        }
    }

    pub fn presence_channel(&self, name: &str) -> PresenceChannel {
        self.store.presence_channel(name)
    }
}

/// A decoded change. Deletes only carry the removed id.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<T> {
    Insert(T),
    Update(T),
    Delete { id: Uuid },
}

impl<T: Record> Change<T> {
    fn from_event(event: ChangeEvent) -> Option<Self> {
        match event.kind {
            ChangeKind::Insert => event.new.and_then(decode).map(Self::Insert),
            ChangeKind::Update => event.new.and_then(decode).map(Self::Update),
            ChangeKind::Delete => event
                .old
                .as_ref()
                .and_then(|old| old.get("id"))
                .and_then(Value::as_str)
                .and_then(|id| Uuid::parse_str(id).ok())
                .map(|id| Self::Delete { id }),
        }
    }
}

/// Typed changes of one collection.
pub struct Changes<T> {
    subscription: Subscription,
    record: PhantomData<fn() -> T>,
}

impl<T: Record> Changes<T> {
    pub async fn next(&mut self) -> Option<Change<T>> {
        loop {
            let event = self.subscription.recv().await?;
            if let Some(change) = Change::from_event(event) {
                return Some(change);
            }
        }
    }

    pub fn unsubscribe(self) {
        self.subscription.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{memory_pool, Direction, SqliteStore},
        records::{NewPost, Post, Profile, ProfileUpsert},
    };

    async fn db() -> Db {
        let store = SqliteStore::new(memory_pool().await.unwrap());
        store.migrate().await.unwrap();
        Db::new(Arc::new(store))
    }

    #[tokio::test]
    async fn typed_insert_and_change_feed() {
        let db = db().await;
        let mut changes = db.subscribe::<Post>(EventMask::ALL);
        let author = Uuid::now_v7();

        let post: Post = db
            .insert(&NewPost { content: "hello".into(), user_id: author, username: "ann".into() })
            .await
            .unwrap();
        assert_eq!(changes.next().await, Some(Change::Insert(post.clone())));

        let removed: Vec<Post> = db.delete_where(&Filter::new().eq("id", post.id)).await;
        assert_eq!(removed, [post.clone()]);
        assert_eq!(changes.next().await, Some(Change::Delete { id: post.id }));

        let listed: Vec<Post> = db.list(&Query::new().order("created_at", Direction::Desc)).await;
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn failures_degrade_to_empty() {
        let db = db().await;
        let rows: Vec<Post> = db.list(&Query::new().eq("no_such_column", 1)).await;
        assert!(rows.is_empty());
        assert_eq!(db.count::<Post>(&Filter::new().eq("nope", 1)).await, 0);
        assert!(db.delete_where::<Post>(&Filter::new()).await.is_empty());
    }

    #[tokio::test]
    async fn update_patches_profile() {
        let db = db().await;
        let id = Uuid::now_v7();
        let _: Profile = db
            .upsert(&ProfileUpsert { id, username: "ann".into(), bio: None, website: None })
            .await
            .unwrap();

        let updated: Profile = db
            .update(id, &serde_json::json!({ "bio": "hi there" }))
            .await
            .unwrap();
        assert_eq!(updated.bio.as_deref(), Some("hi there"));
        assert_eq!(db.find::<Profile>(id).await, Some(updated));
    }
}
