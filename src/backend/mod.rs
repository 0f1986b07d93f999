//! The backend facade: row storage with change notifications, presence
//! channels and account authentication.
//!
//! Everything above this module talks to the [`Store`] and [`Auth`] traits.
//! The embedded implementations keep rows in SQLite and fan out changes
//! in-process; a hosted backend would implement the same two traits.

mod auth;
mod mailer;
mod sqlite;

pub use auth::{Auth, AuthError, AuthResult, Identity, OtpType, SqliteAuth};
pub use mailer::{Email, LogMailer, MailError, Mailer, MemoryMailer, WebhookMailer};
pub use sqlite::{memory_pool, SqliteStore};

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::realtime::{EventMask, PresenceChannel, Subscription};

/// A row as the store sees it: column name to JSON value.
pub type Row = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Posts,
    ChatMessages,
    Profiles,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Self::Posts, Self::ChatMessages, Self::Profiles];

    pub fn table(self) -> &'static str {
        match self {
            Self::Posts => "posts",
            Self::ChatMessages => "chat_messages",
            Self::Profiles => "profiles",
        }
    }

    /// The columns a query may name, in storage order.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Posts => &["id", "content", "user_id", "username", "created_at"],
            Self::ChatMessages => &["id", "message", "user_id", "username", "created_at"],
            Self::Profiles => &["id", "username", "bio", "website", "created_at"],
        }
    }

    pub fn has_column(self, column: &str) -> bool {
        self.columns().contains(&column)
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Gte,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub column: String,
    pub op: Op,
    pub value: String,
}

/// A conjunction of column comparisons.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
        self.clauses.push(Clause {
            column: column.to_owned(),
            op: Op::Eq,
            value: value.to_string(),
        });
        self
    }

    pub fn gte(mut self, column: &str, value: impl ToString) -> Self {
        self.clauses.push(Clause {
            column: column.to_owned(),
            op: Op::Gte,
            value: value.to_string(),
        });
        self
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub filter: Filter,
    pub order: Option<Order>,
    pub limit: Option<u32>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
        self.filter = self.filter.eq(column, value);
        self
    }

    pub fn gte(mut self, column: &str, value: impl ToString) -> Self {
        self.filter = self.filter.gte(column, value);
        self
    }

    pub fn order(mut self, column: &str, direction: Direction) -> Self {
        self.order = Some(Order {
            column: column.to_owned(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown column `{column}` on {collection}")]
    UnknownColumn {
        collection: Collection,
        column: String,
    },
    #[error("no row with id {id} in {collection}")]
    NotFound { collection: Collection, id: String },
    #[error("refusing to delete from {0} without a filter")]
    UnfilteredDelete(Collection),
    #[error("records must serialize to an object")]
    NotAnObject,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Row storage over the three collections, with change notifications.
///
/// Every successful write is published to subscribers of its collection
/// after it commits.
#[async_trait]
pub trait Store: Send + Sync {
    async fn list(&self, collection: Collection, query: &Query) -> StoreResult<Vec<Row>>;

    async fn count(&self, collection: Collection, filter: &Filter) -> StoreResult<u64>;

    /// Inserts a row, filling `id` and `created_at` when absent.
    async fn insert(&self, collection: Collection, row: Row) -> StoreResult<Row>;

    /// Inserts, or merges into the row sharing the same `id`.
    async fn upsert(&self, collection: Collection, row: Row) -> StoreResult<Row>;

    async fn update(&self, collection: Collection, id: &str, patch: Row) -> StoreResult<Row>;

    /// Deletes every matching row and returns what was removed. An empty
    /// filter is refused.
    async fn delete(&self, collection: Collection, filter: &Filter) -> StoreResult<Vec<Row>>;

    fn subscribe(&self, collection: Collection, mask: EventMask) -> Subscription;

    fn presence_channel(&self, name: &str) -> PresenceChannel;
}

/// Canonical timestamp text. Fixed width, so text order is time order.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
