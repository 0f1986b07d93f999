use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::{
    sqlite::{SqlitePoolOptions, SqliteRow},
    Row as _, SqliteConnection, SqlitePool,
};
use uuid::Uuid;

use super::{timestamp, Collection, Filter, Op, Query, Row, Store, StoreError, StoreResult};
use crate::realtime::{ChangeEvent, ChangeHub, EventMask, PresenceChannel, PresenceHub, Subscription};

/// Rows in SQLite, changes and presence fanned out in-process.
pub struct SqliteStore {
    pool: SqlitePool,
    changes: ChangeHub,
    presence: PresenceHub,
}

/// A single-connection in-memory database that lives as long as the pool.
pub async fn memory_pool() -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            changes: ChangeHub::new(),
            presence: PresenceHub::default(),
        }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn check_column(collection: Collection, column: &str) -> StoreResult<()> {
    if collection.has_column(column) {
        Ok(())
    } else {
        Err(StoreError::UnknownColumn {
            collection,
            column: column.to_owned(),
        })
    }
}

fn check_row(collection: Collection, row: &Row) -> StoreResult<()> {
    row.keys().try_for_each(|column| check_column(collection, column))
}

fn where_clause(collection: Collection, filter: &Filter) -> StoreResult<String> {
    if filter.is_empty() {
        return Ok(String::new());
    }

    let mut parts = Vec::with_capacity(filter.clauses().len());
    for clause in filter.clauses() {
        check_column(collection, &clause.column)?;
        let op = match clause.op {
            Op::Eq => "=",
            Op::Gte => ">=",
        };
        parts.push(format!("{} {op} ?", clause.column));
    }
    Ok(format!(" where {}", parts.join(" and ")))
}

/// Column value as stored text. Non-string JSON is kept in its JSON form.
fn text(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

fn decode(collection: Collection, row: &SqliteRow) -> StoreResult<Row> {
    let mut out = Row::new();
    for column in collection.columns() {
        let value: Option<String> = row.try_get(*column)?;
        out.insert((*column).to_owned(), value.map_or(Value::Null, Value::String));
    }
    Ok(out)
}

/// Every column present, missing ones as null.
fn complete(collection: Collection, row: Row) -> Row {
    let mut row = row;
    for column in collection.columns() {
        row.entry(*column).or_insert(Value::Null);
    }
    row
}

async fn fetch_by_id(conn: &mut SqliteConnection, collection: Collection, id: &str) -> StoreResult<Option<Row>> {
    let sql = format!(
        "select {} from {} where id = ?",
        collection.columns().join(","),
        collection.table()
    );
    let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *conn).await?;
    row.map(|row| decode(collection, &row)).transpose()
}

async fn insert_row(conn: &mut SqliteConnection, collection: Collection, row: &Row) -> StoreResult<()> {
    let columns = collection.columns();
    let sql = format!(
        "insert into {} ({}) values ({})",
        collection.table(),
        columns.join(","),
        vec!["?"; columns.len()].join(",")
    );

    let mut query = sqlx::query(&sql);
    for column in columns {
        query = query.bind(text(row.get(*column)));
    }
    query.execute(&mut *conn).await?;
    Ok(())
}

async fn update_row(conn: &mut SqliteConnection, collection: Collection, row: &Row) -> StoreResult<()> {
    let assignments: Vec<String> = collection
        .columns()
        .iter()
        .filter(|column| **column != "id")
        .map(|column| format!("{column} = ?"))
        .collect();
    let sql = format!("update {} set {} where id = ?", collection.table(), assignments.join(","));

    let mut query = sqlx::query(&sql);
    for column in collection.columns().iter().filter(|column| **column != "id") {
        query = query.bind(text(row.get(*column)));
    }
    query.bind(text(row.get("id"))).execute(&mut *conn).await?;
    Ok(())
}

fn merge(mut target: Row, patch: Row) -> Row {
    for (column, value) in patch {
        if column != "id" {
            target.insert(column, value);
        }
    }
    target
}

fn with_defaults(mut row: Row) -> Row {
    row.entry("id")
        .or_insert_with(|| Value::String(Uuid::now_v7().to_string()));
    row.entry("created_at")
        .or_insert_with(|| Value::String(timestamp(Utc::now())));
    row
}

#[async_trait]
impl Store for SqliteStore {
    async fn list(&self, collection: Collection, query: &Query) -> StoreResult<Vec<Row>> {
        let mut sql = format!(
            "select {} from {}{}",
            collection.columns().join(","),
            collection.table(),
            where_clause(collection, &query.filter)?
        );
        if let Some(order) = &query.order {
            check_column(collection, &order.column)?;
            let direction = order.direction.as_sql();
            // rowid breaks ties in insertion order
            sql.push_str(&format!(" order by {} {direction}, rowid {direction}", order.column));
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" limit {limit}"));
        }

        let mut select = sqlx::query(&sql);
        for clause in query.filter.clauses() {
            select = select.bind(clause.value.clone());
        }
        let rows = select.fetch_all(&self.pool).await?;
        rows.iter().map(|row| decode(collection, row)).collect()
    }

    async fn count(&self, collection: Collection, filter: &Filter) -> StoreResult<u64> {
        let sql = format!(
            "select count(*) from {}{}",
            collection.table(),
            where_clause(collection, filter)?
        );
        let mut select = sqlx::query_as::<_, (i64,)>(&sql);
        for clause in filter.clauses() {
            select = select.bind(clause.value.clone());
        }
        let (count,) = select.fetch_one(&self.pool).await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn insert(&self, collection: Collection, row: Row) -> StoreResult<Row> {
        check_row(collection, &row)?;
        let row = complete(collection, with_defaults(row));

        let mut conn = self.pool.acquire().await?;
        insert_row(&mut conn, collection, &row).await?;
        drop(conn);

        self.changes.publish(ChangeEvent::inserted(collection, row.clone()));
        Ok(row)
    }

    async fn upsert(&self, collection: Collection, row: Row) -> StoreResult<Row> {
        check_row(collection, &row)?;
        let Some(id) = row.get("id").and_then(Value::as_str).map(str::to_owned) else {
            return self.insert(collection, row).await;
        };

        let mut tx = self.pool.begin().await?;
        let event = match fetch_by_id(&mut tx, collection, &id).await? {
            Some(old) => {
                let new = merge(old.clone(), row);
                update_row(&mut tx, collection, &new).await?;
                ChangeEvent::updated(collection, old, new)
            }
            None => {
                let new = complete(collection, with_defaults(row));
                insert_row(&mut tx, collection, &new).await?;
                ChangeEvent::inserted(collection, new)
            }
        };
        tx.commit().await?;

        let stored = event.new.clone().unwrap_or_default();
        self.changes.publish(event);
        Ok(stored)
    }

    async fn update(&self, collection: Collection, id: &str, patch: Row) -> StoreResult<Row> {
        check_row(collection, &patch)?;

        let mut tx = self.pool.begin().await?;
        let old = fetch_by_id(&mut tx, collection, id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                collection,
                id: id.to_owned(),
            })?;
        let new = merge(old.clone(), patch);
        update_row(&mut tx, collection, &new).await?;
        tx.commit().await?;

        self.changes.publish(ChangeEvent::updated(collection, old, new.clone()));
        Ok(new)
    }

    async fn delete(&self, collection: Collection, filter: &Filter) -> StoreResult<Vec<Row>> {
        if filter.is_empty() {
            return Err(StoreError::UnfilteredDelete(collection));
        }
        let condition = where_clause(collection, filter)?;

        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "select {} from {}{condition}",
            collection.columns().join(","),
            collection.table()
        );
        let mut select = sqlx::query(&sql);
        for clause in filter.clauses() {
            select = select.bind(clause.value.clone());
        }
        let doomed = select
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| decode(collection, row))
            .collect::<StoreResult<Vec<_>>>()?;

        if !doomed.is_empty() {
            let sql = format!("delete from {}{condition}", collection.table());
            let mut delete = sqlx::query(&sql);
            for clause in filter.clauses() {
                delete = delete.bind(clause.value.clone());
            }
            delete.execute(&mut *tx).await?;
        }
        tx.commit().await?;

        for row in &doomed {
            self.changes.publish(ChangeEvent::deleted(collection, row.clone()));
        }
        Ok(doomed)
    }

    fn subscribe(&self, collection: Collection, mask: EventMask) -> Subscription {
        self.changes.subscribe(collection, mask)
    }

    fn presence_channel(&self, name: &str) -> PresenceChannel {
        self.presence.channel(name)
    }
}
