//! Postgres destination store: additive schema reconciliation, batch loading, watermarks, table reads.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use hbc_core::{NormalizedBatch, Watermarks, WATERMARK_TABLE};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use thiserror::Error;
use tracing::{debug, info};

pub const CRATE_NAME: &str = "hbc-store";

/// Postgres caps a single statement at 65535 bind parameters.
pub const MAX_BIND_PARAMS: usize = 65_535;

pub const POOL_EXHAUSTED_MESSAGE: &str = "Database connection limit reached. Please try again later.";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("batch for {table} has no columns to insert")]
    EmptyBatch { table: String },
    #[error("row {row} for {table} has {found} values, expected {expected}")]
    RowShape {
        table: String,
        row: usize,
        expected: usize,
        found: usize,
    },
}

impl StorageError {
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self, StorageError::Database(sqlx::Error::PoolTimedOut))
    }
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub max_lifetime: Duration,
}

impl DbConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 30,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(1800),
        }
    }

    fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections.max(1))
            .acquire_timeout(self.acquire_timeout)
            .max_lifetime(self.max_lifetime)
    }
}

pub async fn connect(config: &DbConfig) -> anyhow::Result<PgPool> {
    config
        .pool_options()
        .connect(&config.url)
        .await
        .context("connecting to destination database")
}

/// Pool that opens connections on first use.
pub fn connect_lazy(config: &DbConfig) -> anyhow::Result<PgPool> {
    config
        .pool_options()
        .connect_lazy(&config.url)
        .context("creating lazy destination database pool")
}

/// Double-quote an identifier, escaping embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Additive change needed to make a table hold every column of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    Create(Vec<String>),
    AddColumns(Vec<String>),
    Unchanged,
}

/// `existing` is the live column set, or `None` when the table is absent.
pub fn plan_schema_change(existing: Option<&BTreeSet<String>>, columns: &[String]) -> SchemaChange {
    match existing {
        None => SchemaChange::Create(columns.to_vec()),
        Some(live) => {
            let mut seen = BTreeSet::new();
            let missing = columns
                .iter()
                .filter(|c| !live.contains(*c) && seen.insert((*c).clone()))
                .cloned()
                .collect::<Vec<_>>();
            if missing.is_empty() {
                SchemaChange::Unchanged
            } else {
                SchemaChange::AddColumns(missing)
            }
        }
    }
}

pub fn create_table_sql(table: &str, columns: &[String]) -> String {
    let defs = columns
        .iter()
        .map(|c| format!("{} TEXT", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE IF NOT EXISTS {} ({defs})", quote_ident(table))
}

pub fn add_column_sql(table: &str, column: &str) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} TEXT",
        quote_ident(table),
        quote_ident(column)
    )
}

fn insert_prefix(table: &str, columns: &[String]) -> String {
    let cols = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    format!("INSERT INTO {} ({cols}) ", quote_ident(table))
}

/// Rows per INSERT statement so one statement stays under [`MAX_BIND_PARAMS`].
pub fn rows_per_statement(column_count: usize) -> usize {
    (MAX_BIND_PARAMS / column_count.max(1)).max(1)
}

pub fn create_watermark_table_sql() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {WATERMARK_TABLE} (table_name TEXT PRIMARY KEY, last_updated TIMESTAMP)"
    )
}

pub fn upsert_watermark_sql() -> String {
    format!(
        "INSERT INTO {WATERMARK_TABLE} (table_name, last_updated) VALUES ($1, $2) \
         ON CONFLICT (table_name) DO UPDATE SET last_updated = EXCLUDED.last_updated"
    )
}

pub fn select_rows_sql(table: &str, filter_by_code: bool) -> String {
    let mut sql = format!("SELECT row_to_json(t) FROM {} AS t", quote_ident(table));
    if filter_by_code {
        sql.push_str(" WHERE t.\"code\"::text = ANY($1)");
    }
    sql
}

fn day_start(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

/// Write side of a sync: widen the table, then insert.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Ensure `table` exists and holds every column of `batch`. Never drops or narrows columns.
    async fn reconcile(&self, batch: &NormalizedBatch, table: &str) -> Result<(), StorageError>;

    /// Insert all rows atomically; returns the number of rows inserted.
    async fn load(&self, batch: &NormalizedBatch, table: &str) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Bootstraps the backing table if needed; an empty store yields an empty map.
    async fn load_all(&self) -> Result<Watermarks, StorageError>;

    async fn save(&self, table: &str, date: NaiveDate) -> Result<(), StorageError>;

    async fn save_all(&self, watermarks: &Watermarks) -> Result<(), StorageError>;
}

/// Read side used by the query endpoint.
#[async_trait]
pub trait TableReader: Send + Sync {
    async fn table_exists(&self, table: &str) -> Result<bool, StorageError>;

    /// Rows as JSON objects, optionally restricted to `code IN codes`.
    async fn fetch_rows(
        &self,
        table: &str,
        codes: Option<&[String]>,
    ) -> Result<Vec<Value>, StorageError>;
}

async fn table_exists_on(conn: &mut PgConnection, table: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1
              FROM information_schema.tables
             WHERE table_schema = current_schema()
               AND table_name = $1
        )
        "#,
    )
    .bind(table)
    .fetch_one(&mut *conn)
    .await
}

/// Live column snapshot, `None` if the table does not exist.
async fn live_columns(
    conn: &mut PgConnection,
    table: &str,
) -> Result<Option<BTreeSet<String>>, sqlx::Error> {
    if !table_exists_on(&mut *conn, table).await? {
        return Ok(None);
    }
    let columns = sqlx::query_scalar::<_, String>(
        r#"
        SELECT column_name::text
          FROM information_schema.columns
         WHERE table_schema = current_schema()
           AND table_name = $1
        "#,
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await?;
    Ok(Some(columns.into_iter().collect()))
}

/// Destination store handle backed by a Postgres pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ensure_watermark_table(&self) -> Result<(), StorageError> {
        sqlx::query(&create_watermark_table_sql())
            .execute(&self.pool)
            .await?;
        info!(table = WATERMARK_TABLE, "ensured watermark table exists");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Destination for PgStore {
    async fn reconcile(&self, batch: &NormalizedBatch, table: &str) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        let existing = live_columns(&mut tx, table).await?;
        match plan_schema_change(existing.as_ref(), &batch.columns) {
            SchemaChange::Create(columns) => {
                sqlx::query(&create_table_sql(table, &columns))
                    .execute(&mut *tx)
                    .await?;
                info!(table, columns = columns.len(), "created table");
            }
            SchemaChange::AddColumns(columns) => {
                for column in &columns {
                    sqlx::query(&add_column_sql(table, column))
                        .execute(&mut *tx)
                        .await?;
                }
                info!(table, added = ?columns, "added columns");
            }
            SchemaChange::Unchanged => debug!(table, "schema already covers batch"),
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load(&self, batch: &NormalizedBatch, table: &str) -> Result<u64, StorageError> {
        if batch.is_empty() {
            return Ok(0);
        }
        if batch.columns.is_empty() {
            return Err(StorageError::EmptyBatch {
                table: table.to_string(),
            });
        }
        if let Some((row, values)) = batch
            .rows
            .iter()
            .enumerate()
            .find(|(_, values)| values.len() != batch.columns.len())
        {
            return Err(StorageError::RowShape {
                table: table.to_string(),
                row,
                expected: batch.columns.len(),
                found: values.len(),
            });
        }

        let prefix = insert_prefix(table, &batch.columns);
        let mut inserted = 0u64;
        let mut tx = self.pool.begin().await?;
        for chunk in batch.rows.chunks(rows_per_statement(batch.columns.len())) {
            let mut builder = QueryBuilder::<Postgres>::new(prefix.as_str());
            builder.push_values(chunk, |mut row, values| {
                for value in values {
                    row.push_bind(value.to_sql_text());
                }
            });
            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        info!(table, rows = inserted, "inserted rows");
        Ok(inserted)
    }
}

#[async_trait]
impl WatermarkStore for PgStore {
    async fn load_all(&self) -> Result<Watermarks, StorageError> {
        self.ensure_watermark_table().await?;
        let rows = sqlx::query_as::<_, (String, Option<NaiveDateTime>)>(&format!(
            "SELECT table_name, last_updated FROM {WATERMARK_TABLE}"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(table, stamp)| stamp.map(|s| (table, s.date())))
            .collect())
    }

    async fn save(&self, table: &str, date: NaiveDate) -> Result<(), StorageError> {
        sqlx::query(&upsert_watermark_sql())
            .bind(table)
            .bind(day_start(date))
            .execute(&self.pool)
            .await?;
        info!(table, %date, "updated watermark");
        Ok(())
    }

    async fn save_all(&self, watermarks: &Watermarks) -> Result<(), StorageError> {
        let sql = upsert_watermark_sql();
        let mut tx = self.pool.begin().await?;
        for (table, date) in watermarks {
            sqlx::query(&sql)
                .bind(table)
                .bind(day_start(*date))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        info!(tables = watermarks.len(), "saved watermarks");
        Ok(())
    }
}

#[async_trait]
impl TableReader for PgStore {
    async fn table_exists(&self, table: &str) -> Result<bool, StorageError> {
        let mut conn = self.pool.acquire().await?;
        Ok(table_exists_on(&mut conn, table).await?)
    }

    async fn fetch_rows(
        &self,
        table: &str,
        codes: Option<&[String]>,
    ) -> Result<Vec<Value>, StorageError> {
        let sql = select_rows_sql(table, codes.is_some());
        let mut query = sqlx::query_scalar::<_, Value>(&sql);
        if let Some(codes) = codes {
            query = query.bind(codes.to_vec());
        }
        Ok(query.fetch_all(&self.pool).await?)
    }
}
