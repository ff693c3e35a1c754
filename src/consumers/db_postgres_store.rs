//! PostgreSQL [`UpsertStore`].
//!
//! Each batch runs in one transaction: every row is an `INSERT ... ON CONFLICT DO UPDATE`
//! generated from its [`TableSchema`], and the transaction commits only if all of them succeed.
//! Errors are classified for the sink's retry loop by [`classify`].

use std::fmt;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row};
use tracing::{debug, info};

use crate::config::{StoreConfig, redact_url};
use crate::db::{DatabaseRow, SqlType, SqlValue, TableSchema, UpsertStore};
use crate::error::StoreError;

/// Opens a connection pool.
pub async fn create_pool(config: &StoreConfig) -> Result<PgPool, StoreError> {
  let pool = PgPoolOptions::new()
    .max_connections(config.max_connections)
    .min_connections(config.min_connections)
    .acquire_timeout(config.acquire_timeout)
    .idle_timeout(config.idle_timeout)
    .max_lifetime(config.max_lifetime)
    .connect(&config.url)
    .await
    .map_err(classify)?;
  info!(
    url = %redact_url(&config.url),
    max_connections = config.max_connections,
    "Connected to PostgreSQL"
  );
  Ok(pool)
}

/// Sorts a database error into retryable or not.
///
/// Connection loss, pool timeouts, serialization failures (`40001`) and deadlocks (`40P01`) are
/// transient, as is any SQLSTATE of class `08` (connection exception). Everything else is
/// permanent.
pub fn classify(error: sqlx::Error) -> StoreError {
  let transient = match &error {
    sqlx::Error::Io(_)
    | sqlx::Error::PoolTimedOut
    | sqlx::Error::PoolClosed
    | sqlx::Error::Protocol(_)
    | sqlx::Error::WorkerCrashed => true,
    sqlx::Error::Database(db) => db
      .code()
      .is_some_and(|code| is_transient_sqlstate(&code)),
    _ => false,
  };
  if transient {
    StoreError::Transient(error.to_string())
  } else {
    StoreError::Permanent(error.to_string())
  }
}

fn is_transient_sqlstate(code: &str) -> bool {
  code.starts_with("08") || code == "40001" || code == "40P01"
}

/// Upsert store backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PostgresStore {
  pool: PgPool,
}

impl fmt::Debug for PostgresStore {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PostgresStore")
      .field("connections", &self.pool.size())
      .finish()
  }
}

impl PostgresStore {
  /// Wraps an existing pool.
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  /// Opens a pool from `config`.
  pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
    Ok(Self::new(create_pool(config).await?))
  }

  /// The underlying pool.
  pub fn pool(&self) -> &PgPool {
    &self.pool
  }
}

fn bind<'q>(
  query: Query<'q, Postgres, PgArguments>,
  value: &SqlValue,
) -> Query<'q, Postgres, PgArguments> {
  match value {
    SqlValue::Text(v) => query.bind(v.clone()),
    SqlValue::Integer(v) => query.bind(*v),
    SqlValue::Numeric(v) => query.bind(*v),
    SqlValue::Date(v) => query.bind(*v),
    SqlValue::Timestamp(v) => query.bind(*v),
  }
}

fn decode(schema: &TableSchema, row: &PgRow) -> Result<DatabaseRow, StoreError> {
  let mut values = Vec::with_capacity(schema.columns.len());
  for (i, column) in schema.columns.iter().enumerate() {
    let value = match column.sql_type {
      SqlType::Text => row.try_get(i).map(SqlValue::Text),
      SqlType::Integer => row.try_get(i).map(SqlValue::Integer),
      SqlType::Numeric => row.try_get(i).map(SqlValue::Numeric),
      SqlType::Date => row.try_get(i).map(SqlValue::Date),
      SqlType::Timestamp => row.try_get(i).map(SqlValue::Timestamp),
    }
    .map_err(classify)?;
    values.push(value);
  }
  Ok(DatabaseRow::new(values))
}

#[async_trait]
impl UpsertStore for PostgresStore {
  async fn ensure_table(&self, schema: &'static TableSchema) -> Result<(), StoreError> {
    sqlx::query(&schema.create_table_sql())
      .execute(&self.pool)
      .await
      .map_err(classify)?;
    debug!(table = schema.name, "Table ready");
    Ok(())
  }

  async fn upsert_batch(
    &self,
    schema: &'static TableSchema,
    rows: &[DatabaseRow],
  ) -> Result<u64, StoreError> {
    if rows.is_empty() {
      return Ok(0);
    }
    for row in rows {
      schema.validate(row)?;
    }

    let sql = schema.upsert_sql();
    let mut tx = self.pool.begin().await.map_err(classify)?;
    for row in rows {
      let query = row
        .values
        .iter()
        .fold(sqlx::query(&sql), |query, value| bind(query, value));
      query.execute(&mut *tx).await.map_err(classify)?;
    }
    tx.commit().await.map_err(classify)?;
    Ok(rows.len() as u64)
  }

  async fn load_rows(&self, schema: &'static TableSchema) -> Result<Vec<DatabaseRow>, StoreError> {
    let rows = sqlx::query(&schema.select_sql())
      .fetch_all(&self.pool)
      .await
      .map_err(classify)?;
    rows.iter().map(|row| decode(schema, row)).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_connection_failures_are_transient() {
    let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
    assert!(classify(sqlx::Error::Io(io)).is_transient());
    assert!(classify(sqlx::Error::PoolTimedOut).is_transient());
    assert!(classify(sqlx::Error::PoolClosed).is_transient());
  }

  #[test]
  fn test_logic_errors_are_permanent() {
    assert!(!classify(sqlx::Error::RowNotFound).is_transient());
    assert!(!classify(sqlx::Error::ColumnNotFound("total_sales".into())).is_transient());
  }

  #[test]
  fn test_sqlstate_classes() {
    assert!(is_transient_sqlstate("08006"));
    assert!(is_transient_sqlstate("40001"));
    assert!(is_transient_sqlstate("40P01"));
    assert!(!is_transient_sqlstate("23505"));
    assert!(!is_transient_sqlstate("42P01"));
  }
}
