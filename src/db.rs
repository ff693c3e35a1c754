//! Relational store boundary.
//!
//! Everything a sink needs to know about a table is a static [`TableSchema`]: its columns in
//! order and its primary key. The schema generates the statements the store runs:
//!
//! - `CREATE TABLE IF NOT EXISTS` for bootstrap,
//! - `INSERT ... ON CONFLICT (pk) DO UPDATE SET col = EXCLUDED.col` for every non-key column,
//! - a `SELECT` with explicit casts, used to seed state on start-up.
//!
//! Records become [`DatabaseRow`]s through [`ToRow`]; an [`UpsertStore`] executes batches of
//! rows. Because every statement overwrites all non-key columns on conflict, writing the same
//! row twice leaves the table exactly as writing it once.

use std::fmt;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Longest value a [`SqlType::Text`] column holds, in characters.
pub const MAX_TEXT_LEN: usize = 255;

/// Why `value` cannot be stored in a [`SqlType::Text`] column, if it cannot.
pub fn text_problem(value: &str) -> Option<String> {
  if value.contains('\0') {
    return Some("contains a NUL character".to_string());
  }
  let chars = value.chars().count();
  if chars > MAX_TEXT_LEN {
    return Some(format!(
      "is {} characters long, the limit is {}",
      chars, MAX_TEXT_LEN
    ));
  }
  None
}

/// Column types used by the salesweave tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
  /// `VARCHAR(255)`.
  Text,
  /// `INTEGER`.
  Integer,
  /// `NUMERIC`, for money.
  Numeric,
  /// `DATE`.
  Date,
  /// `TIMESTAMP` without time zone, holding UTC.
  Timestamp,
}

impl SqlType {
  /// Type name used in DDL.
  pub fn ddl(&self) -> &'static str {
    match self {
      SqlType::Text => "VARCHAR(255)",
      SqlType::Integer => "INTEGER",
      SqlType::Numeric => "NUMERIC",
      SqlType::Date => "DATE",
      SqlType::Timestamp => "TIMESTAMP",
    }
  }

  /// Type name used to cast a column when reading it back.
  fn cast(&self) -> &'static str {
    match self {
      SqlType::Text => "text",
      SqlType::Integer => "integer",
      SqlType::Numeric => "numeric",
      SqlType::Date => "date",
      SqlType::Timestamp => "timestamp",
    }
  }
}

/// A typed column value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Serialize, Deserialize)]
pub enum SqlValue {
  /// Text value.
  Text(String),
  /// 32-bit integer value.
  Integer(i32),
  /// Exact decimal value.
  Numeric(Decimal),
  /// Calendar date.
  Date(NaiveDate),
  /// UTC timestamp.
  Timestamp(NaiveDateTime),
}

impl SqlValue {
  /// The column type this value belongs to.
  pub fn sql_type(&self) -> SqlType {
    match self {
      SqlValue::Text(_) => SqlType::Text,
      SqlValue::Integer(_) => SqlType::Integer,
      SqlValue::Numeric(_) => SqlType::Numeric,
      SqlValue::Date(_) => SqlType::Date,
      SqlValue::Timestamp(_) => SqlType::Timestamp,
    }
  }
}

impl fmt::Display for SqlValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SqlValue::Text(v) => write!(f, "{}", v),
      SqlValue::Integer(v) => write!(f, "{}", v),
      SqlValue::Numeric(v) => write!(f, "{}", v),
      SqlValue::Date(v) => write!(f, "{}", v),
      SqlValue::Timestamp(v) => write!(f, "{}", v),
    }
  }
}

/// One column of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
  /// Column name.
  pub name: &'static str,
  /// Column type.
  pub sql_type: SqlType,
}

/// Static description of a target table.
#[derive(Debug, PartialEq, Eq)]
pub struct TableSchema {
  /// Table name.
  pub name: &'static str,
  /// Columns, in the order of [`DatabaseRow::values`].
  pub columns: &'static [Column],
  /// Primary key column names.
  pub primary_key: &'static [&'static str],
}

impl TableSchema {
  /// `CREATE TABLE IF NOT EXISTS` statement for this table.
  pub fn create_table_sql(&self) -> String {
    let columns = self
      .columns
      .iter()
      .map(|c| format!("{} {}", c.name, c.sql_type.ddl()))
      .collect::<Vec<_>>()
      .join(", ");
    format!(
      "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}))",
      self.name,
      columns,
      self.primary_key.join(", ")
    )
  }

  /// Parameterized upsert statement. Parameters follow column order; on a primary key
  /// conflict every non-key column takes the incoming value.
  pub fn upsert_sql(&self) -> String {
    let names = self.columns.iter().map(|c| c.name).collect::<Vec<_>>();
    let placeholders = (1..=names.len())
      .map(|i| format!("${}", i))
      .collect::<Vec<_>>();
    let updates = self
      .value_columns()
      .map(|c| format!("{0} = EXCLUDED.{0}", c.name))
      .collect::<Vec<_>>();

    let conflict = if updates.is_empty() {
      "DO NOTHING".to_string()
    } else {
      format!("DO UPDATE SET {}", updates.join(", "))
    };

    format!(
      "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
      self.name,
      names.join(", "),
      placeholders.join(", "),
      self.primary_key.join(", "),
      conflict
    )
  }

  /// `SELECT` of every column, cast to the declared types so tables created with other
  /// numeric types still read back as [`SqlValue`]s.
  pub fn select_sql(&self) -> String {
    let columns = self
      .columns
      .iter()
      .map(|c| format!("{0}::{1} AS {0}", c.name, c.sql_type.cast()))
      .collect::<Vec<_>>()
      .join(", ");
    format!("SELECT {} FROM {}", columns, self.name)
  }

  /// Position of `column`, if the table has it.
  pub fn index_of(&self, column: &str) -> Option<usize> {
    self.columns.iter().position(|c| c.name == column)
  }

  /// Columns that are not part of the primary key.
  pub fn value_columns(&self) -> impl Iterator<Item = &Column> {
    self
      .columns
      .iter()
      .filter(|c| !self.primary_key.contains(&c.name))
  }

  /// Primary key of `row`.
  pub fn key_of(&self, row: &DatabaseRow) -> Result<RowKey, StoreError> {
    self
      .primary_key
      .iter()
      .map(|name| row.get(self, name).cloned())
      .collect::<Result<Vec<_>, _>>()
      .map(RowKey)
  }

  /// Checks that `row` has one value of the declared type per column.
  pub fn validate(&self, row: &DatabaseRow) -> Result<(), StoreError> {
    if row.values.len() != self.columns.len() {
      return Err(StoreError::Permanent(format!(
        "{}: expected {} values, got {}",
        self.name,
        self.columns.len(),
        row.values.len()
      )));
    }
    for (column, value) in self.columns.iter().zip(&row.values) {
      if column.sql_type != value.sql_type() {
        return Err(StoreError::Permanent(format!(
          "{}.{}: expected {:?}, got {:?}",
          self.name,
          column.name,
          column.sql_type,
          value.sql_type()
        )));
      }
      if let SqlValue::Text(text) = value {
        if let Some(problem) = text_problem(text) {
          return Err(StoreError::Permanent(format!(
            "{}.{}: {}",
            self.name, column.name, problem
          )));
        }
      }
    }
    Ok(())
  }
}

/// Primary key values of a row, in primary key order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Serialize, Deserialize)]
pub struct RowKey(pub Vec<SqlValue>);

impl fmt::Display for RowKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let parts = self.0.iter().map(ToString::to_string).collect::<Vec<_>>();
    write!(f, "({})", parts.join(", "))
  }
}

/// A table row: one value per schema column, in column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseRow {
  /// Column values.
  pub values: Vec<SqlValue>,
}

impl DatabaseRow {
  /// Creates a row from values in column order.
  pub fn new(values: Vec<SqlValue>) -> Self {
    Self { values }
  }

  /// Value of `column`.
  pub fn get(&self, schema: &TableSchema, column: &str) -> Result<&SqlValue, StoreError> {
    schema
      .index_of(column)
      .and_then(|i| self.values.get(i))
      .ok_or_else(|| StoreError::Permanent(format!("{}: no column {}", schema.name, column)))
  }

  /// Text value of `column`.
  pub fn text(&self, schema: &TableSchema, column: &str) -> Result<String, StoreError> {
    match self.get(schema, column)? {
      SqlValue::Text(v) => Ok(v.clone()),
      other => Err(type_mismatch(schema, column, "text", other)),
    }
  }

  /// Integer value of `column`.
  pub fn integer(&self, schema: &TableSchema, column: &str) -> Result<i32, StoreError> {
    match self.get(schema, column)? {
      SqlValue::Integer(v) => Ok(*v),
      other => Err(type_mismatch(schema, column, "integer", other)),
    }
  }

  /// Numeric value of `column`.
  pub fn numeric(&self, schema: &TableSchema, column: &str) -> Result<Decimal, StoreError> {
    match self.get(schema, column)? {
      SqlValue::Numeric(v) => Ok(*v),
      other => Err(type_mismatch(schema, column, "numeric", other)),
    }
  }

  /// Date value of `column`.
  pub fn date(&self, schema: &TableSchema, column: &str) -> Result<NaiveDate, StoreError> {
    match self.get(schema, column)? {
      SqlValue::Date(v) => Ok(*v),
      other => Err(type_mismatch(schema, column, "date", other)),
    }
  }

  /// Timestamp value of `column`.
  pub fn timestamp(&self, schema: &TableSchema, column: &str) -> Result<NaiveDateTime, StoreError> {
    match self.get(schema, column)? {
      SqlValue::Timestamp(v) => Ok(*v),
      other => Err(type_mismatch(schema, column, "timestamp", other)),
    }
  }
}

fn type_mismatch(schema: &TableSchema, column: &str, expected: &str, got: &SqlValue) -> StoreError {
  StoreError::Permanent(format!(
    "{}.{}: expected {}, got {:?}",
    schema.name, column, expected, got
  ))
}

/// A record a batched upsert sink can persist.
pub trait ToRow: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
  /// Target table.
  fn schema() -> &'static TableSchema;

  /// Primary key of this record.
  fn key(&self) -> RowKey;

  /// Per-key sequence of this record, when it has one. A sink never writes a record whose
  /// sequence is not newer than the last one it wrote for the same key.
  fn sequence(&self) -> Option<u64> {
    None
  }

  /// The row to write.
  fn to_row(&self) -> DatabaseRow;

  /// Rebuilds a record from a stored row. Records with a sequence come back with sequence 0.
  fn from_row(row: &DatabaseRow) -> Result<Self, StoreError>;
}

/// A relational store that can bootstrap tables and execute batches of upserts.
///
/// Implementations classify failures: [`StoreError::Transient`] when resending the same batch
/// may succeed, [`StoreError::Permanent`] otherwise.
#[async_trait]
pub trait UpsertStore: Send + Sync + fmt::Debug {
  /// Creates `schema`'s table if it does not exist yet. Idempotent.
  async fn ensure_table(&self, schema: &'static TableSchema) -> Result<(), StoreError>;

  /// Upserts `rows` into `schema`'s table, all or nothing. Returns the number of rows written.
  async fn upsert_batch(
    &self,
    schema: &'static TableSchema,
    rows: &[DatabaseRow],
  ) -> Result<u64, StoreError>;

  /// Every row currently in `schema`'s table.
  async fn load_rows(&self, schema: &'static TableSchema) -> Result<Vec<DatabaseRow>, StoreError>;
}

#[cfg(test)]
mod tests {
  use super::*;

  static EXAMPLE: TableSchema = TableSchema {
    name: "sales_per_thing",
    columns: &[
      Column {
        name: "day",
        sql_type: SqlType::Date,
      },
      Column {
        name: "thing",
        sql_type: SqlType::Text,
      },
      Column {
        name: "total_sales",
        sql_type: SqlType::Numeric,
      },
    ],
    primary_key: &["day", "thing"],
  };

  static KEY_ONLY: TableSchema = TableSchema {
    name: "seen",
    columns: &[Column {
      name: "id",
      sql_type: SqlType::Text,
    }],
    primary_key: &["id"],
  };

  fn row(thing: &str, total: i64) -> DatabaseRow {
    DatabaseRow::new(vec![
      SqlValue::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()),
      SqlValue::Text(thing.to_string()),
      SqlValue::Numeric(Decimal::from(total)),
    ])
  }

  #[test]
  fn test_create_table_sql() {
    assert_eq!(
      EXAMPLE.create_table_sql(),
      "CREATE TABLE IF NOT EXISTS sales_per_thing (day DATE, thing VARCHAR(255), \
       total_sales NUMERIC, PRIMARY KEY (day, thing))"
    );
  }

  #[test]
  fn test_upsert_sql_overwrites_value_columns() {
    assert_eq!(
      EXAMPLE.upsert_sql(),
      "INSERT INTO sales_per_thing (day, thing, total_sales) VALUES ($1, $2, $3) \
       ON CONFLICT (day, thing) DO UPDATE SET total_sales = EXCLUDED.total_sales"
    );
  }

  #[test]
  fn test_upsert_sql_without_value_columns() {
    assert!(KEY_ONLY.upsert_sql().ends_with("ON CONFLICT (id) DO NOTHING"));
  }

  #[test]
  fn test_select_sql_casts_columns() {
    assert_eq!(
      EXAMPLE.select_sql(),
      "SELECT day::date AS day, thing::text AS thing, total_sales::numeric AS total_sales \
       FROM sales_per_thing"
    );
  }

  #[test]
  fn test_key_of_and_accessors() {
    let r = row("widgets", 12);
    let key = EXAMPLE.key_of(&r).unwrap();
    assert_eq!(key.0.len(), 2);
    assert_eq!(key.to_string(), "(2024-01-02, widgets)");
    assert_eq!(r.numeric(&EXAMPLE, "total_sales").unwrap(), Decimal::from(12));
    assert!(r.integer(&EXAMPLE, "total_sales").is_err());
    assert!(r.get(&EXAMPLE, "missing").is_err());
  }

  #[test]
  fn test_validate_rejects_wrong_shapes() {
    assert!(EXAMPLE.validate(&row("a", 1)).is_ok());
    let short = DatabaseRow::new(vec![SqlValue::Text("a".into())]);
    assert!(EXAMPLE.validate(&short).is_err());
    let mut wrong = row("a", 1);
    wrong.values[2] = SqlValue::Integer(1);
    assert!(EXAMPLE.validate(&wrong).is_err());
  }

  #[test]
  fn test_validate_rejects_text_the_column_cannot_hold() {
    let exact = "a".repeat(MAX_TEXT_LEN);
    assert!(EXAMPLE.validate(&row(&exact, 1)).is_ok());

    let err = EXAMPLE.validate(&row(&format!("{}a", exact), 1)).unwrap_err();
    assert!(!err.is_transient());
    assert!(err.to_string().contains("sales_per_thing.thing"), "{}", err);

    let err = EXAMPLE.validate(&row("nul\0byte", 1)).unwrap_err();
    assert!(err.to_string().contains("NUL"), "{}", err);
  }
}
