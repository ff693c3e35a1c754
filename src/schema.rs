//! The four salesweave tables and how records map onto them.
//!
//! | Table | Primary key | Value columns |
//! |---|---|---|
//! | `transactions` | `transaction_id` | every transaction field |
//! | `sales_per_category` | `(transaction_date, category)` | `total_sales` |
//! | `sales_per_day` | `transaction_date` | `total_sales` |
//! | `sales_per_month` | `(year, month)` | `total_sales` |
//!
//! Money is stored as `NUMERIC` so totals stay exact.

use rust_decimal::Decimal;

use crate::db::{Column, DatabaseRow, RowKey, SqlType, SqlValue, TableSchema, ToRow};
use crate::error::StoreError;
use crate::extract::{CategoryKey, DailyKey, Dimension, MonthlyKey};
use crate::state::AggregateSnapshot;
use crate::transaction::{RawTimestamp, Transaction, TransactionRow};

const fn col(name: &'static str, sql_type: SqlType) -> Column {
  Column { name, sql_type }
}

/// Raw transaction log.
pub static TRANSACTIONS: TableSchema = TableSchema {
  name: "transactions",
  columns: &[
    col("transaction_id", SqlType::Text),
    col("product_id", SqlType::Text),
    col("product_name", SqlType::Text),
    col("product_category", SqlType::Text),
    col("product_price", SqlType::Numeric),
    col("product_quantity", SqlType::Integer),
    col("product_brand", SqlType::Text),
    col("total_amount", SqlType::Numeric),
    col("currency", SqlType::Text),
    col("customer_id", SqlType::Text),
    col("transaction_date", SqlType::Timestamp),
    col("payment_method", SqlType::Text),
  ],
  primary_key: &["transaction_id"],
};

/// Sales per day and category.
pub static SALES_PER_CATEGORY: TableSchema = TableSchema {
  name: "sales_per_category",
  columns: &[
    col("transaction_date", SqlType::Date),
    col("category", SqlType::Text),
    col("total_sales", SqlType::Numeric),
  ],
  primary_key: &["transaction_date", "category"],
};

/// Sales per day.
pub static SALES_PER_DAY: TableSchema = TableSchema {
  name: "sales_per_day",
  columns: &[
    col("transaction_date", SqlType::Date),
    col("total_sales", SqlType::Numeric),
  ],
  primary_key: &["transaction_date"],
};

/// Sales per year and month.
pub static SALES_PER_MONTH: TableSchema = TableSchema {
  name: "sales_per_month",
  columns: &[
    col("year", SqlType::Integer),
    col("month", SqlType::Integer),
    col("total_sales", SqlType::Numeric),
  ],
  primary_key: &["year", "month"],
};

/// Every table, in bootstrap order.
pub fn all_tables() -> [&'static TableSchema; 4] {
  [
    &TRANSACTIONS,
    &SALES_PER_CATEGORY,
    &SALES_PER_DAY,
    &SALES_PER_MONTH,
  ]
}

/// The table a dimension writes to.
pub fn table_for(dimension: Dimension) -> &'static TableSchema {
  match dimension {
    Dimension::Transactions => &TRANSACTIONS,
    Dimension::Category => &SALES_PER_CATEGORY,
    Dimension::Daily => &SALES_PER_DAY,
    Dimension::Monthly => &SALES_PER_MONTH,
  }
}

impl ToRow for TransactionRow {
  fn schema() -> &'static TableSchema {
    &TRANSACTIONS
  }

  fn key(&self) -> RowKey {
    RowKey(vec![SqlValue::Text(self.transaction.transaction_id.clone())])
  }

  fn to_row(&self) -> DatabaseRow {
    let tx = &self.transaction;
    // Decoding rejects quantities above i32::MAX.
    let quantity = i32::try_from(tx.product_quantity).unwrap_or(i32::MAX);
    DatabaseRow::new(vec![
      SqlValue::Text(tx.transaction_id.clone()),
      SqlValue::Text(tx.product_id.clone()),
      SqlValue::Text(tx.product_name.clone()),
      SqlValue::Text(tx.product_category.clone()),
      SqlValue::Numeric(tx.product_price),
      SqlValue::Integer(quantity),
      SqlValue::Text(tx.product_brand.clone()),
      SqlValue::Numeric(self.total_amount),
      SqlValue::Text(tx.currency.clone()),
      SqlValue::Text(tx.customer_id.clone()),
      SqlValue::Timestamp(self.transaction_date),
      SqlValue::Text(tx.payment_method.clone()),
    ])
  }

  fn from_row(row: &DatabaseRow) -> Result<Self, StoreError> {
    let s = &TRANSACTIONS;
    let quantity = row.integer(s, "product_quantity")?;
    let transaction_date = row.timestamp(s, "transaction_date")?;
    let total_amount = row.numeric(s, "total_amount")?;
    let transaction = Transaction {
      transaction_id: row.text(s, "transaction_id")?,
      product_id: row.text(s, "product_id")?,
      product_name: row.text(s, "product_name")?,
      product_category: row.text(s, "product_category")?,
      product_price: row.numeric(s, "product_price")?,
      product_quantity: u32::try_from(quantity)
        .map_err(|_| StoreError::Permanent(format!("negative product_quantity {}", quantity)))?,
      product_brand: row.text(s, "product_brand")?,
      total_amount: Some(total_amount),
      currency: row.text(s, "currency")?,
      customer_id: row.text(s, "customer_id")?,
      transaction_date: RawTimestamp::from(transaction_date),
      payment_method: row.text(s, "payment_method")?,
    };
    Ok(Self {
      transaction,
      transaction_date,
      total_amount,
    })
  }
}

/// A grouping key with a table of its own.
pub trait AggregateKey: Sized {
  /// Table holding this key's totals. Its last column is `total_sales`.
  fn schema() -> &'static TableSchema;
  /// Key columns, in primary key order.
  fn key_values(&self) -> Vec<SqlValue>;
  /// Rebuilds the key from a stored row.
  fn from_key_columns(row: &DatabaseRow) -> Result<Self, StoreError>;
}

impl AggregateKey for CategoryKey {
  fn schema() -> &'static TableSchema {
    &SALES_PER_CATEGORY
  }

  fn key_values(&self) -> Vec<SqlValue> {
    vec![
      SqlValue::Date(self.transaction_date),
      SqlValue::Text(self.category.clone()),
    ]
  }

  fn from_key_columns(row: &DatabaseRow) -> Result<Self, StoreError> {
    Ok(Self {
      transaction_date: row.date(&SALES_PER_CATEGORY, "transaction_date")?,
      category: row.text(&SALES_PER_CATEGORY, "category")?,
    })
  }
}

impl AggregateKey for DailyKey {
  fn schema() -> &'static TableSchema {
    &SALES_PER_DAY
  }

  fn key_values(&self) -> Vec<SqlValue> {
    vec![SqlValue::Date(self.transaction_date)]
  }

  fn from_key_columns(row: &DatabaseRow) -> Result<Self, StoreError> {
    Ok(Self {
      transaction_date: row.date(&SALES_PER_DAY, "transaction_date")?,
    })
  }
}

impl AggregateKey for MonthlyKey {
  fn schema() -> &'static TableSchema {
    &SALES_PER_MONTH
  }

  fn key_values(&self) -> Vec<SqlValue> {
    // Months are 1..=12.
    vec![
      SqlValue::Integer(self.year),
      SqlValue::Integer(self.month as i32),
    ]
  }

  fn from_key_columns(row: &DatabaseRow) -> Result<Self, StoreError> {
    let month = row.integer(&SALES_PER_MONTH, "month")?;
    if !(1..=12).contains(&month) {
      return Err(StoreError::Permanent(format!("month {} out of range", month)));
    }
    Ok(Self {
      year: row.integer(&SALES_PER_MONTH, "year")?,
      month: month as u32,
    })
  }
}

impl<K> ToRow for AggregateSnapshot<K>
where
  K: AggregateKey
    + Clone
    + std::fmt::Debug
    + serde::Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
    + 'static,
{
  fn schema() -> &'static TableSchema {
    K::schema()
  }

  fn key(&self) -> RowKey {
    RowKey(self.key.key_values())
  }

  fn sequence(&self) -> Option<u64> {
    Some(self.sequence)
  }

  fn to_row(&self) -> DatabaseRow {
    let mut values = self.key.key_values();
    values.push(SqlValue::Numeric(self.total_sales));
    DatabaseRow::new(values)
  }

  fn from_row(row: &DatabaseRow) -> Result<Self, StoreError> {
    let total_sales: Decimal = row.numeric(K::schema(), "total_sales")?;
    Ok(Self {
      key: K::from_key_columns(row)?,
      total_sales,
      sequence: 0,
    })
  }
}
