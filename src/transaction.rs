//! Transaction events as they arrive from the source topic.
//!
//! The upstream generator publishes one JSON object per purchase with camelCase field names:
//!
//! ```json
//! {
//!   "transactionId": "9b2c...", "productId": "product1", "productName": "laptop",
//!   "productCategory": "electronic", "productPrice": 499.99, "productQuantity": 2,
//!   "productBrand": "apple", "totalAmount": 999.98, "currency": "USD",
//!   "customerId": "jdoe", "transactionDate": "2024-03-01T10:15:30.123456",
//!   "paymentMethod": "credit_card"
//! }
//! ```
//!
//! Decoding ([`Transaction::decode`]) checks the shape of the message and that every text field
//! fits its store column, see [`text_problem`](crate::db::text_problem). The timestamp is
//! kept as a [`RawTimestamp`] and parsed by the key extractors, so an unreadable date surfaces as
//! a [`MalformedEventError`] for that one event instead of a decoding failure.

use chrono::{DateTime, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db::text_problem;
use crate::error::{DeserializationError, MalformedEventError};

/// Text layouts accepted for naive (offset-less) timestamps. They are read as UTC.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// A `transactionDate` as found on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
  /// Milliseconds since the Unix epoch.
  EpochMillis(i64),
  /// RFC 3339 or `YYYY-MM-DD[T ]HH:MM:SS[.f]` text.
  Text(String),
}

impl RawTimestamp {
  /// Parses the timestamp into a UTC wall-clock time.
  ///
  /// `transaction_id` is only used to label the error.
  pub fn parse(&self, transaction_id: &str) -> Result<NaiveDateTime, MalformedEventError> {
    let malformed = |reason: String| MalformedEventError {
      transaction_id: transaction_id.to_string(),
      field: "transactionDate",
      reason,
    };

    match self {
      RawTimestamp::EpochMillis(millis) => DateTime::from_timestamp_millis(*millis)
        .map(|ts| ts.naive_utc())
        .ok_or_else(|| malformed(format!("epoch millis {} is out of range", millis))),
      RawTimestamp::Text(text) => {
        let text = text.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
          return Ok(ts.naive_utc());
        }
        NAIVE_FORMATS
          .iter()
          .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
          .ok_or_else(|| malformed(format!("`{}` is not a recognised timestamp", text)))
      }
    }
  }
}

impl From<NaiveDateTime> for RawTimestamp {
  fn from(ts: NaiveDateTime) -> Self {
    RawTimestamp::Text(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
  }
}

/// One purchase. Immutable once decoded; identity is `transaction_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
  /// Unique transaction identity.
  pub transaction_id: String,
  /// Product identity.
  pub product_id: String,
  /// Product display name.
  pub product_name: String,
  /// Category used by the per-category aggregate.
  pub product_category: String,
  /// Unit price.
  pub product_price: Decimal,
  /// Number of units bought.
  pub product_quantity: u32,
  /// Product brand.
  pub product_brand: String,
  /// Total paid. When absent the total is `product_price * product_quantity`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub total_amount: Option<Decimal>,
  /// ISO currency code.
  pub currency: String,
  /// Customer identity.
  pub customer_id: String,
  /// When the purchase happened, unparsed.
  pub transaction_date: RawTimestamp,
  /// Payment method label.
  pub payment_method: String,
}

impl Transaction {
  /// Decodes one source record.
  ///
  /// Text longer than [`MAX_TEXT_LEN`](crate::db::MAX_TEXT_LEN) characters or containing NUL
  /// is rejected here, since the store would refuse the whole batch holding it. Failures
  /// carry the record's partition and offset. They never affect the records that follow.
  pub fn decode(record: &SourceRecord) -> Result<Self, DeserializationError> {
    let error = |message: String| DeserializationError {
      partition: record.partition,
      offset: record.offset,
      message,
    };

    let tx: Transaction = serde_json::from_slice(&record.payload).map_err(|e| error(e.to_string()))?;
    if tx.transaction_id.trim().is_empty() {
      return Err(error("transactionId is empty".to_string()));
    }
    if i32::try_from(tx.product_quantity).is_err() {
      return Err(error(format!(
        "productQuantity {} does not fit the store column",
        tx.product_quantity
      )));
    }
    for (field, value) in tx.text_fields() {
      if let Some(problem) = text_problem(value) {
        return Err(error(format!("{} {}", field, problem)));
      }
    }
    Ok(tx)
  }

  /// The amount this transaction contributes to every aggregate.
  ///
  /// Without `totalAmount` this is `productPrice * productQuantity`, which fails when the
  /// product does not fit a [`Decimal`]. Totals never decrease, so a negative amount is
  /// rejected too.
  pub fn amount(&self) -> Result<Decimal, MalformedEventError> {
    let malformed = |reason: String| MalformedEventError {
      transaction_id: self.transaction_id.clone(),
      field: "totalAmount",
      reason,
    };
    let amount = match self.total_amount {
      Some(total) => total,
      None => self
        .product_price
        .checked_mul(Decimal::from(self.product_quantity))
        .ok_or_else(|| {
          malformed(format!(
            "productPrice {} times productQuantity {} overflows",
            self.product_price, self.product_quantity
          ))
        })?,
    };
    if amount.is_sign_negative() && !amount.is_zero() {
      return Err(malformed(format!("must not be negative, got {}", amount)));
    }
    Ok(amount)
  }

  /// Fields stored in text columns.
  fn text_fields(&self) -> [(&'static str, &str); 8] {
    [
      ("transactionId", self.transaction_id.as_str()),
      ("productId", self.product_id.as_str()),
      ("productName", self.product_name.as_str()),
      ("productCategory", self.product_category.as_str()),
      ("productBrand", self.product_brand.as_str()),
      ("currency", self.currency.as_str()),
      ("customerId", self.customer_id.as_str()),
      ("paymentMethod", self.payment_method.as_str()),
    ]
  }
}

/// A raw message from the inbound stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
  /// Partition the record was read from.
  pub partition: i32,
  /// Offset within the partition.
  pub offset: i64,
  /// Message key, if any.
  pub key: Option<Vec<u8>>,
  /// Message body.
  pub payload: Vec<u8>,
  /// Broker timestamp in epoch milliseconds, if any.
  pub timestamp: Option<i64>,
}

impl SourceRecord {
  /// Creates a record without key or broker timestamp.
  pub fn new(partition: i32, offset: i64, payload: impl Into<Vec<u8>>) -> Self {
    Self {
      partition,
      offset,
      key: None,
      payload: payload.into(),
      timestamp: None,
    }
  }

  /// Creates a record whose payload is `value` encoded as JSON.
  pub fn json<T: Serialize>(partition: i32, offset: i64, value: &T) -> Result<Self, serde_json::Error> {
    Ok(Self::new(partition, offset, serde_json::to_vec(value)?))
  }

  /// Sets the message key.
  #[must_use]
  pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
    self.key = Some(key.into());
    self
  }

  /// Sets the broker timestamp.
  #[must_use]
  pub fn with_timestamp(mut self, millis: i64) -> Self {
    self.timestamp = Some(millis);
    self
  }

  /// The payload as JSON when it is JSON, otherwise as a lossy UTF-8 string.
  pub fn payload_json(&self) -> serde_json::Value {
    serde_json::from_slice(&self.payload).unwrap_or_else(|_| {
      serde_json::Value::String(String::from_utf8_lossy(&self.payload).into_owned())
    })
  }
}

/// A transaction ready for the `transactions` table, with its timestamp and amount resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRow {
  /// The decoded transaction.
  pub transaction: Transaction,
  /// Parsed `transactionDate`.
  pub transaction_date: NaiveDateTime,
  /// Checked [`Transaction::amount`].
  pub total_amount: Decimal,
}

impl TransactionRow {
  /// Parses the timestamp of `transaction`, checks its amount and wraps all three.
  pub fn new(transaction: Transaction) -> Result<Self, MalformedEventError> {
    let transaction_date = transaction
      .transaction_date
      .parse(&transaction.transaction_id)?;
    let total_amount = transaction.amount()?;
    Ok(Self {
      transaction,
      transaction_date,
      total_amount,
    })
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::MAX_TEXT_LEN;
  use chrono::NaiveDate;
  use std::str::FromStr;

  fn record(json: &str) -> SourceRecord {
    SourceRecord::new(2, 41, json.as_bytes().to_vec())
  }

  const WIRE: &str = r#"{
    "transactionId": "t-1", "productId": "p-1", "productName": "laptop",
    "productCategory": "electronics", "productPrice": 499.5, "productQuantity": 2,
    "productBrand": "apple", "totalAmount": 999.0, "currency": "USD",
    "customerId": "c-1", "transactionDate": "2024-03-01T10:15:30.123456",
    "paymentMethod": "credit_card"
  }"#;

  #[test]
  fn test_decode_wire_format() {
    let tx = Transaction::decode(&record(WIRE)).unwrap();
    assert_eq!(tx.transaction_id, "t-1");
    assert_eq!(tx.product_category, "electronics");
    assert_eq!(tx.product_quantity, 2);
    assert_eq!(tx.amount().unwrap(), Decimal::from_str("999").unwrap());
  }

  #[test]
  fn test_amount_falls_back_to_price_times_quantity() {
    let mut tx = Transaction::decode(&record(WIRE)).unwrap();
    tx.total_amount = None;
    assert_eq!(tx.amount().unwrap(), Decimal::from_str("999.0").unwrap());
  }

  #[test]
  fn test_amount_overflow_is_malformed() {
    let mut tx = Transaction::decode(&record(WIRE)).unwrap();
    tx.total_amount = None;
    tx.product_price = Decimal::MAX;
    tx.product_quantity = 2;
    let err = tx.amount().unwrap_err();
    assert_eq!(err.transaction_id, "t-1");
    assert_eq!(err.field, "totalAmount");
    assert!(TransactionRow::new(tx).is_err());
  }

  #[test]
  fn test_row_keeps_checked_amount() {
    let mut tx = Transaction::decode(&record(WIRE)).unwrap();
    tx.total_amount = None;
    let row = TransactionRow::new(tx).unwrap();
    assert_eq!(row.total_amount, Decimal::from_str("999").unwrap());
  }

  #[test]
  fn test_overlong_text_is_rejected() {
    let long = "x".repeat(MAX_TEXT_LEN + 1);
    let json = WIRE.replace("\"electronics\"", &format!("\"{}\"", long));
    let err = Transaction::decode(&record(&json)).unwrap_err();
    assert!(err.message.contains("productCategory"), "{}", err.message);

    let fits = "\u{e9}".repeat(MAX_TEXT_LEN);
    let json = WIRE.replace("\"electronics\"", &format!("\"{}\"", fits));
    assert!(Transaction::decode(&record(&json)).is_ok());
  }

  #[test]
  fn test_nul_in_text_is_rejected() {
    let json = WIRE.replace("\"laptop\"", "\"lap\\u0000top\"");
    let err = Transaction::decode(&record(&json)).unwrap_err();
    assert!(err.message.contains("productName"), "{}", err.message);
    assert!(err.message.contains("NUL"));
  }

  #[test]
  fn test_decode_error_carries_position() {
    let err = Transaction::decode(&record("{not json")).unwrap_err();
    assert_eq!(err.partition, 2);
    assert_eq!(err.offset, 41);
  }

  #[test]
  fn test_negative_quantity_is_rejected() {
    let json = WIRE.replace("\"productQuantity\": 2", "\"productQuantity\": -2");
    assert!(Transaction::decode(&record(&json)).is_err());
  }

  #[test]
  fn test_empty_transaction_id_is_rejected() {
    let json = WIRE.replace("\"t-1\"", "\"  \"");
    let err = Transaction::decode(&record(&json)).unwrap_err();
    assert!(err.message.contains("transactionId"));
  }

  #[test]
  fn test_timestamp_formats() {
    let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
      .unwrap()
      .and_hms_opt(10, 15, 30)
      .unwrap();
    for text in [
      "2024-03-01T10:15:30",
      "2024-03-01 10:15:30",
      "2024-03-01T10:15:30Z",
      "2024-03-01T12:15:30+02:00",
    ] {
      let parsed = RawTimestamp::Text(text.to_string()).parse("t").unwrap();
      assert_eq!(parsed, expected, "{}", text);
    }
    let millis = expected.and_utc().timestamp_millis();
    assert_eq!(RawTimestamp::EpochMillis(millis).parse("t").unwrap(), expected);
  }

  #[test]
  fn test_bad_timestamp_is_malformed() {
    let err = RawTimestamp::Text("yesterday".to_string())
      .parse("t-9")
      .unwrap_err();
    assert_eq!(err.transaction_id, "t-9");
    assert_eq!(err.field, "transactionDate");
  }

  #[test]
  fn test_epoch_millis_on_the_wire() {
    let json = WIRE.replace("\"2024-03-01T10:15:30.123456\"", "1709288130000");
    let tx = Transaction::decode(&record(&json)).unwrap();
    assert_eq!(tx.transaction_date, RawTimestamp::EpochMillis(1_709_288_130_000));
  }

  #[test]
  fn test_payload_json_falls_back_to_text() {
    let rec = record("plain text");
    assert_eq!(rec.payload_json(), serde_json::Value::String("plain text".into()));
  }
}
