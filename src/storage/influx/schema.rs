//! Line protocol encoding for the `block` and `transaction` measurements.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write;

use crate::models::common::BlockMetrics;
use crate::models::datasets::blocks::BlockMetric;
use crate::models::datasets::transactions::TransactionMetric;

pub const BLOCK_MEASUREMENT: &str = "block";
pub const TRANSACTION_MEASUREMENT: &str = "transaction";

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Float(f64),
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        // Influx integers are signed 64 bit
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: &'static str,
    pub tags: Vec<(&'static str, String)>,
    pub fields: Vec<(&'static str, FieldValue)>,
    /// Seconds since the epoch.
    pub timestamp: i64,
}

impl Point {
    fn new(measurement: &'static str, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement,
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp: timestamp.timestamp(),
        }
    }

    fn tag(mut self, key: &'static str, value: impl ToString) -> Self {
        self.tags.push((key, value.to_string()));
        self
    }

    fn field(mut self, key: &'static str, value: impl Into<FieldValue>) -> Self {
        self.fields.push((key, value.into()));
        self
    }

    /// Null fields are left out of the line.
    fn optional_field<V: Into<FieldValue>>(self, key: &'static str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.field(key, value),
            None => self,
        }
    }

    pub fn to_line(&self) -> String {
        let mut line = escape(self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            let _ = write!(
                line,
                ",{}={}",
                escape(key, &[',', '=', ' ']),
                escape(value, &[',', '=', ' '])
            );
        }

        let fields = self
            .fields
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    FieldValue::Str(s) => format!("\"{}\"", escape(s, &['"'])),
                    FieldValue::Int(i) => format!("{i}i"),
                    FieldValue::Float(f) => format!("{f}"),
                };
                format!("{}={}", escape(key, &[',', '=', ' ']), value)
            })
            .collect::<Vec<_>>()
            .join(",");

        let _ = write!(line, " {} {}", fields, self.timestamp);
        line
    }
}

fn escape(raw: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '\\' || special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub fn block_point(block: &BlockMetric) -> Point {
    Point::new(BLOCK_MEASUREMENT, block.timestamp)
        .field("hash", block.hash.clone())
        .field("parent_hash", block.parent_hash.clone())
        .field("number", block.number)
        .field("author", block.author.clone())
        .field("miner", block.miner.clone())
        .field("nonce", block.nonce)
        .field("difficulty", block.difficulty)
        .field("size_bytes", block.size_bytes)
        .field("gas_limit", block.gas_limit)
        .field("gas_used", block.gas_used)
        .field("uncles_count", block.uncles_count)
        .field("since_previous_block_seconds", block.since_previous_block_seconds)
}

pub fn transaction_point(transaction: &TransactionMetric) -> Point {
    Point::new(TRANSACTION_MEASUREMENT, transaction.timestamp)
        .tag("index", transaction.index)
        .tag("failed", transaction.failed)
        .field("hash", transaction.hash.clone())
        .field("block_hash", transaction.block_hash.clone())
        .field("block_number", transaction.block_number)
        .field("transaction_index", transaction.transaction_index)
        .optional_field("status", transaction.status)
        .field("gas_used", transaction.gas_used)
        .field("gas_provided", transaction.gas_provided)
        .field("gas_price_nanoeth", transaction.gas_price_nanoeth)
        .field("gas_cost_total_eth", transaction.gas_cost_total_eth)
        .field("from", transaction.from.clone())
        .optional_field("to", transaction.to.clone())
        .field("nonce", transaction.nonce)
        .field("eth", transaction.eth)
        .optional_field("contract_address", transaction.contract_address.clone())
        .field("log_count", transaction.log_count)
}

/// The request body for one block: transaction lines followed by the block line.
pub fn encode_batch(metrics: &BlockMetrics) -> String {
    metrics
        .transactions
        .iter()
        .map(transaction_point)
        .chain(std::iter::once(block_point(&metrics.block)))
        .map(|point| point.to_line())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn delete_statements(timestamp: DateTime<Utc>) -> [String; 2] {
    let time = timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);
    [BLOCK_MEASUREMENT, TRANSACTION_MEASUREMENT]
        .map(|measurement| format!("DELETE FROM \"{measurement}\" WHERE time = '{time}'"))
}

pub fn last_hash_query() -> String {
    format!("SELECT last(\"hash\") FROM \"{BLOCK_MEASUREMENT}\"")
}
