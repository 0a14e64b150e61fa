pub mod influx;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::common::BlockMetrics;
use crate::utils::hex::Hash;

pub use influx::InfluxStore;

/// Time-series sink for derived block metrics.
///
/// Rows are keyed by block timestamp, so purging a block removes its `block`
/// row and every `transaction` row written with it.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Write one block's rows as a single batch.
    async fn write_block(&self, metrics: &BlockMetrics) -> Result<()>;

    /// Delete every row carrying `timestamp`.
    async fn purge_block(&self, timestamp: DateTime<Utc>) -> Result<()>;

    /// Hash of the most recently written block, if any.
    async fn last_block_hash(&self) -> Result<Option<Hash>>;
}
