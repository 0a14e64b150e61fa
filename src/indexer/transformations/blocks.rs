use chrono::{DateTime, Utc};

use crate::models::datasets::blocks::{Block, BlockMetric};
use crate::utils::hex::HexString;

pub trait BlockTransformer {
    /// `parent_timestamp` is `None` only for genesis.
    fn transform_block(&self, parent_timestamp: Option<DateTime<Utc>>) -> BlockMetric;
}

impl BlockTransformer for Block {
    fn transform_block(&self, parent_timestamp: Option<DateTime<Utc>>) -> BlockMetric {
        let since_previous_block_seconds = parent_timestamp
            .map(|parent| (self.timestamp - parent).num_seconds())
            .unwrap_or_default();

        BlockMetric {
            timestamp: self.timestamp,
            hash: self.hash.to_hex_string(),
            parent_hash: self.parent_hash.to_hex_string(),
            number: self.number,
            author: self.author.to_hex_string(),
            miner: self.miner.to_hex_string(),
            nonce: self.nonce as f64,
            difficulty: self.difficulty as f64,
            size_bytes: self.size,
            gas_limit: self.gas_limit,
            gas_used: self.gas_used,
            uncles_count: self.uncles.len() as u64,
            since_previous_block_seconds,
        }
    }
}
