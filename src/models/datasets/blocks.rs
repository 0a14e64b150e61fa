use chrono::{DateTime, Utc};

use crate::models::datasets::transactions::Transaction;
use crate::utils::hex::{Address, Bytes, Bytes256, Bytes32, Hash};

////////////////////////////////////// RPC Data ////////////////////////////////////////
///////////////////////////////// eth_getBlockByNumber /////////////////////////////////
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub number: u64,
    pub hash: Hash,
    pub parent_hash: Hash,
    pub nonce: u64,
    pub sha3_uncles: Bytes32,
    pub logs_bloom: Bytes256,
    pub transactions_root: Bytes32,
    pub state_root: Bytes32,
    pub receipts_root: Bytes32,
    pub author: Address,
    pub miner: Address,
    pub difficulty: u128,
    pub extra_data: Bytes,
    pub size: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: DateTime<Utc>,
    pub transactions: Vec<Transaction>,
    pub uncles: Vec<Hash>,
}

/////////////////////////////////// Transformed Data ///////////////////////////////////

/// One row of the `block` measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockMetric {
    pub timestamp: DateTime<Utc>,
    pub hash: String,
    pub parent_hash: String,
    pub number: u64,
    pub author: String,
    pub miner: String,
    pub nonce: f64,
    pub difficulty: f64,
    pub size_bytes: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub uncles_count: u64,
    pub since_previous_block_seconds: i64,
}
