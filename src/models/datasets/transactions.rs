use chrono::{DateTime, Utc};

use crate::models::datasets::logs::Log;
use crate::utils::hex::{Address, Bytes, Bytes256, Hash};

////////////////////////////////////// RPC Data ////////////////////////////////////////
///////////////////////////////// eth_getBlockByNumber /////////////////////////////////
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub hash: Hash,
    pub nonce: u64,
    pub block_hash: Hash,
    pub block_number: u64,
    pub transaction_index: u64,
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub value: u128,
    pub gas_price: u128,
    pub gas: u64,
    pub input: Bytes,
}

////////////////////////////// eth_getTransactionReceipt ///////////////////////////////
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub transaction_hash: Hash,
    pub block_hash: Hash,
    pub block_number: u64,
    pub transaction_index: u64,
    pub cumulative_gas_used: u64,
    /// 0 for a failed transaction. Absent on pre-Byzantium receipts, which carry `root` instead.
    pub status: Option<u64>,
    pub gas_used: u64,
    pub contract_address: Option<Address>,
    pub logs: Vec<Log>,
    pub logs_bloom: Bytes256,
    pub root: Option<Hash>,
}

/////////////////////////////////// Transformed Data ///////////////////////////////////

/// One row of the `transaction` measurement, tagged by `index` and `failed`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionMetric {
    pub timestamp: DateTime<Utc>,
    pub index: u64,
    pub failed: bool,
    pub hash: String,
    pub block_hash: String,
    pub block_number: u64,
    pub transaction_index: u64,
    pub status: Option<u64>,
    pub gas_used: u64,
    pub gas_provided: u64,
    pub gas_price_nanoeth: f64,
    pub gas_cost_total_eth: f64,
    pub from: String,
    pub to: Option<String>,
    pub nonce: u64,
    pub eth: f64,
    pub contract_address: Option<String>,
    pub log_count: u64,
}
