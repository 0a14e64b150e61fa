#![cfg(any(test, feature = "test"))]

//! Fixtures shared by unit tests and `tests/`: canned wire records, an
//! in-memory node speaking JSON-RPC and an in-memory metric store.

use alloy_primitives::FixedBytes;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::indexer::client::JsonRpcTransport;
use crate::models::common::{BlockMetrics, Config, InfluxProtocol, MetricsConfig};
use crate::models::errors::RpcError;
use crate::models::rpc::{RawBlock, RawLog, RawReceipt, RawTransaction};
use crate::storage::MetricStore;
use crate::utils::hex::{parse_hash, parse_quantity_u64, Address, Hash, HexString};

pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
pub const BLOCK_TIME: u64 = 12;

/// A hash holding `n` in its low bytes.
pub fn hash(n: u64) -> Hash {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&n.to_be_bytes());
    FixedBytes(bytes)
}

pub fn address(n: u64) -> Address {
    let mut bytes = [0u8; 20];
    bytes[12..].copy_from_slice(&n.to_be_bytes());
    Address::from(bytes)
}

fn zeros(bytes: usize) -> String {
    format!("0x{}", "00".repeat(bytes))
}

pub fn raw_block(number: u64, hash: Hash, parent: Hash, timestamp: u64) -> RawBlock {
    RawBlock {
        number: format!("{number:#x}"),
        hash: hash.to_0x_string(),
        parent_hash: parent.to_0x_string(),
        nonce: "0x0000000000000042".to_string(),
        sha3_uncles: zeros(32),
        logs_bloom: zeros(256),
        transactions_root: zeros(32),
        state_root: zeros(32),
        receipts_root: zeros(32),
        author: None,
        miner: address(0xbeef).to_0x_string(),
        difficulty: "0x2".to_string(),
        extra_data: "0x".to_string(),
        size: "0x21c".to_string(),
        gas_limit: "0x1c9c380".to_string(),
        gas_used: "0x0".to_string(),
        timestamp: format!("{timestamp:#x}"),
        transactions: Vec::new(),
        uncles: Vec::new(),
    }
}

/// Block `number` of a chain whose hashes are `hash(fork + n)`.
pub fn chain_block(number: u64, fork: u64) -> RawBlock {
    let parent = match number {
        0 => hash(u64::MAX),
        n => hash(fork + n - 1),
    };
    raw_block(
        number,
        hash(fork + number),
        parent,
        GENESIS_TIMESTAMP + number * BLOCK_TIME,
    )
}

/// A 21000 gas transfer priced at 20 gwei.
pub fn raw_transaction(hash: Hash, block_number: u64, index: u64) -> RawTransaction {
    RawTransaction {
        hash: hash.to_0x_string(),
        nonce: "0x9".to_string(),
        block_hash: self::hash(block_number).to_0x_string(),
        block_number: format!("{block_number:#x}"),
        transaction_index: format!("{index:#x}"),
        from: address(1).to_0x_string(),
        to: Some(address(2).to_0x_string()),
        value: "0x0".to_string(),
        gas_price: "0x4a817c800".to_string(),
        gas: "0xc350".to_string(),
        input: "0x".to_string(),
    }
}

pub fn raw_receipt(transaction: Hash, block: Hash, block_number: u64, index: u64) -> RawReceipt {
    RawReceipt {
        block_hash: block.to_0x_string(),
        block_number: format!("{block_number:#x}"),
        contract_address: None,
        cumulative_gas_used: "0x5208".to_string(),
        gas_used: "0x5208".to_string(),
        logs: Vec::new(),
        logs_bloom: zeros(256),
        root: None,
        status: Some("0x1".to_string()),
        transaction_hash: transaction.to_0x_string(),
        transaction_index: format!("{index:#x}"),
    }
}

pub fn raw_log(transaction: Hash, block: Hash, block_number: u64, log_index: u64) -> RawLog {
    RawLog {
        log_index: format!("{log_index:#x}"),
        block_number: format!("{block_number:#x}"),
        block_hash: block.to_0x_string(),
        transaction_hash: transaction.to_0x_string(),
        transaction_index: "0x0".to_string(),
        address: address(0xc0ffee).to_0x_string(),
        data: "0x".to_string(),
        topics: vec![hash(0xddf2).to_0x_string()],
    }
}

pub fn config() -> Config {
    Config {
        ethereum_uri: "http://localhost:8545".to_string(),
        influx_host: "localhost".to_string(),
        influx_port: 8086,
        influx_protocol: InfluxProtocol::Http,
        influx_database_name: "Ethereum".to_string(),
        influx_user: "user".to_string(),
        influx_pass: "password".to_string(),
        start_block: None,
        rpc_timeout_ms: 5_000,
        poll_interval_ms: 1_000,
        history_size: 100,
        seed_depth: 16,
        receipt_concurrency: 32,
        metrics: MetricsConfig {
            enabled: false,
            address: "0.0.0.0".to_string(),
            port: 9100,
        },
    }
}

#[derive(Default)]
struct NodeState {
    blocks: HashMap<Hash, RawBlock>,
    canonical: BTreeMap<u64, Hash>,
    receipts: HashMap<Hash, RawReceipt>,
    calls: Vec<(String, Value)>,
}

/// An in-memory execution node. Pushing a block makes it the canonical block
/// at its height and drops anything above it, which is how tests stage reorgs.
#[derive(Default)]
pub struct MockNode {
    state: Mutex<NodeState>,
}

impl MockNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chain(blocks: impl IntoIterator<Item = RawBlock>) -> Self {
        let node = Self::new();
        for block in blocks {
            node.push(block);
        }
        node
    }

    /// Receipts are generated for every transaction that does not have one yet.
    pub fn push(&self, block: RawBlock) {
        let mut state = self.state.lock().unwrap();
        let hash = parse_hash(&block.hash).unwrap();
        let number = parse_quantity_u64(&block.number).unwrap();

        for transaction in &block.transactions {
            let tx_hash = parse_hash(&transaction.hash).unwrap();
            let index = parse_quantity_u64(&transaction.transaction_index).unwrap();
            state
                .receipts
                .entry(tx_hash)
                .or_insert_with(|| raw_receipt(tx_hash, hash, number, index));
        }

        state.canonical.retain(|height, _| *height < number);
        state.canonical.insert(number, hash);
        state.blocks.insert(hash, block);
    }

    pub fn set_receipt(&self, receipt: RawReceipt) {
        let tx_hash = parse_hash(&receipt.transaction_hash).unwrap();
        self.state.lock().unwrap().receipts.insert(tx_hash, receipt);
    }

    /// How many requests for `method` the node has served.
    pub fn calls(&self, method: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    pub fn requests(&self) -> Vec<(String, Value)> {
        self.state.lock().unwrap().calls.clone()
    }

    fn render(block: &RawBlock, full: bool) -> Result<Value, RpcError> {
        let mut value = serde_json::to_value(block).map_err(|e| RpcError::Transport(e.to_string()))?;
        if !full {
            value["transactions"] = json!(block
                .transactions
                .iter()
                .map(|tx| tx.hash.clone())
                .collect::<Vec<_>>());
        }
        Ok(value)
    }
}

fn bad_params(params: &Value) -> RpcError {
    RpcError::Response {
        code: -32602,
        message: format!("invalid params {params}"),
    }
}

#[async_trait]
impl JsonRpcTransport for MockNode {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push((method.to_string(), params.clone()));

        match method {
            "eth_blockNumber" => Ok(state
                .canonical
                .keys()
                .next_back()
                .map(|head| json!(format!("{head:#x}")))
                .unwrap_or(Value::Null)),
            "eth_getBlockByNumber" => {
                let tag = params[0].as_str().ok_or_else(|| bad_params(&params))?;
                let full = params[1].as_bool().unwrap_or(false);
                let hash = match tag {
                    "latest" => state.canonical.values().next_back().copied(),
                    number => {
                        let number = parse_quantity_u64(number).map_err(|_| bad_params(&params))?;
                        state.canonical.get(&number).copied()
                    }
                };
                match hash.and_then(|hash| state.blocks.get(&hash)) {
                    Some(block) => Self::render(block, full),
                    None => Ok(Value::Null),
                }
            }
            "eth_getBlockByHash" => {
                let raw = params[0].as_str().ok_or_else(|| bad_params(&params))?;
                let hash = parse_hash(raw).map_err(|_| bad_params(&params))?;
                let full = params[1].as_bool().unwrap_or(false);
                match state.blocks.get(&hash) {
                    Some(block) => Self::render(block, full),
                    None => Ok(Value::Null),
                }
            }
            "eth_getTransactionReceipt" => {
                let raw = params[0].as_str().ok_or_else(|| bad_params(&params))?;
                let hash = parse_hash(raw).map_err(|_| bad_params(&params))?;
                match state.receipts.get(&hash) {
                    Some(receipt) => serde_json::to_value(receipt)
                        .map_err(|e| RpcError::Transport(e.to_string())),
                    None => Ok(Value::Null),
                }
            }
            other => Err(RpcError::Response {
                code: -32601,
                message: format!("the method {other} does not exist"),
            }),
        }
    }
}

/// A metric store kept in memory. `failing(n)` rejects the next `n` writes
/// and purges.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<BlockMetrics>>,
    failures: AtomicUsize,
    writes: AtomicUsize,
    purges: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            ..Self::default()
        }
    }

    pub fn with_blocks(blocks: Vec<BlockMetrics>) -> Self {
        Self {
            rows: Mutex::new(blocks),
            ..Self::default()
        }
    }

    pub fn blocks(&self) -> Vec<BlockMetrics> {
        self.rows.lock().unwrap().clone()
    }

    /// Block numbers currently stored, in write order.
    pub fn numbers(&self) -> Vec<u64> {
        self.rows.lock().unwrap().iter().map(|m| m.block.number).collect()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn purges(&self) -> usize {
        self.purges.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn write_block(&self, metrics: &BlockMetrics) -> Result<()> {
        if self.take_failure() {
            return Err(anyhow!("store unavailable"));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.rows.lock().unwrap().push(metrics.clone());
        Ok(())
    }

    async fn purge_block(&self, timestamp: DateTime<Utc>) -> Result<()> {
        if self.take_failure() {
            return Err(anyhow!("store unavailable"));
        }
        self.purges.fetch_add(1, Ordering::SeqCst);
        self.rows
            .lock()
            .unwrap()
            .retain(|metrics| metrics.block.timestamp != timestamp);
        Ok(())
    }

    async fn last_block_hash(&self) -> Result<Option<Hash>> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .max_by_key(|metrics| metrics.block.timestamp)
            .map(|metrics| parse_hash(&metrics.block.hash))
            .transpose()
            .map_err(Into::into)
    }
}
