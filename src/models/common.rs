use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::datasets::blocks::BlockMetric;
use crate::models::datasets::transactions::TransactionMetric;
use crate::utils::hex::{parse_hash, parse_quantity_u64, Hash, HexString};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InfluxProtocol {
    Http,
    Https,
}

impl fmt::Display for InfluxProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Https => write!(f, "https"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub ethereum_uri: String,
    pub influx_host: String,
    pub influx_port: u16,
    pub influx_protocol: InfluxProtocol,
    pub influx_database_name: String,
    pub influx_user: String,
    pub influx_pass: String,
    pub start_block: Option<String>,
    pub rpc_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub history_size: usize,
    pub seed_depth: usize,
    pub receipt_concurrency: usize,
    pub metrics: MetricsConfig,
}

impl Config {
    pub fn influx_url(&self) -> String {
        format!(
            "{}://{}:{}",
            self.influx_protocol, self.influx_host, self.influx_port
        )
    }

    pub fn start_block(&self) -> Result<Option<StartBlock>> {
        match self.start_block.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => StartBlock::parse(raw).map(Some),
        }
    }
}

/// Explicitly configured starting point, used when the store holds no blocks yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartBlock {
    Hash(Hash),
    Number(u64),
}

impl StartBlock {
    /// Accepts a 32 byte block hash, a `0x` hex number or a decimal number.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim_start_matches("0x").len() == 64 {
            return parse_hash(raw)
                .map(Self::Hash)
                .map_err(|e| anyhow!("invalid start block hash: {}", e));
        }
        if raw.starts_with("0x") {
            return parse_quantity_u64(raw)
                .map(Self::Number)
                .map_err(|e| anyhow!("invalid start block number: {}", e));
        }
        raw.parse::<u64>()
            .map(Self::Number)
            .map_err(|e| anyhow!("invalid start block {:?}: {}", raw, e))
    }
}

impl fmt::Display for StartBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hash(hash) => write!(f, "{}", hash.to_0x_string()),
            Self::Number(number) => write!(f, "{}", number),
        }
    }
}

/// Everything written for a single block, committed as one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockMetrics {
    pub block: BlockMetric,
    pub transactions: Vec<TransactionMetric>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_block_parsing() {
        assert_eq!(StartBlock::parse("12345").unwrap(), StartBlock::Number(12345));
        assert_eq!(StartBlock::parse("0x10").unwrap(), StartBlock::Number(16));

        let hash = format!("0x{}", "ab".repeat(32));
        assert_eq!(
            StartBlock::parse(&hash).unwrap(),
            StartBlock::Hash(parse_hash(&hash).unwrap())
        );

        assert!(StartBlock::parse("latest").is_err());
        assert!(StartBlock::parse(&format!("0x{}", "zz".repeat(32))).is_err());
    }
}
