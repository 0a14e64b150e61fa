use chrono::{DateTime, Utc};

use super::{decode, decode_optional};
use crate::models::datasets::blocks::Block;
use crate::models::datasets::transactions::Transaction;
use crate::models::errors::ChainDataError;
use crate::models::rpc::{RawBlock, RawTransaction};
use crate::utils::hex::{
    parse_address, parse_fixed_hex, parse_hash, parse_quantity, parse_quantity_u64,
    parse_variable_hex,
};

/// Decode a UNIX-seconds quantity into an absolute time.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ChainDataError> {
    let seconds = decode("timestamp", raw, parse_quantity_u64)?;
    i64::try_from(seconds)
        .ok()
        .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
        .ok_or(ChainDataError::InvalidTimestamp { timestamp: seconds })
}

pub fn parse_transaction(raw: &RawTransaction) -> Result<Transaction, ChainDataError> {
    Ok(Transaction {
        hash: decode("transaction.hash", &raw.hash, parse_hash)?,
        nonce: decode("transaction.nonce", &raw.nonce, parse_quantity_u64)?,
        block_hash: decode("transaction.blockHash", &raw.block_hash, parse_hash)?,
        block_number: decode("transaction.blockNumber", &raw.block_number, parse_quantity_u64)?,
        transaction_index: decode(
            "transaction.transactionIndex",
            &raw.transaction_index,
            parse_quantity_u64,
        )?,
        from: decode("transaction.from", &raw.from, parse_address)?,
        to: decode_optional("transaction.to", raw.to.as_deref(), parse_address)?,
        value: decode("transaction.value", &raw.value, parse_quantity)?,
        gas_price: decode("transaction.gasPrice", &raw.gas_price, parse_quantity)?,
        gas: decode("transaction.gas", &raw.gas, parse_quantity_u64)?,
        input: decode("transaction.input", &raw.input, parse_variable_hex)?,
    })
}

pub fn parse_block(raw: &RawBlock) -> Result<Block, ChainDataError> {
    let miner = decode("miner", &raw.miner, parse_address)?;
    // `author` is a Parity alias of `miner`; other clients only report the latter
    let author = decode_optional("author", raw.author.as_deref(), parse_address)?.unwrap_or(miner);

    Ok(Block {
        number: decode("number", &raw.number, parse_quantity_u64)?,
        hash: decode("hash", &raw.hash, parse_hash)?,
        parent_hash: decode("parentHash", &raw.parent_hash, parse_hash)?,
        nonce: decode("nonce", &raw.nonce, parse_quantity_u64)?,
        sha3_uncles: decode("sha3Uncles", &raw.sha3_uncles, parse_fixed_hex::<32>)?,
        logs_bloom: decode("logsBloom", &raw.logs_bloom, parse_fixed_hex::<256>)?,
        transactions_root: decode(
            "transactionsRoot",
            &raw.transactions_root,
            parse_fixed_hex::<32>,
        )?,
        state_root: decode("stateRoot", &raw.state_root, parse_fixed_hex::<32>)?,
        receipts_root: decode("receiptsRoot", &raw.receipts_root, parse_fixed_hex::<32>)?,
        author,
        miner,
        difficulty: decode("difficulty", &raw.difficulty, parse_quantity)?,
        extra_data: decode("extraData", &raw.extra_data, parse_variable_hex)?,
        size: decode("size", &raw.size, parse_quantity_u64)?,
        gas_limit: decode("gasLimit", &raw.gas_limit, parse_quantity_u64)?,
        gas_used: decode("gasUsed", &raw.gas_used, parse_quantity_u64)?,
        timestamp: parse_timestamp(&raw.timestamp)?,
        transactions: raw
            .transactions
            .iter()
            .map(parse_transaction)
            .collect::<Result<Vec<_>, _>>()?,
        uncles: raw
            .uncles
            .iter()
            .map(|uncle| decode("uncles", uncle, parse_hash))
            .collect::<Result<Vec<_>, _>>()?,
    })
}
