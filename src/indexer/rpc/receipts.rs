use super::{decode, decode_optional};
use crate::models::datasets::logs::Log;
use crate::models::datasets::transactions::Receipt;
use crate::models::errors::ChainDataError;
use crate::models::rpc::{RawLog, RawReceipt};
use crate::utils::hex::{
    parse_address, parse_fixed_hex, parse_hash, parse_quantity_u64, parse_variable_hex,
};

pub fn parse_log(raw: &RawLog) -> Result<Log, ChainDataError> {
    Ok(Log {
        block_number: decode("log.blockNumber", &raw.block_number, parse_quantity_u64)?,
        block_hash: decode("log.blockHash", &raw.block_hash, parse_hash)?,
        transaction_hash: decode("log.transactionHash", &raw.transaction_hash, parse_hash)?,
        transaction_index: decode(
            "log.transactionIndex",
            &raw.transaction_index,
            parse_quantity_u64,
        )?,
        log_index: decode("log.logIndex", &raw.log_index, parse_quantity_u64)?,
        address: decode("log.address", &raw.address, parse_address)?,
        topics: raw
            .topics
            .iter()
            .map(|topic| decode("log.topics", topic, parse_hash))
            .collect::<Result<Vec<_>, _>>()?,
        data: decode("log.data", &raw.data, parse_variable_hex)?,
    })
}

pub fn parse_receipt(raw: &RawReceipt) -> Result<Receipt, ChainDataError> {
    Ok(Receipt {
        transaction_hash: decode("receipt.transactionHash", &raw.transaction_hash, parse_hash)?,
        block_hash: decode("receipt.blockHash", &raw.block_hash, parse_hash)?,
        block_number: decode("receipt.blockNumber", &raw.block_number, parse_quantity_u64)?,
        transaction_index: decode(
            "receipt.transactionIndex",
            &raw.transaction_index,
            parse_quantity_u64,
        )?,
        cumulative_gas_used: decode(
            "receipt.cumulativeGasUsed",
            &raw.cumulative_gas_used,
            parse_quantity_u64,
        )?,
        status: decode_optional("receipt.status", raw.status.as_deref(), parse_quantity_u64)?,
        gas_used: decode("receipt.gasUsed", &raw.gas_used, parse_quantity_u64)?,
        contract_address: decode_optional(
            "receipt.contractAddress",
            raw.contract_address.as_deref(),
            parse_address,
        )?,
        logs: raw
            .logs
            .iter()
            .map(parse_log)
            .collect::<Result<Vec<_>, _>>()?,
        logs_bloom: decode("receipt.logsBloom", &raw.logs_bloom, parse_fixed_hex::<256>)?,
        root: decode_optional("receipt.root", raw.root.as_deref(), parse_hash)?,
    })
}
