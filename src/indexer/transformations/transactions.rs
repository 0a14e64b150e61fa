use chrono::{DateTime, Utc};

use crate::models::datasets::transactions::{Receipt, Transaction, TransactionMetric};
use crate::models::errors::ChainDataError;
use crate::utils::hex::HexString;

const WEI_PER_NANOETH: f64 = 1e9;
const WEI_PER_ETH: f64 = 1e18;

pub trait TransactionTransformer {
    fn transform_transaction(
        &self,
        receipt: &Receipt,
        block_timestamp: DateTime<Utc>,
    ) -> Result<TransactionMetric, ChainDataError>;
}

impl TransactionTransformer for Transaction {
    fn transform_transaction(
        &self,
        receipt: &Receipt,
        block_timestamp: DateTime<Utc>,
    ) -> Result<TransactionMetric, ChainDataError> {
        if receipt.transaction_hash != self.hash {
            return Err(ChainDataError::ReceiptMismatch {
                transaction: self.hash.to_0x_string(),
                receipt: receipt.transaction_hash.to_0x_string(),
            });
        }

        // Exact in wei while it fits, converted to float only at the end
        let gas_cost_wei = u128::from(receipt.gas_used)
            .checked_mul(self.gas_price)
            .map(|wei| wei as f64)
            .unwrap_or_else(|| receipt.gas_used as f64 * self.gas_price as f64);

        Ok(TransactionMetric {
            timestamp: block_timestamp,
            index: receipt.transaction_index,
            failed: receipt.status == Some(0),
            hash: receipt.transaction_hash.to_hex_string(),
            block_hash: receipt.block_hash.to_hex_string(),
            block_number: receipt.block_number,
            transaction_index: receipt.transaction_index,
            status: receipt.status,
            gas_used: receipt.gas_used,
            gas_provided: self.gas,
            gas_price_nanoeth: self.gas_price as f64 / WEI_PER_NANOETH,
            gas_cost_total_eth: gas_cost_wei / WEI_PER_ETH,
            from: self.from.to_hex_string(),
            to: self.to.map(|to| to.to_hex_string()),
            nonce: self.nonce,
            eth: self.value as f64 / WEI_PER_ETH,
            contract_address: receipt.contract_address.map(|address| address.to_hex_string()),
            log_count: receipt.logs.len() as u64,
        })
    }
}

/// Pair every transaction with its receipt, in block order.
pub fn transform_transactions(
    transactions: &[Transaction],
    receipts: &[Receipt],
    block_timestamp: DateTime<Utc>,
) -> Result<Vec<TransactionMetric>, ChainDataError> {
    transactions
        .iter()
        .zip(receipts)
        .map(|(transaction, receipt)| transaction.transform_transaction(receipt, block_timestamp))
        .collect()
}
