use crate::utils::hex::{Address, Bytes, Hash};

////////////////////////////////////// RPC Data ////////////////////////////////////////
#[derive(Debug, Clone, PartialEq)]
pub struct Log {
    pub block_number: u64,
    pub block_hash: Hash,
    pub transaction_hash: Hash,
    pub transaction_index: u64,
    pub log_index: u64,
    pub address: Address,
    pub topics: Vec<Hash>,
    pub data: Bytes,
}
