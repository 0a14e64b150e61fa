use thiserror::Error;

/// `expected` is the exact number of hex characters for fixed-width values and
/// `None` for variable-length payloads. `bits` is set when a well-formed quantity
/// is too large for its target width.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HexError {
    #[error("Malformed hex: expected {} with an optional '0x' prefix, got {raw:?}", hex_width(.expected))]
    MalformedHex { expected: Option<usize>, raw: String },
    #[error("Malformed quantity: expected {}, got {raw:?}", quantity_width(.bits))]
    MalformedQuantity { raw: String, bits: Option<u32> },
}

fn hex_width(expected: &Option<usize>) -> String {
    match expected {
        Some(chars) => format!("{chars} hex characters"),
        None => "an even number of hex characters".to_string(),
    }
}

fn quantity_width(bits: &Option<u32>) -> String {
    match bits {
        Some(bits) => format!("an unsigned integer of at most {bits} bits"),
        None => "a hex encoded unsigned integer".to_string(),
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainDataError {
    #[error("Malformed chain data in field '{field}' (raw value {value:?}): {source}")]
    Malformed {
        field: &'static str,
        value: String,
        #[source]
        source: HexError,
    },
    #[error("Invalid block timestamp: {timestamp}")]
    InvalidTimestamp { timestamp: u64 },
    #[error("Receipt {receipt} does not belong to transaction {transaction}")]
    ReceiptMismatch { transaction: String, receipt: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("RPC call timed out")]
    Timeout,
    #[error("RPC call cancelled")]
    Cancelled,
    #[error("RPC error response {code}: {message}")]
    Response { code: i64, message: String },
    #[error("RPC transport error: {0}")]
    Transport(String),
    #[error("Failed to decode {method} response: {message}")]
    Decode { method: String, message: String },
}

#[derive(Error, Debug)]
pub enum ReorgError {
    #[error(
        "Chain diverged below the retained history: no common ancestor for block {number} ({hash}) within {retained} retained blocks"
    )]
    DeepReorg {
        number: u64,
        hash: String,
        retained: usize,
    },
    #[error("Provider returned no block for ancestor {hash}")]
    MissingAncestor { hash: String },
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    ChainData(#[from] ChainDataError),
}
