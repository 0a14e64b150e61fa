pub mod blocks;
pub mod receipts;

use crate::models::errors::{ChainDataError, HexError};

/// Decode one wire field, tagging a failure with the field name and raw value.
pub(crate) fn decode<T>(
    field: &'static str,
    raw: &str,
    parse: impl FnOnce(&str) -> Result<T, HexError>,
) -> Result<T, ChainDataError> {
    parse(raw).map_err(|source| ChainDataError::Malformed {
        field,
        value: raw.to_string(),
        source,
    })
}

pub(crate) fn decode_optional<T>(
    field: &'static str,
    raw: Option<&str>,
    parse: impl FnOnce(&str) -> Result<T, HexError>,
) -> Result<Option<T>, ChainDataError> {
    raw.map(|raw| decode(field, raw, parse)).transpose()
}

pub use blocks::{parse_block, parse_timestamp, parse_transaction};
pub use receipts::{parse_log, parse_receipt};
