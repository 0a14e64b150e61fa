//! Validating hex codec for the fixed and variable width values served by the node.
//!
//! Every value passes through these functions on its way in; nothing is truncated
//! or padded. Rendering goes through [`HexString`].

use alloy_primitives::{hex, FixedBytes};

use crate::models::errors::HexError;

pub use alloy_primitives::{Address, Bytes};

pub type Hash = FixedBytes<32>;
pub type Bytes32 = FixedBytes<32>;
pub type Bytes256 = FixedBytes<256>;

fn strip_prefix(raw: &str) -> &str {
    raw.strip_prefix("0x").unwrap_or(raw)
}

/// Decode exactly `N` bytes from a hex string with an optional `0x` prefix.
pub fn parse_fixed_hex<const N: usize>(raw: &str) -> Result<FixedBytes<N>, HexError> {
    let body = strip_prefix(raw);
    let malformed = || HexError::MalformedHex {
        expected: Some(N * 2),
        raw: raw.to_string(),
    };

    if body.len() != N * 2 {
        return Err(malformed());
    }

    let mut bytes = [0u8; N];
    hex::decode_to_slice(body, &mut bytes).map_err(|_| malformed())?;
    Ok(FixedBytes(bytes))
}

pub fn parse_hash(raw: &str) -> Result<Hash, HexError> {
    parse_fixed_hex::<32>(raw)
}

pub fn parse_address(raw: &str) -> Result<Address, HexError> {
    parse_fixed_hex::<20>(raw).map(Address::from)
}

/// Decode any even-length hex string, including the empty payload `0x`.
pub fn parse_variable_hex(raw: &str) -> Result<Bytes, HexError> {
    let body = strip_prefix(raw);
    let malformed = || HexError::MalformedHex {
        expected: None,
        raw: raw.to_string(),
    };

    if body.len() % 2 != 0 || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(malformed());
    }
    hex::decode(body).map(Bytes::from).map_err(|_| malformed())
}

fn quantity_body(raw: &str) -> Result<&str, HexError> {
    let body = strip_prefix(raw);
    if body.is_empty() || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(HexError::MalformedQuantity {
            raw: raw.to_string(),
            bits: None,
        });
    }
    Ok(body)
}

/// Parse a hex quantity (`0x1b4`, `1b4`, leading zeros allowed).
pub fn parse_quantity(raw: &str) -> Result<u128, HexError> {
    let body = quantity_body(raw)?;
    u128::from_str_radix(body, 16).map_err(|_| HexError::MalformedQuantity {
        raw: raw.to_string(),
        bits: Some(u128::BITS),
    })
}

pub fn parse_quantity_u64(raw: &str) -> Result<u64, HexError> {
    let body = quantity_body(raw)?;
    u64::from_str_radix(body, 16).map_err(|_| HexError::MalformedQuantity {
        raw: raw.to_string(),
        bits: Some(u64::BITS),
    })
}

/// Canonical lowercase rendering of byte values.
pub trait HexString {
    fn to_hex_string(&self) -> String;

    fn to_0x_string(&self) -> String {
        format!("0x{}", self.to_hex_string())
    }
}

impl<const N: usize> HexString for FixedBytes<N> {
    fn to_hex_string(&self) -> String {
        hex::encode(self.as_slice())
    }
}

impl HexString for Address {
    fn to_hex_string(&self) -> String {
        hex::encode(self.as_slice())
    }
}

impl HexString for Bytes {
    fn to_hex_string(&self) -> String {
        hex::encode(self.as_ref())
    }
}
