//! Address codec for the chains the relayer talks to
//!
//! Both sides of the pair use 20-byte account addresses; they only differ in
//! how those bytes are written down:
//!
//! ```text
//! EVM   0x + 40 hex              0x8c4d...e1a2
//! Tron  41 + 40 hex              418c4d...e1a2
//! Tron  base58check(0x41 || 20)  TNu5...
//! ```

use alloy::primitives::Address;
use eyre::{eyre, Result};

/// Tron mainnet/testnet address prefix byte
pub const TRON_ADDRESS_PREFIX: u8 = 0x41;

/// Parse an address in any supported notation into its 20 raw bytes
pub fn parse_address(raw: &str) -> Result<Address> {
    let s = raw.trim();

    if let Some(hex_part) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return parse_hex_bytes(hex_part, raw);
    }

    // 41-prefixed hex, as returned by TronGrid with visible=false
    if s.len() == 42 && s.starts_with("41") && s.chars().all(|c| c.is_ascii_hexdigit()) {
        return parse_hex_bytes(&s[2..], raw);
    }

    if s.starts_with('T') {
        return parse_tron_base58(s);
    }

    if s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit()) {
        return parse_hex_bytes(s, raw);
    }

    Err(eyre!("Unrecognized address format: {}", raw))
}

fn parse_hex_bytes(hex_part: &str, raw: &str) -> Result<Address> {
    let bytes = hex::decode(hex_part).map_err(|e| eyre!("Invalid hex address {}: {}", raw, e))?;
    if bytes.len() != 20 {
        return Err(eyre!("Address must be 20 bytes, got {} ({})", bytes.len(), raw));
    }
    Ok(Address::from_slice(&bytes))
}

/// Decode a `T...` base58check address
pub fn parse_tron_base58(s: &str) -> Result<Address> {
    let payload = bs58::decode(s)
        .with_check(None)
        .into_vec()
        .map_err(|e| eyre!("Invalid Tron address {}: {}", s, e))?;
    if payload.len() != 21 || payload[0] != TRON_ADDRESS_PREFIX {
        return Err(eyre!("Tron address {} must be 0x41 followed by 20 bytes", s));
    }
    Ok(Address::from_slice(&payload[1..]))
}

/// `41`-prefixed hex form used by the TronGrid wallet API
pub fn to_tron_hex(address: &Address) -> String {
    format!("41{}", hex::encode(address.as_slice()))
}

/// Human-readable `T...` form
pub fn to_tron_base58(address: &Address) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(TRON_ADDRESS_PREFIX);
    payload.extend_from_slice(address.as_slice());
    bs58::encode(payload).with_check().into_string()
}
