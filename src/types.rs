//! Common types for the relay pipeline
//!
//! Deposits observed on one chain become claim requests on the other. All of
//! these values are small, immutable and passed by value between stages.

use alloy::primitives::{Address, U256};
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::chain_client::{CallArg, ContractCall};

// ============================================================================
// Identifiers
// ============================================================================

/// Numeric network identifier (e.g. 11155111 for Sepolia, 2494 for Shasta)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainId(pub u64);

impl ChainId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        ChainId(id)
    }
}

/// Contract-generated 32-byte deposit identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DepositId(pub [u8; 32]);

impl DepositId {
    /// Parse from hex (with or without 0x prefix). Short values are left-padded,
    /// matching how a bytes32 topic is rendered by some indexers.
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        if s.is_empty() || s.len() > 64 {
            return Err(eyre!("deposit id must be 1..=32 bytes of hex, got {} chars", s.len()));
        }
        let padded = format!("{:0>64}", s);
        let bytes = hex::decode(&padded)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(DepositId(out))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for DepositId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for DepositId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DepositId({})", self.to_hex())
    }
}

impl From<[u8; 32]> for DepositId {
    fn from(bytes: [u8; 32]) -> Self {
        DepositId(bytes)
    }
}

// ============================================================================
// Relay pair
// ============================================================================

/// One of the two chains in the relay pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    A,
    B,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::A, Side::B];

    /// The opposite chain of the pair
    pub fn peer(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::A => f.write_str("a"),
            Side::B => f.write_str("b"),
        }
    }
}

// ============================================================================
// Pipeline values
// ============================================================================

/// Where in the source chain a deposit was observed (for logs only)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventOrigin {
    pub block_number: Option<u64>,
    pub tx_id: Option<String>,
    pub log_index: Option<u64>,
}

/// Canonical bridge deposit, normalized from a raw chain log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositEvent {
    pub sender: Address,
    pub amount: U256,
    pub deposit_id: DepositId,
    pub source_chain_id: ChainId,
    pub destination_chain_id: ChainId,
    pub origin: EventOrigin,
}

/// Arguments of the claim call on the destination chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRequest {
    pub recipient: Address,
    pub amount: U256,
    pub deposit_id: DepositId,
    pub source_chain_id: ChainId,
}

impl ClaimRequest {
    /// Build the `function(address,uint256,bytes32,uint256)` call for this claim
    pub fn to_call(&self, function: &str) -> ContractCall {
        ContractCall {
            function: function.to_string(),
            args: vec![
                CallArg::Address(self.recipient),
                CallArg::Uint(self.amount),
                CallArg::Bytes32(self.deposit_id.0),
                CallArg::Uint(U256::from(self.source_chain_id.0)),
            ],
        }
    }
}

/// Transaction identifier returned by a chain client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxHandle(pub String);

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a single claim attempt
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionResult {
    Success { tx: TxHandle },
    Failure(crate::error::SubmissionFailure),
}

impl SubmissionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, SubmissionResult::Success { .. })
    }
}

/// Lifecycle of a chain listener, owned by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerState {
    Stopped,
    Starting,
    Active,
    Faulted,
}

impl ListenerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerState::Stopped => "stopped",
            ListenerState::Starting => "starting",
            ListenerState::Active => "active",
            ListenerState::Faulted => "faulted",
        }
    }

    /// Numeric encoding for the state gauge
    pub fn as_gauge(&self) -> f64 {
        match self {
            ListenerState::Stopped => 0.0,
            ListenerState::Starting => 1.0,
            ListenerState::Active => 2.0,
            ListenerState::Faulted => 3.0,
        }
    }
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
