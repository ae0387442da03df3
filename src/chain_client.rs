//! Chain client capability consumed by the relay engine
//!
//! The engine never touches keys, providers or ABIs directly. Each chain is
//! reached through a [`ChainClient`] that can stream raw deposit logs, send a
//! signed contract call, and answer liveness/head queries.

use alloy::dyn_abi::{DynSolValue, JsonAbiExt};
use alloy::json_abi::Function;
use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::ClientError;
use crate::types::TxHandle;

/// Stream of raw deposit logs in the order the chain client delivers them
pub type RawEventStream = BoxStream<'static, Result<RawDepositLog, ClientError>>;

/// Deposit log as delivered by a chain client, before normalization.
///
/// Fields are kept in the textual form the node returned (hex or decimal,
/// chain-native address notation); the listener turns them into a
/// [`crate::types::DepositEvent`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDepositLog {
    pub sender: String,
    pub amount: String,
    pub deposit_id: String,
    pub destination_chain_id: String,
    pub block_number: Option<u64>,
    pub tx_id: Option<String>,
    pub log_index: Option<u64>,
}

/// Single static ABI argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallArg {
    Address(Address),
    Uint(U256),
    Bytes32([u8; 32]),
}

impl CallArg {
    pub fn sol_type(&self) -> &'static str {
        match self {
            CallArg::Address(_) => "address",
            CallArg::Uint(_) => "uint256",
            CallArg::Bytes32(_) => "bytes32",
        }
    }

    pub fn to_value(&self) -> DynSolValue {
        match self {
            CallArg::Address(address) => DynSolValue::Address(*address),
            CallArg::Uint(value) => DynSolValue::Uint(*value, 256),
            CallArg::Bytes32(bytes) => DynSolValue::FixedBytes(B256::from(*bytes), 32),
        }
    }
}

/// Contract function call; the function name is configurable, so the ABI is
/// resolved at runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub function: String,
    pub args: Vec<CallArg>,
}

impl ContractCall {
    /// Canonical signature, e.g. `claim(address,uint256,bytes32,uint256)`
    pub fn signature(&self) -> String {
        let types: Vec<&str> = self.args.iter().map(CallArg::sol_type).collect();
        format!("{}({})", self.function, types.join(","))
    }

    /// ABI description of the called function
    pub fn abi(&self) -> Result<Function, ClientError> {
        let signature = self.signature();
        Function::parse(&signature).map_err(|e| {
            ClientError::InvalidArgument(format!("invalid function {}: {}", signature, e))
        })
    }

    pub fn values(&self) -> Vec<DynSolValue> {
        self.args.iter().map(CallArg::to_value).collect()
    }

    /// ABI-encoded arguments without the selector
    pub fn encode_params(&self) -> Vec<u8> {
        DynSolValue::Tuple(self.values()).abi_encode_params()
    }

    /// Full calldata: selector followed by the encoded arguments
    pub fn calldata(&self) -> Result<Vec<u8>, ClientError> {
        self.abi()?
            .abi_encode_input(&self.values())
            .map_err(|e| ClientError::InvalidArgument(format!("{}: {}", self.signature(), e)))
    }
}

/// Per-call transaction options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    /// Chain-specific fee ceiling (EVM gas limit, Tron fee_limit in sun)
    pub fee_limit: Option<u128>,
}

/// Capability object for one chain
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Label used in logs and metrics
    fn name(&self) -> &str;

    /// Confirm the endpoint is reachable and serves the expected network
    async fn check_connectivity(&self) -> Result<(), ClientError>;

    /// Start observing `event_name` on `contract` from the chain's current head
    async fn subscribe_event(
        &self,
        contract: &str,
        event_name: &str,
    ) -> Result<RawEventStream, ClientError>;

    /// Sign and send a contract call, returning once the chain accepted it
    async fn send_transaction(
        &self,
        contract: &str,
        call: &ContractCall,
        options: &TxOptions,
    ) -> Result<TxHandle, ClientError>;

    /// Current head block number
    async fn latest_block(&self) -> Result<u64, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::keccak256;

    fn claim_call(function: &str) -> ContractCall {
        ContractCall {
            function: function.to_string(),
            args: vec![
                CallArg::Address(Address::repeat_byte(0xaa)),
                CallArg::Uint(U256::from(1000u64)),
                CallArg::Bytes32([1u8; 32]),
                CallArg::Uint(U256::from(2494u64)),
            ],
        }
    }

    #[test]
    fn test_claim_selector_matches_abi() {
        let call = claim_call("claim");
        assert_eq!(call.signature(), "claim(address,uint256,bytes32,uint256)");

        let expected = keccak256(b"claim(address,uint256,bytes32,uint256)");
        assert_eq!(call.abi().unwrap().selector().as_slice(), &expected[..4]);
    }

    #[test]
    fn test_calldata_is_selector_then_params() {
        let call = claim_call("claim");
        let params = call.encode_params();
        assert_eq!(params.len(), 128);
        assert_eq!(&params[12..32], Address::repeat_byte(0xaa).as_slice());
        assert_eq!(&params[64..96], &[1u8; 32]);

        let calldata = call.calldata().unwrap();
        assert_eq!(calldata.len(), 132);
        assert_eq!(&calldata[..4], call.abi().unwrap().selector().as_slice());
        assert_eq!(&calldata[4..], params.as_slice());
    }

    #[test]
    fn test_invalid_function_name_is_rejected() {
        let call = claim_call("not a function");
        assert!(matches!(call.calldata(), Err(ClientError::InvalidArgument(_))));
    }
}
