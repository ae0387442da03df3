//! EVM chain client
//!
//! Deposit logs are observed by polling `eth_getLogs` over HTTP JSON-RPC,
//! starting at the block after the head seen when the subscription is made.
//! Claims are signed locally and sent through a provider with the recommended
//! fillers (nonce, gas, fees), then the receipt is awaited for a bounded time.

use std::collections::VecDeque;
use std::time::Duration;

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{keccak256, Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::sol_types::SolEvent;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::address::parse_address;
use crate::chain_client::{ChainClient, ContractCall, RawDepositLog, RawEventStream, TxOptions};
use crate::error::ClientError;
use crate::types::TxHandle;

sol! {
    /// Deposit event emitted by the bridge contract
    event Bridge(
        address indexed sender,
        uint256 amount,
        bytes32 indexed depositId,
        uint256 destinationChainId
    );

    /// Claim entry point on the destination bridge
    function claim(
        address recipient,
        uint256 amount,
        bytes32 depositId,
        uint256 sourceChainId
    ) external;
}

/// Largest block span requested by a single `eth_getLogs`
const MAX_BLOCK_RANGE: u64 = 1_000;

/// How long to wait for a receipt once the node accepted the transaction
const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Topic0 of a deposit event named `event_name` with the bridge's parameter layout
pub fn event_topic(event_name: &str) -> B256 {
    keccak256(format!(
        "{}(address,uint256,bytes32,uint256)",
        event_name
    ))
}

pub struct EvmClient {
    name: String,
    chain_id: u64,
    rpc_url: String,
    provider: RootProvider<Http<Client>>,
    signer: PrivateKeySigner,
    poll_interval: Duration,
    receipt_timeout: Duration,
}

impl EvmClient {
    pub fn new(
        name: &str,
        rpc_url: &str,
        chain_id: u64,
        private_key: &str,
        poll_interval: Duration,
    ) -> Result<Self> {
        let provider = ProviderBuilder::new().on_http(rpc_url.parse().wrap_err("Invalid RPC URL")?);
        let signer: PrivateKeySigner = private_key.parse().wrap_err("Invalid private key")?;

        info!(
            chain = %name,
            chain_id,
            relayer_address = %signer.address(),
            "EVM client initialized"
        );

        Ok(Self {
            name: name.to_string(),
            chain_id,
            rpc_url: rpc_url.to_string(),
            provider,
            signer,
            poll_interval,
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
        })
    }

    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    /// Address claims are sent from
    pub fn address(&self) -> Address {
        self.signer.address()
    }
}

#[async_trait]
impl ChainClient for EvmClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check_connectivity(&self) -> Result<(), ClientError> {
        let remote = self.provider.get_chain_id().await.map_err(rpc_error)?;
        if remote != self.chain_id {
            return Err(ClientError::InvalidArgument(format!(
                "endpoint serves chain {} but {} is configured",
                remote, self.chain_id
            )));
        }
        Ok(())
    }

    async fn subscribe_event(
        &self,
        contract: &str,
        event_name: &str,
    ) -> Result<RawEventStream, ClientError> {
        let address =
            parse_address(contract).map_err(|e| ClientError::InvalidArgument(e.to_string()))?;
        let head = self.provider.get_block_number().await.map_err(rpc_error)?;

        debug!(
            chain = %self.name,
            contract = %address,
            event = %event_name,
            from_block = head + 1,
            "Starting log polling"
        );

        let poller = LogPoller {
            provider: self.provider.clone(),
            filter: Filter::new()
                .address(address)
                .event_signature(event_topic(event_name)),
            next_block: head + 1,
            poll_interval: self.poll_interval,
            buffered: VecDeque::new(),
            failed: false,
        };

        Ok(stream::unfold(poller, LogPoller::next_item).boxed())
    }

    async fn send_transaction(
        &self,
        contract: &str,
        call: &ContractCall,
        options: &TxOptions,
    ) -> Result<TxHandle, ClientError> {
        let to = parse_address(contract).map_err(|e| ClientError::InvalidArgument(e.to_string()))?;

        // Fillers populate nonce, gas and fees; without them the node rejects the tx
        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(
                self.rpc_url
                    .parse()
                    .map_err(|e| ClientError::InvalidArgument(format!("invalid RPC URL: {}", e)))?,
            );

        let mut tx = TransactionRequest::default()
            .with_to(to)
            .with_input(Bytes::from(call.calldata()?));
        if let Some(limit) = options.fee_limit {
            tx = tx.with_gas_limit(u64::try_from(limit).unwrap_or(u64::MAX));
        }

        let pending = provider.send_transaction(tx).await.map_err(rpc_error)?;
        let tx_hash = *pending.tx_hash();
        debug!(chain = %self.name, tx_hash = %tx_hash, "Transaction sent");

        match tokio::time::timeout(self.receipt_timeout, pending.get_receipt()).await {
            Ok(Ok(receipt)) => {
                if !receipt.status() {
                    return Err(ClientError::Reverted(format!(
                        "transaction {:#x} reverted in block {:?}",
                        tx_hash, receipt.block_number
                    )));
                }
            }
            Ok(Err(e)) => {
                warn!(
                    chain = %self.name,
                    tx_hash = %tx_hash,
                    error = %e,
                    "Could not fetch receipt for accepted transaction"
                );
            }
            Err(_) => {
                warn!(
                    chain = %self.name,
                    tx_hash = %tx_hash,
                    timeout_secs = self.receipt_timeout.as_secs(),
                    "Receipt not observed in time, treating transaction as accepted"
                );
            }
        }

        Ok(TxHandle(format!("{:#x}", tx_hash)))
    }

    async fn latest_block(&self) -> Result<u64, ClientError> {
        self.provider.get_block_number().await.map_err(rpc_error)
    }
}

/// Polling state behind the deposit stream
struct LogPoller {
    provider: RootProvider<Http<Client>>,
    filter: Filter,
    next_block: u64,
    poll_interval: Duration,
    buffered: VecDeque<RawDepositLog>,
    failed: bool,
}

impl LogPoller {
    async fn next_item(mut self) -> Option<(Result<RawDepositLog, ClientError>, Self)> {
        loop {
            if self.failed {
                return None;
            }
            if let Some(log) = self.buffered.pop_front() {
                return Some((Ok(log), self));
            }
            tokio::time::sleep(self.poll_interval).await;
            if let Err(e) = self.poll().await {
                self.failed = true;
                return Some((Err(e), self));
            }
        }
    }

    async fn poll(&mut self) -> Result<(), ClientError> {
        let head = self.provider.get_block_number().await.map_err(rpc_error)?;
        if head < self.next_block {
            return Ok(());
        }

        let to_block = head.min(self.next_block + MAX_BLOCK_RANGE - 1);
        let filter = self
            .filter
            .clone()
            .from_block(self.next_block)
            .to_block(to_block);
        let logs = self.provider.get_logs(&filter).await.map_err(rpc_error)?;

        for log in &logs {
            self.buffered.push_back(decode_bridge_log(log)?);
        }
        self.next_block = to_block + 1;
        Ok(())
    }
}

/// Decode a bridge deposit log into its textual raw form
fn decode_bridge_log(log: &Log) -> Result<RawDepositLog, ClientError> {
    // Topic0 was matched by the filter; the event name may differ from `Bridge`
    let event = Bridge::decode_log_data(log.data(), false)
        .map_err(|e| ClientError::Decode(format!("bridge log: {}", e)))?;

    Ok(RawDepositLog {
        sender: format!("{:#x}", event.sender),
        amount: event.amount.to_string(),
        deposit_id: format!("0x{}", hex::encode(event.depositId)),
        destination_chain_id: event.destinationChainId.to_string(),
        block_number: log.block_number,
        tx_id: log.transaction_hash.map(|h| format!("{:#x}", h)),
        log_index: log.log_index,
    })
}

fn rpc_error(e: impl std::fmt::Display) -> ClientError {
    ClientError::from_message(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChainId, ClaimRequest, DepositId};
    use alloy::primitives::U256;
    use alloy::sol_types::SolCall;

    #[test]
    fn test_event_topic_matches_abi() {
        assert_eq!(event_topic("Bridge"), Bridge::SIGNATURE_HASH);
        assert_ne!(event_topic("Deposit"), Bridge::SIGNATURE_HASH);
    }

    #[test]
    fn test_decode_bridge_log() {
        let event = Bridge {
            sender: Address::repeat_byte(0xaa),
            amount: U256::from(1000u64),
            depositId: B256::repeat_byte(0x01),
            destinationChainId: U256::from(2494u64),
        };
        let log = Log {
            inner: alloy::primitives::Log {
                address: Address::repeat_byte(0x10),
                data: event.encode_log_data(),
            },
            block_number: Some(42),
            transaction_hash: Some(B256::repeat_byte(0xfe)),
            log_index: Some(3),
            ..Default::default()
        };

        let raw = decode_bridge_log(&log).unwrap();
        assert_eq!(raw.sender, format!("0x{}", "aa".repeat(20)));
        assert_eq!(raw.amount, "1000");
        assert_eq!(raw.deposit_id, format!("0x{}", "01".repeat(32)));
        assert_eq!(raw.destination_chain_id, "2494");
        assert_eq!(raw.block_number, Some(42));
        assert_eq!(raw.tx_id, Some(format!("0x{}", "fe".repeat(32))));
        assert_eq!(raw.log_index, Some(3));
    }

    #[test]
    fn test_decode_rejects_truncated_data() {
        let log = Log {
            inner: alloy::primitives::Log::new_unchecked(
                Address::repeat_byte(0x10),
                vec![
                    Bridge::SIGNATURE_HASH,
                    B256::ZERO,
                    B256::repeat_byte(0x01),
                ],
                Bytes::from(vec![0u8; 16]),
            ),
            ..Default::default()
        };
        assert!(matches!(decode_bridge_log(&log), Err(ClientError::Decode(_))));
    }

    #[test]
    fn test_claim_calldata_matches_binding() {
        let request = ClaimRequest {
            recipient: Address::repeat_byte(0xaa),
            amount: U256::from(1000u64),
            deposit_id: DepositId([7u8; 32]),
            source_chain_id: ChainId(11155111),
        };
        let expected = claimCall {
            recipient: request.recipient,
            amount: request.amount,
            depositId: B256::from(request.deposit_id.0),
            sourceChainId: U256::from(11155111u64),
        }
        .abi_encode();

        assert_eq!(request.to_call("claim").calldata().unwrap(), expected);
    }

    #[test]
    fn test_new_rejects_bad_key() {
        let result = EvmClient::new(
            "sepolia",
            "http://localhost:8545",
            11155111,
            "0x1234",
            Duration::from_secs(2),
        );
        assert!(result.is_err());
    }
}
