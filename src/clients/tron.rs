//! Tron chain client (TronGrid HTTP API)
//!
//! Events are polled from `/v1/contracts/{address}/events`, ordered by block
//! timestamp. The cursor is the newest timestamp already delivered; events at
//! exactly that timestamp are remembered so a re-query from the cursor does
//! not deliver them twice.
//!
//! Claims go through the usual three-step wallet flow:
//!
//! 1. `/wallet/triggersmartcontract` builds the unsigned transaction
//! 2. the returned `txID` is signed locally with the secp256k1 key
//! 3. `/wallet/broadcasttransaction` submits it
//!
//! After broadcast the transaction info is polled for a bounded time so that
//! an on-chain revert is reported as such.

use std::collections::{HashMap, HashSet, VecDeque};
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{Address, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::address::{parse_address, to_tron_base58, to_tron_hex};
use crate::chain_client::{ChainClient, ContractCall, RawDepositLog, RawEventStream, TxOptions};
use crate::config::DEFAULT_TRON_FEE_LIMIT;
use crate::error::ClientError;
use crate::types::TxHandle;

/// TronGrid page size for event queries
const EVENT_PAGE_LIMIT: u32 = 200;

/// Pages followed in one poll before yielding to the next poll
const MAX_EVENT_PAGES: usize = 25;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Receipt polling after broadcast (about one minute in total)
const DEFAULT_RECEIPT_POLLS: u32 = 20;
const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(3);

pub struct TronClient {
    name: String,
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
    signer: PrivateKeySigner,
    poll_interval: Duration,
    receipt_polls: u32,
    receipt_poll_interval: Duration,
}

impl TronClient {
    pub fn new(
        name: &str,
        base_url: &str,
        api_key: Option<String>,
        private_key: &str,
        poll_interval: Duration,
    ) -> Result<Self> {
        let signer: PrivateKeySigner = private_key.parse().wrap_err("Invalid private key")?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .wrap_err("Failed to build HTTP client")?;

        info!(
            chain = %name,
            relayer_address = %to_tron_base58(&signer.address()),
            "Tron client initialized"
        );

        Ok(Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            http,
            signer,
            poll_interval,
            receipt_polls: DEFAULT_RECEIPT_POLLS,
            receipt_poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
        })
    }

    /// Override post-broadcast receipt polling; `polls = 0` skips it
    pub fn with_receipt_polling(mut self, polls: u32, interval: Duration) -> Self {
        self.receipt_polls = polls;
        self.receipt_poll_interval = interval;
        self
    }

    /// Address claims are sent from
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    fn api(&self) -> TronApi {
        TronApi {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
        }
    }

    async fn wait_for_receipt(&self, api: &TronApi, tx_id: &str) -> Result<(), ClientError> {
        for _ in 0..self.receipt_polls {
            tokio::time::sleep(self.receipt_poll_interval).await;
            let info: TransactionInfo = match api
                .post("/wallet/gettransactioninfobyid", &json!({ "value": tx_id }))
                .await
            {
                Ok(info) => info,
                Err(e) => {
                    debug!(chain = %self.name, tx_id, error = %e, "Transaction info not available yet");
                    continue;
                }
            };

            if info.id.is_none() {
                continue;
            }

            let contract_result = info.receipt.and_then(|r| r.result);
            if info.result.as_deref() == Some("FAILED")
                || matches!(contract_result.as_deref(), Some(r) if r != "SUCCESS")
            {
                let message = info
                    .res_message
                    .as_deref()
                    .map(decode_message)
                    .unwrap_or_default();
                return Err(ClientError::Reverted(format!(
                    "transaction {} failed with {}: {}",
                    tx_id,
                    contract_result.unwrap_or_else(|| "FAILED".to_string()),
                    message
                )));
            }
            return Ok(());
        }

        if self.receipt_polls > 0 {
            warn!(
                chain = %self.name,
                tx_id,
                "Transaction info not observed in time, treating transaction as accepted"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for TronClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check_connectivity(&self) -> Result<(), ClientError> {
        let block: NowBlock = self.api().post("/wallet/getnowblock", &json!({})).await?;
        let number = block.number().ok_or_else(|| {
            ClientError::Rpc("getnowblock returned no block header".to_string())
        })?;
        debug!(chain = %self.name, head = number, "Tron node reachable");
        Ok(())
    }

    async fn subscribe_event(
        &self,
        contract: &str,
        event_name: &str,
    ) -> Result<RawEventStream, ClientError> {
        let address =
            parse_address(contract).map_err(|e| ClientError::InvalidArgument(e.to_string()))?;
        let api = self.api();
        let head: NowBlock = api.post("/wallet/getnowblock", &json!({})).await?;
        let cursor = head.timestamp().ok_or_else(|| {
            ClientError::Rpc("getnowblock returned no block timestamp".to_string())
        })?;

        debug!(
            chain = %self.name,
            contract = %to_tron_base58(&address),
            event = %event_name,
            from_timestamp = cursor,
            "Starting event polling"
        );

        let poller = EventPoller {
            api,
            path: format!("/v1/contracts/{}/events", to_tron_base58(&address)),
            event_name: event_name.to_string(),
            cursor: EventCursor::new(cursor),
            poll_interval: self.poll_interval,
            buffered: VecDeque::new(),
            failed: false,
        };

        Ok(stream::unfold(poller, EventPoller::next_item).boxed())
    }

    async fn send_transaction(
        &self,
        contract: &str,
        call: &ContractCall,
        options: &TxOptions,
    ) -> Result<TxHandle, ClientError> {
        let contract =
            parse_address(contract).map_err(|e| ClientError::InvalidArgument(e.to_string()))?;
        let api = self.api();
        let fee_limit = options.fee_limit.unwrap_or(DEFAULT_TRON_FEE_LIMIT);
        let fee_limit = u64::try_from(fee_limit).unwrap_or(u64::MAX);

        let request = json!({
            "owner_address": to_tron_hex(&self.signer.address()),
            "contract_address": to_tron_hex(&contract),
            "function_selector": call.signature(),
            "parameter": hex::encode(call.encode_params()),
            "fee_limit": fee_limit,
            "call_value": 0,
            "visible": false,
        });
        let triggered: TriggerResponse = api.post("/wallet/triggersmartcontract", &request).await?;

        if !triggered.result.result {
            let code = triggered.result.code.unwrap_or_default();
            let message = triggered
                .result
                .message
                .as_deref()
                .map(decode_message)
                .unwrap_or_default();
            return Err(classify_tron_code(&code, &message));
        }
        let mut transaction = triggered.transaction.ok_or_else(|| {
            ClientError::Rpc("triggersmartcontract returned no transaction".to_string())
        })?;

        let tx_id = transaction
            .get("txID")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Rpc("transaction has no txID".to_string()))?
            .to_string();
        let signature = sign_tx_id(&self.signer, &tx_id)?;
        transaction
            .as_object_mut()
            .ok_or_else(|| ClientError::Rpc("transaction is not a JSON object".to_string()))?
            .insert("signature".to_string(), json!([signature]));

        let broadcast: BroadcastResponse =
            api.post("/wallet/broadcasttransaction", &transaction).await?;
        if !broadcast.result {
            let code = broadcast.code.unwrap_or_default();
            let message = broadcast
                .message
                .as_deref()
                .map(decode_message)
                .unwrap_or_default();
            return Err(classify_tron_code(&code, &message));
        }

        debug!(chain = %self.name, tx_id = %tx_id, "Transaction broadcast");
        self.wait_for_receipt(&api, &tx_id).await?;
        Ok(TxHandle(tx_id))
    }

    async fn latest_block(&self) -> Result<u64, ClientError> {
        let block: NowBlock = self.api().post("/wallet/getnowblock", &json!({})).await?;
        block
            .number()
            .ok_or_else(|| ClientError::Rpc("getnowblock returned no block number".to_string()))
    }
}

/// Thin HTTP wrapper shared by the client and its event stream
#[derive(Clone)]
struct TronApi {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl TronApi {
    fn with_key(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("TRON-PRO-API-KEY", key),
            None => request,
        }
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<T, ClientError> {
        let request = self
            .with_key(self.http.post(format!("{}{}", self.base_url, path)))
            .json(body);
        Self::read(request.send().await).await
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ClientError> {
        let request = self
            .with_key(self.http.get(format!("{}{}", self.base_url, path)))
            .query(query);
        Self::read(request.send().await).await
    }

    async fn read<T: for<'de> Deserialize<'de>>(
        response: reqwest::Result<reqwest::Response>,
    ) -> Result<T, ClientError> {
        let response = response.map_err(http_error)?;
        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(ClientError::Transport(format!("TronGrid returned {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Rpc(format!("TronGrid returned {}: {}", status, body)));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::Rpc(format!("unexpected TronGrid response: {}", e)))
    }
}

/// Delivery cursor over block timestamps
#[derive(Debug, Clone, PartialEq, Eq)]
struct EventCursor {
    timestamp: u64,
    /// `(transaction_id, event_index)` already delivered at `timestamp`
    boundary: HashSet<(String, u64)>,
}

impl EventCursor {
    fn new(timestamp: u64) -> Self {
        Self {
            timestamp,
            boundary: HashSet::new(),
        }
    }

    /// Drop already-delivered events and advance past the rest
    fn accept(&mut self, events: Vec<TronEvent>) -> Vec<TronEvent> {
        let mut fresh = Vec::with_capacity(events.len());
        for event in events {
            if event.block_timestamp < self.timestamp {
                continue;
            }
            let key = (event.transaction_id.clone(), event.event_index.unwrap_or(0));
            if event.block_timestamp == self.timestamp && self.boundary.contains(&key) {
                continue;
            }
            if event.block_timestamp > self.timestamp {
                self.timestamp = event.block_timestamp;
                self.boundary.clear();
            }
            self.boundary.insert(key);
            fresh.push(event);
        }
        fresh
    }
}

/// Polling state behind the deposit stream
struct EventPoller {
    api: TronApi,
    path: String,
    event_name: String,
    cursor: EventCursor,
    poll_interval: Duration,
    buffered: VecDeque<RawDepositLog>,
    failed: bool,
}

impl EventPoller {
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

    /// Fetch everything newer than the cursor, following `meta.fingerprint`
    /// across pages
    async fn poll(&mut self) -> Result<(), ClientError> {
        let since = self.cursor.timestamp.to_string();
        let mut fingerprint: Option<String> = None;
        let mut fresh = 0usize;

        for _ in 0..MAX_EVENT_PAGES {
            let mut query = vec![
                ("event_name", self.event_name.clone()),
                ("min_block_timestamp", since.clone()),
                ("order_by", "block_timestamp,asc".to_string()),
                ("limit", EVENT_PAGE_LIMIT.to_string()),
            ];
            if let Some(fp) = fingerprint.take() {
                query.push(("fingerprint", fp));
            }

            let page: EventsResponse = self.api.get(&self.path, &query).await?;
            if page.success == Some(false) {
                return Err(ClientError::Rpc(
                    page.error.unwrap_or_else(|| "event query failed".to_string()),
                ));
            }

            for event in self.cursor.accept(page.data) {
                self.buffered.push_back(event.into_raw()?);
                fresh += 1;
            }

            match page.meta.and_then(|m| m.fingerprint) {
                Some(next) => fingerprint = Some(next),
                None => return Ok(()),
            }
        }

        // Every page was already delivered and more remain: the cursor cannot move
        if fresh == 0 {
            return Err(ClientError::Rpc(format!(
                "{} pages of already-delivered events at timestamp {}",
                MAX_EVENT_PAGES, self.cursor.timestamp
            )));
        }
        Ok(())
    }
}

// ============================================================================
// TronGrid payloads
// ============================================================================

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    data: Vec<TronEvent>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    meta: Option<EventsMeta>,
}

#[derive(Debug, Deserialize)]
struct EventsMeta {
    /// Present only when another page follows
    #[serde(default)]
    fingerprint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TronEvent {
    #[serde(default)]
    block_number: Option<u64>,
    block_timestamp: u64,
    transaction_id: String,
    #[serde(default)]
    event_index: Option<u64>,
    #[serde(default)]
    result: HashMap<String, Value>,
}

impl TronEvent {
    fn field(&self, name: &str) -> Result<String, ClientError> {
        match self.result.get(name) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(other) => Err(ClientError::Decode(format!(
                "event field {} has unexpected value {}",
                name, other
            ))),
            None => Err(ClientError::Decode(format!(
                "event {} has no field {}",
                self.transaction_id, name
            ))),
        }
    }

    fn into_raw(self) -> Result<RawDepositLog, ClientError> {
        Ok(RawDepositLog {
            sender: self.field("sender")?,
            amount: self.field("amount")?,
            deposit_id: self.field("depositId")?,
            destination_chain_id: self.field("destinationChainId")?,
            block_number: self.block_number,
            tx_id: Some(self.transaction_id),
            log_index: self.event_index,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct NowBlock {
    #[serde(default)]
    block_header: Option<BlockHeader>,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    raw_data: BlockRawData,
}

#[derive(Debug, Deserialize)]
struct BlockRawData {
    #[serde(default)]
    number: Option<u64>,
    #[serde(default)]
    timestamp: Option<u64>,
}

impl NowBlock {
    fn number(&self) -> Option<u64> {
        self.block_header.as_ref().and_then(|h| h.raw_data.number)
    }

    fn timestamp(&self) -> Option<u64> {
        self.block_header.as_ref().and_then(|h| h.raw_data.timestamp)
    }
}

#[derive(Debug, Deserialize)]
struct TriggerResponse {
    #[serde(default)]
    result: TriggerResult,
    #[serde(default)]
    transaction: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct TriggerResult {
    #[serde(default)]
    result: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BroadcastResponse {
    #[serde(default)]
    result: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionInfo {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default, rename = "resMessage")]
    res_message: Option<String>,
    #[serde(default)]
    receipt: Option<TransactionReceipt>,
}

#[derive(Debug, Deserialize)]
struct TransactionReceipt {
    #[serde(default)]
    result: Option<String>,
}

// ============================================================================
// Helpers
// ============================================================================

/// Sign a transaction id; Tron expects `r || s || v` with v in {27, 28}
fn sign_tx_id(signer: &PrivateKeySigner, tx_id: &str) -> Result<String, ClientError> {
    let hash = B256::from_str(tx_id)
        .map_err(|e| ClientError::Rpc(format!("txID {} is not a 32-byte hash: {}", tx_id, e)))?;
    let signature = signer
        .sign_hash_sync(&hash)
        .map_err(|e| ClientError::InvalidArgument(format!("signing failed: {}", e)))?;
    Ok(hex::encode(signature.as_bytes()))
}

/// TronGrid hex-encodes most error messages; fall back to the raw text
fn decode_message(message: &str) -> String {
    match hex::decode(message) {
        Ok(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| message.to_string()),
        Err(_) => message.to_string(),
    }
}

/// Map a wallet API response code onto the client error taxonomy
fn classify_tron_code(code: &str, message: &str) -> ClientError {
    let detail = format!("{}: {}", code, message);
    match code {
        "SERVER_BUSY" | "NO_CONNECTION" | "NOT_ENOUGH_EFFECTIVE_CONNECTION" => {
            ClientError::Transport(detail)
        }
        "TAPOS_ERROR" | "TRANSACTION_EXPIRATION_ERROR" | "DUP_TRANSACTION_ERROR" => {
            ClientError::Nonce(detail)
        }
        "CONTRACT_VALIDATE_ERROR" | "CONTRACT_EXE_ERROR" => ClientError::Reverted(detail),
        "SIGERROR" | "BANDWITH_ERROR" | "TOO_BIG_TRANSACTION_ERROR" => {
            ClientError::InvalidArgument(detail)
        }
        _ => ClientError::from_message(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(ts: u64, tx: &str, index: u64) -> TronEvent {
        TronEvent {
            block_number: Some(ts / 3000),
            block_timestamp: ts,
            transaction_id: tx.to_string(),
            event_index: Some(index),
            result: HashMap::new(),
        }
    }

    #[test]
    fn test_cursor_skips_delivered_boundary_events() {
        let mut cursor = EventCursor::new(1_000);
        let fresh = cursor.accept(vec![event(1_000, "a", 0), event(2_000, "b", 0)]);
        assert_eq!(fresh.len(), 2);
        assert_eq!(cursor.timestamp, 2_000);

        // Re-query from the cursor returns the boundary event again
        let fresh = cursor.accept(vec![event(2_000, "b", 0), event(2_000, "b", 1)]);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].event_index, Some(1));

        let fresh = cursor.accept(vec![event(2_000, "b", 0), event(2_000, "b", 1)]);
        assert!(fresh.is_empty());
    }

    #[test]
    fn test_cursor_ignores_events_before_start() {
        let mut cursor = EventCursor::new(5_000);
        assert!(cursor.accept(vec![event(4_000, "old", 0)]).is_empty());
        assert_eq!(cursor.timestamp, 5_000);
    }

    #[test]
    fn test_event_into_raw() {
        let mut ev = event(3_000, "abcd", 2);
        ev.result.insert("sender".into(), json!("0x00000000000000000000000000000000000000aa"));
        ev.result.insert("amount".into(), json!("1000"));
        ev.result.insert("depositId".into(), json!("01".repeat(32)));
        ev.result.insert("destinationChainId".into(), json!(11155111));

        let raw = ev.into_raw().unwrap();
        assert_eq!(raw.amount, "1000");
        assert_eq!(raw.destination_chain_id, "11155111");
        assert_eq!(raw.tx_id.as_deref(), Some("abcd"));
        assert_eq!(raw.log_index, Some(2));
    }

    #[test]
    fn test_event_missing_field_is_decode_error() {
        let ev = event(3_000, "abcd", 0);
        assert!(matches!(ev.into_raw(), Err(ClientError::Decode(_))));
    }

    #[test]
    fn test_decode_message() {
        assert_eq!(decode_message(&hex::encode("REVERT opcode executed")), "REVERT opcode executed");
        assert_eq!(decode_message("plain text"), "plain text");
    }

    #[test]
    fn test_classify_tron_code() {
        assert!(matches!(classify_tron_code("SERVER_BUSY", ""), ClientError::Transport(_)));
        assert!(matches!(classify_tron_code("TAPOS_ERROR", ""), ClientError::Nonce(_)));
        assert!(matches!(
            classify_tron_code("CONTRACT_VALIDATE_ERROR", "already claimed"),
            ClientError::Reverted(_)
        ));
        assert!(matches!(classify_tron_code("SIGERROR", ""), ClientError::InvalidArgument(_)));
        // Unknown codes fall back to the message; a revert reason wins over transport words
        assert!(matches!(
            classify_tron_code("OTHER_ERROR", "REVERT opcode executed: network timeout"),
            ClientError::Reverted(_)
        ));
    }

    #[test]
    fn test_sign_tx_id_produces_65_bytes() {
        let signer: PrivateKeySigner =
            "0x0000000000000000000000000000000000000000000000000000000000000001"
                .parse()
                .unwrap();
        let signature = sign_tx_id(&signer, &"ab".repeat(32)).unwrap();
        assert_eq!(signature.len(), 130);
        let v = u8::from_str_radix(&signature[128..], 16).unwrap();
        assert!(v == 27 || v == 28);
    }
}
