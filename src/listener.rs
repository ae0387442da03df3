//! Chain listener
//!
//! Subscribes to the bridge deposit event on one chain, normalizes raw logs
//! into [`DepositEvent`]s, holds them until final, and pushes them into the
//! coordinator's queue. The listener never restarts itself: the first stream
//! failure ends [`ChainListener::run`] and the coordinator decides what
//! happens next.
//!
//! Events missed while the listener is down are not replayed; every new
//! subscription observes from the chain client's current head.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::address::parse_address;
use crate::chain_client::{ChainClient, RawDepositLog};
use crate::error::SubscriptionError;
use crate::finality::ConfirmationGate;
use crate::types::{ChainId, DepositEvent, DepositId, EventOrigin, Side};

/// What a listener reports to the coordinator
#[derive(Debug)]
pub enum ListenerMessage {
    /// Subscription acknowledged by the chain client
    Subscribed,
    /// Final deposit, in delivery order
    Deposit(DepositEvent),
    /// Stream failed; the listener task has stopped
    Faulted(SubscriptionError),
}

/// Message tagged with the listener run it came from
#[derive(Debug)]
pub struct ListenerEnvelope {
    pub side: Side,
    /// Incremented by the coordinator on every (re)start
    pub generation: u64,
    pub message: ListenerMessage,
}

/// Static description of what a listener watches
#[derive(Clone)]
pub struct ListenerSpec {
    pub side: Side,
    pub chain_name: String,
    pub chain_id: ChainId,
    pub contract: String,
    pub event_name: String,
    pub confirmations: u64,
    pub head_poll_interval: Duration,
}

pub struct ChainListener {
    spec: ListenerSpec,
    client: Arc<dyn ChainClient>,
}

impl ChainListener {
    pub fn new(spec: ListenerSpec, client: Arc<dyn ChainClient>) -> Self {
        Self { spec, client }
    }

    pub fn chain_name(&self) -> &str {
        &self.spec.chain_name
    }

    /// Subscribe and forward deposits until the stream fails.
    ///
    /// Returns `Ok(())` only when the coordinator side of the channel is gone.
    pub async fn run(
        &self,
        generation: u64,
        tx: mpsc::Sender<ListenerEnvelope>,
    ) -> Result<(), SubscriptionError> {
        let spec = &self.spec;
        debug!(
            chain = %spec.chain_name,
            contract = %spec.contract,
            event = %spec.event_name,
            generation,
            "Subscribing to deposit events"
        );

        let mut stream = self
            .client
            .subscribe_event(&spec.contract, &spec.event_name)
            .await
            .map_err(|source| SubscriptionError::Subscribe {
                chain: spec.chain_name.clone(),
                event: spec.event_name.clone(),
                source,
            })?;

        if !self.send(&tx, generation, ListenerMessage::Subscribed).await {
            return Ok(());
        }

        info!(
            chain = %spec.chain_name,
            chain_id = %spec.chain_id,
            confirmations = spec.confirmations,
            "Listening for deposit events"
        );

        let mut gate = ConfirmationGate::new(spec.confirmations);
        let mut head_ticker = tokio::time::interval(spec.head_poll_interval);
        head_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                item = stream.next() => {
                    match item {
                        Some(Ok(raw)) => {
                            let event = normalize(&raw, spec.chain_id).map_err(|reason| {
                                SubscriptionError::Decode {
                                    chain: spec.chain_name.clone(),
                                    reason,
                                }
                            })?;
                            debug!(
                                chain = %spec.chain_name,
                                deposit_id = %event.deposit_id,
                                block = ?event.origin.block_number,
                                "Deposit event received"
                            );
                            gate.push(event);
                        }
                        Some(Err(source)) => {
                            return Err(SubscriptionError::Stream {
                                chain: spec.chain_name.clone(),
                                source,
                            });
                        }
                        None => {
                            return Err(SubscriptionError::Closed {
                                chain: spec.chain_name.clone(),
                            });
                        }
                    }
                }
                _ = head_ticker.tick(), if gate.needs_head() => {}
            }

            if !self.release(&mut gate, &tx, generation).await? {
                return Ok(());
            }
        }
    }

    /// Forward every deposit the gate considers final.
    /// Returns `false` if the coordinator is gone.
    async fn release(
        &self,
        gate: &mut ConfirmationGate,
        tx: &mpsc::Sender<ListenerEnvelope>,
        generation: u64,
    ) -> Result<bool, SubscriptionError> {
        if gate.is_empty() {
            return Ok(true);
        }

        let head = if gate.needs_head() {
            let head = self
                .client
                .latest_block()
                .await
                .map_err(|source| SubscriptionError::Stream {
                    chain: self.spec.chain_name.clone(),
                    source,
                })?;
            Some(head)
        } else {
            None
        };

        for event in gate.release(head) {
            if !self.send(tx, generation, ListenerMessage::Deposit(event)).await {
                return Ok(false);
            }
        }
        if !gate.is_empty() {
            debug!(
                chain = %self.spec.chain_name,
                waiting = gate.len(),
                head = ?head,
                "Deposits waiting for confirmations"
            );
        }
        Ok(true)
    }

    async fn send(
        &self,
        tx: &mpsc::Sender<ListenerEnvelope>,
        generation: u64,
        message: ListenerMessage,
    ) -> bool {
        tx.send(ListenerEnvelope {
            side: self.spec.side,
            generation,
            message,
        })
        .await
        .is_ok()
    }
}

/// Turn a raw log into a canonical deposit observed on `source_chain_id`
pub fn normalize(raw: &RawDepositLog, source_chain_id: ChainId) -> Result<DepositEvent, String> {
    let sender =
        parse_address(&raw.sender).map_err(|e| format!("invalid sender {:?}: {}", raw.sender, e))?;
    let amount = parse_uint(&raw.amount).map_err(|e| format!("invalid amount: {}", e))?;
    let deposit_id = DepositId::from_hex(&raw.deposit_id)
        .map_err(|e| format!("invalid deposit id {:?}: {}", raw.deposit_id, e))?;
    let destination = parse_uint(&raw.destination_chain_id)
        .map_err(|e| format!("invalid destination chain id: {}", e))?;
    let destination: u64 = destination
        .try_into()
        .map_err(|_| format!("destination chain id {} does not fit in u64", destination))?;

    Ok(DepositEvent {
        sender,
        amount,
        deposit_id,
        source_chain_id,
        destination_chain_id: ChainId(destination),
        origin: EventOrigin {
            block_number: raw.block_number,
            tx_id: raw.tx_id.clone(),
            log_index: raw.log_index,
        },
    })
}

/// Decimal or 0x-prefixed hex unsigned integer
fn parse_uint(s: &str) -> Result<U256, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty value".to_string());
    }
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex_part) => U256::from_str_radix(hex_part, 16),
        None => U256::from_str_radix(s, 10),
    };
    parsed.map_err(|e| format!("{:?} is not an unsigned integer: {}", s, e))
}
