//! Relay coordinator
//!
//! Owns both listeners, both submitters and the claim ledger, and runs the
//! supervision state machine:
//!
//! ```text
//! Stopped -> Starting -> Active <-> Faulted
//!               ^                      |
//!               +---- restart delay ---+
//! ```
//!
//! Startup first checks both chain clients; if either is unreachable no
//! listener is started and the whole startup is retried after the restart
//! delay. Each listener then runs as its own task feeding a single queue read
//! here. Deposits are routed with the listener's local/peer chain ids and
//! handed to the peer chain's submitter. Claim attempts run concurrently in a
//! `JoinSet`; retryable failures are resent with the same request until the
//! retry policy gives up.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use eyre::{eyre, Result};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::chain_client::ChainClient;
use crate::error::{panic_message, ClientError, ConnectivityError, SubmissionFailure, SubscriptionError};
use crate::ledger::{
    BeginRefused, ClaimKey, ClaimLedger, DEFAULT_LEDGER_CAPACITY, DEFAULT_LEDGER_TTL_SECS,
};
use crate::listener::{ChainListener, ListenerEnvelope, ListenerMessage, ListenerSpec};
use crate::metrics;
use crate::retry::{Backoff, ClaimRetryPolicy};
use crate::router;
use crate::submitter::ClaimSubmitter;
use crate::types::{ChainId, ClaimRequest, DepositEvent, ListenerState, Side, SubmissionResult};

/// Listener queue depth before listeners wait on the coordinator
const EVENT_QUEUE_CAPACITY: usize = 1024;

/// A listener active at least this long restarts from the initial delay
const STABLE_AFTER: Duration = Duration::from_secs(60);

/// One chain of the relay pair
pub struct ChainEndpoint {
    pub name: String,
    pub chain_id: ChainId,
    pub client: Arc<dyn ChainClient>,
    pub bridge_address: String,
    pub confirmations: u64,
    pub poll_interval: Duration,
    pub fee_limit: Option<u128>,
}

/// Engine-wide policy knobs
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub event_name: String,
    pub claim_function: String,
    /// Delay schedule for listener restarts and startup retries
    pub restart: Backoff,
    pub claim_retry: ClaimRetryPolicy,
    /// Upper bound on a single connectivity check
    pub connectivity_timeout: Duration,
    pub ledger_capacity: usize,
    pub ledger_ttl_secs: u64,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            event_name: "Bridge".to_string(),
            claim_function: "claim".to_string(),
            restart: Backoff::default(),
            claim_retry: ClaimRetryPolicy::default(),
            connectivity_timeout: Duration::from_secs(30),
            ledger_capacity: DEFAULT_LEDGER_CAPACITY,
            ledger_ttl_secs: DEFAULT_LEDGER_TTL_SECS,
        }
    }
}

/// Snapshot of one listener for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ListenerStatus {
    pub chain: String,
    pub chain_id: u64,
    pub state: ListenerState,
    pub restarts: u64,
}

/// Snapshot published after every state change
#[derive(Debug, Clone, Serialize)]
pub struct RelayStatus {
    pub listeners: Vec<ListenerStatus>,
    pub startup_attempts: u32,
    pub claims_tracked: usize,
    pub claims_in_flight: usize,
}

struct ListenerSlot {
    listener: Arc<ChainListener>,
    name: String,
    chain_id: ChainId,
    state: ListenerState,
    generation: u64,
    /// Running listener, or the pending restart timer while faulted
    task: Option<JoinHandle<()>>,
    active_since: Option<Instant>,
    consecutive_faults: u32,
    restarts: u64,
}

struct ClaimAttempt {
    target: Side,
    request: ClaimRequest,
    retries: u32,
    result: SubmissionResult,
}

pub struct RelayCoordinator {
    settings: CoordinatorSettings,
    clients: [Arc<dyn ChainClient>; 2],
    slots: [ListenerSlot; 2],
    submitters: [Arc<ClaimSubmitter>; 2],
    ledger: ClaimLedger,
    startup_attempts: u32,
    status_tx: watch::Sender<RelayStatus>,
}

impl RelayCoordinator {
    pub fn new(a: ChainEndpoint, b: ChainEndpoint, settings: CoordinatorSettings) -> Result<Self> {
        if a.chain_id == b.chain_id {
            return Err(eyre!(
                "Relay pair needs two distinct chain ids, both are {}",
                a.chain_id
            ));
        }

        let ledger = ClaimLedger::new(settings.ledger_capacity, settings.ledger_ttl_secs);
        let clients = [a.client.clone(), b.client.clone()];
        let submitters = [
            Arc::new(Self::build_submitter(&a, &settings)),
            Arc::new(Self::build_submitter(&b, &settings)),
        ];
        let slots = [
            Self::build_slot(Side::A, a, &settings),
            Self::build_slot(Side::B, b, &settings),
        ];

        let (status_tx, _) = watch::channel(RelayStatus {
            listeners: Vec::new(),
            startup_attempts: 0,
            claims_tracked: 0,
            claims_in_flight: 0,
        });

        let coordinator = Self {
            settings,
            clients,
            slots,
            submitters,
            ledger,
            startup_attempts: 0,
            status_tx,
        };
        coordinator.publish_status();
        Ok(coordinator)
    }

    fn build_submitter(endpoint: &ChainEndpoint, settings: &CoordinatorSettings) -> ClaimSubmitter {
        ClaimSubmitter::new(
            endpoint.name.clone(),
            endpoint.chain_id,
            endpoint.client.clone(),
            endpoint.bridge_address.clone(),
            settings.claim_function.clone(),
            endpoint.fee_limit,
        )
    }

    fn build_slot(side: Side, endpoint: ChainEndpoint, settings: &CoordinatorSettings) -> ListenerSlot {
        let spec = ListenerSpec {
            side,
            chain_name: endpoint.name.clone(),
            chain_id: endpoint.chain_id,
            contract: endpoint.bridge_address,
            event_name: settings.event_name.clone(),
            confirmations: endpoint.confirmations,
            head_poll_interval: endpoint.poll_interval,
        };
        ListenerSlot {
            listener: Arc::new(ChainListener::new(spec, endpoint.client)),
            name: endpoint.name,
            chain_id: endpoint.chain_id,
            state: ListenerState::Stopped,
            generation: 0,
            task: None,
            active_since: None,
            consecutive_faults: 0,
            restarts: 0,
        }
    }

    /// Receiver for status snapshots (used by the HTTP status endpoint)
    pub fn status(&self) -> watch::Receiver<RelayStatus> {
        self.status_tx.subscribe()
    }

    pub fn listener_state(&self, side: Side) -> ListenerState {
        self.slots[side.index()].state
    }

    /// Run until a shutdown signal is received
    pub async fn run(mut self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        info!(
            chain_a = %self.slots[0].name,
            chain_a_id = %self.slots[0].chain_id,
            chain_b = %self.slots[1].name,
            chain_b_id = %self.slots[1].chain_id,
            restart = ?self.settings.restart,
            "Relay coordinator starting"
        );

        // Startup: both chains must answer before anything is subscribed
        loop {
            self.startup_attempts += 1;
            self.publish_status();
            match self.health_check().await {
                Ok(()) => break,
                Err(e) => {
                    metrics::record_startup_failure();
                    let delay = self
                        .settings
                        .restart
                        .delay_for_attempt(self.startup_attempts - 1);
                    error!(
                        error = %e,
                        attempt = self.startup_attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        "Startup connectivity check failed, no listener started"
                    );
                    tokio::select! {
                        _ = shutdown.recv() => {
                            info!("Shutdown signal received during startup");
                            return Ok(());
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!(
            attempts = self.startup_attempts,
            "Both chains reachable, starting listeners"
        );
        metrics::set_up(true);

        let (events_tx, mut events_rx) = mpsc::channel::<ListenerEnvelope>(EVENT_QUEUE_CAPACITY);
        let (restart_tx, mut restart_rx) = mpsc::unbounded_channel::<Side>();
        let mut claims: JoinSet<ClaimAttempt> = JoinSet::new();

        for side in Side::ALL {
            self.start_listener(side, &events_tx);
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown signal received, stopping relay");
                    break;
                }
                Some(envelope) = events_rx.recv() => {
                    self.on_listener_message(envelope, &restart_tx, &mut claims).await;
                }
                Some(side) = restart_rx.recv() => {
                    self.on_restart_due(side, &events_tx);
                }
                Some(joined) = claims.join_next() => {
                    self.on_claim_finished(joined, &mut claims);
                }
            }
        }

        self.stop(&mut claims).await;
        Ok(())
    }

    /// Liveness check of both chain clients, run concurrently
    async fn health_check(&self) -> Result<(), ConnectivityError> {
        let timeout = self.settings.connectivity_timeout;
        let (a, b) = tokio::join!(
            check_connectivity(&self.clients[0], &self.slots[0].name, timeout),
            check_connectivity(&self.clients[1], &self.slots[1].name, timeout),
        );
        if let Err(e) = &a {
            warn!(chain = %e.chain, error = %e.source, "Chain unreachable");
        }
        if let Err(e) = &b {
            warn!(chain = %e.chain, error = %e.source, "Chain unreachable");
        }
        a.and(b)
    }

    fn start_listener(&mut self, side: Side, events: &mpsc::Sender<ListenerEnvelope>) {
        let slot = &mut self.slots[side.index()];
        slot.generation += 1;

        let generation = slot.generation;
        let listener = slot.listener.clone();
        let chain = slot.name.clone();
        let tx = events.clone();

        slot.task = Some(tokio::spawn(async move {
            let outcome = AssertUnwindSafe(listener.run(generation, tx.clone()))
                .catch_unwind()
                .await;
            let error = match outcome {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e,
                Err(payload) => SubscriptionError::Panicked {
                    chain,
                    message: panic_message(payload.as_ref()),
                },
            };
            let _ = tx
                .send(ListenerEnvelope {
                    side,
                    generation,
                    message: ListenerMessage::Faulted(error),
                })
                .await;
        }));

        self.set_state(side, ListenerState::Starting);
    }

    async fn on_listener_message(
        &mut self,
        envelope: ListenerEnvelope,
        restart_tx: &mpsc::UnboundedSender<Side>,
        claims: &mut JoinSet<ClaimAttempt>,
    ) {
        let side = envelope.side;
        let slot = &self.slots[side.index()];
        if envelope.generation != slot.generation {
            debug!(
                chain = %slot.name,
                stale_generation = envelope.generation,
                current_generation = slot.generation,
                "Dropping message from a torn-down listener"
            );
            return;
        }

        match envelope.message {
            ListenerMessage::Subscribed => {
                self.slots[side.index()].active_since = Some(Instant::now());
                self.set_state(side, ListenerState::Active);
                info!(chain = %self.slots[side.index()].name, "Listener active");
            }
            ListenerMessage::Deposit(event) => {
                self.dispatch(side, event, claims);
            }
            ListenerMessage::Faulted(error) => {
                self.on_fault(side, error, restart_tx).await;
            }
        }
    }

    async fn on_fault(
        &mut self,
        side: Side,
        error: SubscriptionError,
        restart_tx: &mpsc::UnboundedSender<Side>,
    ) {
        self.set_state(side, ListenerState::Faulted);

        let slot = &mut self.slots[side.index()];
        // The old subscription must be fully gone before a new one starts
        if let Some(task) = slot.task.take() {
            task.abort();
            let _ = task.await;
        }

        // Only a listener that stayed up for a while starts the schedule over
        if slot
            .active_since
            .take()
            .is_some_and(|since| since.elapsed() >= STABLE_AFTER)
        {
            slot.consecutive_faults = 0;
        }
        let delay = self
            .settings
            .restart
            .delay_for_attempt(slot.consecutive_faults);
        slot.consecutive_faults = slot.consecutive_faults.saturating_add(1);

        warn!(
            chain = %slot.name,
            error = %error,
            consecutive_faults = slot.consecutive_faults,
            restart_in_ms = delay.as_millis() as u64,
            "Listener faulted, scheduling restart"
        );

        let tx = restart_tx.clone();
        slot.task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(side);
        }));
    }

    fn on_restart_due(&mut self, side: Side, events: &mpsc::Sender<ListenerEnvelope>) {
        let slot = &mut self.slots[side.index()];
        if slot.state != ListenerState::Faulted {
            return;
        }
        slot.task = None;
        slot.restarts += 1;
        metrics::record_listener_restart(&slot.name);
        info!(chain = %slot.name, restarts = slot.restarts, "Restarting listener");
        self.start_listener(side, events);
    }

    /// Route a deposit from `side` and, if it targets the peer, start its claim
    fn dispatch(&mut self, side: Side, event: DepositEvent, claims: &mut JoinSet<ClaimAttempt>) {
        let source = &self.slots[side.index()];
        let target = side.peer();
        let peer = &self.slots[target.index()];
        metrics::record_deposit_observed(&source.name);

        let Some(request) = router::route(&event, source.chain_id, peer.chain_id) else {
            debug!(
                chain = %source.name,
                deposit_id = %event.deposit_id,
                destination_chain_id = %event.destination_chain_id,
                "Deposit not destined for peer chain, skipping"
            );
            metrics::record_routing_skip(&source.name);
            return;
        };

        let key = ClaimKey::from(&request);
        match self.ledger.try_begin(key) {
            Ok(()) => {}
            Err(BeginRefused::Known(existing)) => {
                info!(
                    chain = %source.name,
                    deposit_id = %request.deposit_id,
                    status = ?existing,
                    "Deposit already handled this session, not resubmitting"
                );
                metrics::record_duplicate_deposit(&source.name);
                return;
            }
            Err(BeginRefused::Full) => {
                error!(
                    chain = %source.name,
                    deposit_id = %request.deposit_id,
                    in_flight = self.ledger.in_flight(),
                    "Claim ledger full of in-flight claims, skipping deposit"
                );
                metrics::record_ledger_full_skip(&source.name);
                return;
            }
        }

        info!(
            source_chain = %source.name,
            destination_chain = %peer.name,
            deposit_id = %request.deposit_id,
            recipient = %request.recipient,
            amount = %request.amount,
            tx = ?event.origin.tx_id,
            "Relaying deposit"
        );

        self.spawn_claim(claims, target, request, 0, Duration::ZERO);
        self.publish_status();
    }

    fn spawn_claim(
        &self,
        claims: &mut JoinSet<ClaimAttempt>,
        target: Side,
        request: ClaimRequest,
        retries: u32,
        delay: Duration,
    ) {
        let submitter = self.submitters[target.index()].clone();
        claims.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = match AssertUnwindSafe(submitter.submit(&request))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(payload) => SubmissionResult::Failure(SubmissionFailure::panicked(
                    panic_message(payload.as_ref()),
                )),
            };
            ClaimAttempt {
                target,
                request,
                retries,
                result,
            }
        });
    }

    fn on_claim_finished(
        &mut self,
        joined: Result<ClaimAttempt, JoinError>,
        claims: &mut JoinSet<ClaimAttempt>,
    ) {
        let attempt = match joined {
            Ok(attempt) => attempt,
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                error!(error = %e, "Claim task ended unexpectedly");
                return;
            }
        };

        let target = &self.slots[attempt.target.index()];
        let source = &self.slots[attempt.target.peer().index()];
        let key = ClaimKey::from(&attempt.request);
        let request = &attempt.request;

        match attempt.result {
            SubmissionResult::Success { tx } => {
                metrics::record_claim_submitted(&target.name, true);
                info!(
                    destination_chain = %target.name,
                    deposit_id = %request.deposit_id,
                    tx = %tx,
                    retries = attempt.retries,
                    "Claim submitted"
                );
                self.ledger.mark_claimed(key, tx);
            }
            SubmissionResult::Failure(failure) => {
                metrics::record_claim_submitted(&target.name, false);
                match self
                    .settings
                    .claim_retry
                    .next_delay(&failure, attempt.retries)
                {
                    Some(delay) => {
                        warn!(
                            destination_chain = %target.name,
                            deposit_id = %request.deposit_id,
                            kind = %failure.kind,
                            error = %failure.message,
                            retry = attempt.retries + 1,
                            max_retries = self.settings.claim_retry.max_retries,
                            retry_in_ms = delay.as_millis() as u64,
                            "Retryable claim failure, resubmitting"
                        );
                        metrics::record_claim_retry(&target.name);
                        self.ledger.record_retry(&key);
                        self.spawn_claim(
                            claims,
                            attempt.target,
                            attempt.request.clone(),
                            attempt.retries + 1,
                            delay,
                        );
                    }
                    None => {
                        error!(
                            deposit_id = %request.deposit_id,
                            source_chain = %source.name,
                            source_chain_id = %request.source_chain_id,
                            destination_chain = %target.name,
                            destination_chain_id = %target.chain_id,
                            recipient = %request.recipient,
                            amount = %request.amount,
                            kind = %failure.kind,
                            retryable = failure.retryable,
                            attempts = attempt.retries + 1,
                            error = %failure.message,
                            "Claim failed permanently, manual reconciliation required"
                        );
                        self.ledger.mark_failed(key, failure.kind);
                    }
                }
            }
        }

        self.publish_status();
    }

    async fn stop(&mut self, claims: &mut JoinSet<ClaimAttempt>) {
        for side in Side::ALL {
            if let Some(task) = self.slots[side.index()].task.take() {
                task.abort();
                let _ = task.await;
            }
            self.set_state(side, ListenerState::Stopped);
        }

        let in_flight = self.ledger.in_flight();
        if in_flight > 0 {
            warn!(in_flight, "Abandoning in-flight claims on shutdown");
        }
        claims.shutdown().await;
        metrics::set_up(false);
        info!("Relay coordinator stopped");
    }

    fn set_state(&mut self, side: Side, state: ListenerState) {
        let slot = &mut self.slots[side.index()];
        if slot.state != state {
            debug!(chain = %slot.name, from = %slot.state, to = %state, "Listener state change");
        }
        slot.state = state;
        metrics::set_listener_state(&slot.name, state);
        self.publish_status();
    }

    fn publish_status(&self) {
        let in_flight = self.ledger.in_flight();
        metrics::set_claims_in_flight(in_flight);
        self.status_tx.send_replace(RelayStatus {
            listeners: self
                .slots
                .iter()
                .map(|slot| ListenerStatus {
                    chain: slot.name.clone(),
                    chain_id: slot.chain_id.as_u64(),
                    state: slot.state,
                    restarts: slot.restarts,
                })
                .collect(),
            startup_attempts: self.startup_attempts,
            claims_tracked: self.ledger.len(),
            claims_in_flight: in_flight,
        });
    }
}

async fn check_connectivity(
    client: &Arc<dyn ChainClient>,
    chain: &str,
    timeout: Duration,
) -> Result<(), ConnectivityError> {
    match tokio::time::timeout(timeout, client.check_connectivity()).await {
        Ok(Ok(())) => {
            debug!(chain = %chain, "Connectivity check passed");
            Ok(())
        }
        Ok(Err(source)) => Err(ConnectivityError {
            chain: chain.to_string(),
            source,
        }),
        Err(_) => Err(ConnectivityError {
            chain: chain.to_string(),
            source: ClientError::Timeout(format!("no answer within {:?}", timeout)),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_client::{ContractCall, RawEventStream, TxOptions};
    use crate::types::TxHandle;
    use async_trait::async_trait;

    struct IdleClient;

    #[async_trait]
    impl ChainClient for IdleClient {
        fn name(&self) -> &str {
            "idle"
        }

        async fn check_connectivity(&self) -> Result<(), ClientError> {
            Err(ClientError::Transport("offline".into()))
        }

        async fn subscribe_event(&self, _: &str, _: &str) -> Result<RawEventStream, ClientError> {
            Err(ClientError::StreamClosed)
        }

        async fn send_transaction(
            &self,
            _: &str,
            _: &ContractCall,
            _: &TxOptions,
        ) -> Result<TxHandle, ClientError> {
            Err(ClientError::Transport("offline".into()))
        }

        async fn latest_block(&self) -> Result<u64, ClientError> {
            Ok(0)
        }
    }

    fn endpoint(name: &str, chain_id: u64) -> ChainEndpoint {
        ChainEndpoint {
            name: name.to_string(),
            chain_id: ChainId(chain_id),
            client: Arc::new(IdleClient),
            bridge_address: "0x00000000000000000000000000000000000000aa".to_string(),
            confirmations: 1,
            poll_interval: Duration::from_secs(1),
            fee_limit: None,
        }
    }

    #[test]
    fn test_rejects_identical_chain_ids() {
        let result = RelayCoordinator::new(
            endpoint("a", 1),
            endpoint("b", 1),
            CoordinatorSettings::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_initial_status() {
        let coordinator = RelayCoordinator::new(
            endpoint("sepolia", 11155111),
            endpoint("shasta", 2494),
            CoordinatorSettings::default(),
        )
        .unwrap();

        assert_eq!(coordinator.listener_state(Side::A), ListenerState::Stopped);
        let status = coordinator.status().borrow().clone();
        assert_eq!(status.listeners.len(), 2);
        assert_eq!(status.listeners[0].chain, "sepolia");
        assert_eq!(status.listeners[1].chain_id, 2494);
        assert_eq!(status.startup_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_chain_blocks_startup_until_shutdown() {
        let coordinator = RelayCoordinator::new(
            endpoint("sepolia", 11155111),
            endpoint("shasta", 2494),
            CoordinatorSettings::default(),
        )
        .unwrap();
        let status = coordinator.status();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(coordinator.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(status.borrow().startup_attempts, 3);
        assert!(status
            .borrow()
            .listeners
            .iter()
            .all(|l| l.state == ListenerState::Stopped));

        shutdown_tx.send(()).await.unwrap();
        assert!(handle.await.unwrap().is_ok());
    }
}
