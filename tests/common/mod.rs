//! Shared test helpers: a scripted in-memory chain client and a harness that
//! runs a coordinator over two of them.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use relayer::chain_client::{ChainClient, ContractCall, RawDepositLog, RawEventStream, TxOptions};
use relayer::coordinator::{ChainEndpoint, CoordinatorSettings, RelayCoordinator, RelayStatus};
use relayer::error::ClientError;
use relayer::types::{ChainId, ListenerState, TxHandle};

pub const CHAIN_A_ID: u64 = 11155111;
pub const CHAIN_B_ID: u64 = 2494;
pub const BRIDGE_A: &str = "0x00000000000000000000000000000000000000aa";
pub const BRIDGE_B: &str = "4100000000000000000000000000000000000000bb";

type EventSender = mpsc::UnboundedSender<Result<RawDepositLog, ClientError>>;

/// Chain client driven entirely by the test
pub struct MockChainClient {
    name: String,
    connectivity: Mutex<VecDeque<Result<(), ClientError>>>,
    send_results: Mutex<VecDeque<Result<TxHandle, ClientError>>>,
    streams: Mutex<Vec<EventSender>>,
    sent: Mutex<Vec<(String, ContractCall, TxOptions)>>,
    head: AtomicU64,
    connectivity_checks: AtomicUsize,
    subscriptions: AtomicUsize,
    panic_next_send: AtomicBool,
    panic_next_subscribe: AtomicBool,
}

impl MockChainClient {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            connectivity: Mutex::new(VecDeque::new()),
            send_results: Mutex::new(VecDeque::new()),
            streams: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            head: AtomicU64::new(0),
            connectivity_checks: AtomicUsize::new(0),
            subscriptions: AtomicUsize::new(0),
            panic_next_send: AtomicBool::new(false),
            panic_next_subscribe: AtomicBool::new(false),
        })
    }

    /// Results for the next connectivity checks; afterwards checks pass
    pub fn script_connectivity(&self, results: Vec<Result<(), ClientError>>) {
        self.connectivity.lock().unwrap().extend(results);
    }

    /// Results for the next sends; afterwards sends succeed
    pub fn script_sends(&self, results: Vec<Result<TxHandle, ClientError>>) {
        self.send_results.lock().unwrap().extend(results);
    }

    pub fn panic_on_next_send(&self) {
        self.panic_next_send.store(true, Ordering::SeqCst);
    }

    pub fn panic_on_next_subscribe(&self) {
        self.panic_next_subscribe.store(true, Ordering::SeqCst);
    }

    pub fn set_head(&self, block: u64) {
        self.head.store(block, Ordering::SeqCst);
    }

    /// Deliver a log on the newest subscription
    pub fn push_event(&self, log: RawDepositLog) -> bool {
        self.push(Ok(log))
    }

    /// Fail the newest subscription's stream
    pub fn fail_stream(&self, error: ClientError) -> bool {
        self.push(Err(error))
    }

    /// End the newest subscription's stream without an error
    pub fn close_stream(&self) {
        self.streams.lock().unwrap().clear();
    }

    fn push(&self, item: Result<RawDepositLog, ClientError>) -> bool {
        match self.streams.lock().unwrap().last() {
            Some(tx) => tx.send(item).is_ok(),
            None => false,
        }
    }

    pub fn sent_calls(&self) -> Vec<(String, ContractCall, TxOptions)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn connectivity_checks(&self) -> usize {
        self.connectivity_checks.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check_connectivity(&self) -> Result<(), ClientError> {
        self.connectivity_checks.fetch_add(1, Ordering::SeqCst);
        self.connectivity
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn subscribe_event(
        &self,
        _contract: &str,
        _event_name: &str,
    ) -> Result<RawEventStream, ClientError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        if self.panic_next_subscribe.swap(false, Ordering::SeqCst) {
            panic!("mock subscribe exploded");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().unwrap().push(tx);
        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    async fn send_transaction(
        &self,
        contract: &str,
        call: &ContractCall,
        options: &TxOptions,
    ) -> Result<TxHandle, ClientError> {
        if self.panic_next_send.swap(false, Ordering::SeqCst) {
            panic!("mock send exploded");
        }
        let count = {
            let mut sent = self.sent.lock().unwrap();
            sent.push((contract.to_string(), call.clone(), *options));
            sent.len()
        };
        self.send_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(TxHandle(format!("0x{}{:04x}", self.name, count))))
    }

    async fn latest_block(&self) -> Result<u64, ClientError> {
        Ok(self.head.load(Ordering::SeqCst))
    }
}

/// Raw deposit from sender `0xnn..nn` with deposit id `0xnn..nn`
pub fn deposit(n: u8, destination_chain_id: u64) -> RawDepositLog {
    RawDepositLog {
        sender: format!("0x{}", hex::encode([n; 20])),
        amount: "1000".to_string(),
        deposit_id: format!("0x{}", hex::encode([n; 32])),
        destination_chain_id: destination_chain_id.to_string(),
        block_number: Some(100),
        tx_id: Some(format!("0xdeadbeef{:02x}", n)),
        log_index: Some(0),
    }
}

pub struct HarnessOptions {
    pub settings: CoordinatorSettings,
    pub confirmations_a: u64,
    pub confirmations_b: u64,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            settings: CoordinatorSettings::default(),
            confirmations_a: 1,
            confirmations_b: 1,
        }
    }
}

/// A coordinator running in the background over two mock chains
pub struct Harness {
    pub a: Arc<MockChainClient>,
    pub b: Arc<MockChainClient>,
    pub status: watch::Receiver<RelayStatus>,
    shutdown: mpsc::Sender<()>,
    handle: JoinHandle<eyre::Result<()>>,
}

impl Harness {
    pub fn start(options: HarnessOptions) -> Self {
        let a = MockChainClient::new("sepolia");
        let b = MockChainClient::new("shasta");
        Self::start_with(a, b, options)
    }

    /// Start over clients the test has already scripted
    pub fn start_with(
        a: Arc<MockChainClient>,
        b: Arc<MockChainClient>,
        options: HarnessOptions,
    ) -> Self {
        let endpoint_a = ChainEndpoint {
            name: "sepolia".to_string(),
            chain_id: ChainId(CHAIN_A_ID),
            client: a.clone() as Arc<dyn ChainClient>,
            bridge_address: BRIDGE_A.to_string(),
            confirmations: options.confirmations_a,
            poll_interval: Duration::from_secs(1),
            fee_limit: None,
        };
        let endpoint_b = ChainEndpoint {
            name: "shasta".to_string(),
            chain_id: ChainId(CHAIN_B_ID),
            client: b.clone() as Arc<dyn ChainClient>,
            bridge_address: BRIDGE_B.to_string(),
            confirmations: options.confirmations_b,
            poll_interval: Duration::from_secs(1),
            fee_limit: Some(100_000_000),
        };

        let coordinator = RelayCoordinator::new(endpoint_a, endpoint_b, options.settings)
            .expect("distinct chain ids");
        let status = coordinator.status();
        let (shutdown, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(coordinator.run(shutdown_rx));

        Self {
            a,
            b,
            status,
            shutdown,
            handle,
        }
    }

    pub fn state(&self, index: usize) -> ListenerState {
        self.status
            .borrow()
            .listeners
            .get(index)
            .map(|l| l.state)
            .unwrap_or(ListenerState::Stopped)
    }

    pub fn restarts(&self, index: usize) -> u64 {
        self.status.borrow().listeners[index].restarts
    }

    pub async fn wait_active(&self) {
        wait_until("both listeners active", || {
            self.state(0) == ListenerState::Active && self.state(1) == ListenerState::Active
        })
        .await;
    }

    /// Stop the coordinator and return what `run` returned
    pub async fn stop(self) -> (eyre::Result<()>, RelayStatus) {
        let _ = self.shutdown.send(()).await;
        let result = self.handle.await.expect("coordinator task panicked");
        let status = self.status.borrow().clone();
        (result, status)
    }
}

/// Poll `condition` on the (paused) tokio clock for up to 30 virtual seconds
pub async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..3_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
