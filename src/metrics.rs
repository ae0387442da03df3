//! Prometheus metrics for the relayer
//!
//! Exposed on the `/metrics` endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec, Counter,
    CounterVec, Gauge, GaugeVec,
};

use crate::types::ListenerState;

lazy_static! {
    // Listener metrics
    pub static ref DEPOSITS_OBSERVED: CounterVec = register_counter_vec!(
        "relayer_deposits_observed_total",
        "Total number of final deposit events delivered by a listener",
        &["chain"]
    ).expect("constant metric name is valid");

    pub static ref ROUTING_SKIPS: CounterVec = register_counter_vec!(
        "relayer_routing_skips_total",
        "Deposits ignored because they target a chain outside the relay pair",
        &["chain"]
    ).expect("constant metric name is valid");

    pub static ref DUPLICATE_DEPOSITS: CounterVec = register_counter_vec!(
        "relayer_duplicate_deposits_total",
        "Deposits ignored because the claim ledger already knows them",
        &["chain"]
    ).expect("constant metric name is valid");

    pub static ref LEDGER_FULL_SKIPS: CounterVec = register_counter_vec!(
        "relayer_ledger_full_skips_total",
        "Deposits skipped because the claim ledger was full of in-flight claims",
        &["chain"]
    ).expect("constant metric name is valid");

    pub static ref LISTENER_RESTARTS: CounterVec = register_counter_vec!(
        "relayer_listener_restarts_total",
        "Total number of listener restarts after a fault",
        &["chain"]
    ).expect("constant metric name is valid");

    pub static ref LISTENER_STATE: GaugeVec = register_gauge_vec!(
        "relayer_listener_state",
        "Listener state (0=stopped, 1=starting, 2=active, 3=faulted)",
        &["chain"]
    ).expect("constant metric name is valid");

    // Claim metrics
    pub static ref CLAIMS_SUBMITTED: CounterVec = register_counter_vec!(
        "relayer_claims_submitted_total",
        "Total number of claim attempts by outcome",
        &["chain", "status"]
    ).expect("constant metric name is valid");

    pub static ref CLAIM_RETRIES: CounterVec = register_counter_vec!(
        "relayer_claim_retries_total",
        "Total number of scheduled claim retries",
        &["chain"]
    ).expect("constant metric name is valid");

    pub static ref CLAIMS_IN_FLIGHT: Gauge = register_gauge!(
        "relayer_claims_in_flight",
        "Claims currently being submitted or waiting for a retry"
    ).expect("constant metric name is valid");

    // Supervision metrics
    pub static ref STARTUP_FAILURES: Counter = register_counter!(
        "relayer_startup_failures_total",
        "Startup connectivity checks that failed"
    ).expect("constant metric name is valid");

    pub static ref UP: Gauge = register_gauge!(
        "relayer_up",
        "Whether the relayer is up and running"
    ).expect("constant metric name is valid");
}

pub fn record_deposit_observed(chain: &str) {
    DEPOSITS_OBSERVED.with_label_values(&[chain]).inc();
}

pub fn record_routing_skip(chain: &str) {
    ROUTING_SKIPS.with_label_values(&[chain]).inc();
}

pub fn record_duplicate_deposit(chain: &str) {
    DUPLICATE_DEPOSITS.with_label_values(&[chain]).inc();
}

pub fn record_ledger_full_skip(chain: &str) {
    LEDGER_FULL_SKIPS.with_label_values(&[chain]).inc();
}

pub fn record_listener_restart(chain: &str) {
    LISTENER_RESTARTS.with_label_values(&[chain]).inc();
}

pub fn set_listener_state(chain: &str, state: ListenerState) {
    LISTENER_STATE
        .with_label_values(&[chain])
        .set(state.as_gauge());
}

/// Record a claim attempt outcome
pub fn record_claim_submitted(chain: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    CLAIMS_SUBMITTED.with_label_values(&[chain, status]).inc();
}

pub fn record_claim_retry(chain: &str) {
    CLAIM_RETRIES.with_label_values(&[chain]).inc();
}

pub fn set_claims_in_flight(count: usize) {
    CLAIMS_IN_FLIGHT.set(count as f64);
}

pub fn record_startup_failure() {
    STARTUP_FAILURES.inc();
}

pub fn set_up(up: bool) {
    UP.set(if up { 1.0 } else { 0.0 });
}
