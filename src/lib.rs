//! Dual-chain bridge relayer - Library interface
//!
//! Watches the bridge deposit event on two chains and submits the matching
//! claim on the opposite chain. Re-exports internal modules for use in
//! integration tests.

pub mod address;
pub mod api;
pub mod chain_client;
pub mod clients;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod finality;
pub mod ledger;
pub mod listener;
pub mod metrics;
pub mod retry;
pub mod router;
pub mod submitter;
pub mod types;
