//! Concrete chain clients

pub mod evm;
pub mod tron;

use std::sync::Arc;

use eyre::{Result, WrapErr};

use crate::chain_client::ChainClient;
use crate::config::{ChainConfig, ChainKind};

pub use evm::EvmClient;
pub use tron::TronClient;

/// Build the client for one configured chain
pub fn build_client(config: &ChainConfig) -> Result<Arc<dyn ChainClient>> {
    let client: Arc<dyn ChainClient> = match config.kind {
        ChainKind::Evm => Arc::new(
            EvmClient::new(
                &config.name,
                &config.rpc_url,
                config.chain_id,
                &config.private_key,
                config.poll_interval(),
            )
            .wrap_err_with(|| format!("Failed to create EVM client for {}", config.name))?,
        ),
        ChainKind::Tron => Arc::new(
            TronClient::new(
                &config.name,
                &config.rpc_url,
                config.api_key.clone(),
                &config.private_key,
                config.poll_interval(),
            )
            .wrap_err_with(|| format!("Failed to create Tron client for {}", config.name))?,
        ),
    };
    Ok(client)
}
