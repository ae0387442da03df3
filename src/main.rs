//! Dual-chain bridge relayer
//!
//! Listens for `Bridge` deposit events on two chains (for example an EVM
//! testnet and a Tron testnet) and, for every deposit addressed to the other
//! chain of the pair, submits the matching `claim` transaction there.
//!
//! # Flow
//!
//! 1. Both chain endpoints are checked; nothing is subscribed until both answer
//! 2. One listener per chain streams final deposit events to the coordinator
//! 3. The coordinator routes each deposit and hands it to the peer submitter
//! 4. A faulted listener is torn down and restarted after the restart delay
//!
//! The process exits cleanly on SIGINT/SIGTERM and with a non-zero status on
//! configuration errors.

use eyre::{Result, WrapErr};
use tracing::{error, info};

use relayer::api::{self, AppState};
use relayer::clients::build_client;
use relayer::config::{ChainConfig, Config, LogFormat};
use relayer::coordinator::{ChainEndpoint, RelayCoordinator};
use relayer::types::ChainId;

fn main() -> Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> Result<()> {
    // LOG_FORMAT may live in .env, so load it before logging is set up
    let _ = dotenvy::dotenv();
    init_logging(LogFormat::from_env());
    install_panic_logging();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting dual-chain relayer");

    let config = Config::load().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;
    info!(
        chain_a = %config.chain_a.name,
        chain_a_kind = %config.chain_a.kind,
        chain_a_id = config.chain_a.chain_id,
        chain_b = %config.chain_b.name,
        chain_b_kind = %config.chain_b.kind,
        chain_b_id = config.chain_b.chain_id,
        event = %config.event_name,
        claim_function = %config.claim_function,
        "Configuration loaded"
    );

    let coordinator = RelayCoordinator::new(
        endpoint(&config.chain_a)?,
        endpoint(&config.chain_b)?,
        config.coordinator_settings(),
    )?;

    let api_task = if config.api_port != 0 {
        let state = AppState::new(coordinator.status());
        let port = config.api_port;
        Some(tokio::spawn(async move {
            if let Err(e) = api::start_server(port, state).await {
                error!(error = %e, "API server error");
            }
        }))
    } else {
        info!("API server disabled");
        None
    };

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    // Handle signals
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    coordinator.run(shutdown_rx).await?;

    if let Some(task) = api_task {
        task.abort();
    }

    info!("Dual-chain relayer stopped");
    Ok(())
}

fn endpoint(config: &ChainConfig) -> Result<ChainEndpoint> {
    let client = build_client(config)
        .wrap_err_with(|| format!("Failed to initialize chain {}", config.name))?;
    Ok(ChainEndpoint {
        name: config.name.clone(),
        chain_id: ChainId(config.chain_id),
        client,
        bridge_address: config.bridge_address.clone(),
        confirmations: config.confirmations,
        poll_interval: config.poll_interval(),
        fee_limit: config.effective_fee_limit(),
    })
}

fn init_logging(format: LogFormat) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dualchain_relayer=debug,relayer=debug"));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .with(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .with(filter)
            .init(),
    }
}

/// Route panics through tracing before the color-eyre hook prints them
fn install_panic_logging() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = relayer::error::panic_message(panic_info.payload());
        error!(location = %location, panic = %payload, "Panic in relayer task");
        previous(panic_info);
    }));
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
