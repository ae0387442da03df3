//! Relayer configuration
//!
//! Everything comes from environment variables, optionally seeded from a
//! `.env` file. The two chains share one variable layout under the
//! `CHAIN_A_` and `CHAIN_B_` prefixes.

use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::address::parse_address;
use crate::coordinator::CoordinatorSettings;
use crate::retry::{Backoff, ClaimRetryPolicy};

/// Restart delays below this would let a broken endpoint spin the process
pub const MIN_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Tron fee ceiling in sun when none is configured (100 TRX)
pub const DEFAULT_TRON_FEE_LIMIT: u128 = 100_000_000;

fn default_confirmations() -> u64 {
    1
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_restart_delay() -> u64 {
    5000
}

fn default_restart_max_delay() -> u64 {
    60_000
}

fn default_claim_max_retries() -> u32 {
    3
}

fn default_claim_retry_initial() -> u64 {
    2000
}

fn default_claim_retry_max() -> u64 {
    30_000
}

fn default_api_port() -> u16 {
    9092
}

/// Which client family talks to a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainKind {
    Evm,
    Tron,
}

impl FromStr for ChainKind {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "evm" => Ok(ChainKind::Evm),
            "tron" => Ok(ChainKind::Tron),
            other => Err(eyre!("unknown chain kind {:?} (expected evm or tron)", other)),
        }
    }
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainKind::Evm => f.write_str("evm"),
            ChainKind::Tron => f.write_str("tron"),
        }
    }
}

/// Log output format, read before the rest of the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match env::var("LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// One side of the relay pair
#[derive(Clone)]
pub struct ChainConfig {
    /// Label used in logs, metrics and the status endpoint
    pub name: String,
    pub kind: ChainKind,
    /// JSON-RPC endpoint (EVM) or TronGrid host (Tron)
    pub rpc_url: String,
    /// TronGrid `TRON-PRO-API-KEY`
    pub api_key: Option<String>,
    pub chain_id: u64,
    pub bridge_address: String,
    pub private_key: String,
    pub confirmations: u64,
    /// Gas limit (EVM) or fee_limit in sun (Tron)
    pub fee_limit: Option<u128>,
    pub poll_interval_ms: u64,
}

/// Custom Debug that redacts credentials to prevent accidental log leakage.
impl fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("rpc_url", &redact_url(&self.rpc_url))
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("chain_id", &self.chain_id)
            .field("bridge_address", &self.bridge_address)
            .field("private_key", &"<redacted>")
            .field("confirmations", &self.confirmations)
            .field("fee_limit", &self.fee_limit)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .finish()
    }
}

impl ChainConfig {
    fn load_from_env(prefix: &str, default_name: &str) -> Result<Self> {
        let var = |key: &str| format!("{}{}", prefix, key);

        let kind: ChainKind = required(&var("KIND"))?
            .parse()
            .wrap_err_with(|| format!("{} is invalid", var("KIND")))?;

        Ok(Self {
            name: env::var(var("NAME")).unwrap_or_else(|_| default_name.to_string()),
            kind,
            rpc_url: required(&var("RPC_URL"))?,
            api_key: env::var(var("API_KEY")).ok().filter(|k| !k.is_empty()),
            chain_id: parsed(&var("CHAIN_ID"))?
                .ok_or_else(|| eyre!("{} environment variable is required", var("CHAIN_ID")))?,
            bridge_address: required(&var("BRIDGE_ADDRESS"))?,
            private_key: required(&var("PRIVATE_KEY"))?,
            confirmations: parsed(&var("CONFIRMATIONS"))?.unwrap_or(default_confirmations()),
            fee_limit: parsed(&var("FEE_LIMIT"))?,
            poll_interval_ms: parsed(&var("POLL_INTERVAL_MS"))?
                .unwrap_or(default_poll_interval()),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Configured fee ceiling, falling back to the Tron default
    pub fn effective_fee_limit(&self) -> Option<u128> {
        match (self.fee_limit, self.kind) {
            (Some(limit), _) => Some(limit),
            (None, ChainKind::Tron) => Some(DEFAULT_TRON_FEE_LIMIT),
            (None, ChainKind::Evm) => None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(eyre!("chain name cannot be empty"));
        }

        if self.rpc_url.is_empty() {
            return Err(eyre!("{}: rpc_url cannot be empty", self.name));
        }
        reqwest::Url::parse(&self.rpc_url)
            .wrap_err_with(|| format!("{}: rpc_url is not a valid URL", self.name))?;

        match self.kind {
            ChainKind::Evm => {
                if self.bridge_address.len() != 42 || !self.bridge_address.starts_with("0x") {
                    return Err(eyre!(
                        "{}: bridge_address must be a valid hex address (42 chars with 0x prefix)",
                        self.name
                    ));
                }
            }
            ChainKind::Tron => {
                if !(self.bridge_address.starts_with('T') || self.bridge_address.starts_with("41")) {
                    return Err(eyre!(
                        "{}: bridge_address must be a Tron address (base58 T... or 41-prefixed hex)",
                        self.name
                    ));
                }
            }
        }
        parse_address(&self.bridge_address)
            .wrap_err_with(|| format!("{}: invalid bridge_address", self.name))?;

        if self.private_key.len() != 66
            || !self.private_key.starts_with("0x")
            || !self.private_key[2..].chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(eyre!(
                "{}: private_key must be 66 chars (0x + 64 hex chars)",
                self.name
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(eyre!("{}: poll_interval_ms must be greater than 0", self.name));
        }

        Ok(())
    }
}

/// Relayer configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub chain_a: ChainConfig,
    pub chain_b: ChainConfig,
    /// Deposit event name on both bridge contracts
    pub event_name: String,
    /// Claim function name on both bridge contracts
    pub claim_function: String,
    /// Listener restart and startup retry schedule
    pub restart: Backoff,
    pub claim_retry: ClaimRetryPolicy,
    pub ledger_capacity: usize,
    pub ledger_ttl_secs: u64,
    /// HTTP port for health/metrics/status (0 disables)
    pub api_port: u16,
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
            tracing::debug!(path, "Loaded environment file");
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Self> {
        let chain_a = ChainConfig::load_from_env("CHAIN_A_", "chain-a")?;
        let chain_b = ChainConfig::load_from_env("CHAIN_B_", "chain-b")?;

        let restart_delay =
            Duration::from_millis(parsed("RESTART_DELAY_MS")?.unwrap_or(default_restart_delay()));
        let restart = match env::var("RESTART_BACKOFF")
            .unwrap_or_else(|_| "fixed".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "fixed" => Backoff::Fixed(restart_delay),
            "exponential" => Backoff::exponential(
                restart_delay,
                Duration::from_millis(
                    parsed("RESTART_MAX_DELAY_MS")?.unwrap_or(default_restart_max_delay()),
                ),
            ),
            other => {
                return Err(eyre!(
                    "RESTART_BACKOFF must be fixed or exponential, got {:?}",
                    other
                ))
            }
        };

        let claim_retry = ClaimRetryPolicy {
            max_retries: parsed("CLAIM_MAX_RETRIES")?.unwrap_or(default_claim_max_retries()),
            backoff: Backoff::exponential(
                Duration::from_millis(
                    parsed("CLAIM_RETRY_INITIAL_MS")?.unwrap_or(default_claim_retry_initial()),
                ),
                Duration::from_millis(
                    parsed("CLAIM_RETRY_MAX_MS")?.unwrap_or(default_claim_retry_max()),
                ),
            ),
        };

        let config = Config {
            chain_a,
            chain_b,
            event_name: env::var("EVENT_NAME").unwrap_or_else(|_| "Bridge".to_string()),
            claim_function: env::var("CLAIM_FUNCTION").unwrap_or_else(|_| "claim".to_string()),
            restart,
            claim_retry,
            ledger_capacity: parsed("LEDGER_CAPACITY")?
                .unwrap_or(crate::ledger::DEFAULT_LEDGER_CAPACITY),
            ledger_ttl_secs: parsed("LEDGER_TTL_SECS")?
                .unwrap_or(crate::ledger::DEFAULT_LEDGER_TTL_SECS),
            api_port: parsed("API_PORT")?.unwrap_or(default_api_port()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.chain_a.validate()?;
        self.chain_b.validate()?;

        // Routing relies on the two chain ids being distinguishable
        if self.chain_a.chain_id == self.chain_b.chain_id {
            return Err(eyre!(
                "CHAIN_A_CHAIN_ID and CHAIN_B_CHAIN_ID must differ (both are {})",
                self.chain_a.chain_id
            ));
        }

        if self.chain_a.name == self.chain_b.name {
            return Err(eyre!(
                "CHAIN_A_NAME and CHAIN_B_NAME must differ (both are {:?})",
                self.chain_a.name
            ));
        }

        if self.event_name.trim().is_empty() {
            return Err(eyre!("EVENT_NAME cannot be empty"));
        }
        if self.claim_function.trim().is_empty() {
            return Err(eyre!("CLAIM_FUNCTION cannot be empty"));
        }

        if self.restart.floor() < MIN_RESTART_DELAY {
            return Err(eyre!(
                "RESTART_DELAY_MS must be at least {} ms",
                MIN_RESTART_DELAY.as_millis()
            ));
        }

        if self.ledger_capacity == 0 {
            return Err(eyre!("LEDGER_CAPACITY must be greater than 0"));
        }

        Ok(())
    }

    /// Engine policy derived from this configuration
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            event_name: self.event_name.clone(),
            claim_function: self.claim_function.clone(),
            restart: self.restart.clone(),
            claim_retry: self.claim_retry.clone(),
            ledger_capacity: self.ledger_capacity,
            ledger_ttl_secs: self.ledger_ttl_secs,
            ..CoordinatorSettings::default()
        }
    }
}

fn required(key: &str) -> Result<String> {
    env::var(key).map_err(|_| eyre!("{} environment variable is required", key))
}

/// Optional variable that must parse when present
fn parsed<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| eyre!("{} has an invalid value {:?}: {}", key, v, e)),
        _ => Ok(None),
    }
}

/// Keep scheme and host; RPC paths and queries often carry provider keys
fn redact_url(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or_default();
            let has_secret = parsed.path().len() > 1 || parsed.query().is_some();
            let port = parsed.port().map(|p| format!(":{}", p)).unwrap_or_default();
            if has_secret {
                format!("{}://{}{}/<redacted>", parsed.scheme(), host, port)
            } else {
                format!("{}://{}{}", parsed.scheme(), host, port)
            }
        }
        Err(_) => "<redacted>".to_string(),
    }
}
