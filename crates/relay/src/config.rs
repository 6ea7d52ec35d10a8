//! Relay configuration, read from the environment at startup.
//!
//! Any missing or malformed required value is a [ConfigError]; the binary treats that as
//! fatal and exits before touching either ledger.

use crate::error::ConfigError;
use crate::signer::PrivateKey;
use alloy::primitives::Address;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Full relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub registry: LedgerConfig,
    pub automation: LedgerConfig,
    /// Settings shared by both ledger clients.
    pub client: ClientSettings,
    pub health_check_interval: Duration,
    pub cache_ttl: Duration,
    pub cache_eviction_interval: Duration,
    /// Listen address of the HTTP control surface.
    pub control_listen_addr: SocketAddr,
    pub log: LogConfig,
}

/// Per-ledger connection and identity.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// HTTP RPC URL for reads, writes and log backfill.
    pub http_url: String,
    /// WebSocket RPC URL for live log subscription. `None` falls back to HTTP polling.
    pub ws_url: Option<String>,
    pub contract_address: Address,
    /// Key of the relay's funded identity on this ledger.
    pub signing_key: PrivateKey,
    /// First block to deliver events from. `None` starts at the current tip.
    pub start_block: Option<u64>,
}

/// Settings shared by both ledger clients.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub retry: RetryConfig,
    /// Bound on waiting for a submitted transaction's receipt.
    pub tx_confirm_timeout: Duration,
    pub receipt_poll_interval: Duration,
    /// Poll interval for log polling when no WebSocket URL is configured.
    pub event_poll_interval: Duration,
    /// Max block range per eth_getLogs request.
    pub getlogs_max_range: u64,
    pub reconnection: ReconnectionConfig,
    /// Capacity of each ledger's event channel.
    pub event_channel_capacity: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            tx_confirm_timeout: Duration::from_secs(120),
            receipt_poll_interval: Duration::from_secs(1),
            event_poll_interval: Duration::from_secs(5),
            getlogs_max_range: 1000,
            reconnection: ReconnectionConfig::default(),
            event_channel_capacity: 256,
        }
    }
}

/// Retry policy for transport failures on reads and raw-transaction resends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(1000),
        }
    }
}

/// Reconnection backoff.
#[derive(Debug, Clone)]
pub struct ReconnectionConfig {
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            initial_backoff_secs: 1,
            max_backoff_secs: 60,
        }
    }
}

/// Logging level (an `EnvFilter` directive) and destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
    /// Append to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: None,
        }
    }
}

impl RelayConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let env = Env { get: &get };

        let registry = env.ledger(LedgerKeys {
            http_url: "REGISTRY_RPC_URL",
            ws_url: "REGISTRY_WS_URL",
            private_key: "REGISTRY_PRIVATE_KEY",
            contract: "REGISTRY_CONTRACT_ADDRESS",
            start_block: "REGISTRY_START_BLOCK",
        })?;
        let automation = env.ledger(LedgerKeys {
            http_url: "AUTOMATION_RPC_URL",
            ws_url: "AUTOMATION_WS_URL",
            private_key: "AUTOMATION_PRIVATE_KEY",
            contract: "AUTOMATION_CONTRACT_ADDRESS",
            start_block: "AUTOMATION_START_BLOCK",
        })?;

        let defaults = ClientSettings::default();
        let reconnection = ReconnectionConfig {
            initial_backoff_secs: env
                .parsed("RECONNECT_INITIAL_BACKOFF_SECS")?
                .unwrap_or(defaults.reconnection.initial_backoff_secs),
            max_backoff_secs: env
                .parsed("RECONNECT_MAX_BACKOFF_SECS")?
                .unwrap_or(defaults.reconnection.max_backoff_secs),
        };
        if reconnection.initial_backoff_secs == 0
            || reconnection.max_backoff_secs < reconnection.initial_backoff_secs
        {
            return Err(ConfigError::Invalid {
                key: "RECONNECT_MAX_BACKOFF_SECS",
                reason: "backoff must be positive and max >= initial".into(),
            });
        }
        let getlogs_max_range = env
            .parsed("GETLOGS_MAX_RANGE")?
            .unwrap_or(defaults.getlogs_max_range);
        if getlogs_max_range == 0 {
            return Err(ConfigError::Invalid {
                key: "GETLOGS_MAX_RANGE",
                reason: "must be at least 1".into(),
            });
        }
        let client = ClientSettings {
            retry: RetryConfig {
                max_retries: env.parsed("MAX_RETRIES")?.unwrap_or(defaults.retry.max_retries),
                delay: env
                    .parsed("RETRY_DELAY_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.delay),
            },
            tx_confirm_timeout: env
                .secs("TX_CONFIRM_TIMEOUT_SECS")?
                .unwrap_or(defaults.tx_confirm_timeout),
            receipt_poll_interval: defaults.receipt_poll_interval,
            event_poll_interval: env
                .secs("EVENT_POLL_INTERVAL_SECS")?
                .unwrap_or(defaults.event_poll_interval),
            getlogs_max_range,
            reconnection,
            event_channel_capacity: defaults.event_channel_capacity,
        };

        Ok(Self {
            registry,
            automation,
            client,
            health_check_interval: env
                .secs("HEALTH_CHECK_INTERVAL_SECS")?
                .unwrap_or(Duration::from_secs(30)),
            cache_ttl: env
                .secs("CACHE_TTL_SECS")?
                .unwrap_or(Duration::from_secs(300)),
            cache_eviction_interval: env
                .secs("CACHE_EVICTION_INTERVAL_SECS")?
                .unwrap_or(Duration::from_secs(600)),
            control_listen_addr: env
                .parsed("CONTROL_LISTEN_ADDR")?
                .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 3001))),
            log: LogConfig {
                level: get("LOG_LEVEL")
                    .or_else(|| get("RUST_LOG"))
                    .unwrap_or_else(|| LogConfig::default().level),
                file: get("LOG_FILE").map(PathBuf::from),
            },
        })
    }
}

struct LedgerKeys {
    http_url: &'static str,
    ws_url: &'static str,
    private_key: &'static str,
    contract: &'static str,
    start_block: &'static str,
}

struct Env<'a> {
    get: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        (self.get)(key).ok_or(ConfigError::Missing(key))
    }

    fn parsed<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        (self.get)(key)
            .map(|v| {
                v.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                    key,
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// Whole seconds; zero is rejected since every duration here drives a timer.
    fn secs(&self, key: &'static str) -> Result<Option<Duration>, ConfigError> {
        match self.parsed::<u64>(key)? {
            Some(0) => Err(ConfigError::Invalid {
                key,
                reason: "must be at least 1 second".into(),
            }),
            other => Ok(other.map(Duration::from_secs)),
        }
    }

    fn url(&self, key: &'static str, value: String) -> Result<String, ConfigError> {
        let ok = ["http://", "https://", "ws://", "wss://"]
            .iter()
            .any(|scheme| value.starts_with(scheme));
        if !ok {
            return Err(ConfigError::Invalid {
                key,
                reason: format!("unsupported URL scheme in {:?}", value),
            });
        }
        Ok(value)
    }

    fn ledger(&self, keys: LedgerKeys) -> Result<LedgerConfig, ConfigError> {
        let http_url = self.url(keys.http_url, self.required(keys.http_url)?)?;
        let ws_url = (self.get)(keys.ws_url)
            .map(|v| self.url(keys.ws_url, v))
            .transpose()?;
        let signing_key = PrivateKey::from_hex(&self.required(keys.private_key)?).map_err(
            |reason| ConfigError::Invalid {
                key: keys.private_key,
                reason,
            },
        )?;
        let contract_address = self
            .required(keys.contract)?
            .trim()
            .parse::<Address>()
            .map_err(|e| ConfigError::Invalid {
                key: keys.contract,
                reason: e.to_string(),
            })?;
        Ok(LedgerConfig {
            http_url,
            ws_url,
            contract_address,
            signing_key,
            start_block: self.parsed(keys.start_block)?,
        })
    }
}
