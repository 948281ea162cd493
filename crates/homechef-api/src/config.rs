//! Configuration for the HomeChef webhook service.

use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use homechef_core::{signing::DEFAULT_SIGNATURE_HEADER, OwnerId};
use homechef_delivery::{ClientConfig, EngineConfig, RetryPolicy};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "homechef-webhooks.toml";

/// Database URL that selects the in-memory store.
pub const MEMORY_DATABASE_URL: &str = "memory://";

/// Environment variables read without the `WEBHOOK_` prefix.
const UNPREFIXED_ENV: [&str; 3] = ["DATABASE_URL", "DATABASE_MAX_CONNECTIONS", "BIND_ADDR"];

/// Service configuration with defaults, file, and environment overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority). Engine settings use the
///    `WEBHOOK_` prefix, e.g. `WEBHOOK_MAX_RETRIES`; `DATABASE_URL`,
///    `DATABASE_MAX_CONNECTIONS` and `BIND_ADDR` are read as-is
/// 2. Configuration file (`homechef-webhooks.toml`)
/// 3. Built-in defaults
///
/// Durations are whole seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Database
    /// PostgreSQL connection URL, or `memory://` for the in-memory store.
    pub database_url: String,
    /// Maximum number of database connections in the pool.
    pub database_max_connections: u32,

    // Server
    /// HTTP bind address.
    pub bind_addr: String,
    /// Bearer tokens as `owner=token` pairs separated by commas.
    pub api_tokens: String,
    /// Producer credentials for the internal event route, as `producer=token`
    /// pairs separated by commas.
    pub producer_tokens: String,

    // Retry
    /// Attempt budget per delivery.
    pub max_retries: u32,
    /// Base backoff delay.
    pub retry_delay: u64,
    /// Backoff cap.
    pub retry_max_delay: u64,
    /// Jitter fraction (0.0 to 1.0).
    pub retry_jitter: f64,

    // Delivery
    /// Outbound request deadline.
    pub timeout: u64,
    /// Largest accepted payload in bytes.
    pub max_payload_size: usize,
    /// Header carrying the payload signature.
    pub signature_header: String,
    /// Number of delivery workers.
    pub workers: usize,
    /// Global cap on requests in flight.
    pub max_in_flight: usize,
    /// Dispatch queue capacity.
    pub queue_size: usize,

    // Background loops
    /// Retry scheduler tick upper bound.
    pub scan_interval: u64,
    /// Deliveries claimed per scheduler tick.
    pub batch_limit: usize,
    /// Days terminal deliveries are kept.
    pub retention_days: u64,
    /// Janitor interval.
    pub cleanup_interval: u64,
    /// Registry reconcile interval.
    pub reconcile_interval: u64,
    /// Grace period for in-flight attempts at shutdown.
    pub shutdown_grace: u64,
}

impl Config {
    /// Layered configuration sources, lowest priority first.
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed("WEBHOOK_"))
            .merge(Env::raw().only(&UNPREFIXED_ENV))
    }

    /// Loads and validates configuration from every source.
    ///
    /// # Errors
    ///
    /// Returns error if a source cannot be parsed or a value is invalid.
    pub fn load() -> Result<Self> {
        let config: Self = Self::figment().extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Whether the in-memory store was requested.
    pub fn uses_memory_store(&self) -> bool {
        self.database_url == MEMORY_DATABASE_URL
    }

    /// Engine configuration.
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            workers: self.workers,
            max_in_flight: self.max_in_flight,
            queue_size: self.queue_size,
            client: self.to_client_config(),
            retry_policy: self.to_retry_policy(),
            max_payload_size: self.max_payload_size,
            scan_interval: Duration::from_secs(self.scan_interval),
            batch_limit: self.batch_limit,
            retention: Duration::from_secs(self.retention_days.saturating_mul(86_400)),
            cleanup_interval: Duration::from_secs(self.cleanup_interval),
            reconcile_interval: Duration::from_secs(self.reconcile_interval),
            shutdown_grace: Duration::from_secs(self.shutdown_grace),
            ..EngineConfig::default()
        }
    }

    /// Outbound client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.timeout),
            signature_header: self.signature_header.clone(),
            ..ClientConfig::default()
        }
    }

    /// Backoff policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            base_delay: Duration::from_secs(self.retry_delay),
            max_delay: Duration::from_secs(self.retry_max_delay),
            jitter_factor: self.retry_jitter,
        }
    }

    /// Parses the bind address.
    ///
    /// # Errors
    ///
    /// Returns error if the address is not `host:port`.
    pub fn parse_bind_addr(&self) -> Result<SocketAddr> {
        SocketAddr::from_str(&self.bind_addr).context("Invalid bind address")
    }

    /// Parses `api_tokens` into owner and token pairs.
    ///
    /// # Errors
    ///
    /// Returns error on an entry without `=` or with an empty side.
    pub fn parse_api_tokens(&self) -> Result<Vec<(OwnerId, String)>> {
        parse_token_pairs(&self.api_tokens, "api")
    }

    /// Parses `producer_tokens` into producer name and token pairs.
    ///
    /// # Errors
    ///
    /// Returns error on an entry without `=` or with an empty side.
    pub fn parse_producer_tokens(&self) -> Result<Vec<(OwnerId, String)>> {
        parse_token_pairs(&self.producer_tokens, "producer")
    }

    /// Get database URL with password masked for logging.
    pub fn database_url_masked(&self) -> String {
        if let Some(at_pos) = self.database_url.find('@') {
            if let Some(colon_pos) = self.database_url[..at_pos].rfind(':') {
                let mut masked = self.database_url.clone();
                masked.replace_range(colon_pos + 1..at_pos, "***");
                return masked;
            }
        }
        self.database_url.clone()
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            anyhow::bail!("workers must be greater than 0");
        }

        if self.max_in_flight == 0 {
            anyhow::bail!("max_in_flight must be greater than 0");
        }

        if self.queue_size == 0 {
            anyhow::bail!("queue_size must be greater than 0");
        }

        if self.max_retries == 0 {
            anyhow::bail!("max_retries must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.retry_jitter) {
            anyhow::bail!("retry_jitter must be between 0.0 and 1.0");
        }

        if self.retry_max_delay < self.retry_delay {
            anyhow::bail!("retry_max_delay cannot be less than retry_delay");
        }

        if self.timeout == 0 {
            anyhow::bail!("timeout must be greater than 0");
        }

        if self.signature_header.trim().is_empty() {
            anyhow::bail!("signature_header must not be empty");
        }

        if self.database_max_connections == 0 {
            anyhow::bail!("database_max_connections must be greater than 0");
        }

        self.parse_bind_addr()?;
        let api_tokens = self.parse_api_tokens()?;
        let producer_tokens = self.parse_producer_tokens()?;
        if producer_tokens.iter().any(|(_, p)| api_tokens.iter().any(|(_, a)| a == p)) {
            anyhow::bail!("a token cannot be both an api token and a producer token");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/homechef_webhooks".to_string(),
            database_max_connections: 10,
            bind_addr: "127.0.0.1:8080".to_string(),
            api_tokens: String::new(),
            producer_tokens: String::new(),
            max_retries: 3,
            retry_delay: 60,
            retry_max_delay: 3600,
            retry_jitter: 0.25,
            timeout: 30,
            max_payload_size: homechef_delivery::DEFAULT_MAX_PAYLOAD_SIZE,
            signature_header: DEFAULT_SIGNATURE_HEADER.to_string(),
            workers: homechef_delivery::DEFAULT_WORKER_COUNT,
            max_in_flight: homechef_delivery::DEFAULT_WORKER_COUNT,
            queue_size: homechef_delivery::DEFAULT_QUEUE_SIZE,
            scan_interval: 60,
            batch_limit: homechef_delivery::DEFAULT_BATCH_LIMIT,
            retention_days: 30,
            cleanup_interval: 86_400,
            reconcile_interval: 300,
            shutdown_grace: 30,
        }
    }
}

fn parse_token_pairs(raw: &str, kind: &str) -> Result<Vec<(OwnerId, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, token) = entry
                .split_once('=')
                .with_context(|| format!("{kind} token entry for '{}' has no '='", mask(entry)))?;
            let (name, token) = (name.trim(), token.trim());
            if name.is_empty() || token.is_empty() {
                anyhow::bail!("{kind} token entries must be name=token");
            }
            Ok((OwnerId::new(name), token.to_string()))
        })
        .collect()
}

fn mask(entry: &str) -> String {
    entry.chars().take(4).chain("***".chars()).collect()
}
