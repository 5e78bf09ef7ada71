use std::time::Duration;

use crate::error::{DexError, Result};

// ─── Defaults ────────────────────────────────────────────────────

pub const DEFAULT_HOST: &str = "https://dex.squadcast.com";

/// Points accumulated before a batch is flushed (flush fires on the
/// point that takes the batch *past* this number).
pub const DEFAULT_LOG_AFTER: usize = 50;

/// Slots in the intake channel between request tasks and the batcher.
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

// ─── DexConfig ───────────────────────────────────────────────────

/// Everything `Dex::start` needs. Build with `new` and the `with_*`
/// setters, or pull it from the environment with `from_env`.
#[derive(Debug, Clone)]
pub struct DexConfig {
    /// Sent as `X-API-Key` on every call to the DEX servers.
    pub service_key: String,
    /// Base URL of the DEX servers, no trailing slash.
    pub host: String,
    pub log_after: usize,
    pub queue_capacity: usize,
    pub poll_interval: Duration,
    pub http_timeout: Duration,
    /// Upper bound on concurrent metric uploads.
    pub max_in_flight_dispatches: usize,
}

impl DexConfig {
    pub fn new(service_key: impl Into<String>) -> Self {
        Self {
            service_key: service_key.into(),
            host: DEFAULT_HOST.to_owned(),
            log_after: DEFAULT_LOG_AFTER,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            max_in_flight_dispatches: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn with_log_after(mut self, log_after: usize) -> Self {
        self.log_after = log_after;
        self
    }

    /// Clamped to at least one slot; tokio rejects zero-capacity channels.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_max_in_flight_dispatches(mut self, max: usize) -> Self {
        self.max_in_flight_dispatches = max.max(1);
        self
    }

    /// Reads `DEX_API_KEY` (required), and optionally `DEX_HOST`,
    /// `DEX_LOG_AFTER`, `DEX_QUEUE_CAPACITY`, `DEX_POLL_INTERVAL_SECS`.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("DEX_API_KEY")
            .map_err(|_| DexError::Config("DEX_API_KEY is not set".into()))?;
        let mut cfg = Self::new(key);

        if let Ok(host) = std::env::var("DEX_HOST") {
            cfg = cfg.with_host(host);
        }
        if let Some(n) = env_number("DEX_LOG_AFTER")? {
            cfg = cfg.with_log_after(n as usize);
        }
        if let Some(n) = env_number("DEX_QUEUE_CAPACITY")? {
            cfg = cfg.with_queue_capacity(n as usize);
        }
        if let Some(n) = env_number("DEX_POLL_INTERVAL_SECS")? {
            cfg = cfg.with_poll_interval(Duration::from_secs(n));
        }

        Ok(cfg)
    }
}

fn env_number(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| DexError::Config(format!("{name}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}
