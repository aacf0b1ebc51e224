//! Engine configuration.
//!
//! Loaded the way the teacher's `AppConfig::load()` does: defaults baked
//! in, overridden by environment variables (optionally via a `.env` file
//! picked up with `dotenvy`), parsed with the `config` crate.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Host:port of the external quote oracle.
    pub quote_oracle_addr: String,
    /// Quote cache freshness window, seconds.
    pub quote_cache_ttl_secs: u64,
    /// TCP connect timeout against the quote oracle, milliseconds.
    pub quote_connect_timeout_ms: u64,
    /// TCP read timeout against the quote oracle, milliseconds.
    pub quote_read_timeout_ms: u64,
    /// Pending BUY/SELL intent TTL, seconds.
    pub pending_intent_ttl_secs: u64,
    /// Cadence of the Pending Intents TTL sweeper, milliseconds.
    pub pending_sweep_interval_ms: u64,
    /// Cadence of the Trigger Loop, seconds.
    pub trigger_loop_interval_secs: u64,
    /// Max depth of a single user's command queue before backpressure kicks in.
    pub user_queue_depth: usize,
    /// Audit event timestamp plausibility window, seconds either side of "now".
    pub audit_clock_skew_secs: i64,
    /// Bind address for the thin command-ingress binary.
    pub bind_addr: String,
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            quote_oracle_addr: "127.0.0.1:4444".to_string(),
            quote_cache_ttl_secs: 60,
            quote_connect_timeout_ms: 1_000,
            quote_read_timeout_ms: 2_000,
            pending_intent_ttl_secs: 60,
            pending_sweep_interval_ms: 1_000,
            trigger_loop_interval_secs: 5,
            user_queue_depth: 64,
            audit_clock_skew_secs: 300,
            bind_addr: "0.0.0.0:8080".to_string(),
            environment: "development".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration, environment variables (prefixed `DAYTRADER_`)
    /// taking precedence over the compiled-in defaults.
    pub fn load() -> anyhow::Result<Self> {
        let defaults = AppConfig::default();
        let cfg = config::Config::builder()
            .add_source(config::Config::try_from(&defaults)?)
            .add_source(config::Environment::with_prefix("DAYTRADER").separator("__"))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }

    pub fn quote_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.quote_connect_timeout_ms)
    }

    pub fn quote_read_timeout(&self) -> Duration {
        Duration::from_millis(self.quote_read_timeout_ms)
    }

    pub fn quote_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.quote_cache_ttl_secs)
    }

    pub fn pending_intent_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_intent_ttl_secs)
    }

    pub fn pending_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.pending_sweep_interval_ms)
    }

    pub fn trigger_loop_interval(&self) -> Duration {
        Duration::from_secs(self.trigger_loop_interval_secs)
    }
}
