//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::ConfigError;
use crate::reconcile::DEFAULT_SERIES_CAP;
use crate::retry::RetryPolicy;
use crate::types::ChainRole;

/// Endpoints and contract for one side of the mirror
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEndpoint {
    pub rpc_url: String,
    pub ws_url: Option<String>,
    /// Contract answering `latestRoundData`
    pub contract_address: String,
    /// Contract whose logs make up the price history, when it differs
    pub history_address: Option<String>,
    pub explorer_base_url: Option<String>,
}

impl ChainEndpoint {
    pub fn origin_default() -> Self {
        Self {
            rpc_url: "https://sepolia-rollup.arbitrum.io/rpc".to_string(),
            ws_url: None,
            contract_address: "0xD30EF1a1D4fb1bEa3172B6b766a07F79844428A2".to_string(),
            history_address: None,
            explorer_base_url: Some("https://sepolia.arbiscan.io".to_string()),
        }
    }

    pub fn destination_default() -> Self {
        Self {
            rpc_url: "https://sepolia.base.org".to_string(),
            ws_url: None,
            contract_address: String::new(),
            history_address: None,
            explorer_base_url: Some("https://sepolia.basescan.org".to_string()),
        }
    }

    fn validate(&self, chain: ChainRole) -> Result<(), ConfigError> {
        if self.rpc_url.trim().is_empty() {
            return Err(ConfigError::Missing {
                chain: chain.name(),
                field: "rpc_url",
            });
        }
        if self.contract_address.trim().is_empty() {
            return Err(ConfigError::Missing {
                chain: chain.name(),
                field: "contract_address",
            });
        }
        Ok(())
    }
}

/// Per-chain price polling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub interval_ms: u64,
    pub retry: RetryPolicy,
    pub stale_after_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 15_000,
            retry: RetryPolicy::default(),
            stale_after_secs: 3_600,
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// Event log backfill and retention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    pub backfill_blocks: u64,
    pub backfill_limit: usize,
    pub live_cap: usize,
    /// Backoff and budget for re-attaching a dropped live stream
    pub reconnect: RetryPolicy,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            backfill_blocks: 1_000,
            backfill_limit: 20,
            live_cap: 50,
            reconnect: RetryPolicy {
                max_attempts: 10,
                base_delay_ms: 1_000,
                max_delay_ms: 60_000,
            },
        }
    }
}

/// Reconciled chart series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesConfig {
    pub max_points: usize,
    pub refresh_interval_ms: u64,
    pub history_attempts: u32,
    /// Block window for history queries; `None` scans from genesis
    pub history_blocks: Option<u64>,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            max_points: DEFAULT_SERIES_CAP,
            refresh_interval_ms: 15_000,
            history_attempts: 3,
            history_blocks: None,
        }
    }
}

impl SeriesConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

/// Liveness probing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkProbeConfig {
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for NetworkProbeConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            timeout_ms: 5_000,
        }
    }
}

impl NetworkProbeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// JSON-RPC transport tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSettings {
    pub request_timeout_ms: u64,
    /// Poll period for live logs when no WebSocket endpoint is configured
    pub log_poll_interval_ms: u64,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            log_poll_interval_ms: 4_000,
        }
    }
}

impl RpcSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn log_poll_interval(&self) -> Duration {
        Duration::from_millis(self.log_poll_interval_ms)
    }
}

/// Complete monitor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub origin: ChainEndpoint,
    pub destination: ChainEndpoint,
    pub poller: PollerConfig,
    pub subscriber: SubscriberConfig,
    pub series: SeriesConfig,
    pub network: NetworkProbeConfig,
    pub rpc: RpcSettings,
    pub report_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            origin: ChainEndpoint::origin_default(),
            destination: ChainEndpoint::destination_default(),
            poller: PollerConfig::default(),
            subscriber: SubscriberConfig::default(),
            series: SeriesConfig::default(),
            network: NetworkProbeConfig::default(),
            rpc: RpcSettings::default(),
            report_interval_ms: 15_000,
        }
    }
}

impl MonitorConfig {
    pub fn endpoint(&self, chain: ChainRole) -> &ChainEndpoint {
        match chain {
            ChainRole::Origin => &self.origin,
            ChainRole::Destination => &self.destination,
        }
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.origin.validate(ChainRole::Origin)?;
        self.destination.validate(ChainRole::Destination)?;

        if self.poller.interval_ms == 0 {
            return Err(ConfigError::Invalid("poller.interval_ms must be > 0".to_string()));
        }
        if self.report_interval_ms == 0 {
            return Err(ConfigError::Invalid("report_interval_ms must be > 0".to_string()));
        }
        if self.series.refresh_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "series.refresh_interval_ms must be > 0".to_string(),
            ));
        }
        if self.subscriber.live_cap < self.subscriber.backfill_limit {
            return Err(ConfigError::Invalid(format!(
                "subscriber.live_cap ({}) is below backfill_limit ({})",
                self.subscriber.live_cap, self.subscriber.backfill_limit
            )));
        }
        Ok(())
    }
}
