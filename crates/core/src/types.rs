//! Core type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::delta::{normalize, PRICE_DECIMALS};
use crate::errors::ErrorInfo;

/// The two sides of the mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainRole {
    /// Source of truth
    Origin,
    /// Mirrored copy
    Destination,
}

impl ChainRole {
    pub const ALL: [ChainRole; 2] = [ChainRole::Origin, ChainRole::Destination];

    pub fn name(&self) -> &'static str {
        match self {
            ChainRole::Origin => "origin",
            ChainRole::Destination => "destination",
        }
    }
}

impl fmt::Display for ChainRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One `latestRoundData` read. Price is fixed-point with 8 decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSample {
    pub price: i128,
    pub round_id: u128,
    pub started_at: u64,
    pub updated_at: u64,
    pub answered_in_round: u128,
}

impl PriceSample {
    /// `updated_at == 0` means the feed has never been written
    pub fn is_never_updated(&self) -> bool {
        self.updated_at == 0
    }

    pub fn price_usd(&self) -> f64 {
        normalize(self.price, PRICE_DECIMALS)
    }

    pub fn age_secs(&self, now_unix: u64) -> u64 {
        now_unix.saturating_sub(self.updated_at)
    }

    pub fn to_history_point(&self) -> HistoryPoint {
        HistoryPoint {
            timestamp: self.updated_at,
            price: self.price,
            round_id: self.round_id,
        }
    }
}

/// Poller lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollPhase {
    Idle,
    Loading,
    Ready,
    Errored,
}

/// Per-chain query state, owned by exactly one poller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainQueryState {
    pub chain: ChainRole,
    pub phase: PollPhase,
    pub last_sample: Option<PriceSample>,
    pub is_loading: bool,
    pub last_error: Option<ErrorInfo>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl ChainQueryState {
    pub fn idle(chain: ChainRole) -> Self {
        Self {
            chain,
            phase: PollPhase::Idle,
            last_sample: None,
            is_loading: false,
            last_error: None,
            last_attempt_at: None,
            last_success_at: None,
        }
    }

    /// The retained sample, skipping the never-updated sentinel
    pub fn usable_sample(&self) -> Option<&PriceSample> {
        self.last_sample.as_ref().filter(|s| !s.is_never_updated())
    }

    /// True when there is no usable sample or it is older than `max_age`
    pub fn is_stale(&self, now_unix: u64, max_age: Duration) -> bool {
        match self.usable_sample() {
            Some(sample) => sample.age_secs(now_unix) > max_age.as_secs(),
            None => true,
        }
    }
}

/// Identity of a price update event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKey {
    Tx(String),
    Round { round_id: u128, block_number: u64 },
}

/// A `PriceUpdated` log emitted by the destination store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceUpdateEvent {
    pub old_price: i128,
    pub new_price: i128,
    pub round_id: u128,
    pub updated_at: u64,
    pub block_number: u64,
    pub transaction_hash: Option<String>,
}

impl PriceUpdateEvent {
    /// Transaction hash when present, otherwise `(round_id, block_number)`
    pub fn key(&self) -> EventKey {
        match self.transaction_hash.as_deref() {
            Some(hash) if !hash.is_empty() => EventKey::Tx(hash.to_ascii_lowercase()),
            _ => EventKey::Round {
                round_id: self.round_id,
                block_number: self.block_number,
            },
        }
    }

    pub fn to_history_point(&self) -> HistoryPoint {
        HistoryPoint {
            timestamp: self.updated_at,
            price: self.new_price,
            round_id: self.round_id,
        }
    }
}

/// A single input point for reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub timestamp: u64,
    pub price: i128,
    pub round_id: u128,
}

/// One aligned point of the reconciled series. `None` prices are gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp_seconds: u64,
    pub origin_price: Option<f64>,
    pub dest_price: Option<f64>,
    pub origin_round_id: String,
    pub dest_round_id: String,
}

/// RPC liveness for one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub chain: ChainRole,
    pub healthy: bool,
    pub latest_block: Option<u64>,
    pub checked_at: DateTime<Utc>,
}
