//! Price delta, latency and trend math
//!
//! Everything here is pure: same inputs, same outputs, no failure modes.

use serde::{Deserialize, Serialize};

/// Fixed-point scale of every on-chain price handled here
pub const PRICE_DECIMALS: u8 = 8;

/// Percentage band treated as "no movement"
pub const TREND_DEAD_BAND_PCT: f64 = 0.01;

/// Direction of the destination price relative to origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Neutral,
}

impl Trend {
    pub fn classify(percentage: f64) -> Self {
        if percentage > TREND_DEAD_BAND_PCT {
            Trend::Up
        } else if percentage < -TREND_DEAD_BAND_PCT {
            Trend::Down
        } else {
            Trend::Neutral
        }
    }
}

/// Destination-vs-origin price difference
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub absolute_usd: f64,
    pub percentage: f64,
    pub trend: Trend,
}

/// `raw / 10^decimals`
pub fn normalize(raw: i128, decimals: u8) -> f64 {
    raw as f64 / 10f64.powi(decimals as i32)
}

/// Inverse of [`normalize`], rounded to the nearest unit
pub fn denormalize(value: f64, decimals: u8) -> i128 {
    (value * 10f64.powi(decimals as i32)).round() as i128
}

pub fn delta(origin_raw: i128, dest_raw: i128) -> Delta {
    let origin = normalize(origin_raw, PRICE_DECIMALS);
    let dest = normalize(dest_raw, PRICE_DECIMALS);

    let percentage = if origin_raw == 0 {
        0.0
    } else {
        (dest - origin) / origin * 100.0
    };

    Delta {
        absolute_usd: (dest - origin).abs(),
        percentage,
        trend: Trend::classify(percentage),
    }
}

/// Seconds the destination lags origin. Negative lag (clock skew) reads as 0.
pub fn latency_seconds(origin_updated_at: u64, dest_updated_at: u64) -> u64 {
    dest_updated_at.saturating_sub(origin_updated_at)
}
