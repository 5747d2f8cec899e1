//! Side-by-side view of both chains

use serde::{Deserialize, Serialize};

use mirror_core::{delta, latency_seconds, ChainQueryState, Delta};

/// Both chains' query state plus the derived delta and mirror lag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonView {
    /// `None` unless both sides hold a usable sample
    pub delta: Option<Delta>,
    pub latency_seconds: Option<u64>,
    pub origin: ChainQueryState,
    pub destination: ChainQueryState,
}

impl ComparisonView {
    pub fn compare(origin: &ChainQueryState, destination: &ChainQueryState) -> Self {
        let pair = origin.usable_sample().zip(destination.usable_sample());

        Self {
            delta: pair.map(|(o, d)| delta(o.price, d.price)),
            latency_seconds: pair.map(|(o, d)| latency_seconds(o.updated_at, d.updated_at)),
            origin: origin.clone(),
            destination: destination.clone(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.delta.is_some()
    }
}
