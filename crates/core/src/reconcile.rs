//! Series reconciliation
//!
//! Aligns two independently timestamped point sets onto one shared axis.
//! Every call rebuilds the whole sequence from its inputs; there is no
//! incremental path.

use std::collections::{BTreeSet, HashMap};

use crate::delta::{normalize, PRICE_DECIMALS};
use crate::types::{HistoryPoint, SeriesPoint};

/// Default number of aligned points kept for charting
pub const DEFAULT_SERIES_CAP: usize = 200;

#[derive(Debug, Clone, Copy)]
pub struct SeriesReconciler {
    cap: usize,
}

impl SeriesReconciler {
    pub fn new(cap: usize) -> Self {
        Self { cap }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Union of timestamps, ascending, tail-capped; exact-match lookup per side
    pub fn reconcile(&self, origin: &[HistoryPoint], dest: &[HistoryPoint]) -> Vec<SeriesPoint> {
        let timestamps: BTreeSet<u64> = origin
            .iter()
            .chain(dest.iter())
            .map(|p| p.timestamp)
            .collect();

        let skip = timestamps.len().saturating_sub(self.cap);
        let origin_index = index_first(origin);
        let dest_index = index_first(dest);

        timestamps
            .into_iter()
            .skip(skip)
            .map(|ts| {
                let o = origin_index.get(&ts);
                let d = dest_index.get(&ts);
                SeriesPoint {
                    timestamp_seconds: ts,
                    origin_price: o.map(|p| normalize(p.price, PRICE_DECIMALS)),
                    dest_price: d.map(|p| normalize(p.price, PRICE_DECIMALS)),
                    origin_round_id: o.map(|p| p.round_id.to_string()).unwrap_or_default(),
                    dest_round_id: d.map(|p| p.round_id.to_string()).unwrap_or_default(),
                }
            })
            .collect()
    }
}

impl Default for SeriesReconciler {
    fn default() -> Self {
        Self::new(DEFAULT_SERIES_CAP)
    }
}

// First occurrence wins when a side repeats a timestamp
fn index_first(points: &[HistoryPoint]) -> HashMap<u64, &HistoryPoint> {
    let mut index = HashMap::with_capacity(points.len());
    for point in points {
        index.entry(point.timestamp).or_insert(point);
    }
    index
}
