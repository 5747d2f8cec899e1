//! Live reconciled series
//!
//! Keeps one timestamp-keyed point set per chain and republishes the
//! reconciled series whenever either set changes.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use tokio::sync::watch;
use tracing::trace;

use mirror_core::{ChainRole, HistoryPoint, SeriesPoint, SeriesReconciler};

#[derive(Default)]
struct SeriesInputs {
    origin: BTreeMap<u64, HistoryPoint>,
    destination: BTreeMap<u64, HistoryPoint>,
}

impl SeriesInputs {
    fn side_mut(&mut self, chain: ChainRole) -> &mut BTreeMap<u64, HistoryPoint> {
        match chain {
            ChainRole::Origin => &mut self.origin,
            ChainRole::Destination => &mut self.destination,
        }
    }

    fn side(&self, chain: ChainRole) -> &BTreeMap<u64, HistoryPoint> {
        match chain {
            ChainRole::Origin => &self.origin,
            ChainRole::Destination => &self.destination,
        }
    }
}

/// Aligned two-chain price series, seeded from history and extended by polls
pub struct SeriesTracker {
    reconciler: SeriesReconciler,
    inputs: Mutex<SeriesInputs>,
    series: watch::Sender<Vec<SeriesPoint>>,
}

impl SeriesTracker {
    pub fn new(reconciler: SeriesReconciler) -> Self {
        let (series, _) = watch::channel(Vec::new());
        Self {
            reconciler,
            inputs: Mutex::new(SeriesInputs::default()),
            series,
        }
    }

    /// Merge points for one chain. A timestamp already held keeps its
    /// first point. Returns true when the published series changed.
    pub fn ingest<I>(&self, chain: ChainRole, points: I) -> bool
    where
        I: IntoIterator<Item = HistoryPoint>,
    {
        let mut inputs = self.inputs.lock();
        let side = inputs.side_mut(chain);

        let mut added = 0;
        for point in points {
            if let std::collections::btree_map::Entry::Vacant(slot) = side.entry(point.timestamp) {
                slot.insert(point);
                added += 1;
            }
        }
        if added == 0 {
            return false;
        }

        // Points below this side's newest `cap` can never reach the output
        while side.len() > self.reconciler.cap() {
            side.pop_first();
        }

        let origin: Vec<HistoryPoint> = inputs.origin.values().copied().collect();
        let destination: Vec<HistoryPoint> = inputs.destination.values().copied().collect();
        let next = self.reconciler.reconcile(&origin, &destination);

        // Publish under the input lock so observers see snapshots in order
        let changed = self.series.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        trace!("Ingested {} {} points, series changed: {}", added, chain, changed);
        changed
    }

    pub fn series(&self) -> Vec<SeriesPoint> {
        self.series.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<SeriesPoint>> {
        self.series.subscribe()
    }

    /// Points currently held for one chain, oldest first
    pub fn points(&self, chain: ChainRole) -> Vec<HistoryPoint> {
        self.inputs.lock().side(chain).values().copied().collect()
    }
}

impl Default for SeriesTracker {
    fn default() -> Self {
        Self::new(SeriesReconciler::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(timestamp: u64, price: i128) -> HistoryPoint {
        HistoryPoint {
            timestamp,
            price,
            round_id: timestamp as u128,
        }
    }

    #[test]
    fn test_ingest_reconciles_both_sides() {
        let tracker = SeriesTracker::default();
        assert!(tracker.ingest(ChainRole::Origin, vec![point(100, 200_000_000_000)]));
        assert!(tracker.ingest(ChainRole::Destination, vec![point(110, 201_000_000_000)]));

        let series = tracker.series();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].origin_price, Some(2000.0));
        assert_eq!(series[0].dest_price, None);
        assert_eq!(series[1].origin_price, None);
        assert_eq!(series[1].dest_price, Some(2010.0));
    }

    #[test]
    fn test_repeat_ingest_is_noop() {
        let tracker = SeriesTracker::default();
        assert!(tracker.ingest(ChainRole::Origin, vec![point(100, 1)]));
        assert!(!tracker.ingest(ChainRole::Origin, vec![point(100, 2)]));
        assert_eq!(tracker.points(ChainRole::Origin), vec![point(100, 1)]);
    }

    #[test]
    fn test_sides_trimmed_to_cap() {
        let tracker = SeriesTracker::new(SeriesReconciler::new(3));
        tracker.ingest(ChainRole::Origin, (1..=10).map(|t| point(t, 1)));

        let held: Vec<u64> = tracker.points(ChainRole::Origin).iter().map(|p| p.timestamp).collect();
        assert_eq!(held, vec![8, 9, 10]);
        let ts: Vec<u64> = tracker.series().iter().map(|p| p.timestamp_seconds).collect();
        assert_eq!(ts, vec![8, 9, 10]);
    }

    #[test]
    fn test_trimming_matches_full_reconcile() {
        let reconciler = SeriesReconciler::new(5);
        let tracker = SeriesTracker::new(reconciler);
        let origin: Vec<HistoryPoint> = (0..12).map(|i| point(i * 7, 1)).collect();
        let dest: Vec<HistoryPoint> = (0..9).map(|i| point(i * 11, 2)).collect();

        tracker.ingest(ChainRole::Origin, origin.clone());
        tracker.ingest(ChainRole::Destination, dest.clone());

        assert_eq!(tracker.series(), reconciler.reconcile(&origin, &dest));
    }

    #[tokio::test]
    async fn test_subscribers_notified() {
        let tracker = SeriesTracker::default();
        let mut rx = tracker.subscribe();

        tracker.ingest(ChainRole::Destination, vec![point(5, 1)]);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 1);

        tracker.ingest(ChainRole::Destination, vec![point(5, 1)]);
        assert!(!rx.has_changed().unwrap());
    }
}
