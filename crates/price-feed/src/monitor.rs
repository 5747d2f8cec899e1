//! Mirror monitor - wires pollers, event feed, series and probes together

use alloy_primitives::Address;
use parking_lot::{Mutex, RwLock};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mirror_core::{
    ChainQueryState, ChainRole, ConfigError, MonitorConfig, NetworkStatus, PollPhase,
    SeriesPoint, SeriesReconciler, TransportError,
};

use crate::comparison::ComparisonView;
use crate::events::{ContractEventSource, EventFeedSnapshot, EventSource, EventSubscriber};
use crate::history::{fetch_with_retry, HistoryEvent, HistorySource, LogHistorySource};
use crate::network::NetworkProbe;
use crate::poller::{PricePoller, RefreshOutcome};
use crate::reader::{ChainBinding, ChainReader, ContractChainReader};
use crate::rpc::JsonRpcTransport;
use crate::series::SeriesTracker;
use crate::transport::ChainTransport;

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid {chain} address: {value:?}")]
    Address { chain: ChainRole, value: String },

    #[error("Transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

/// Collaborators behind the monitor's trait seams
pub struct MonitorParts {
    pub reader: Arc<dyn ChainReader>,
    pub event_source: Arc<dyn EventSource>,
    pub origin_history: Option<Arc<dyn HistorySource>>,
    pub destination_history: Option<Arc<dyn HistorySource>>,
}

/// State shared with the background tasks
struct Shared {
    tracker: SeriesTracker,
    comparison: watch::Sender<ComparisonView>,
    network: watch::Sender<Vec<NetworkStatus>>,
    stopped: RwLock<bool>,
}

impl Shared {
    fn is_stopped(&self) -> bool {
        *self.stopped.read()
    }

    /// Run `update` unless stopped; holds the gate so `stop()` waits for it
    fn publish(&self, update: impl FnOnce(&Shared)) -> bool {
        let stopped = self.stopped.read();
        if *stopped {
            return false;
        }
        update(self);
        true
    }
}

/// Owns the pollers, event subscriber, series tracker and network checks
pub struct MirrorMonitor {
    config: MonitorConfig,
    origin: PricePoller,
    destination: PricePoller,
    events: Arc<EventSubscriber>,
    probe: Arc<NetworkProbe>,
    origin_history: Option<Arc<dyn HistorySource>>,
    destination_history: Option<Arc<dyn HistorySource>>,
    shared: Arc<Shared>,
    running: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl MirrorMonitor {
    pub fn new(config: MonitorConfig, parts: MonitorParts) -> Self {
        let origin = PricePoller::new(ChainRole::Origin, Arc::clone(&parts.reader), config.poller);
        let destination = PricePoller::new(ChainRole::Destination, Arc::clone(&parts.reader), config.poller);
        let comparison = ComparisonView::compare(&origin.snapshot(), &destination.snapshot());

        let (comparison, _) = watch::channel(comparison);
        let (network, _) = watch::channel(Vec::new());

        Self {
            origin,
            destination,
            events: Arc::new(EventSubscriber::new(parts.event_source, config.subscriber)),
            probe: Arc::new(NetworkProbe::new(parts.reader, config.network.timeout())),
            origin_history: parts.origin_history,
            destination_history: parts.destination_history,
            shared: Arc::new(Shared {
                tracker: SeriesTracker::new(SeriesReconciler::new(config.series.max_points)),
                comparison,
                network,
                stopped: RwLock::new(false),
            }),
            config,
            running: AtomicBool::new(false),
            handles: Mutex::new(vec![]),
        }
    }

    /// Build the JSON-RPC stack described by `config`
    pub fn connect(config: MonitorConfig) -> Result<Self, SetupError> {
        config.validate()?;

        let origin_transport: Arc<dyn ChainTransport> =
            Arc::new(JsonRpcTransport::new("origin", &config.origin, config.rpc)?);
        let destination_transport: Arc<dyn ChainTransport> =
            Arc::new(JsonRpcTransport::new("destination", &config.destination, config.rpc)?);

        let origin_feed = parse_address(ChainRole::Origin, &config.origin.contract_address)?;
        let destination_store = parse_address(ChainRole::Destination, &config.destination.contract_address)?;

        let reader = ContractChainReader::new(
            ChainBinding {
                transport: Arc::clone(&origin_transport),
                contract: origin_feed,
            },
            ChainBinding {
                transport: Arc::clone(&destination_transport),
                contract: destination_store,
            },
        )
        .with_probe_timeout(config.network.timeout());

        let window = config.series.history_blocks;
        let origin_history: Option<Arc<dyn HistorySource>> = match &config.origin.history_address {
            Some(value) if !value.trim().is_empty() => {
                let aggregator = parse_address(ChainRole::Origin, value)?;
                Some(Arc::new(LogHistorySource::new(
                    ChainRole::Origin,
                    Arc::clone(&origin_transport),
                    aggregator,
                    HistoryEvent::AnswerUpdated,
                    window,
                )))
            }
            _ => {
                info!("No origin history address configured, origin series comes from polling only");
                None
            }
        };

        let destination_log_address = match &config.destination.history_address {
            Some(value) if !value.trim().is_empty() => parse_address(ChainRole::Destination, value)?,
            _ => destination_store,
        };
        let destination_history: Option<Arc<dyn HistorySource>> = Some(Arc::new(LogHistorySource::new(
            ChainRole::Destination,
            Arc::clone(&destination_transport),
            destination_log_address,
            HistoryEvent::PriceUpdated,
            window,
        )));

        let event_source = Arc::new(ContractEventSource::new(destination_transport, destination_store));

        Ok(Self::new(
            config,
            MonitorParts {
                reader: Arc::new(reader),
                event_source,
                origin_history,
                destination_history,
            },
        ))
    }

    /// Start every background task
    pub fn start(&self) {
        if self.shared.is_stopped() || self.running.swap(true, Ordering::AcqRel) {
            warn!("Mirror monitor already started or stopped");
            return;
        }
        info!("Starting mirror monitor");

        let mut handles = self.handles.lock();

        // Feeds subscribe before their producers start
        handles.push(self.spawn_poller_feed());
        self.origin.start();
        self.destination.start();

        handles.push(self.spawn_event_feed());
        let events = Arc::clone(&self.events);
        handles.push(tokio::spawn(async move { events.start().await }));

        for (chain, source) in [
            (ChainRole::Origin, &self.origin_history),
            (ChainRole::Destination, &self.destination_history),
        ] {
            if let Some(source) = source {
                handles.push(self.spawn_history_loop(chain, Arc::clone(source)));
            }
        }

        handles.push(self.spawn_network_loop());
        info!("Mirror monitor started with {} tasks", handles.len());
    }

    /// Tear everything down. No snapshot changes after this returns.
    pub fn stop(&self) {
        *self.shared.stopped.write() = true;
        self.origin.stop();
        self.destination.stop();
        self.events.stop();

        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        if !handles.is_empty() {
            info!("Stopping mirror monitor");
        }
        for handle in handles {
            handle.abort();
        }
    }

    pub async fn refresh(&self, chain: ChainRole) -> RefreshOutcome {
        self.poller(chain).refresh().await
    }

    pub fn poller(&self, chain: ChainRole) -> &PricePoller {
        match chain {
            ChainRole::Origin => &self.origin,
            ChainRole::Destination => &self.destination,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn comparison(&self) -> ComparisonView {
        ComparisonView::compare(&self.origin.snapshot(), &self.destination.snapshot())
    }

    pub fn events(&self) -> EventFeedSnapshot {
        self.events.snapshot()
    }

    pub fn series(&self) -> Vec<SeriesPoint> {
        self.shared.tracker.series()
    }

    pub fn network_status(&self) -> Vec<NetworkStatus> {
        self.shared.network.borrow().clone()
    }

    pub fn subscribe_state(&self, chain: ChainRole) -> watch::Receiver<ChainQueryState> {
        self.poller(chain).subscribe()
    }

    pub fn subscribe_comparison(&self) -> watch::Receiver<ComparisonView> {
        self.shared.comparison.subscribe()
    }

    pub fn subscribe_events(&self) -> watch::Receiver<EventFeedSnapshot> {
        self.events.subscribe()
    }

    pub fn subscribe_series(&self) -> watch::Receiver<Vec<SeriesPoint>> {
        self.shared.tracker.subscribe()
    }

    pub fn subscribe_network(&self) -> watch::Receiver<Vec<NetworkStatus>> {
        self.shared.network.subscribe()
    }

    /// Ready samples go into the series; every change recomputes the comparison
    fn spawn_poller_feed(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let mut origin_rx = self.origin.subscribe();
        let mut destination_rx = self.destination.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = origin_rx.changed() => if changed.is_err() { break },
                    changed = destination_rx.changed() => if changed.is_err() { break },
                }
                let origin = origin_rx.borrow_and_update().clone();
                let destination = destination_rx.borrow_and_update().clone();

                let published = shared.publish(|shared| {
                    for state in [&origin, &destination] {
                        if state.phase != PollPhase::Ready {
                            continue;
                        }
                        if let Some(sample) = state.usable_sample() {
                            shared.tracker.ingest(state.chain, [sample.to_history_point()]);
                        }
                    }
                    shared
                        .comparison
                        .send_replace(ComparisonView::compare(&origin, &destination));
                });
                if !published {
                    break;
                }
            }
            debug!("Poller feed exited");
        })
    }

    fn spawn_event_feed(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let mut rx = self.events.subscribe();

        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let points: Vec<_> = rx
                    .borrow_and_update()
                    .events
                    .iter()
                    .map(|e| e.to_history_point())
                    .collect();
                if !shared.publish(|shared| {
                    shared.tracker.ingest(ChainRole::Destination, points);
                }) {
                    break;
                }
            }
            debug!("Event feed exited");
        })
    }

    fn spawn_history_loop(&self, chain: ChainRole, source: Arc<dyn HistorySource>) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let period = self.config.series.refresh_interval().max(Duration::from_millis(1));
        let limit = self.config.series.max_points;
        let attempts = self.config.series.history_attempts;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                match fetch_with_retry(source.as_ref(), limit, attempts).await {
                    Ok(points) => {
                        let count = points.len();
                        let published = shared.publish(|shared| {
                            if shared.tracker.ingest(chain, points) {
                                debug!("{} history refresh: {} points", chain, count);
                            }
                        });
                        if !published {
                            break;
                        }
                    }
                    Err(e) => warn!("{} history refresh failed, keeping previous points: {}", chain, e),
                }
            }
        })
    }

    fn spawn_network_loop(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let probe = Arc::clone(&self.probe);
        let period = self.config.network.interval().max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                let statuses = probe.probe_all().await;
                if !shared.publish(|shared| {
                    shared.network.send_replace(statuses);
                }) {
                    break;
                }
            }
        })
    }
}

impl Drop for MirrorMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn parse_address(chain: ChainRole, value: &str) -> Result<Address, SetupError> {
    Address::from_str(value.trim()).map_err(|_| SetupError::Address {
        chain,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use mirror_core::{
        HistoryPoint, PriceSample, PriceUpdateEvent, ReadError, ReadResult, SubscriptionResult, Trend,
    };
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    use crate::events::EventStream;

    struct FixedReader {
        origin: PriceSample,
        destination: PriceSample,
    }

    #[async_trait::async_trait]
    impl ChainReader for FixedReader {
        async fn read(&self, chain: ChainRole) -> ReadResult<PriceSample> {
            Ok(match chain {
                ChainRole::Origin => self.origin,
                ChainRole::Destination => self.destination,
            })
        }

        async fn check_health(&self, _chain: ChainRole) -> bool {
            true
        }

        async fn latest_block_number(&self, chain: ChainRole) -> Option<u64> {
            Some(match chain {
                ChainRole::Origin => 100,
                ChainRole::Destination => 200,
            })
        }
    }

    struct ChannelSource {
        past: Vec<PriceUpdateEvent>,
        live: Mutex<Option<mpsc::Receiver<PriceUpdateEvent>>>,
    }

    #[async_trait::async_trait]
    impl EventSource for ChannelSource {
        async fn latest_block(&self) -> ReadResult<u64> {
            Ok(5_000)
        }

        async fn past_events(&self, _from: u64, _to: u64) -> ReadResult<Vec<PriceUpdateEvent>> {
            Ok(self.past.clone())
        }

        async fn subscribe(&self) -> SubscriptionResult<EventStream> {
            let rx = self.live.lock().take().ok_or(mirror_core::SubscriptionError::Closed)?;
            Ok(ReceiverStream::new(rx).boxed())
        }
    }

    struct FixedHistory(ReadResult<Vec<HistoryPoint>>);

    #[async_trait::async_trait]
    impl HistorySource for FixedHistory {
        async fn fetch(&self, _limit: usize) -> ReadResult<Vec<HistoryPoint>> {
            self.0.clone()
        }
    }

    fn sample(price: i128, updated_at: u64) -> PriceSample {
        PriceSample {
            price,
            round_id: updated_at as u128,
            started_at: updated_at,
            updated_at,
            answered_in_round: updated_at as u128,
        }
    }

    fn event(round_id: u128, price: i128, updated_at: u64) -> PriceUpdateEvent {
        PriceUpdateEvent {
            old_price: 0,
            new_price: price,
            round_id,
            updated_at,
            block_number: round_id as u64,
            transaction_hash: Some(format!("0x{:064x}", round_id)),
        }
    }

    fn monitor(
        live: mpsc::Receiver<PriceUpdateEvent>,
        origin_history: Option<Arc<dyn HistorySource>>,
    ) -> MirrorMonitor {
        MirrorMonitor::new(
            MonitorConfig::default(),
            MonitorParts {
                reader: Arc::new(FixedReader {
                    origin: sample(200_000_000_000, 1_000),
                    destination: sample(201_000_000_000, 1_020),
                }),
                event_source: Arc::new(ChannelSource {
                    past: vec![event(1, 199_000_000_000, 900)],
                    live: Mutex::new(Some(live)),
                }),
                origin_history,
                destination_history: None,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_comparison() {
        let (_tx, rx) = mpsc::channel(8);
        let monitor = monitor(rx, None);
        let mut comparison = monitor.subscribe_comparison();
        monitor.start();

        let view = comparison.wait_for(|v| v.is_complete()).await.unwrap().clone();
        let delta = view.delta.unwrap();
        assert!((delta.absolute_usd - 10.0).abs() < 1e-9);
        assert!((delta.percentage - 0.5).abs() < 1e-9);
        assert_eq!(delta.trend, Trend::Up);
        assert_eq!(view.latency_seconds, Some(20));
        assert!(monitor.comparison().is_complete());

        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_series_merges_all_inputs() {
        let (tx, rx) = mpsc::channel(8);
        let history: Arc<dyn HistorySource> = Arc::new(FixedHistory(Ok(vec![HistoryPoint {
            timestamp: 900,
            price: 198_000_000_000,
            round_id: 9,
        }])));
        let monitor = monitor(rx, Some(history));
        let mut series = monitor.subscribe_series();
        monitor.start();

        // origin history 900, backfilled event 900, poll samples 1000 and 1020
        let points = series
            .wait_for(|s| s.len() == 3 && s[0].origin_price.is_some() && s[0].dest_price.is_some())
            .await
            .unwrap()
            .clone();
        assert_eq!(points[0].timestamp_seconds, 900);
        assert_eq!(points[0].origin_price, Some(1980.0));
        assert_eq!(points[0].dest_price, Some(1990.0));
        assert_eq!(points[1].dest_price, None);

        tx.send(event(2, 202_000_000_000, 1_100)).await.unwrap();
        let points = series.wait_for(|s| s.len() == 4).await.unwrap().clone();
        assert_eq!(points[3].timestamp_seconds, 1_100);
        assert_eq!(points[3].dest_price, Some(2020.0));
        assert_eq!(monitor.events().events.len(), 2);

        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_status_published() {
        let (_tx, rx) = mpsc::channel(8);
        let monitor = monitor(rx, None);
        let mut network = monitor.subscribe_network();
        monitor.start();

        let statuses = network.wait_for(|s| !s.is_empty()).await.unwrap().clone();
        assert_eq!(statuses[0].latest_block, Some(100));
        assert_eq!(statuses[1].latest_block, Some(200));
        assert!(statuses.iter().all(|s| s.healthy));

        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_history_keeps_series() {
        let (_tx, rx) = mpsc::channel(8);
        let history: Arc<dyn HistorySource> =
            Arc::new(FixedHistory(Err(ReadError::Connectivity("down".to_string()))));
        let monitor = monitor(rx, Some(history));
        let mut series = monitor.subscribe_series();
        monitor.start();

        let points = series.wait_for(|s| s.len() == 3).await.unwrap().clone();
        assert!(points.iter().all(|p| p.origin_price.is_none() || p.timestamp_seconds == 1_000));

        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_freezes_state() {
        let (tx, rx) = mpsc::channel(8);
        let monitor = monitor(rx, None);
        let mut comparison = monitor.subscribe_comparison();
        monitor.start();
        comparison.wait_for(|v| v.is_complete()).await.unwrap();

        monitor.stop();
        let series = monitor.series();
        let events = monitor.events();

        let _ = tx.send(event(7, 1, 5_000)).await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(monitor.series(), series);
        assert_eq!(monitor.events(), events);
        assert!(!monitor.events().is_listening);
        assert!(matches!(monitor.refresh(ChainRole::Origin).await, RefreshOutcome::Cancelled));
    }

    #[test]
    fn test_connect_rejects_bad_address() {
        let mut config = MonitorConfig::default();
        config.destination.contract_address = "not-an-address".to_string();
        assert!(matches!(
            MirrorMonitor::connect(config),
            Err(SetupError::Address { chain: ChainRole::Destination, .. })
        ));
    }

    #[test]
    fn test_connect_requires_destination_contract() {
        assert!(matches!(
            MirrorMonitor::connect(MonitorConfig::default()),
            Err(SetupError::Config(_))
        ));
    }
}
