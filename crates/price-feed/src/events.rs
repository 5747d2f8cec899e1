//! `PriceUpdated` event history
//!
//! Backfill a bounded window of past events, then apply live events on top.
//! The log is most-recent-first, deduplicated by transaction hash and capped.
//! Observers only ever see snapshots.

use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use mirror_core::{
    EventKey, PriceUpdateEvent, ReadResult, SubscriberConfig, SubscriptionError, SubscriptionResult,
};

use crate::abi;
use crate::transport::{ChainTransport, LogFilter};

pub type EventStream = BoxStream<'static, PriceUpdateEvent>;

/// Bounded, deduplicated, most-recent-first event log
#[derive(Debug, Clone)]
pub struct EventLog {
    events: VecDeque<PriceUpdateEvent>,
    cap: usize,
}

impl EventLog {
    pub fn new(cap: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn contains(&self, key: &EventKey) -> bool {
        self.events.iter().any(|e| &e.key() == key)
    }

    /// Prepend a live event. Returns `false` for a duplicate.
    pub fn insert_live(&mut self, event: PriceUpdateEvent) -> bool {
        if self.contains(&event.key()) {
            return false;
        }
        self.events.push_front(event);
        self.events.truncate(self.cap);
        true
    }

    /// Merge backfilled events given oldest-first. Keeps the `limit` most
    /// recent, appended after anything already in the log.
    pub fn backfill(&mut self, oldest_first: Vec<PriceUpdateEvent>, limit: usize) -> usize {
        let skip = oldest_first.len().saturating_sub(limit);
        let mut added = 0;

        for event in oldest_first.into_iter().skip(skip).rev() {
            if self.events.len() >= self.cap {
                break;
            }
            if self.contains(&event.key()) {
                continue;
            }
            self.events.push_back(event);
            added += 1;
        }
        added
    }

    /// Merge events fetched after a reconnect, given oldest-first. Only
    /// events past the current head are prepended; an empty log falls back
    /// to a plain backfill.
    pub fn catch_up(&mut self, oldest_first: Vec<PriceUpdateEvent>, limit: usize) -> usize {
        let Some(head) = self.events.front().map(|e| (e.block_number, e.round_id)) else {
            return self.backfill(oldest_first, limit);
        };

        oldest_first
            .into_iter()
            .filter(|e| (e.block_number, e.round_id) > head)
            .filter(|e| self.insert_live(e.clone()))
            .count()
    }

    pub fn snapshot(&self) -> Vec<PriceUpdateEvent> {
        self.events.iter().cloned().collect()
    }
}

/// Where events come from
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    async fn latest_block(&self) -> ReadResult<u64>;

    /// Events in `from_block..=to_block`, oldest first
    async fn past_events(&self, from_block: u64, to_block: u64) -> ReadResult<Vec<PriceUpdateEvent>>;

    async fn subscribe(&self) -> SubscriptionResult<EventStream>;
}

/// Decodes `PriceUpdated` logs of one contract
pub struct ContractEventSource {
    transport: Arc<dyn ChainTransport>,
    filter: LogFilter,
}

impl ContractEventSource {
    pub fn new(transport: Arc<dyn ChainTransport>, address: alloy_primitives::Address) -> Self {
        Self {
            transport,
            filter: LogFilter {
                address,
                topic0: abi::price_updated_topic(),
            },
        }
    }
}

#[async_trait::async_trait]
impl EventSource for ContractEventSource {
    async fn latest_block(&self) -> ReadResult<u64> {
        Ok(self.transport.block_number().await?)
    }

    async fn past_events(&self, from_block: u64, to_block: u64) -> ReadResult<Vec<PriceUpdateEvent>> {
        let logs = self
            .transport
            .query_logs(&self.filter, from_block, Some(to_block))
            .await?;

        Ok(logs
            .iter()
            .filter_map(|log| match abi::decode_price_updated(log) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!("Skipping undecodable PriceUpdated log: {}", e);
                    None
                }
            })
            .collect())
    }

    async fn subscribe(&self) -> SubscriptionResult<EventStream> {
        let subscription = self.transport.subscribe_logs(&self.filter).await?;

        Ok(subscription
            .filter_map(|log| async move {
                match abi::decode_price_updated(&log) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        warn!("Skipping undecodable live PriceUpdated log: {}", e);
                        None
                    }
                }
            })
            .boxed())
    }
}

/// What observers see
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFeedSnapshot {
    pub events: Vec<PriceUpdateEvent>,
    pub is_listening: bool,
}

struct SubscriberInner {
    source: Arc<dyn EventSource>,
    config: SubscriberConfig,
    log: Mutex<EventLog>,
    snapshot: watch::Sender<EventFeedSnapshot>,
    shutdown: watch::Sender<bool>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl SubscriberInner {
    /// Mutate the log and republish, unless stopped. Ordered against `stop()`.
    fn update(&self, listening: Option<bool>, mutate: impl FnOnce(&mut EventLog) -> bool) -> bool {
        let stopped = &self.stopped;
        let log = &self.log;

        self.snapshot.send_if_modified(|snapshot| {
            if stopped.load(Ordering::Acquire) {
                return false;
            }
            let mut log = log.lock();
            let mut changed = mutate(&mut log);
            if changed {
                snapshot.events = log.snapshot();
            }
            if let Some(listening) = listening {
                if snapshot.is_listening != listening {
                    snapshot.is_listening = listening;
                    changed = true;
                }
            }
            changed
        })
    }

    async fn cancelled(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    async fn backfill(&self) -> Vec<PriceUpdateEvent> {
        let window = self.config.backfill_blocks;
        let result = async {
            let latest = self.source.latest_block().await?;
            self.source
                .past_events(latest.saturating_sub(window), latest)
                .await
        }
        .await;

        match result {
            Ok(events) => events,
            Err(e) => {
                warn!("Event backfill failed, starting with an empty log: {}", e);
                vec![]
            }
        }
    }

    /// Pump one stream until it ends. `false` once stopped.
    async fn pump(&self, stream: &mut EventStream) -> bool {
        loop {
            let next = tokio::select! {
                next = stream.next() => next,
                _ = self.cancelled() => return false,
            };
            let Some(event) = next else { return true };

            let round = event.round_id;
            if self.update(None, |log| log.insert_live(event)) {
                debug!("Live PriceUpdated round {}", round);
            } else {
                debug!("Ignoring duplicate PriceUpdated round {}", round);
            }
        }
    }

    /// Re-attach with backoff. `None` once stopped, `Closed` when the
    /// reconnect budget is spent.
    async fn resubscribe(&self) -> Option<SubscriptionResult<EventStream>> {
        let policy = self.config.reconnect;
        let mut attempt = 0;

        while policy.allows_another(attempt) {
            let delay = policy.next_delay(attempt);
            attempt += 1;
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancelled() => return None,
            }

            let result = tokio::select! {
                result = self.source.subscribe() => result,
                _ = self.cancelled() => return None,
            };
            match result {
                Ok(stream) => return Some(Ok(stream)),
                Err(e) => warn!("PriceUpdated resubscribe attempt {} failed: {}", attempt, e),
            }
        }
        Some(Err(SubscriptionError::Closed))
    }

    async fn run_live(&self, mut stream: EventStream) {
        loop {
            if !self.pump(&mut stream).await {
                return;
            }
            if self.update(Some(false), |_| false) {
                warn!("Live PriceUpdated stream ended, reconnecting");
            }

            stream = match self.resubscribe().await {
                Some(Ok(stream)) => stream,
                Some(Err(e)) => {
                    error!("Giving up on live PriceUpdated events: {}", e);
                    return;
                }
                None => return,
            };

            // Events emitted while detached
            let missed = self.backfill().await;
            let limit = self.config.backfill_limit;
            let mut added = 0;
            self.update(Some(true), |log| {
                added = log.catch_up(missed, limit);
                added > 0
            });
            info!("Re-attached live PriceUpdated stream, caught up {} events", added);
        }
    }
}

/// Backfill-then-live event feed
pub struct EventSubscriber {
    inner: Arc<SubscriberInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventSubscriber {
    pub fn new(source: Arc<dyn EventSource>, config: SubscriberConfig) -> Self {
        let (snapshot, _) = watch::channel(EventFeedSnapshot::default());
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(SubscriberInner {
                source,
                log: Mutex::new(EventLog::new(config.live_cap)),
                config,
                snapshot,
                shutdown,
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        }
    }

    /// Attach the live feed, backfill, then hand the stream to a task.
    ///
    /// The live stream is attached first so events landing during backfill
    /// are buffered rather than missed; dedup absorbs the overlap.
    pub async fn start(&self) {
        if self.inner.stopped.load(Ordering::Acquire) || self.inner.started.swap(true, Ordering::AcqRel) {
            warn!("Event subscriber already started or stopped");
            return;
        }

        let stream = match self.inner.source.subscribe().await {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!("Live PriceUpdated subscription failed: {}", e);
                None
            }
        };
        let listening = stream.is_some();

        let past = self.inner.backfill().await;
        let limit = self.inner.config.backfill_limit;
        let mut added = 0;
        self.inner.update(Some(listening), |log| {
            added = log.backfill(past, limit);
            added > 0
        });
        info!("Backfilled {} PriceUpdated events, listening: {}", added, listening);

        if let Some(stream) = stream {
            let inner = Arc::clone(&self.inner);
            let handle = tokio::spawn(async move { inner.run_live(stream).await });

            let mut task = self.task.lock();
            if self.inner.stopped.load(Ordering::Acquire) {
                handle.abort();
            } else {
                *task = Some(handle);
            }
        }
    }

    pub fn snapshot(&self) -> EventFeedSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EventFeedSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn is_listening(&self) -> bool {
        self.inner.snapshot.borrow().is_listening
    }

    /// Unsubscribe. Nothing is delivered after this returns.
    pub fn stop(&self) {
        let stopped = &self.inner.stopped;
        self.inner.snapshot.send_if_modified(|snapshot| {
            stopped.store(true, Ordering::Release);
            std::mem::replace(&mut snapshot.is_listening, false)
        });
        self.inner.shutdown.send_replace(true);

        if let Some(task) = self.task.lock().take() {
            task.abort();
            info!("Event subscriber stopped");
        }
    }
}

impl Drop for EventSubscriber {
    fn drop(&mut self) {
        self.stop();
    }
}
