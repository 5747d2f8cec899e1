//! Per-chain price polling
//!
//! Each poller owns one [`ChainQueryState`] and is the only thing that ever
//! writes it. Phases go `Idle -> Loading -> {Ready, Errored} -> Loading ...`,
//! driven by a fixed interval and by manual [`PricePoller::refresh`] calls.
//!
//! - At most one refresh cycle is in flight per chain; a second caller is
//!   told [`RefreshOutcome::Skipped`].
//! - The previous sample stays visible while a cycle is loading.
//! - Once [`PricePoller::stop`] returns, the state never changes again, even
//!   if a read is still outstanding.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use mirror_core::{ChainQueryState, ChainRole, ErrorInfo, PollPhase, PollerConfig, PriceSample, ReadError};

use crate::reader::ChainReader;

/// Result of one refresh request
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Ready(PriceSample),
    /// Terminal error after the retry budget was spent
    Failed(ReadError),
    /// Another refresh for this chain was already in flight
    Skipped,
    /// The poller was stopped; nothing was published
    Cancelled,
}

struct PollerInner {
    chain: ChainRole,
    reader: Arc<dyn ChainReader>,
    config: PollerConfig,
    state: watch::Sender<ChainQueryState>,
    shutdown: watch::Sender<bool>,
    stopped: AtomicBool,
    in_flight: AtomicBool,
}

// Clears the in-flight flag even if the refresh future is dropped
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PollerInner {
    /// Apply `update` unless stopped. Runs under the watch lock, so it is
    /// ordered against `stop()`.
    fn publish(&self, update: impl FnOnce(&mut ChainQueryState)) -> bool {
        let stopped = &self.stopped;
        self.state.send_if_modified(|state| {
            if stopped.load(Ordering::Acquire) {
                return false;
            }
            update(state);
            true
        })
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    async fn cancelled(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    async fn refresh(&self) -> RefreshOutcome {
        if self.is_stopped() {
            return RefreshOutcome::Cancelled;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("{} refresh already in flight, skipping", self.chain);
            return RefreshOutcome::Skipped;
        }
        let _guard = InFlight(&self.in_flight);

        self.run_cycle().await
    }

    async fn run_cycle(&self) -> RefreshOutcome {
        let entered = self.publish(|state| {
            state.phase = PollPhase::Loading;
            state.is_loading = true;
            state.last_attempt_at = Some(Utc::now());
        });
        if !entered {
            return RefreshOutcome::Cancelled;
        }

        let retry = self.config.retry;
        let mut attempts = 0u32;

        loop {
            let result = tokio::select! {
                result = self.reader.read(self.chain) => result,
                _ = self.cancelled() => return RefreshOutcome::Cancelled,
            };
            attempts += 1;

            match result {
                Ok(sample) => {
                    let published = self.publish(|state| {
                        state.phase = PollPhase::Ready;
                        state.is_loading = false;
                        state.last_sample = Some(sample);
                        state.last_error = None;
                        state.last_success_at = Some(Utc::now());
                    });
                    if !published {
                        return RefreshOutcome::Cancelled;
                    }
                    debug!(
                        "{} ready: round {} after {} attempt(s)",
                        self.chain, sample.round_id, attempts
                    );
                    return RefreshOutcome::Ready(sample);
                }
                Err(err) if err.is_retryable() && retry.allows_another(attempts) => {
                    let delay = retry.next_delay(attempts - 1);
                    warn!(
                        "{} read failed (attempt {}/{}): {}; retrying in {:?}",
                        self.chain, attempts, retry.max_attempts, err, delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancelled() => return RefreshOutcome::Cancelled,
                    }
                }
                Err(err) => {
                    let info = ErrorInfo::from_read_error(&err, attempts);
                    let published = self.publish(|state| {
                        state.phase = PollPhase::Errored;
                        state.is_loading = false;
                        state.last_error = Some(info);
                    });
                    if !published {
                        return RefreshOutcome::Cancelled;
                    }
                    error!("{} refresh failed after {} attempt(s): {}", self.chain, attempts, err);
                    return RefreshOutcome::Failed(err);
                }
            }
        }
    }
}

/// Periodic price refresh for one chain
pub struct PricePoller {
    inner: Arc<PollerInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PricePoller {
    pub fn new(chain: ChainRole, reader: Arc<dyn ChainReader>, config: PollerConfig) -> Self {
        let (state, _) = watch::channel(ChainQueryState::idle(chain));
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(PollerInner {
                chain,
                reader,
                config,
                state,
                shutdown,
                stopped: AtomicBool::new(false),
                in_flight: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn chain(&self) -> ChainRole {
        self.inner.chain
    }

    /// Start the interval loop. The first tick fires immediately.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() || self.inner.is_stopped() {
            warn!("{} poller already started or stopped", self.inner.chain);
            return;
        }

        let inner = Arc::clone(&self.inner);
        let period = inner.config.interval().max(Duration::from_millis(1));
        info!("Starting {} poller every {:?}", inner.chain, period);

        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        inner.refresh().await;
                    }
                    _ = inner.cancelled() => break,
                }
            }
            debug!("{} poller loop exited", inner.chain);
        }));
    }

    /// Run one refresh cycle now, unless one is already in flight
    pub async fn refresh(&self) -> RefreshOutcome {
        self.inner.refresh().await
    }

    pub fn snapshot(&self) -> ChainQueryState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChainQueryState> {
        self.inner.state.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    /// Stop polling. No state mutation happens after this returns.
    pub fn stop(&self) {
        let stopped = &self.inner.stopped;
        self.inner.state.send_if_modified(|_| {
            stopped.store(true, Ordering::Release);
            false
        });
        self.inner.shutdown.send_replace(true);

        if let Some(task) = self.task.lock().take() {
            task.abort();
            info!("Stopped {} poller", self.inner.chain);
        }
    }
}

impl Drop for PricePoller {
    fn drop(&mut self) {
        self.stop();
    }
}
