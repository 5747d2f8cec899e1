//! Historical price points for the chart series

use alloy_primitives::Address;
use std::sync::Arc;
use tracing::{debug, warn};

use mirror_core::{ChainRole, HistoryPoint, ReadResult, RetryPolicy};

use crate::abi;
use crate::transport::{ChainTransport, LogFilter, RawLog};

#[async_trait::async_trait]
pub trait HistorySource: Send + Sync {
    /// Up to `limit` most recent points, oldest first
    async fn fetch(&self, limit: usize) -> ReadResult<Vec<HistoryPoint>>;
}

/// Which event carries the price
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryEvent {
    /// Destination store: `newPrice` at `updatedAt`
    PriceUpdated,
    /// Origin aggregator: `current` at `updatedAt`
    AnswerUpdated,
}

impl HistoryEvent {
    fn topic(&self) -> alloy_primitives::B256 {
        match self {
            HistoryEvent::PriceUpdated => abi::price_updated_topic(),
            HistoryEvent::AnswerUpdated => abi::answer_updated_topic(),
        }
    }

    fn decode(&self, log: &RawLog) -> ReadResult<HistoryPoint> {
        match self {
            HistoryEvent::PriceUpdated => abi::decode_price_updated(log).map(|e| e.to_history_point()),
            HistoryEvent::AnswerUpdated => abi::decode_answer_updated(log),
        }
    }
}

/// History from contract logs
pub struct LogHistorySource {
    chain: ChainRole,
    transport: Arc<dyn ChainTransport>,
    filter: LogFilter,
    kind: HistoryEvent,
    /// Blocks back from head; `None` scans from genesis
    window: Option<u64>,
}

impl LogHistorySource {
    pub fn new(
        chain: ChainRole,
        transport: Arc<dyn ChainTransport>,
        address: Address,
        kind: HistoryEvent,
        window: Option<u64>,
    ) -> Self {
        Self {
            chain,
            transport,
            filter: LogFilter {
                address,
                topic0: kind.topic(),
            },
            kind,
            window,
        }
    }
}

#[async_trait::async_trait]
impl HistorySource for LogHistorySource {
    async fn fetch(&self, limit: usize) -> ReadResult<Vec<HistoryPoint>> {
        let from_block = match self.window {
            Some(window) => self.transport.block_number().await?.saturating_sub(window),
            None => 0,
        };
        let logs = self.transport.query_logs(&self.filter, from_block, None).await?;

        let mut points: Vec<HistoryPoint> = logs
            .iter()
            .filter_map(|log| match self.kind.decode(log) {
                Ok(point) => Some(point),
                Err(e) => {
                    warn!("Skipping undecodable {} history log: {}", self.chain, e);
                    None
                }
            })
            .collect();

        let skip = points.len().saturating_sub(limit);
        points.drain(..skip);
        debug!("Fetched {} {} history points from block {}", points.len(), self.chain, from_block);
        Ok(points)
    }
}

/// Fetch with a small retry budget; the error is the last one seen
pub async fn fetch_with_retry(
    source: &dyn HistorySource,
    limit: usize,
    attempts: u32,
) -> ReadResult<Vec<HistoryPoint>> {
    let policy = RetryPolicy::with_attempts(attempts);
    let mut made = 0;

    loop {
        made += 1;
        match source.fetch(limit).await {
            Ok(points) => return Ok(points),
            Err(e) if e.is_retryable() && policy.allows_another(made) => {
                let delay = policy.next_delay(made - 1);
                debug!("History fetch failed ({}), retrying in {:?}", e, delay);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::test_support::{answer_updated_log, price_updated_log};
    use crate::reader::test_support::StaticTransport;
    use mirror_core::{ReadError, TransportError};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[tokio::test]
    async fn test_destination_history_keeps_tail() {
        let transport = StaticTransport::new();
        *transport.logs.lock() = Ok((1..=5)
            .map(|i| price_updated_log(i, 0, i * 100, i * 10, i as u64, Some(i as u8)))
            .collect());
        let transport = Arc::new(transport);
        let source = LogHistorySource::new(
            ChainRole::Destination,
            transport.clone(),
            Address::repeat_byte(0x11),
            HistoryEvent::PriceUpdated,
            None,
        );

        let points = source.fetch(3).await.unwrap();
        let ts: Vec<u64> = points.iter().map(|p| p.timestamp).collect();
        assert_eq!(ts, vec![30, 40, 50]);
        assert_eq!(points[2].price, 500);
        assert_eq!(*transport.log_queries.lock(), vec![(0, None)]);
    }

    #[tokio::test]
    async fn test_origin_history_with_window() {
        let transport = StaticTransport::new();
        *transport.block.lock() = Ok(10_000);
        *transport.logs.lock() = Ok(vec![answer_updated_log(2_000, 1, 100)]);
        let transport = Arc::new(transport);
        let source = LogHistorySource::new(
            ChainRole::Origin,
            transport.clone(),
            Address::repeat_byte(0x22),
            HistoryEvent::AnswerUpdated,
            Some(4_000),
        );

        let points = source.fetch(200).await.unwrap();
        assert_eq!(points, vec![HistoryPoint { timestamp: 100, price: 2_000, round_id: 1 }]);
        assert_eq!(*transport.log_queries.lock(), vec![(6_000, None)]);
    }

    #[tokio::test]
    async fn test_history_transport_error() {
        let transport = StaticTransport::new();
        *transport.logs.lock() = Err(TransportError::Timeout);
        let source = LogHistorySource::new(
            ChainRole::Destination,
            Arc::new(transport),
            Address::ZERO,
            HistoryEvent::PriceUpdated,
            None,
        );
        assert!(matches!(source.fetch(10).await, Err(ReadError::Connectivity(_))));
    }

    struct Flaky {
        script: Mutex<VecDeque<ReadResult<Vec<HistoryPoint>>>>,
        calls: Mutex<u32>,
    }

    #[async_trait::async_trait]
    impl HistorySource for Flaky {
        async fn fetch(&self, _limit: usize) -> ReadResult<Vec<HistoryPoint>> {
            *self.calls.lock() += 1;
            self.script.lock().pop_front().unwrap_or(Ok(vec![]))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_with_retry_budget() {
        let down = || Err(ReadError::Connectivity("down".to_string()));
        let flaky = Flaky {
            script: Mutex::new(VecDeque::from(vec![down(), down(), Ok(vec![])])),
            calls: Mutex::new(0),
        };

        assert!(fetch_with_retry(&flaky, 10, 2).await.is_err());
        assert_eq!(*flaky.calls.lock(), 2);
        assert!(fetch_with_retry(&flaky, 10, 2).await.is_ok());
    }
}
