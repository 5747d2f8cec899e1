//! Chain transport boundary
//!
//! Everything above this trait is transport-agnostic. The JSON-RPC
//! implementation lives in [`crate::rpc`]; tests plug in mocks.

use alloy_primitives::{Address, Bytes, B256};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use mirror_core::TransportResult;

/// Logs from one contract with one event signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topic0: B256,
}

/// Undecoded log as returned by the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<B256>,
    pub log_index: Option<u64>,
}

/// Live log stream. Dropping it unsubscribes.
#[derive(Debug)]
pub struct LogSubscription {
    rx: mpsc::Receiver<RawLog>,
    pump: Option<JoinHandle<()>>,
}

impl LogSubscription {
    /// Wrap a channel fed by a background task that is aborted on drop
    pub fn new(rx: mpsc::Receiver<RawLog>, pump: JoinHandle<()>) -> Self {
        Self { rx, pump: Some(pump) }
    }

    pub fn from_receiver(rx: mpsc::Receiver<RawLog>) -> Self {
        Self { rx, pump: None }
    }
}

impl Stream for LogSubscription {
    type Item = RawLog;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<RawLog>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

#[async_trait::async_trait]
pub trait ChainTransport: Send + Sync {
    /// Label used in logs
    fn name(&self) -> &str;

    /// Read-only contract call against the latest block
    async fn call(&self, to: Address, calldata: Bytes) -> TransportResult<Bytes>;

    async fn block_number(&self) -> TransportResult<u64>;

    /// Logs in `from_block..=to_block`, ascending. `None` means latest.
    async fn query_logs(
        &self,
        filter: &LogFilter,
        from_block: u64,
        to_block: Option<u64>,
    ) -> TransportResult<Vec<RawLog>>;

    /// Resolves once the subscription is attached
    async fn subscribe_logs(&self, filter: &LogFilter) -> TransportResult<LogSubscription>;
}
