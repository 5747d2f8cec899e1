//! Cross-chain price synchronization engine
//!
//! Features:
//! - Per-chain price polling with backoff and stale-while-revalidate state
//! - Live `PriceUpdated` subscription with backfill, dedup and bounded retention
//! - Reconciled origin/destination series for charting
//! - JSON-RPC transport over HTTP and WebSocket
//! - Teardown that never mutates state after `stop()`

pub mod abi;
pub mod comparison;
pub mod events;
pub mod history;
pub mod monitor;
pub mod network;
pub mod poller;
pub mod reader;
pub mod rpc;
pub mod series;
pub mod transport;

pub use comparison::ComparisonView;
pub use events::{ContractEventSource, EventFeedSnapshot, EventLog, EventSource, EventStream, EventSubscriber};
pub use history::{HistoryEvent, HistorySource, LogHistorySource};
pub use monitor::{MirrorMonitor, MonitorParts, SetupError};
pub use network::NetworkProbe;
pub use poller::{PricePoller, RefreshOutcome};
pub use reader::{ChainBinding, ChainReader, ContractChainReader};
pub use rpc::JsonRpcTransport;
pub use series::SeriesTracker;
pub use transport::{ChainTransport, LogFilter, LogSubscription, RawLog};
