//! Latest-round reads and liveness probes

use alloy_primitives::Address;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use mirror_core::{ChainRole, PriceSample, ReadResult};

use crate::abi;
use crate::transport::ChainTransport;

/// Fixed timeout for health and block-number probes
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Reads the latest price of either chain. Never retries.
#[async_trait::async_trait]
pub trait ChainReader: Send + Sync {
    async fn read(&self, chain: ChainRole) -> ReadResult<PriceSample>;

    /// `false` on any failure or timeout
    async fn check_health(&self, chain: ChainRole) -> bool;

    /// `None` on any failure or timeout
    async fn latest_block_number(&self, chain: ChainRole) -> Option<u64>;
}

/// A contract on a specific chain
#[derive(Clone)]
pub struct ChainBinding {
    pub transport: Arc<dyn ChainTransport>,
    pub contract: Address,
}

/// `latestRoundData` over a [`ChainTransport`] per chain
pub struct ContractChainReader {
    origin: ChainBinding,
    destination: ChainBinding,
    probe_timeout: Duration,
}

impl ContractChainReader {
    pub fn new(origin: ChainBinding, destination: ChainBinding) -> Self {
        Self {
            origin,
            destination,
            probe_timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    fn binding(&self, chain: ChainRole) -> &ChainBinding {
        match chain {
            ChainRole::Origin => &self.origin,
            ChainRole::Destination => &self.destination,
        }
    }
}

#[async_trait::async_trait]
impl ChainReader for ContractChainReader {
    async fn read(&self, chain: ChainRole) -> ReadResult<PriceSample> {
        let binding = self.binding(chain);
        let data = binding
            .transport
            .call(binding.contract, abi::encode_latest_round_data())
            .await?;
        let sample = abi::decode_latest_round_data(&data)?;
        debug!(
            "Read {} round {} price {} updated_at {}",
            chain, sample.round_id, sample.price, sample.updated_at
        );
        Ok(sample)
    }

    async fn check_health(&self, chain: ChainRole) -> bool {
        self.latest_block_number(chain).await.is_some()
    }

    async fn latest_block_number(&self, chain: ChainRole) -> Option<u64> {
        let transport = &self.binding(chain).transport;
        match tokio::time::timeout(self.probe_timeout, transport.block_number()).await {
            Ok(Ok(block)) => Some(block),
            Ok(Err(e)) => {
                debug!("{} block number probe failed: {}", chain, e);
                None
            }
            Err(_) => {
                debug!("{} block number probe timed out", chain);
                None
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::StaticTransport;
    use super::*;
    use crate::abi::test_support::round_data;
    use alloy_primitives::Bytes;
    use mirror_core::{ReadError, TransportError};

    fn reader(origin: StaticTransport, destination: StaticTransport) -> ContractChainReader {
        ContractChainReader::new(
            ChainBinding {
                transport: Arc::new(origin),
                contract: Address::repeat_byte(1),
            },
            ChainBinding {
                transport: Arc::new(destination),
                contract: Address::repeat_byte(2),
            },
        )
    }

    #[tokio::test]
    async fn test_read_routes_per_chain() {
        let origin = StaticTransport::new();
        *origin.call_result.lock() = Ok(Bytes::from(round_data(1, 200_000_000_000, 1, 1_000)));
        let destination = StaticTransport::new();
        *destination.call_result.lock() = Ok(Bytes::from(round_data(2, 201_000_000_000, 1, 1_020)));

        let reader = reader(origin, destination);
        assert_eq!(reader.read(ChainRole::Origin).await.unwrap().price, 200_000_000_000);
        assert_eq!(reader.read(ChainRole::Destination).await.unwrap().updated_at, 1_020);
    }

    #[tokio::test]
    async fn test_read_error_taxonomy() {
        let origin = StaticTransport::new();
        *origin.call_result.lock() = Err(TransportError::Timeout);
        let destination = StaticTransport::new();
        *destination.call_result.lock() = Err(TransportError::Rpc {
            code: 3,
            message: "execution reverted".to_string(),
        });

        let reader = reader(origin, destination);
        assert!(matches!(
            reader.read(ChainRole::Origin).await,
            Err(ReadError::Connectivity(_))
        ));
        assert!(matches!(
            reader.read(ChainRole::Destination).await,
            Err(ReadError::Contract(_))
        ));
    }

    #[tokio::test]
    async fn test_probes_swallow_failures() {
        let origin = StaticTransport::new();
        *origin.block.lock() = Ok(1234);
        let destination = StaticTransport::new();
        *destination.block.lock() = Err(TransportError::Connection("refused".to_string()));

        let reader = reader(origin, destination);
        assert!(reader.check_health(ChainRole::Origin).await);
        assert_eq!(reader.latest_block_number(ChainRole::Origin).await, Some(1234));
        assert!(!reader.check_health(ChainRole::Destination).await);
        assert_eq!(reader.latest_block_number(ChainRole::Destination).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_times_out() {
        let mut origin = StaticTransport::new();
        origin.block_delay = Duration::from_secs(10);
        *origin.block.lock() = Ok(1);

        let reader = reader(origin, StaticTransport::new());
        assert_eq!(reader.latest_block_number(ChainRole::Origin).await, None);
        assert!(!reader.check_health(ChainRole::Origin).await);
    }
}
