//! RPC liveness probe for both chains

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use mirror_core::{ChainRole, NetworkStatus};

use crate::reader::ChainReader;

/// Periodic reachability check of each chain's RPC endpoint
pub struct NetworkProbe {
    reader: Arc<dyn ChainReader>,
    timeout: Duration,
}

impl NetworkProbe {
    pub fn new(reader: Arc<dyn ChainReader>, timeout: Duration) -> Self {
        Self { reader, timeout }
    }

    /// Health and head block, probed concurrently
    pub async fn probe(&self, chain: ChainRole) -> NetworkStatus {
        let probes = async {
            tokio::join!(
                self.reader.check_health(chain),
                self.reader.latest_block_number(chain)
            )
        };
        let (healthy, latest_block) = match tokio::time::timeout(self.timeout, probes).await {
            Ok(result) => result,
            Err(_) => (false, None),
        };

        if !healthy {
            warn!("{} RPC unhealthy", chain);
        }

        NetworkStatus {
            chain,
            healthy,
            latest_block,
            checked_at: Utc::now(),
        }
    }

    /// Both chains, in `ChainRole::ALL` order
    pub async fn probe_all(&self) -> Vec<NetworkStatus> {
        let (origin, destination) = tokio::join!(
            self.probe(ChainRole::Origin),
            self.probe(ChainRole::Destination)
        );
        vec![origin, destination]
    }
}
