//! JSON-RPC transport
//!
//! Calls and log queries go over HTTP. Live logs use `eth_subscribe` when a
//! WebSocket endpoint is configured, and fall back to polling `eth_getLogs`.

use alloy_primitives::{hex, Address, Bytes, B256};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use mirror_core::{ChainEndpoint, RpcSettings, TransportError, TransportResult};

use crate::transport::{ChainTransport, LogFilter, LogSubscription, RawLog};

const LIVE_BUFFER: usize = 256;

/// HTTP half, cheap to clone into background tasks
#[derive(Debug, Clone)]
struct HttpRpc {
    client: reqwest::Client,
    url: String,
    next_id: Arc<AtomicU64>,
}

impl HttpRpc {
    async fn request(&self, method: &str, params: Value) -> TransportResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Connection(format!("HTTP {status} from {method}")));
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;

        unwrap_envelope(envelope)
    }

    async fn block_number(&self) -> TransportResult<u64> {
        let result = self.request("eth_blockNumber", json!([])).await?;
        parse_quantity(&result)
    }

    async fn get_logs(
        &self,
        filter: &LogFilter,
        from_block: u64,
        to_block: Option<u64>,
    ) -> TransportResult<Vec<RawLog>> {
        let to = to_block
            .map(|b| format!("{b:#x}"))
            .unwrap_or_else(|| "latest".to_string());
        let params = json!([{
            "address": filter.address.to_string(),
            "topics": [hex::encode_prefixed(filter.topic0)],
            "fromBlock": format!("{from_block:#x}"),
            "toBlock": to,
        }]);

        let result = self.request("eth_getLogs", params).await?;
        let logs: Vec<RpcLog> = serde_json::from_value(result)
            .map_err(|e| TransportError::InvalidResponse(format!("eth_getLogs: {e}")))?;

        logs.into_iter()
            .filter(|log| !log.removed)
            .map(RawLog::try_from)
            .collect()
    }
}

/// JSON-RPC endpoint for one chain
#[derive(Debug, Clone)]
pub struct JsonRpcTransport {
    name: String,
    http: HttpRpc,
    ws_url: Option<String>,
    settings: RpcSettings,
}

impl JsonRpcTransport {
    pub fn new(
        name: impl Into<String>,
        endpoint: &ChainEndpoint,
        settings: RpcSettings,
    ) -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        Ok(Self {
            name: name.into(),
            http: HttpRpc {
                client,
                url: endpoint.rpc_url.clone(),
                next_id: Arc::new(AtomicU64::new(1)),
            },
            ws_url: endpoint.ws_url.clone().filter(|u| !u.trim().is_empty()),
            settings,
        })
    }

    async fn subscribe_ws(&self, ws_url: &str, filter: &LogFilter) -> TransportResult<LogSubscription> {
        info!("Connecting to {} log stream at {}", self.name, ws_url);

        let (ws_stream, _) = tokio::time::timeout(self.settings.request_timeout(), connect_async(ws_url))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let subscribe_msg = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_subscribe",
            "params": ["logs", {
                "address": filter.address.to_string(),
                "topics": [hex::encode_prefixed(filter.topic0)],
            }]
        });
        write
            .send(Message::Text(subscribe_msg.to_string()))
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        // Wait for the subscription id before reporting success
        let confirm = async {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let value: Value = serde_json::from_str(&text)
                            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
                        if value.get("id").and_then(Value::as_u64) == Some(1) {
                            return unwrap_envelope(value);
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => return Err(TransportError::Connection(e.to_string())),
                }
            }
            Err(TransportError::Connection("socket closed before subscription".to_string()))
        };
        let subscription_id = tokio::time::timeout(self.settings.request_timeout(), confirm)
            .await
            .map_err(|_| TransportError::Timeout)??;
        info!("Subscribed to {} logs ({})", self.name, subscription_id);

        let (tx, rx) = mpsc::channel(LIVE_BUFFER);
        let name = self.name.clone();

        let pump = tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => match parse_notification(&text) {
                        Some(Ok(log)) => {
                            if tx.send(log).await.is_err() {
                                debug!("{} log receiver dropped", name);
                                break;
                            }
                        }
                        Some(Err(e)) => warn!("Dropping undecodable {} log: {}", name, e),
                        None => {}
                    },
                    Ok(Message::Ping(data)) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            error!("{} pong failed: {}", name, e);
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        info!("{} WebSocket closed by server", name);
                        break;
                    }
                    Err(e) => {
                        error!("{} WebSocket error: {}", name, e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(LogSubscription::new(rx, pump))
    }

    async fn subscribe_polling(&self, filter: &LogFilter) -> TransportResult<LogSubscription> {
        let mut next_block = self.http.block_number().await? + 1;
        info!(
            "Polling {} logs every {:?} from block {}",
            self.name,
            self.settings.log_poll_interval(),
            next_block
        );

        let (tx, rx) = mpsc::channel(LIVE_BUFFER);
        let http = self.http.clone();
        let filter = *filter;
        let name = self.name.clone();
        let period = self.settings.log_poll_interval().max(Duration::from_millis(100));

        let pump = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                interval.tick().await;

                let latest = match http.block_number().await {
                    Ok(latest) => latest,
                    Err(e) => {
                        warn!("{} block number poll failed: {}", name, e);
                        continue;
                    }
                };
                if latest < next_block {
                    continue;
                }

                match http.get_logs(&filter, next_block, Some(latest)).await {
                    Ok(logs) => {
                        for log in logs {
                            if tx.send(log).await.is_err() {
                                debug!("{} log receiver dropped", name);
                                return;
                            }
                        }
                        next_block = latest + 1;
                    }
                    Err(e) => warn!("{} log poll failed: {}", name, e),
                }
            }
        });

        Ok(LogSubscription::new(rx, pump))
    }
}

#[async_trait::async_trait]
impl ChainTransport for JsonRpcTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, to: Address, calldata: Bytes) -> TransportResult<Bytes> {
        let params = json!([
            { "to": to.to_string(), "data": hex::encode_prefixed(&calldata) },
            "latest"
        ]);
        let result = self.http.request("eth_call", params).await?;
        let text = result
            .as_str()
            .ok_or_else(|| TransportError::InvalidResponse("eth_call result is not a string".to_string()))?;
        Bytes::from_str(text).map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }

    async fn block_number(&self) -> TransportResult<u64> {
        self.http.block_number().await
    }

    async fn query_logs(
        &self,
        filter: &LogFilter,
        from_block: u64,
        to_block: Option<u64>,
    ) -> TransportResult<Vec<RawLog>> {
        self.http.get_logs(filter, from_block, to_block).await
    }

    async fn subscribe_logs(&self, filter: &LogFilter) -> TransportResult<LogSubscription> {
        match &self.ws_url {
            Some(ws_url) => self.subscribe_ws(ws_url, filter).await,
            None => self.subscribe_polling(filter).await,
        }
    }
}

fn map_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connection(e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

fn unwrap_envelope(mut envelope: Value) -> TransportResult<Value> {
    if let Some(error) = envelope.get_mut("error").map(Value::take) {
        if !error.is_null() {
            let body: RpcErrorBody = serde_json::from_value(error)
                .map_err(|e| TransportError::InvalidResponse(format!("error object: {e}")))?;
            return Err(TransportError::Rpc {
                code: body.code,
                message: body.message,
            });
        }
    }

    match envelope.get_mut("result").map(Value::take) {
        Some(result) => Ok(result),
        None => Err(TransportError::InvalidResponse("missing result".to_string())),
    }
}

fn parse_quantity(value: &Value) -> TransportResult<u64> {
    let text = value
        .as_str()
        .ok_or_else(|| TransportError::InvalidResponse(format!("expected hex quantity, got {value}")))?;
    parse_hex_u64(text)
}

fn parse_hex_u64(text: &str) -> TransportResult<u64> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    u64::from_str_radix(digits, 16)
        .map_err(|e| TransportError::InvalidResponse(format!("bad quantity {text}: {e}")))
}

// `None` for frames that are not log notifications
fn parse_notification(text: &str) -> Option<TransportResult<RawLog>> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("method").and_then(Value::as_str) != Some("eth_subscription") {
        return None;
    }
    let result = value.get("params")?.get("result")?.clone();
    let log = match serde_json::from_value::<RpcLog>(result) {
        Ok(log) => log,
        Err(e) => return Some(Err(TransportError::InvalidResponse(e.to_string()))),
    };
    if log.removed {
        debug!("Ignoring removed log");
        return None;
    }
    Some(RawLog::try_from(log))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: String,
    topics: Vec<String>,
    data: String,
    block_number: Option<String>,
    transaction_hash: Option<String>,
    log_index: Option<String>,
    #[serde(default)]
    removed: bool,
}

impl TryFrom<RpcLog> for RawLog {
    type Error = TransportError;

    fn try_from(log: RpcLog) -> TransportResult<Self> {
        let invalid = |what: &str, e: &dyn std::fmt::Display| {
            TransportError::InvalidResponse(format!("log {what}: {e}"))
        };

        let address = Address::from_str(&log.address).map_err(|e| invalid("address", &e))?;
        let topics = log
            .topics
            .iter()
            .map(|t| B256::from_str(t).map_err(|e| invalid("topic", &e)))
            .collect::<TransportResult<Vec<_>>>()?;
        let data = Bytes::from_str(&log.data).map_err(|e| invalid("data", &e))?;
        let block_number = log.block_number.as_deref().map(parse_hex_u64).transpose()?;
        let transaction_hash = log
            .transaction_hash
            .as_deref()
            .map(|h| B256::from_str(h).map_err(|e| invalid("transactionHash", &e)))
            .transpose()?;
        let log_index = log.log_index.as_deref().map(parse_hex_u64).transpose()?;

        Ok(RawLog {
            address,
            topics,
            data,
            block_number,
            transaction_hash,
            log_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_envelope() {
        let ok = json!({"jsonrpc": "2.0", "id": 1, "result": "0x10"});
        assert_eq!(unwrap_envelope(ok).unwrap(), json!("0x10"));

        let err = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": 3, "message": "execution reverted"}});
        assert_eq!(
            unwrap_envelope(err),
            Err(TransportError::Rpc {
                code: 3,
                message: "execution reverted".to_string()
            })
        );

        let empty = json!({"jsonrpc": "2.0", "id": 1});
        assert!(matches!(unwrap_envelope(empty), Err(TransportError::InvalidResponse(_))));
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity(&json!("0x1b4")).unwrap(), 436);
        assert_eq!(parse_quantity(&json!("0x0")).unwrap(), 0);
        assert!(parse_quantity(&json!(12)).is_err());
        assert!(parse_quantity(&json!("0xzz")).is_err());
    }

    #[test]
    fn test_parse_notification() {
        let frame = json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": {
                "subscription": "0x9",
                "result": {
                    "address": "0x1111111111111111111111111111111111111111",
                    "topics": ["0x0000000000000000000000000000000000000000000000000000000000000001"],
                    "data": "0x",
                    "blockNumber": "0x10",
                    "transactionHash": "0x2222222222222222222222222222222222222222222222222222222222222222",
                    "logIndex": "0x0",
                    "removed": false
                }
            }
        })
        .to_string();

        let log = parse_notification(&frame).unwrap().unwrap();
        assert_eq!(log.address, Address::repeat_byte(0x11));
        assert_eq!(log.block_number, Some(16));
        assert_eq!(log.transaction_hash, Some(B256::repeat_byte(0x22)));
        assert!(log.data.is_empty());

        let confirm = json!({"jsonrpc": "2.0", "id": 1, "result": "0x9"}).to_string();
        assert!(parse_notification(&confirm).is_none());
    }

    #[test]
    fn test_ws_url_blank_means_polling() {
        let mut endpoint = ChainEndpoint::destination_default();
        endpoint.ws_url = Some("  ".to_string());
        let transport = JsonRpcTransport::new("destination", &endpoint, RpcSettings::default()).unwrap();
        assert!(transport.ws_url.is_none());
        assert_eq!(transport.name(), "destination");
    }
}
