//! EVM JSON-RPC chain client
//!
//! Provides the two queries the scheduler needs:
//! - `current_height()` → `eth_blockNumber`
//! - `transfer_events(from, to, filter)` → `eth_getLogs` for ERC-20 `Transfer`
//!   logs sent by the pool, cross-referenced with the pool's `Swap` logs in
//!   the same block range
//!
//! ## Error mapping
//!
//! - HTTP 429, JSON-RPC `-32005`, or "rate limit"/"too many requests" messages
//!   → `PipelineError::RateLimited`
//! - timeouts, connect failures, other HTTP/RPC errors → `TransientNetwork`
//! - a single undecodable log → skipped with a warning (`DataUnavailable`)

use super::config::ChainConfig;
use super::error::{PipelineError, PipelineResult};
use super::types::{ChainId, TransferEvent};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// keccak256("Swap(address,uint256,uint256,uint256,uint256,address)"), Uniswap V2 / PancakeSwap pairs
pub const SWAP_TOPIC: &str = "0xd78ad95fa46c994b6551d0da85fc275fe613ce37657fb8d5e3d130840159d822";

/// Contract filter for a transfer query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFilter {
    pub token_address: String,
    pub pool_address: String,
}

impl From<&ChainConfig> for TransferFilter {
    fn from(config: &ChainConfig) -> Self {
        Self {
            token_address: config.token_address.clone(),
            pool_address: config.pool_address.clone(),
        }
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain(&self) -> ChainId;

    async fn current_height(&self) -> PipelineResult<u64>;

    /// Transfer events in `[from_block, to_block]` (inclusive)
    async fn transfer_events(
        &self,
        from_block: u64,
        to_block: u64,
        filter: &TransferFilter,
    ) -> PipelineResult<Vec<TransferEvent>>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Log entry as returned by `eth_getLogs`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: Option<String>,
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

/// JSON-RPC client for one chain
pub struct RpcChainClient {
    chain: ChainId,
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcChainClient {
    pub fn new(chain: ChainId, url: &str, timeout: Duration) -> PipelineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PipelineError::Configuration(format!("[{}] HTTP client: {}", chain, e)))?;

        Ok(Self {
            chain,
            url: url.to_string(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> PipelineResult<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self.http.post(&self.url).json(&body).send().await?;

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok());
        if let Some(err) = classify_http_status(response.status(), retry_after) {
            log::debug!("[{}] {} failed: {}", self.chain, method, err);
            return Err(err);
        }

        let reply: RpcResponse<T> = response.json().await?;
        if let Some(err) = reply.error {
            return Err(classify_rpc_error(err.code, &err.message));
        }
        reply.result.ok_or_else(|| {
            PipelineError::TransientNetwork(format!("[{}] {} returned no result", self.chain, method))
        })
    }

    async fn get_logs(&self, filter: Value) -> PipelineResult<Vec<RpcLog>> {
        self.call("eth_getLogs", json!([filter])).await
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    fn chain(&self) -> ChainId {
        self.chain
    }

    async fn current_height(&self) -> PipelineResult<u64> {
        let raw: String = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&raw)
            .ok_or_else(|| PipelineError::TransientNetwork(format!("[{}] bad block number '{}'", self.chain, raw)))
    }

    async fn transfer_events(
        &self,
        from_block: u64,
        to_block: u64,
        filter: &TransferFilter,
    ) -> PipelineResult<Vec<TransferEvent>> {
        if from_block > to_block {
            return Ok(Vec::new());
        }

        let range_from = format!("{:#x}", from_block);
        let range_to = format!("{:#x}", to_block);

        let transfers = self
            .get_logs(json!({
                "fromBlock": range_from,
                "toBlock": range_to,
                "address": filter.token_address,
                "topics": [TRANSFER_TOPIC, address_to_topic(&filter.pool_address)],
            }))
            .await?;

        if transfers.is_empty() {
            return Ok(Vec::new());
        }

        let swaps = self
            .get_logs(json!({
                "fromBlock": range_from,
                "toBlock": range_to,
                "address": filter.pool_address,
                "topics": [SWAP_TOPIC],
            }))
            .await?;

        let swap_txs: HashSet<String> = swaps
            .iter()
            .filter(|entry| !entry.removed)
            .filter_map(|entry| entry.transaction_hash.as_ref().map(|h| h.to_lowercase()))
            .collect();

        let mut events = Vec::with_capacity(transfers.len());
        for entry in &transfers {
            if entry.removed {
                continue;
            }
            match decode_transfer_log(self.chain, entry, &swap_txs) {
                Ok(event) => events.push(event),
                Err(e) => log::warn!("⚠️  [{}] Skipping undecodable transfer log: {}", self.chain, e),
            }
        }

        log::debug!(
            "[{}] blocks {}..={}: {} transfers, {} swaps",
            self.chain,
            from_block,
            to_block,
            events.len(),
            swap_txs.len()
        );

        Ok(events)
    }
}

/// Map a non-success HTTP status onto the pipeline taxonomy
///
/// `retry_after` is the raw `Retry-After` header; only the delta-seconds form
/// is understood. Returns `None` for 2xx.
pub fn classify_http_status(status: reqwest::StatusCode, retry_after: Option<&str>) -> Option<PipelineError> {
    if status.is_success() {
        return None;
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = retry_after
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Some(PipelineError::RateLimited { retry_after });
    }
    Some(PipelineError::TransientNetwork(format!("HTTP {}", status)))
}

/// Map a JSON-RPC error object onto the pipeline taxonomy
pub fn classify_rpc_error(code: i64, message: &str) -> PipelineError {
    let lower = message.to_lowercase();
    let throttled = code == -32005
        || code == 429
        || lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("limit exceeded");

    if throttled {
        PipelineError::RateLimited { retry_after: None }
    } else {
        PipelineError::TransientNetwork(format!("rpc error {}: {}", code, message))
    }
}

/// Decode a raw `Transfer` log into a `TransferEvent`
pub fn decode_transfer_log(
    chain: ChainId,
    log: &RpcLog,
    swap_txs: &HashSet<String>,
) -> PipelineResult<TransferEvent> {
    if log.topics.len() < 3 || !log.topics[0].eq_ignore_ascii_case(TRANSFER_TOPIC) {
        return Err(PipelineError::DataUnavailable("not an ERC-20 Transfer log".to_string()));
    }

    let tx_hash = log
        .transaction_hash
        .as_ref()
        .map(|h| h.to_lowercase())
        .ok_or_else(|| PipelineError::DataUnavailable("log has no transaction hash".to_string()))?;

    let block_number = log
        .block_number
        .as_deref()
        .and_then(parse_quantity)
        .ok_or_else(|| PipelineError::DataUnavailable(format!("log {} has no block number", tx_hash)))?;

    let from = topic_to_address(&log.topics[1])?;
    let to = topic_to_address(&log.topics[2])?;
    let raw_amount = decode_amount(&log.data)?;
    let swap_in_tx = swap_txs.contains(&tx_hash);

    Ok(TransferEvent {
        chain,
        tx_hash,
        from,
        to,
        raw_amount,
        block_number,
        swap_in_tx,
    })
}

/// Parse a hex quantity such as `0x3e8`
pub fn parse_quantity(raw: &str) -> Option<u64> {
    let digits = raw.trim().strip_prefix("0x").unwrap_or(raw.trim());
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Left-pad a 20-byte address into a 32-byte topic
pub fn address_to_topic(address: &str) -> String {
    let body = address.trim_start_matches("0x").to_lowercase();
    format!("0x{:0>64}", body)
}

fn topic_to_address(topic: &str) -> PipelineResult<String> {
    let body = topic.trim_start_matches("0x");
    if body.len() != 64 || hex::decode(body).is_err() {
        return Err(PipelineError::DataUnavailable(format!("malformed address topic {}", topic)));
    }
    Ok(format!("0x{}", body[24..].to_lowercase()))
}

/// Decode a uint256 data word, failing if it does not fit in u128
fn decode_amount(data: &str) -> PipelineResult<u128> {
    let body = data.trim_start_matches("0x");
    let padded = if body.len() % 2 == 1 {
        format!("0{}", body)
    } else {
        body.to_string()
    };
    let bytes = hex::decode(&padded)
        .map_err(|e| PipelineError::DataUnavailable(format!("bad transfer amount '{}': {}", data, e)))?;

    if bytes.is_empty() || bytes.len() > 32 {
        return Err(PipelineError::DataUnavailable(format!(
            "transfer amount has {} bytes",
            bytes.len()
        )));
    }

    let split = bytes.len().saturating_sub(16);
    if bytes[..split].iter().any(|b| *b != 0) {
        return Err(PipelineError::DataUnavailable(format!("transfer amount overflows u128: {}", data)));
    }

    let mut word = [0u8; 16];
    let tail = &bytes[split..];
    word[16 - tail.len()..].copy_from_slice(tail);
    Ok(u128::from_be_bytes(word))
}
