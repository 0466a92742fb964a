//! Pipeline configuration from environment variables
//!
//! One `ChainConfig` per tracked chain carries everything that differs
//! between BSC and Ethereum (endpoint, contracts, cadence), so the rest of
//! the pipeline never branches on the chain.

use super::types::{ChainId, ChannelId};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

pub const DEFAULT_PRICE_API_URL: &str = "https://api.coingecko.com/api/v3";
pub const DEFAULT_MEDIA_BASE_URL: &str = "https://res.cloudinary.com/da4k3yxhu/video/upload";
pub const DEFAULT_BOT_HANDLE: &str = "@MicroPetsBuy_bot";
pub const DEFAULT_STAKING_URL: &str = "https://pets.micropets.io/petdex";
pub const DEFAULT_MERCH_URL: &str = "https://micropets.store/";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl From<ConfigError> for super::error::PipelineError {
    fn from(err: ConfigError) -> Self {
        super::error::PipelineError::Configuration(err.to_string())
    }
}

/// How the classifier decides whether a pool transfer is a DEX trade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSignalKind {
    /// Require a `Swap` log from the pool in the same transaction
    SwapLog,
    /// Accept every transfer out of the pool
    Always,
}

/// Per-chain parameters
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub chain: ChainId,
    pub rpc_url: String,
    /// ERC-20 token contract whose `Transfer` logs are watched
    pub token_address: String,
    /// Liquidity pool (pair) address; buys are transfers out of it
    pub pool_address: String,
    /// Asset id looked up in the price snapshot
    pub price_asset: String,
    pub token_decimals: u8,
    pub poll_interval: Duration,
    pub lookback_blocks: u64,
    pub max_blocks_per_poll: u64,
}

/// Retry/backoff parameters applied to every chain call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts per call within one tick (first try included)
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub rate_limit_initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(2_000),
            rate_limit_initial_delay: Duration::from_millis(5_000),
            max_delay: Duration::from_millis(60_000),
            jitter: 0.1,
        }
    }
}

/// Configuration for the pipeline runtime
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub chains: Vec<ChainConfig>,
    pub trade_signal: TradeSignalKind,
    pub price_api_url: String,
    pub price_ttl: Duration,
    /// Fallback unit prices served before any successful fetch
    pub default_prices: HashMap<String, f64>,
    pub rpc_timeout: Duration,
    pub retry: RetryConfig,
    pub history_capacity: usize,
    pub max_concurrent_deliveries: usize,
    /// Pending notifications kept per subscriber before new ones are dropped
    pub delivery_queue_capacity: usize,
    pub telegram_bot_token: Option<String>,
    pub subscribers: Vec<ChannelId>,
    pub media_base_url: String,
    pub token_symbol: String,
    /// Header line of every notification; `None` when set to `none`
    pub bot_handle: Option<String>,
    pub staking_url: Option<String>,
    pub merch_url: Option<String>,
}

impl PipelineConfig {
    /// Load configuration from the process environment
    ///
    /// `BSC_RPC_URL` and `ETH_RPC_URL` are required; everything else has a
    /// default. Per-chain keys are prefixed with `BSC_` / `ETH_`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let token_decimals: u8 = parse_or(&get, "TOKEN_DECIMALS", 18)?;
        if token_decimals > 30 {
            return Err(ConfigError::InvalidValue(format!(
                "TOKEN_DECIMALS must be <= 30, got {}",
                token_decimals
            )));
        }

        let mut chains = Vec::with_capacity(ChainId::ALL.len());
        for chain in ChainId::ALL {
            chains.push(chain_from_lookup(&get, chain, token_decimals)?);
        }

        let trade_signal = match get("TRADE_SIGNAL").as_deref() {
            None | Some("swap_log") => TradeSignalKind::SwapLog,
            Some("always") => TradeSignalKind::Always,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "TRADE_SIGNAL must be 'swap_log' or 'always', got '{}'",
                    other
                )))
            }
        };

        let mut default_prices = HashMap::new();
        if let Some(raw) = get("DEFAULT_TOKEN_PRICE_USD") {
            let price: f64 = raw.parse().map_err(|_| {
                ConfigError::InvalidValue(format!("DEFAULT_TOKEN_PRICE_USD is not a number: {}", raw))
            })?;
            for chain in &chains {
                default_prices.insert(chain.price_asset.clone(), price);
            }
        }

        let retry = RetryConfig {
            max_attempts: parse_or(&get, "RETRY_MAX_ATTEMPTS", 5u32)?.max(1),
            initial_delay: Duration::from_millis(parse_or(&get, "RETRY_INITIAL_DELAY_MS", 2_000)?),
            rate_limit_initial_delay: Duration::from_millis(parse_or(
                &get,
                "RATE_LIMIT_INITIAL_DELAY_MS",
                5_000,
            )?),
            max_delay: Duration::from_millis(parse_or(&get, "RETRY_MAX_DELAY_MS", 60_000)?),
            jitter: parse_or(&get, "RETRY_JITTER", 0.1)?,
        };

        let subscribers = match get("SUBSCRIBER_CHAT_IDS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<ChannelId>().map_err(|_| {
                        ConfigError::InvalidValue(format!("SUBSCRIBER_CHAT_IDS entry '{}' is not a chat id", s))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            chains,
            trade_signal,
            price_api_url: get("PRICE_API_URL").unwrap_or_else(|| DEFAULT_PRICE_API_URL.to_string()),
            price_ttl: Duration::from_secs(parse_or(&get, "PRICE_TTL_SECS", 60)?),
            default_prices,
            rpc_timeout: Duration::from_secs(parse_or(&get, "RPC_TIMEOUT_SECS", 10)?),
            retry,
            history_capacity: parse_or(&get, "HISTORY_CAPACITY", 100usize)?.max(1),
            max_concurrent_deliveries: parse_or(&get, "MAX_CONCURRENT_DELIVERIES", 8usize)?.max(1),
            delivery_queue_capacity: parse_or(&get, "DELIVERY_QUEUE_CAPACITY", 256usize)?.max(1),
            telegram_bot_token: get("TELEGRAM_BOT_TOKEN"),
            subscribers,
            media_base_url: get("MEDIA_BASE_URL").unwrap_or_else(|| DEFAULT_MEDIA_BASE_URL.to_string()),
            token_symbol: get("TOKEN_SYMBOL").unwrap_or_else(|| "PETS".to_string()),
            bot_handle: optional_or(&get, "BOT_HANDLE", DEFAULT_BOT_HANDLE),
            staking_url: optional_or(&get, "STAKING_URL", DEFAULT_STAKING_URL),
            merch_url: optional_or(&get, "MERCH_URL", DEFAULT_MERCH_URL),
        })
    }

    pub fn chain(&self, chain: ChainId) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain == chain)
    }
}

/// Value of `key`, its default when unset, or `None` when set to `none`
fn optional_or<G>(get: &G, key: &str, default: &str) -> Option<String>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) if value.eq_ignore_ascii_case("none") => None,
        Some(value) => Some(value),
        None => Some(default.to_string()),
    }
}

fn chain_from_lookup<G>(get: &G, chain: ChainId, token_decimals: u8) -> Result<ChainConfig, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let prefix = chain.tag();
    let key = |name: &str| format!("{}_{}", prefix, name);

    let rpc_url_key = key("RPC_URL");
    let rpc_url = get(&rpc_url_key).ok_or_else(|| ConfigError::MissingVariable(rpc_url_key.clone()))?;
    if !rpc_url.starts_with("http://") && !rpc_url.starts_with("https://") {
        return Err(ConfigError::InvalidValue(format!(
            "{} must start with http:// or https://",
            rpc_url_key
        )));
    }

    let (default_token, default_pool) = match chain {
        ChainId::Bsc => (
            "0x2466858ab5edad0bb597fe9f008f568b00d25fe3",
            "0x4bdece4e422fa015336234e4fc4d39ae6dd75b01",
        ),
        ChainId::Ethereum => (
            "0x2466858ab5edad0bb597fe9f008f568b00d25fe3",
            "0x98b794be9c4f49900c6193aaff20876e1f36043e",
        ),
    };

    let token_key = key("TOKEN_ADDRESS");
    let token_address = normalize_address(&token_key, &get(&token_key).unwrap_or_else(|| default_token.to_string()))?;
    let pool_key = key("POOL_ADDRESS");
    let pool_address = normalize_address(&pool_key, &get(&pool_key).unwrap_or_else(|| default_pool.to_string()))?;

    let poll_secs: u64 = parse_or(get, &key("POLL_INTERVAL_SECS"), 60)?;
    if poll_secs == 0 {
        return Err(ConfigError::InvalidValue(format!("{} must be > 0", key("POLL_INTERVAL_SECS"))));
    }

    Ok(ChainConfig {
        chain,
        rpc_url,
        token_address,
        pool_address,
        price_asset: get(&key("PRICE_ASSET")).unwrap_or_else(|| "micropets".to_string()),
        token_decimals,
        poll_interval: Duration::from_secs(poll_secs),
        lookback_blocks: parse_or(get, &key("LOOKBACK_BLOCKS"), 50)?,
        max_blocks_per_poll: parse_or(get, &key("MAX_BLOCKS_PER_POLL"), 500u64)?.max(1),
    })
}

/// Lowercase a `0x`-prefixed 20-byte hex address, rejecting anything else
pub fn normalize_address(name: &str, raw: &str) -> Result<String, ConfigError> {
    let lower = raw.trim().to_lowercase();
    let body = lower
        .strip_prefix("0x")
        .ok_or_else(|| ConfigError::InvalidValue(format!("{} must be 0x-prefixed, got {}", name, raw)))?;

    match hex::decode(body) {
        Ok(bytes) if bytes.len() == 20 => Ok(lower),
        _ => Err(ConfigError::InvalidValue(format!(
            "{} must be a 20-byte hex address, got {}",
            name, raw
        ))),
    }
}

fn parse_or<G, T>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{} has invalid value '{}'", key, raw))),
        None => Ok(default),
    }
}
