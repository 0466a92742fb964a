//! Trade classification: TransferEvent + PriceSnapshot → TradeRecord
//!
//! A transfer is accepted as a buy when:
//! 1. it leaves the tracked liquidity pool (`from == pool`)
//! 2. the configured `TradeSignal` says it came from a DEX swap
//! 3. its amount is non-zero
//!
//! Size buckets are computed on the raw integer amount (see
//! `SizeCategory::from_raw`). A missing unit price does not reject the
//! trade; the record carries `FiatValue::Unknown` instead.

use super::config::{ChainConfig, TradeSignalKind};
use super::types::{ChainId, FiatValue, PriceSnapshot, SizeCategory, TradeRecord, TransferEvent};
use std::fmt;
use std::sync::Arc;

/// Decides whether a pool transfer came from an exchange interaction
pub trait TradeSignal: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_trade(&self, event: &TransferEvent) -> bool;
}

/// The pool emitted a `Swap` log in the same transaction
#[derive(Debug, Default, Clone, Copy)]
pub struct SwapLogSignal;

impl TradeSignal for SwapLogSignal {
    fn name(&self) -> &'static str {
        "swap_log"
    }

    fn is_trade(&self, event: &TransferEvent) -> bool {
        event.swap_in_tx
    }
}

/// Every transfer out of the pool counts as a trade
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysTrade;

impl TradeSignal for AlwaysTrade {
    fn name(&self) -> &'static str {
        "always"
    }

    fn is_trade(&self, _event: &TransferEvent) -> bool {
        true
    }
}

pub fn signal_for(kind: TradeSignalKind) -> Arc<dyn TradeSignal> {
    match kind {
        TradeSignalKind::SwapLog => Arc::new(SwapLogSignal),
        TradeSignalKind::Always => Arc::new(AlwaysTrade),
    }
}

/// Why a transfer did not become a TradeRecord
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NotFromPool,
    NotATrade,
    ValueUnavailable(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NotFromPool => write!(f, "sender is not the tracked pool"),
            Rejection::NotATrade => write!(f, "no DEX trade signal"),
            Rejection::ValueUnavailable(why) => write!(f, "value unavailable: {}", why),
        }
    }
}

/// Per-chain classifier
pub struct TradeClassifier {
    chain: ChainId,
    pool_address: String,
    price_asset: String,
    decimals: u8,
    media_base_url: String,
    signal: Arc<dyn TradeSignal>,
    /// Millisecond clock (overridable for tests)
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl TradeClassifier {
    pub fn new(config: &ChainConfig, signal: Arc<dyn TradeSignal>, media_base_url: &str) -> Self {
        Self {
            chain: config.chain,
            pool_address: config.pool_address.to_lowercase(),
            price_asset: config.price_asset.clone(),
            decimals: config.token_decimals,
            media_base_url: media_base_url.trim_end_matches('/').to_string(),
            signal,
            now_fn: Box::new(|| chrono::Utc::now().timestamp_millis()),
        }
    }

    /// Replace the discovery clock, used for deterministic tests
    pub fn with_timestamp_fn(mut self, now_fn: Box<dyn Fn() -> i64 + Send + Sync>) -> Self {
        self.now_fn = now_fn;
        self
    }

    pub fn chain(&self) -> ChainId {
        self.chain
    }

    pub fn signal_name(&self) -> &'static str {
        self.signal.name()
    }

    pub fn evaluate(&self, event: &TransferEvent, snapshot: &PriceSnapshot) -> Result<TradeRecord, Rejection> {
        if !event.from.eq_ignore_ascii_case(&self.pool_address) {
            return Err(Rejection::NotFromPool);
        }

        if !self.signal.is_trade(event) {
            return Err(Rejection::NotATrade);
        }

        if event.raw_amount == 0 {
            return Err(Rejection::ValueUnavailable("zero transfer amount".to_string()));
        }

        let token_amount = event.raw_amount as f64 / 10f64.powi(self.decimals as i32);
        if !token_amount.is_finite() {
            return Err(Rejection::ValueUnavailable(format!(
                "amount {} does not scale to whole tokens",
                event.raw_amount
            )));
        }

        let category = SizeCategory::from_raw(event.raw_amount, self.decimals);
        let fiat_value = match snapshot.price_of(&self.price_asset) {
            Some(price) => FiatValue::Usd(token_amount * price),
            None => FiatValue::Unknown,
        };

        Ok(TradeRecord {
            chain: event.chain,
            tx_hash: event.tx_hash.clone(),
            recipient: event.to.clone(),
            token_amount,
            category,
            fiat_value,
            discovered_at: (self.now_fn)(),
            media_ref: format!("{}/{}.mp4", self.media_base_url, category.media_public_id()),
            block_number: event.block_number,
        })
    }
}
