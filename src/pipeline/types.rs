//! Core data types flowing through the buy-alert pipeline
//!
//! ```text
//! TransferEvent (ChainClient)
//!     ↓ TradeClassifier::evaluate(event, PriceSnapshot)
//! TradeRecord
//!     ↓ DedupStore::record_with
//! NotificationFanout::broadcast
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Opaque notification channel identifier (a Telegram chat id)
pub type ChannelId = i64;

/// Chains tracked by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChainId {
    Bsc,
    Ethereum,
}

impl ChainId {
    pub const ALL: [ChainId; 2] = [ChainId::Bsc, ChainId::Ethereum];

    /// Short tag used in log lines and env var prefixes
    pub fn tag(&self) -> &'static str {
        match self {
            ChainId::Bsc => "BSC",
            ChainId::Ethereum => "ETH",
        }
    }

    /// Pair label shown in notifications
    pub fn pair_label(&self) -> &'static str {
        match self {
            ChainId::Bsc => "BNB Pair",
            ChainId::Ethereum => "ETH Pair",
        }
    }

    pub fn explorer_name(&self) -> &'static str {
        match self {
            ChainId::Bsc => "BscScan",
            ChainId::Ethereum => "Etherscan",
        }
    }

    pub fn explorer_tx_url(&self, tx_hash: &str) -> String {
        match self {
            ChainId::Bsc => format!("https://bscscan.com/tx/{}", tx_hash),
            ChainId::Ethereum => format!("https://etherscan.io/tx/{}", tx_hash),
        }
    }

    /// DEXTools pair chart
    pub fn chart_url(&self, pool_address: &str) -> String {
        match self {
            ChainId::Bsc => format!("https://www.dextools.io/app/en/bnb/pair-explorer/{}", pool_address),
            ChainId::Ethereum => format!("https://www.dextools.io/app/en/ether/pair-explorer/{}", pool_address),
        }
    }

    /// DEX swap page buying `token_address` with the native coin
    pub fn swap_url(&self, token_address: &str) -> String {
        match self {
            ChainId::Bsc => format!("https://pancakeswap.finance/swap?outputCurrency={}", token_address),
            ChainId::Ethereum => format!(
                "https://app.uniswap.org/swap?chain=mainnet&inputCurrency=NATIVE&outputCurrency={}",
                token_address
            ),
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Raw ERC-20 `Transfer` log as produced by a ChainClient
///
/// Addresses and hashes are lowercase `0x`-prefixed hex. `raw_amount` is in
/// the token's smallest unit (wei-style), not whole tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub chain: ChainId,
    pub tx_hash: String,
    pub from: String,
    pub to: String,
    pub raw_amount: u128,
    pub block_number: u64,
    /// True when the pool emitted a `Swap` log in the same transaction
    pub swap_in_tx: bool,
}

/// Trade size bucket, thresholds in whole tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SizeCategory {
    Small,
    Medium,
    Whale,
}

impl SizeCategory {
    pub const MEDIUM_THRESHOLD_TOKENS: u128 = 1_000;
    pub const WHALE_THRESHOLD_TOKENS: u128 = 10_000;

    /// Categorize a raw amount without going through floating point
    ///
    /// `< 1000 → Small`, `< 10000 → Medium`, else `Whale`.
    pub fn from_raw(raw_amount: u128, decimals: u8) -> Self {
        let unit = 10u128.saturating_pow(decimals as u32);
        if raw_amount < Self::MEDIUM_THRESHOLD_TOKENS.saturating_mul(unit) {
            SizeCategory::Small
        } else if raw_amount < Self::WHALE_THRESHOLD_TOKENS.saturating_mul(unit) {
            SizeCategory::Medium
        } else {
            SizeCategory::Whale
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SizeCategory::Small => "MicroPets Buy",
            SizeCategory::Medium => "Medium Bullish Buy",
            SizeCategory::Whale => "Whale Buy",
        }
    }

    /// Placeholder line shown in place of the video in text-only messages
    pub fn media_display(&self) -> &'static str {
        match self {
            SizeCategory::Small => "[Small Buy Video]",
            SizeCategory::Medium => "[Medium Buy Video]",
            SizeCategory::Whale => "[Large Buy Video]",
        }
    }

    pub fn media_public_id(&self) -> &'static str {
        match self {
            SizeCategory::Small => "SMALLBUY_b3px1p",
            SizeCategory::Medium => "MEDIUMBUY_MPEG_e02zdz",
            SizeCategory::Whale => "micropets_big_msapxz",
        }
    }
}

/// Estimated USD value of a trade
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "usd", rename_all = "camelCase")]
pub enum FiatValue {
    Usd(f64),
    /// No unit price was available in the snapshot
    Unknown,
}

impl FiatValue {
    pub fn usd(&self) -> Option<f64> {
        match self {
            FiatValue::Usd(v) => Some(*v),
            FiatValue::Unknown => None,
        }
    }
}

impl fmt::Display for FiatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FiatValue::Usd(v) => write!(f, "${:.2}", v),
            FiatValue::Unknown => f.write_str("unknown"),
        }
    }
}

/// Accepted, classified and valued trade
///
/// Immutable once built. `tx_hash` is the unique key across the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub chain: ChainId,
    pub tx_hash: String,
    pub recipient: String,
    /// Whole tokens (raw amount scaled by decimals)
    pub token_amount: f64,
    pub category: SizeCategory,
    pub fiat_value: FiatValue,
    /// Unix timestamp (milliseconds) when the trade was accepted
    pub discovered_at: i64,
    pub media_ref: String,
    pub block_number: u64,
}

impl TradeRecord {
    /// Last 4 characters of the recipient address
    pub fn holder_tail(&self) -> &str {
        match self.recipient.char_indices().rev().nth(3) {
            Some((start, _)) => &self.recipient[start..],
            None => &self.recipient,
        }
    }
}

/// Per-chain cursor: next block to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainWatermark {
    pub chain: ChainId,
    pub next_block: u64,
}

/// Spot prices keyed by asset id
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSnapshot {
    pub prices: HashMap<String, f64>,
    /// Unix timestamp (seconds) of the fetch; `None` for built-in defaults
    pub fetched_at: Option<i64>,
}

impl PriceSnapshot {
    pub fn empty() -> Self {
        Self {
            prices: HashMap::new(),
            fetched_at: None,
        }
    }

    /// Unit price for `asset`, ignoring non-positive or non-finite quotes
    pub fn price_of(&self, asset: &str) -> Option<f64> {
        self.prices
            .get(asset)
            .copied()
            .filter(|p| p.is_finite() && *p > 0.0)
    }
}
