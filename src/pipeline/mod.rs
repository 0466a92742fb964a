//! # Buy-alert pipeline
//!
//! Watches one token's liquidity pools on BSC and Ethereum, turns pool
//! transfers into classified, fiat-valued trade records, and fans each new
//! record out to every subscribed chat.
//!
//! ## Architecture
//!
//! ```text
//! ChainScheduler (BSC)      ChainScheduler (ETH)
//!   │ ChainClient             │ ChainClient
//!   └──────────┬──────────────┘
//!              ↓
//!        TradePipeline ── PriceOracle (TTL cached)
//!              ↓
//!        TradeClassifier (per chain)
//!              ↓
//!        DedupStore (single critical section) ── StatusQuery
//!              ↓
//!        NotificationFanout ── SubscriberRegistry
//!              ↓
//!        NotificationSink (Telegram / log)
//! ```
//!
//! Upstream failures stay inside the scheduler or the oracle; delivery
//! failures stay inside the fanout. Only a startup `ConfigError` ends the
//! process.
//!
//! ## Module Organization
//!
//! - `types` - Core data structures (TransferEvent, TradeRecord, PriceSnapshot)
//! - `error` - PipelineError taxonomy
//! - `config` - Environment configuration
//! - `backoff` - Bounded exponential backoff
//! - `chain_client` - JSON-RPC log access per chain
//! - `price_oracle` - Cached price snapshots
//! - `classifier` - Trade detection and sizing
//! - `dedup` - Bounded, deduplicated history
//! - `render` - Notification text
//! - `subscribers` - Subscriber registry
//! - `sink` - Notification delivery backends
//! - `fanout` - Ordered, bounded per-subscriber delivery
//! - `engine` - Per-batch orchestration
//! - `scheduler` - Per-chain poll state machine
//! - `status` - Read-only status views

pub mod types;
pub mod error;
pub mod config;
pub mod backoff;
pub mod chain_client;
pub mod price_oracle;
pub mod classifier;
pub mod dedup;
pub mod render;
pub mod subscribers;
pub mod sink;
pub mod fanout;
pub mod engine;
pub mod scheduler;
pub mod status;

// Re-export commonly used types
pub use types::{ChainId, ChannelId, FiatValue, PriceSnapshot, SizeCategory, TradeRecord, TransferEvent};
pub use error::{PipelineError, PipelineResult};
pub use config::{ChainConfig, ConfigError, PipelineConfig, RetryConfig};
pub use chain_client::{ChainClient, RpcChainClient, TransferFilter};
pub use price_oracle::{CoinGeckoSource, PriceOracle, PriceSource};
pub use classifier::{TradeClassifier, TradeSignal};
pub use dedup::DedupStore;
pub use subscribers::{InMemorySubscriberRegistry, SubscriberRegistry};
pub use sink::{LogSink, NotificationSink, SinkError, TelegramSink};
pub use fanout::{BroadcastReport, NotificationFanout};
pub use render::MessageBranding;
pub use engine::{BatchSummary, TradePipeline};
pub use scheduler::{ChainScheduler, TickOutcome, TickReport};
pub use status::StatusQuery;
