//! Trade pipeline - per-batch orchestration
//!
//! ## Architecture
//!
//! ```text
//! Vec<TransferEvent> (one block range, one chain)
//!     ↓
//! PriceOracle::snapshot()          (once per batch)
//!     ↓
//! DedupStore::is_new()             (skip already-recorded hashes early)
//!     ↓
//! TradeClassifier::evaluate()      (reject / TradeRecord)
//!     ↓
//! DedupStore::record_with()        (authoritative check-and-insert)
//!     ↓ (inside the store lock, only if new)
//! NotificationFanout::broadcast()  (enqueue only, never blocks)
//! ```
//!
//! The pipeline is shared by both chain schedulers. Nothing here returns an
//! error: rejected events are counted and logged, failed deliveries are
//! contained in the fanout.

use super::classifier::{Rejection, TradeClassifier};
use super::dedup::DedupStore;
use super::fanout::NotificationFanout;
use super::price_oracle::PriceOracle;
use super::types::TransferEvent;
use std::sync::Arc;

/// Counters for one processed batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub seen: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

pub struct TradePipeline {
    store: Arc<DedupStore>,
    oracle: Arc<PriceOracle>,
    fanout: Arc<NotificationFanout>,
}

impl TradePipeline {
    pub fn new(store: Arc<DedupStore>, oracle: Arc<PriceOracle>, fanout: Arc<NotificationFanout>) -> Self {
        Self { store, oracle, fanout }
    }

    pub fn store(&self) -> &Arc<DedupStore> {
        &self.store
    }

    /// Run every event of one batch through classify → dedup → fanout
    ///
    /// Arguments:
    /// - `classifier`: the calling chain's classifier
    /// - `events`: transfer events of one block range
    ///
    /// Events are independent; one bad event never affects the rest.
    pub async fn process_batch(&self, classifier: &TradeClassifier, events: Vec<TransferEvent>) -> BatchSummary {
        let mut summary = BatchSummary {
            seen: events.len(),
            ..Default::default()
        };

        if events.is_empty() {
            return summary;
        }

        let chain = classifier.chain();
        let snapshot = self.oracle.snapshot().await;

        for event in events {
            if !self.store.is_new(&event.tx_hash) {
                summary.duplicates += 1;
                continue;
            }

            let record = match classifier.evaluate(&event, &snapshot) {
                Ok(record) => record,
                Err(rejection) => {
                    summary.rejected += 1;
                    match &rejection {
                        Rejection::ValueUnavailable(_) => {
                            log::warn!("⚠️  [{}] Skipping {}: {}", chain.tag(), event.tx_hash, rejection);
                        }
                        _ => {
                            log::debug!("   [{}] Ignored {}: {}", chain.tag(), event.tx_hash, rejection);
                        }
                    }
                    continue;
                }
            };

            let fanout = &self.fanout;
            let recorded = self.store.record_with(record, |record| {
                log::info!(
                    "🐾 [{}] {} | {:.2} tokens | {} | tx {}",
                    chain.tag(),
                    record.category.label(),
                    record.token_amount,
                    record.fiat_value,
                    record.tx_hash
                );
                let pending = fanout.broadcast(record);
                if pending.recipients() > 0 {
                    tokio::spawn(async move {
                        pending.report().await.log_summary();
                    });
                }
            });

            if recorded {
                summary.accepted += 1;
            } else {
                // Lost the race to the other chain's scheduler
                summary.duplicates += 1;
            }
        }

        log::debug!(
            "   [{}] Batch: {} seen, {} accepted, {} duplicate, {} rejected",
            chain.tag(),
            summary.seen,
            summary.accepted,
            summary.duplicates,
            summary.rejected
        );

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::classifier::AlwaysTrade;
    use crate::pipeline::config::ChainConfig;
    use crate::pipeline::error::PipelineResult;
    use crate::pipeline::price_oracle::PriceSource;
    use crate::pipeline::sink::LogSink;
    use crate::pipeline::subscribers::InMemorySubscriberRegistry;
    use crate::pipeline::types::{ChainId, SizeCategory};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    const POOL: &str = "0x4bdece4e422fa015336234e4fc4d39ae6dd75b01";

    struct FixedPrice(f64);

    #[async_trait]
    impl PriceSource for FixedPrice {
        async fn fetch(&self, assets: &[String]) -> PipelineResult<HashMap<String, f64>> {
            Ok(assets.iter().map(|a| (a.clone(), self.0)).collect())
        }
    }

    fn chain_config() -> ChainConfig {
        ChainConfig {
            chain: ChainId::Bsc,
            rpc_url: "http://localhost:8545".to_string(),
            token_address: "0x2466858ab5edad0bb597fe9f008f568b00d25fe3".to_string(),
            pool_address: POOL.to_string(),
            price_asset: "micropets".to_string(),
            token_decimals: 18,
            poll_interval: Duration::from_secs(60),
            lookback_blocks: 5,
            max_blocks_per_poll: 2,
        }
    }

    fn event(hash: &str, from: &str, tokens: u128) -> TransferEvent {
        TransferEvent {
            chain: ChainId::Bsc,
            tx_hash: hash.to_string(),
            from: from.to_string(),
            to: "0x1234567890abcdef1234567890abcdef12345678".to_string(),
            raw_amount: tokens * 10u128.pow(18),
            block_number: 997,
            swap_in_tx: true,
        }
    }

    fn pipeline() -> TradePipeline {
        let oracle = PriceOracle::new(
            Arc::new(FixedPrice(0.01)),
            vec!["micropets".to_string()],
            Duration::from_secs(60),
            HashMap::new(),
        );
        let fanout = NotificationFanout::new(
            Arc::new(InMemorySubscriberRegistry::new()),
            Arc::new(LogSink),
            2,
            "PETS",
        );
        TradePipeline::new(Arc::new(DedupStore::new(100)), Arc::new(oracle), Arc::new(fanout))
    }

    #[tokio::test]
    async fn test_same_hash_twice_yields_one_record() {
        let pipeline = pipeline();
        let classifier = TradeClassifier::new(&chain_config(), Arc::new(AlwaysTrade), "https://media");

        let summary = pipeline
            .process_batch(&classifier, vec![event("0xaa", POOL, 5_000), event("0xaa", POOL, 5_000)])
            .await;

        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(pipeline.store().len(), 1);

        let summary = pipeline.process_batch(&classifier, vec![event("0xAA", POOL, 5_000)]).await;
        assert_eq!(summary.accepted, 0);
        assert_eq!(pipeline.store().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_events_are_counted() {
        let pipeline = pipeline();
        let classifier = TradeClassifier::new(&chain_config(), Arc::new(AlwaysTrade), "https://media");
        let wallet = "0x9999999999999999999999999999999999999999";

        let summary = pipeline
            .process_batch(&classifier, vec![event("0x01", wallet, 50), event("0x02", POOL, 50)])
            .await;

        assert_eq!(summary.seen, 2);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.accepted, 1);

        let recent = pipeline.store().recent(10);
        assert_eq!(recent[0].tx_hash, "0x02");
        assert_eq!(recent[0].category, SizeCategory::Small);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let pipeline = pipeline();
        let classifier = TradeClassifier::new(&chain_config(), Arc::new(AlwaysTrade), "https://media");

        let summary = pipeline.process_batch(&classifier, Vec::new()).await;

        assert_eq!(summary, BatchSummary::default());
    }
}
