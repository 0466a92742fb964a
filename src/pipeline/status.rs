//! Read-only status views over the trade history
//!
//! Serves the polling frontend (`recent`, `recent_json`) and the chat
//! command views (`latest_by_chain`, `summary`). Always answers from the last
//! known-good records, whatever state the schedulers are in.

use super::dedup::DedupStore;
use super::subscribers::SubscriberRegistry;
use super::types::{ChainId, ChannelId, TradeRecord};
use serde::Serialize;
use std::sync::Arc;

/// Tracking state for one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub tracking: bool,
    pub total_tracked: usize,
}

#[derive(Clone)]
pub struct StatusQuery {
    store: Arc<DedupStore>,
    registry: Arc<dyn SubscriberRegistry>,
}

impl StatusQuery {
    pub fn new(store: Arc<DedupStore>, registry: Arc<dyn SubscriberRegistry>) -> Self {
        Self { store, registry }
    }

    /// Up to `n` records, most recent first
    pub fn recent(&self, n: usize) -> Vec<TradeRecord> {
        self.store.recent(n)
    }

    /// `recent(n)` as a JSON array of camelCase records
    pub fn recent_json(&self, n: usize) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.recent(n))
    }

    /// Most recent record per chain, `None` for a chain with nothing recorded
    pub fn latest_by_chain(&self) -> Vec<(ChainId, Option<TradeRecord>)> {
        ChainId::ALL
            .iter()
            .map(|chain| (*chain, self.store.latest_for(*chain)))
            .collect()
    }

    pub fn summary(&self, channel: ChannelId) -> StatusSummary {
        StatusSummary {
            tracking: self.registry.current_subscribers().contains(&channel),
            total_tracked: self.store.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::subscribers::InMemorySubscriberRegistry;
    use crate::pipeline::types::{FiatValue, SizeCategory};

    fn make_record(hash: &str, chain: ChainId, block: u64) -> TradeRecord {
        TradeRecord {
            chain,
            tx_hash: hash.to_string(),
            recipient: "0x1234567890abcdef1234567890abcdef12345678".to_string(),
            token_amount: 5_000.0,
            category: SizeCategory::Medium,
            fiat_value: FiatValue::Usd(50.0),
            discovered_at: 1_700_000_000_000 + block as i64,
            media_ref: "https://media/MEDIUMBUY.mp4".to_string(),
            block_number: block,
        }
    }

    fn query() -> (Arc<DedupStore>, Arc<InMemorySubscriberRegistry>, StatusQuery) {
        let store = Arc::new(DedupStore::new(100));
        let registry = Arc::new(InMemorySubscriberRegistry::with_subscribers([11]));
        let query = StatusQuery::new(store.clone(), registry.clone());
        (store, registry, query)
    }

    #[test]
    fn test_latest_by_chain() {
        let (store, _, query) = query();
        store.record(make_record("0x01", ChainId::Ethereum, 10));
        store.record(make_record("0x02", ChainId::Ethereum, 11));

        let latest = query.latest_by_chain();

        assert_eq!(latest[0], (ChainId::Bsc, None));
        assert_eq!(latest[1].0, ChainId::Ethereum);
        assert_eq!(latest[1].1.as_ref().unwrap().tx_hash, "0x02");
    }

    #[test]
    fn test_summary_tracks_subscription() {
        let (store, registry, query) = query();
        store.record(make_record("0x01", ChainId::Bsc, 1));

        assert_eq!(
            query.summary(11),
            StatusSummary {
                tracking: true,
                total_tracked: 1
            }
        );

        registry.unsubscribe(11);
        assert!(!query.summary(11).tracking);
    }

    #[test]
    fn test_recent_json_has_record_fields() {
        let (store, _, query) = query();
        store.record(make_record("0xfeed", ChainId::Bsc, 997));

        let json: serde_json::Value = serde_json::from_str(&query.recent_json(10).unwrap()).unwrap();
        let first = &json[0];

        assert_eq!(first["txHash"], "0xfeed");
        assert_eq!(first["blockNumber"], 997);
        assert_eq!(first["tokenAmount"], 5000.0);
        assert!(first.get("recipient").is_some());
        assert!(first.get("category").is_some());
        assert!(first.get("fiatValue").is_some());
        assert!(first.get("discoveredAt").is_some());
        assert!(first.get("mediaRef").is_some());
        assert!(first.get("chain").is_some());
    }
}
