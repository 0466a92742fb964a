//! Deduplicated, bounded trade history
//!
//! - `ring`: the last `capacity` TradeRecords in recording order (oldest evicted)
//! - `seen`: every transaction hash ever recorded, never evicted
//!
//! Both live behind one mutex so the membership check and the insert form a
//! single critical section; two chain schedulers recording concurrently can
//! never double-record a hash.

use super::types::{ChainId, TradeRecord};
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Default)]
struct DedupInner {
    ring: VecDeque<TradeRecord>,
    seen: HashSet<String>,
}

#[derive(Debug)]
pub struct DedupStore {
    inner: Mutex<DedupInner>,
    capacity: usize,
}

impl Default for DedupStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl DedupStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(DedupInner {
                ring: VecDeque::with_capacity(capacity),
                seen: HashSet::new(),
            }),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, DedupInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cheap pre-check; the authoritative check happens inside `record`
    pub fn is_new(&self, tx_hash: &str) -> bool {
        !self.lock().seen.contains(&tx_hash.to_lowercase())
    }

    /// Record a trade; returns false (and drops it) if the hash was already seen
    pub fn record(&self, record: TradeRecord) -> bool {
        self.record_with(record, |_| ())
    }

    /// Record a trade and, only if it was new, run `on_recorded` while still
    /// holding the store lock.
    ///
    /// `on_recorded` must not block; it exists so that hand-off to the
    /// notification queues happens in the same order records are appended.
    pub fn record_with<F>(&self, record: TradeRecord, on_recorded: F) -> bool
    where
        F: FnOnce(&TradeRecord),
    {
        let mut inner = self.lock();
        let key = record.tx_hash.to_lowercase();

        if !inner.seen.insert(key) {
            return false;
        }

        on_recorded(&record);

        inner.ring.push_back(record);
        while inner.ring.len() > self.capacity {
            inner.ring.pop_front();
        }
        true
    }

    /// Up to `n` records, most recent first
    pub fn recent(&self, n: usize) -> Vec<TradeRecord> {
        self.lock().ring.iter().rev().take(n).cloned().collect()
    }

    /// Most recent record for `chain`, if any is still in the ring
    pub fn latest_for(&self, chain: ChainId) -> Option<TradeRecord> {
        self.lock().ring.iter().rev().find(|r| r.chain == chain).cloned()
    }

    /// Records currently held in the ring
    pub fn len(&self) -> usize {
        self.lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct hashes recorded over the process lifetime
    pub fn total_seen(&self) -> usize {
        self.lock().seen.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{FiatValue, SizeCategory};
    use std::sync::Arc;

    fn make_record(i: usize, chain: ChainId) -> TradeRecord {
        TradeRecord {
            chain,
            tx_hash: format!("0x{:064x}", i),
            recipient: "0x1234567890abcdef1234567890abcdef12345678".to_string(),
            token_amount: 100.0,
            category: SizeCategory::Small,
            fiat_value: FiatValue::Usd(1.0),
            discovered_at: 1_700_000_000_000 + i as i64,
            media_ref: String::new(),
            block_number: i as u64,
        }
    }

    #[test]
    fn test_duplicate_hash_recorded_once() {
        let store = DedupStore::new(100);

        assert!(store.is_new(&make_record(1, ChainId::Bsc).tx_hash));
        assert!(store.record(make_record(1, ChainId::Bsc)));
        assert!(!store.record(make_record(1, ChainId::Bsc)));

        assert!(!store.is_new(&make_record(1, ChainId::Bsc).tx_hash));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_hash_compare_ignores_case() {
        let store = DedupStore::new(10);
        let mut record = make_record(7, ChainId::Bsc);
        record.tx_hash = "0xABCDEF".to_string();
        store.record(record);

        assert!(!store.is_new("0xabcdef"));
    }

    #[test]
    fn test_bounded_history_keeps_last_100() {
        let store = DedupStore::new(100);
        for i in 0..150 {
            assert!(store.record(make_record(i, ChainId::Bsc)));
        }

        let recent = store.recent(100);

        assert_eq!(recent.len(), 100);
        assert_eq!(recent[0].block_number, 149);
        assert_eq!(recent[99].block_number, 50);
        assert!(recent.windows(2).all(|w| w[0].discovered_at > w[1].discovered_at));
    }

    #[test]
    fn test_evicted_hash_stays_deduplicated() {
        // Test: Dedup holds for the process lifetime, not just the ring
        let store = DedupStore::new(2);
        store.record(make_record(1, ChainId::Bsc));
        store.record(make_record(2, ChainId::Bsc));
        store.record(make_record(3, ChainId::Bsc));

        assert_eq!(store.len(), 2);
        assert!(!store.record(make_record(1, ChainId::Bsc)));
        assert_eq!(store.total_seen(), 3);
    }

    #[test]
    fn test_record_with_runs_only_for_new() {
        let store = DedupStore::new(10);
        let mut calls = 0;

        store.record_with(make_record(1, ChainId::Bsc), |_| calls += 1);
        store.record_with(make_record(1, ChainId::Bsc), |_| calls += 1);

        assert_eq!(calls, 1);
    }

    #[test]
    fn test_latest_for_chain() {
        let store = DedupStore::new(10);
        store.record(make_record(1, ChainId::Bsc));
        store.record(make_record(2, ChainId::Ethereum));
        store.record(make_record(3, ChainId::Bsc));

        assert_eq!(store.latest_for(ChainId::Bsc).unwrap().block_number, 3);
        assert_eq!(store.latest_for(ChainId::Ethereum).unwrap().block_number, 2);
    }

    #[test]
    fn test_concurrent_writers_never_double_record() {
        let store = Arc::new(DedupStore::new(1_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..200)
                        .filter(|i| store.record(make_record(*i, ChainId::Bsc)))
                        .count()
                })
            })
            .collect();

        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(accepted, 200);
        assert_eq!(store.len(), 200);
    }
}
