//! Per-chain poll scheduler
//!
//! One `ChainScheduler` per chain, each driven by its own interval timer:
//!
//! ```text
//! Idle ──tick──▶ Polling ──▶ Succeeded ──▶ Idle
//!                   │
//!                   └──────▶ Failed ────▶ Idle
//! ```
//!
//! Per tick:
//! 1. Seed the watermark `W` (next block to fetch) from `height - lookback`
//!    on the first successful height query.
//! 2. `target = min(W + max_blocks_per_poll, height)`; `target < W` is a no-op.
//! 3. Fetch `[W, target]`; retryable errors back off (rate limits on their own,
//!    longer floor) up to `max_attempts` calls, then the tick is given up.
//! 4. Run the batch through the shared `TradePipeline`.
//! 5. Only then advance `W = target + 1` and reset both backoffs.
//!
//! Schedulers share nothing mutable but the pipeline's `DedupStore` and the
//! subscriber snapshot, so one chain stalling never holds up the other.

use super::backoff::ExponentialBackoff;
use super::chain_client::{ChainClient, TransferFilter};
use super::classifier::TradeClassifier;
use super::config::{ChainConfig, RetryConfig};
use super::engine::{BatchSummary, TradePipeline};
use super::error::{PipelineError, PipelineResult};
use super::types::{ChainId, ChainWatermark};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Polling,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Chain head has not moved past the watermark
    NoNewBlocks { next_block: u64 },
    Processed {
        from_block: u64,
        to_block: u64,
        summary: BatchSummary,
    },
    /// Retry budget exhausted or non-retryable error; watermark untouched
    GaveUp { error: PipelineError, attempts: u32 },
    /// Shutdown requested mid-tick; watermark untouched
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub chain: ChainId,
    pub outcome: TickOutcome,
    /// Backoff delays slept during this tick, in order
    pub retry_delays: Vec<Duration>,
}

impl TickReport {
    pub fn is_success(&self) -> bool {
        matches!(
            self.outcome,
            TickOutcome::NoNewBlocks { .. } | TickOutcome::Processed { .. }
        )
    }
}

enum CallFailure {
    Exhausted { error: PipelineError, attempts: u32 },
    Cancelled,
}

pub struct ChainScheduler {
    config: ChainConfig,
    filter: TransferFilter,
    client: Arc<dyn ChainClient>,
    classifier: TradeClassifier,
    pipeline: Arc<TradePipeline>,
    max_attempts: u32,
    transient_backoff: ExponentialBackoff,
    rate_limit_backoff: ExponentialBackoff,
    watermark: Option<u64>,
    state: SchedulerState,
    cancel: CancellationToken,
}

impl ChainScheduler {
    /// Create a scheduler for one chain
    ///
    /// Arguments:
    /// - `config`: chain parameters (cadence, lookback, range cap, filter)
    /// - `client`: RPC access for this chain
    /// - `classifier`: this chain's classifier
    /// - `pipeline`: shared classify → dedup → fanout pipeline
    /// - `retry`: attempt budget and backoff bounds
    /// - `cancel`: shutdown signal, checked before and during every tick
    pub fn new(
        config: ChainConfig,
        client: Arc<dyn ChainClient>,
        classifier: TradeClassifier,
        pipeline: Arc<TradePipeline>,
        retry: &RetryConfig,
        cancel: CancellationToken,
    ) -> Self {
        let transient_backoff =
            ExponentialBackoff::new(retry.initial_delay, retry.max_delay).with_jitter(retry.jitter);
        let rate_limit_backoff =
            ExponentialBackoff::new(retry.rate_limit_initial_delay, retry.max_delay).with_jitter(retry.jitter);

        Self {
            filter: TransferFilter::from(&config),
            config,
            client,
            classifier,
            pipeline,
            max_attempts: retry.max_attempts.max(1),
            transient_backoff,
            rate_limit_backoff,
            watermark: None,
            state: SchedulerState::Idle,
            cancel,
        }
    }

    /// Resume from a known watermark instead of seeding from the chain head
    pub fn with_watermark(mut self, next_block: u64) -> Self {
        self.watermark = Some(next_block);
        self
    }

    pub fn chain(&self) -> ChainId {
        self.config.chain
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn watermark(&self) -> Option<ChainWatermark> {
        self.watermark.map(|next_block| ChainWatermark {
            chain: self.config.chain,
            next_block,
        })
    }

    /// Run one poll cycle; never panics or propagates upstream errors
    pub async fn tick(&mut self) -> TickReport {
        self.state = SchedulerState::Polling;
        let mut retry_delays = Vec::new();

        let outcome = match self.poll(&mut retry_delays).await {
            Ok(outcome) => outcome,
            Err(CallFailure::Exhausted { error, attempts }) => TickOutcome::GaveUp { error, attempts },
            Err(CallFailure::Cancelled) => TickOutcome::Cancelled,
        };

        let tag = self.config.chain.tag();
        match &outcome {
            TickOutcome::NoNewBlocks { next_block } => {
                log::debug!("   [{}] No new blocks (next {})", tag, next_block);
            }
            TickOutcome::Processed {
                from_block,
                to_block,
                summary,
            } => {
                log::info!(
                    "✅ [{}] Blocks {}-{}: {} transfers, {} new trades",
                    tag,
                    from_block,
                    to_block,
                    summary.seen,
                    summary.accepted
                );
            }
            TickOutcome::GaveUp { error, attempts } => {
                log::error!(
                    "❌ [{}] Giving up this tick after {} attempts: {} (watermark stays at {:?})",
                    tag,
                    attempts,
                    error,
                    self.watermark
                );
            }
            TickOutcome::Cancelled => {
                log::info!("🛑 [{}] Tick cancelled (watermark stays at {:?})", tag, self.watermark);
            }
        }

        let report = TickReport {
            chain: self.config.chain,
            outcome,
            retry_delays,
        };

        if report.is_success() {
            self.transient_backoff.reset();
            self.rate_limit_backoff.reset();
            self.state = SchedulerState::Succeeded;
        } else {
            self.state = SchedulerState::Failed;
        }

        report
    }

    async fn poll(&mut self, delays: &mut Vec<Duration>) -> Result<TickOutcome, CallFailure> {
        let height = self
            .call_with_retry("current height", delays, |client| async move {
                client.current_height().await
            })
            .await?;

        let from_block = match self.watermark {
            Some(next_block) => next_block,
            None => {
                let seeded = height.saturating_sub(self.config.lookback_blocks);
                log::info!(
                    "📍 [{}] Seeded watermark at block {} (head {}, lookback {})",
                    self.config.chain.tag(),
                    seeded,
                    height,
                    self.config.lookback_blocks
                );
                self.watermark = Some(seeded);
                seeded
            }
        };

        let to_block = from_block.saturating_add(self.config.max_blocks_per_poll).min(height);
        if to_block < from_block {
            return Ok(TickOutcome::NoNewBlocks { next_block: from_block });
        }

        let filter = self.filter.clone();
        let events = self
            .call_with_retry("transfer events", delays, move |client| {
                let filter = filter.clone();
                async move { client.transfer_events(from_block, to_block, &filter).await }
            })
            .await?;

        let summary = self.pipeline.process_batch(&self.classifier, events).await;

        self.watermark = Some(to_block + 1);
        log::debug!(
            "   [{}] Watermark advanced to {}",
            self.config.chain.tag(),
            to_block + 1
        );

        Ok(TickOutcome::Processed {
            from_block,
            to_block,
            summary,
        })
    }

    /// Call `op` until it succeeds, fails non-retryably, or the budget runs out
    async fn call_with_retry<T, F, Fut>(
        &mut self,
        what: &str,
        delays: &mut Vec<Duration>,
        mut op: F,
    ) -> Result<T, CallFailure>
    where
        F: FnMut(Arc<dyn ChainClient>) -> Fut,
        Fut: Future<Output = PipelineResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(CallFailure::Cancelled),
                result = op(self.client.clone()) => result,
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !error.is_retryable() || attempt >= self.max_attempts {
                return Err(CallFailure::Exhausted {
                    error,
                    attempts: attempt,
                });
            }

            let delay = match &error {
                PipelineError::RateLimited { retry_after } => {
                    let delay = self.rate_limit_backoff.next_delay();
                    match retry_after {
                        Some(hint) => delay.max(*hint).min(self.rate_limit_backoff.max_delay()),
                        None => delay,
                    }
                }
                _ => self.transient_backoff.next_delay(),
            };

            log::warn!(
                "⚠️  [{}] {} failed (attempt {}/{}): {}, retrying in {:?}",
                self.config.chain.tag(),
                what,
                attempt,
                self.max_attempts,
                error,
                delay
            );
            delays.push(delay);

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(CallFailure::Cancelled),
                _ = sleep(delay) => {}
            }
        }
    }

    /// Poll on the configured cadence until `cancel` fires
    ///
    /// Returns the final watermark so the caller can log or persist it.
    pub async fn run(mut self) -> Option<ChainWatermark> {
        let tag = self.config.chain.tag();
        log::info!(
            "⏰ [{}] Scheduler started (interval {:?}, lookback {}, max {} blocks/poll, signal {})",
            tag,
            self.config.poll_interval,
            self.config.lookback_blocks,
            self.config.max_blocks_per_poll,
            self.classifier.signal_name()
        );

        let mut timer = interval(self.config.poll_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            let report = self.tick().await;
            if report.outcome == TickOutcome::Cancelled {
                break;
            }
            self.state = SchedulerState::Idle;
        }

        self.state = SchedulerState::Idle;
        log::info!("🛑 [{}] Scheduler stopped (watermark {:?})", tag, self.watermark);
        self.watermark()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::classifier::AlwaysTrade;
    use crate::pipeline::dedup::DedupStore;
    use crate::pipeline::fanout::NotificationFanout;
    use crate::pipeline::price_oracle::{PriceOracle, PriceSource};
    use crate::pipeline::sink::LogSink;
    use crate::pipeline::subscribers::InMemorySubscriberRegistry;
    use crate::pipeline::types::TransferEvent;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    const POOL: &str = "0x4bdece4e422fa015336234e4fc4d39ae6dd75b01";

    /// Scripted client: heights and event responses are popped per call
    #[derive(Default)]
    struct ScriptedClient {
        heights: Mutex<VecDeque<PipelineResult<u64>>>,
        events: Mutex<VecDeque<PipelineResult<Vec<TransferEvent>>>>,
        ranges: Mutex<Vec<(u64, u64)>>,
    }

    impl ScriptedClient {
        fn push_height(&self, h: PipelineResult<u64>) {
            self.heights.lock().unwrap().push_back(h);
        }

        fn push_events(&self, e: PipelineResult<Vec<TransferEvent>>) {
            self.events.lock().unwrap().push_back(e);
        }
    }

    #[async_trait]
    impl ChainClient for ScriptedClient {
        fn chain(&self) -> ChainId {
            ChainId::Bsc
        }

        async fn current_height(&self) -> PipelineResult<u64> {
            self.heights
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(PipelineError::TransientNetwork("script exhausted".to_string())))
        }

        async fn transfer_events(
            &self,
            from_block: u64,
            to_block: u64,
            _filter: &TransferFilter,
        ) -> PipelineResult<Vec<TransferEvent>> {
            self.ranges.lock().unwrap().push((from_block, to_block));
            self.events.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()))
        }
    }

    struct NoPrice;

    #[async_trait]
    impl PriceSource for NoPrice {
        async fn fetch(&self, _assets: &[String]) -> PipelineResult<HashMap<String, f64>> {
            Err(PipelineError::TransientNetwork("offline".to_string()))
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

    fn retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_secs(2),
            rate_limit_initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
        }
    }

    fn scheduler(client: Arc<ScriptedClient>, max_attempts: u32) -> ChainScheduler {
        let config = chain_config();
        let oracle = PriceOracle::new(Arc::new(NoPrice), vec!["micropets".to_string()], Duration::from_secs(60), HashMap::new());
        let fanout = NotificationFanout::new(Arc::new(InMemorySubscriberRegistry::new()), Arc::new(LogSink), 2, "PETS");
        let pipeline = TradePipeline::new(Arc::new(DedupStore::new(100)), Arc::new(oracle), Arc::new(fanout));
        let classifier = TradeClassifier::new(&config, Arc::new(AlwaysTrade), "https://media");
        ChainScheduler::new(
            config,
            client,
            classifier,
            Arc::new(pipeline),
            &retry(max_attempts),
            CancellationToken::new(),
        )
    }

    fn rate_limited() -> PipelineError {
        PipelineError::RateLimited { retry_after: None }
    }

    #[tokio::test]
    async fn test_seeds_and_advances_watermark() {
        let client = Arc::new(ScriptedClient::default());
        client.push_height(Ok(1_000));
        let mut scheduler = scheduler(client.clone(), 3);

        let report = scheduler.tick().await;

        assert!(report.is_success());
        assert_eq!(*client.ranges.lock().unwrap(), vec![(995, 997)]);
        assert_eq!(scheduler.watermark().unwrap().next_block, 998);
        assert_eq!(scheduler.state(), SchedulerState::Succeeded);
    }

    #[tokio::test]
    async fn test_no_new_blocks_is_noop() {
        let client = Arc::new(ScriptedClient::default());
        client.push_height(Ok(1_000));
        let mut scheduler = scheduler(client.clone(), 3).with_watermark(1_001);

        let report = scheduler.tick().await;

        assert_eq!(report.outcome, TickOutcome::NoNewBlocks { next_block: 1_001 });
        assert!(client.ranges.lock().unwrap().is_empty());
        assert_eq!(scheduler.watermark().unwrap().next_block, 1_001);
    }

    #[tokio::test]
    async fn test_rate_limit_backoff_is_capped_and_gives_up() {
        // Test: 10 consecutive RateLimited responses
        tokio::time::pause();
        let client = Arc::new(ScriptedClient::default());
        for _ in 0..10 {
            client.push_height(Err(rate_limited()));
        }
        let mut scheduler = scheduler(client.clone(), 10).with_watermark(500);

        let report = scheduler.tick().await;

        assert_eq!(
            report.outcome,
            TickOutcome::GaveUp {
                error: rate_limited(),
                attempts: 10
            }
        );
        assert_eq!(report.retry_delays.len(), 9);
        assert!(report.retry_delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(report.retry_delays.iter().all(|d| *d <= Duration::from_secs(60)));
        assert_eq!(report.retry_delays[0], Duration::from_secs(5));
        assert_eq!(*report.retry_delays.last().unwrap(), Duration::from_secs(60));
        assert_eq!(scheduler.state(), SchedulerState::Failed);
        assert_eq!(scheduler.watermark().unwrap().next_block, 500);

        // Scheduler survives and the next tick proceeds normally
        client.push_height(Ok(501));
        let report = scheduler.tick().await;
        assert!(report.is_success());
        assert_eq!(scheduler.watermark().unwrap().next_block, 502);
    }

    #[tokio::test]
    async fn test_retry_after_hint_is_clamped() {
        // Test: hints below the floor, between floor and ceiling, and past the ceiling
        tokio::time::pause();
        let client = Arc::new(ScriptedClient::default());
        for secs in [1, 20, 300] {
            client.push_height(Err(PipelineError::RateLimited {
                retry_after: Some(Duration::from_secs(secs)),
            }));
        }
        client.push_height(Ok(1_000));
        let mut scheduler = scheduler(client.clone(), 4);

        let report = scheduler.tick().await;

        assert!(report.is_success());
        assert_eq!(
            report.retry_delays,
            vec![Duration::from_secs(5), Duration::from_secs(20), Duration::from_secs(60)]
        );
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_watermark() {
        tokio::time::pause();
        let client = Arc::new(ScriptedClient::default());
        client.push_height(Ok(1_000));
        client.push_events(Err(rate_limited()));
        client.push_events(Err(rate_limited()));
        let mut scheduler = scheduler(client.clone(), 2).with_watermark(990);

        let report = scheduler.tick().await;

        assert!(matches!(report.outcome, TickOutcome::GaveUp { attempts: 2, .. }));
        assert_eq!(scheduler.watermark().unwrap().next_block, 990);

        // Same range is retried next tick
        client.push_height(Ok(1_000));
        scheduler.tick().await;
        let ranges = client.ranges.lock().unwrap().clone();
        assert_eq!(ranges, vec![(990, 992), (990, 992), (990, 992)]);
        assert_eq!(scheduler.watermark().unwrap().next_block, 993);
    }

    #[tokio::test]
    async fn test_watermark_is_monotonic() {
        let client = Arc::new(ScriptedClient::default());
        let mut scheduler = scheduler(client.clone(), 1);
        let mut last = 0;

        for height in [1_000, 1_000, 1_003, 1_003, 1_010] {
            client.push_height(Ok(height));
            scheduler.tick().await;
            let next = scheduler.watermark().unwrap().next_block;
            assert!(next >= last);
            last = next;
        }

        // Failure in between leaves it where it was
        scheduler.tick().await;
        assert_eq!(scheduler.watermark().unwrap().next_block, last);
    }

    #[tokio::test]
    async fn test_backoff_resets_after_success() {
        tokio::time::pause();
        let client = Arc::new(ScriptedClient::default());
        client.push_height(Err(PipelineError::TransientNetwork("reset".to_string())));
        client.push_height(Ok(1_000));
        let mut scheduler = scheduler(client.clone(), 3);

        let first = scheduler.tick().await;
        assert_eq!(first.retry_delays, vec![Duration::from_secs(2)]);

        client.push_height(Err(PipelineError::TransientNetwork("reset".to_string())));
        client.push_height(Ok(1_000));
        let second = scheduler.tick().await;
        assert_eq!(second.retry_delays, vec![Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn test_non_retryable_error_gives_up_immediately() {
        let client = Arc::new(ScriptedClient::default());
        client.push_height(Err(PipelineError::Configuration("bad url".to_string())));
        let mut scheduler = scheduler(client.clone(), 5);

        let report = scheduler.tick().await;

        assert!(matches!(report.outcome, TickOutcome::GaveUp { attempts: 1, .. }));
        assert!(report.retry_delays.is_empty());
        assert!(scheduler.watermark().is_none());
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        tokio::time::pause();
        let client = Arc::new(ScriptedClient::default());
        for _ in 0..5 {
            client.push_height(Err(rate_limited()));
        }
        let mut scheduler = scheduler(client.clone(), 5).with_watermark(42);
        let cancel = scheduler.cancel.clone();

        let handle = tokio::spawn(async move {
            let report = scheduler.tick().await;
            (report, scheduler.watermark())
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        let (report, watermark) = handle.await.unwrap();
        assert_eq!(report.outcome, TickOutcome::Cancelled);
        assert_eq!(watermark.unwrap().next_block, 42);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        tokio::time::pause();
        let client = Arc::new(ScriptedClient::default());
        client.push_height(Ok(1_000));
        let scheduler = scheduler(client.clone(), 1);
        let cancel = scheduler.cancel.clone();

        let handle = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        let watermark = handle.await.unwrap();
        assert_eq!(watermark.unwrap().next_block, 998);
    }
}
