//! Notification fanout
//!
//! ## Architecture
//!
//! ```text
//! broadcast(record)
//!     ↓ render once, snapshot subscribers
//! per-subscriber FIFO queue (one worker task per channel)
//!     ↓ acquire global delivery permit (Semaphore)
//! NotificationSink::deliver (media, then text-only fallback)
//!     ↓
//! oneshot outcome → PendingBroadcast::report()
//! ```
//!
//! - Ordering: each channel has exactly one worker draining its queue, so
//!   notifications to one subscriber arrive in broadcast order. A queue
//!   retired on unsubscribe keeps draining; if the channel resubscribes, the
//!   new worker waits for it before delivering.
//! - Isolation: a failing or slow subscriber only delays its own queue.
//! - Bounded: at most `max_concurrent_deliveries` sink calls in flight, and at
//!   most `queue_capacity` pending jobs per channel (overflow is reported as
//!   `Failed` and dropped).
//! - `broadcast` never blocks on delivery and never returns an error.

use super::render::{render_trade, MessageBranding, RenderedMessage};
use super::sink::NotificationSink;
use super::subscribers::SubscriberRegistry;
use super::types::{ChannelId, TradeRecord};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Media delivery failed, the text-only retry went through
    DeliveredTextOnly,
    Failed(String),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        !matches!(self, DeliveryOutcome::Failed(_))
    }
}

/// Per-subscriber results of one broadcast
#[derive(Debug, Clone)]
pub struct BroadcastReport {
    pub tx_hash: String,
    pub outcomes: Vec<(ChannelId, DeliveryOutcome)>,
}

impl BroadcastReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_delivered()).count()
    }

    pub fn failed(&self) -> Vec<ChannelId> {
        self.outcomes
            .iter()
            .filter(|(_, o)| !o.is_delivered())
            .map(|(channel, _)| *channel)
            .collect()
    }

    pub fn is_partial_failure(&self) -> bool {
        self.outcomes.iter().any(|(_, o)| !o.is_delivered())
    }

    /// Log a one-line summary (warn on any failure)
    pub fn log_summary(&self) {
        if self.is_partial_failure() {
            log::warn!(
                "⚠️  Broadcast {} partially failed: {}/{} delivered, failed channels {:?}",
                self.tx_hash,
                self.delivered(),
                self.outcomes.len(),
                self.failed()
            );
        } else {
            log::debug!(
                "✅ Broadcast {} delivered to {} subscribers",
                self.tx_hash,
                self.outcomes.len()
            );
        }
    }
}

/// Handle to the in-flight deliveries of one broadcast
#[derive(Debug)]
pub struct PendingBroadcast {
    tx_hash: String,
    pending: Vec<(ChannelId, oneshot::Receiver<DeliveryOutcome>)>,
}

impl PendingBroadcast {
    pub fn recipients(&self) -> usize {
        self.pending.len()
    }

    /// Wait for every recipient's outcome
    pub async fn report(self) -> BroadcastReport {
        let mut outcomes = Vec::with_capacity(self.pending.len());
        for (channel, rx) in self.pending {
            let outcome = rx
                .await
                .unwrap_or_else(|_| DeliveryOutcome::Failed("delivery worker stopped".to_string()));
            outcomes.push((channel, outcome));
        }
        BroadcastReport {
            tx_hash: self.tx_hash,
            outcomes,
        }
    }
}

struct Job {
    message: RenderedMessage,
    tx_hash: String,
    reply: oneshot::Sender<DeliveryOutcome>,
}

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

struct Worker {
    tx: mpsc::Sender<Job>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Workers {
    active: HashMap<ChannelId, Worker>,
    /// Queues of unsubscribed channels that are still draining
    retiring: HashMap<ChannelId, JoinHandle<()>>,
}

impl Workers {
    fn retire_inactive(&mut self, subscribers: &[ChannelId]) {
        self.retiring.retain(|_, handle| !handle.is_finished());

        let active: HashSet<ChannelId> = subscribers.iter().copied().collect();
        let gone: Vec<ChannelId> = self
            .active
            .keys()
            .filter(|channel| !active.contains(channel))
            .copied()
            .collect();

        for channel in gone {
            if let Some(Worker { tx, handle }) = self.active.remove(&channel) {
                drop(tx);
                log::debug!("🔕 Retiring delivery queue for chat {}", channel);
                self.retiring.insert(channel, handle);
            }
        }
    }
}

pub struct NotificationFanout {
    registry: Arc<dyn SubscriberRegistry>,
    sink: Arc<dyn NotificationSink>,
    permits: Arc<Semaphore>,
    token_symbol: String,
    branding: MessageBranding,
    queue_capacity: usize,
    workers: Mutex<Workers>,
}

impl NotificationFanout {
    pub fn new(
        registry: Arc<dyn SubscriberRegistry>,
        sink: Arc<dyn NotificationSink>,
        max_concurrent_deliveries: usize,
        token_symbol: &str,
    ) -> Self {
        Self {
            registry,
            sink,
            permits: Arc::new(Semaphore::new(max_concurrent_deliveries.max(1))),
            token_symbol: token_symbol.to_string(),
            branding: MessageBranding::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: Mutex::new(Workers::default()),
        }
    }

    pub fn with_branding(mut self, branding: MessageBranding) -> Self {
        self.branding = branding;
        self
    }

    /// Cap the number of pending notifications per subscriber
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    fn lock_workers(&self) -> MutexGuard<'_, Workers> {
        self.workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue `record` for every current subscriber
    ///
    /// Must be called from within a Tokio runtime. Returns immediately.
    pub fn broadcast(&self, record: &TradeRecord) -> PendingBroadcast {
        let subscribers = self.registry.current_subscribers();
        let message = render_trade(record, &self.token_symbol, &self.branding);
        let mut guard = self.lock_workers();
        guard.retire_inactive(&subscribers);
        let Workers { active, retiring } = &mut *guard;

        let mut pending = Vec::with_capacity(subscribers.len());
        for channel in subscribers {
            let (reply, rx) = oneshot::channel();
            let job = Job {
                message: message.clone(),
                tx_hash: record.tx_hash.clone(),
                reply,
            };

            let worker = active
                .entry(channel)
                .or_insert_with(|| self.spawn_worker(channel, retiring.remove(&channel)));

            match worker.tx.try_send(job) {
                Ok(()) => {}
                Err(TrySendError::Full(job)) => {
                    log::warn!(
                        "⚠️  Delivery queue for chat {} is full ({} pending), dropping {}",
                        channel,
                        self.queue_capacity,
                        job.tx_hash
                    );
                    let _ = job.reply.send(DeliveryOutcome::Failed("delivery queue full".to_string()));
                }
                Err(TrySendError::Closed(job)) => {
                    log::warn!("⚠️  Delivery worker for chat {} was gone, restarting", channel);
                    let fresh = self.spawn_worker(channel, None);
                    let _ = fresh.tx.try_send(job);
                    *worker = fresh;
                }
            }

            pending.push((channel, rx));
        }

        PendingBroadcast {
            tx_hash: record.tx_hash.clone(),
            pending,
        }
    }

    fn spawn_worker(&self, channel: ChannelId, previous: Option<JoinHandle<()>>) -> Worker {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let handle = tokio::spawn(run_worker(
            channel,
            previous,
            rx,
            self.sink.clone(),
            self.permits.clone(),
        ));
        Worker { tx, handle }
    }

    /// Number of channels with a live delivery queue
    pub fn active_queues(&self) -> usize {
        self.lock_workers().active.len()
    }

    /// Close every queue and wait for queued deliveries to finish
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.lock_workers();
            let mut handles: Vec<JoinHandle<()>> = workers
                .active
                .drain()
                .map(|(_, Worker { tx, handle })| {
                    drop(tx);
                    handle
                })
                .collect();
            handles.extend(workers.retiring.drain().map(|(_, handle)| handle));
            handles
        };
        log::info!("🔄 Draining {} delivery queues...", handles.len());

        for handle in handles {
            if let Err(e) = handle.await {
                log::error!("❌ Delivery worker ended abnormally: {}", e);
            }
        }
    }
}

async fn run_worker(
    channel: ChannelId,
    previous: Option<JoinHandle<()>>,
    mut rx: mpsc::Receiver<Job>,
    sink: Arc<dyn NotificationSink>,
    permits: Arc<Semaphore>,
) {
    // A retired queue for this channel must finish first
    if let Some(previous) = previous {
        if let Err(e) = previous.await {
            log::error!("❌ Retired delivery worker for chat {} ended abnormally: {}", channel, e);
        }
    }

    while let Some(job) = rx.recv().await {
        let outcome = match permits.acquire().await {
            Ok(_permit) => deliver_with_fallback(sink.as_ref(), channel, &job.message).await,
            Err(_) => DeliveryOutcome::Failed("fanout closed".to_string()),
        };

        match &outcome {
            DeliveryOutcome::Delivered => {
                log::debug!("📨 Delivered {} to chat {}", job.tx_hash, channel);
            }
            DeliveryOutcome::DeliveredTextOnly => {
                log::info!("📨 Delivered {} to chat {} (text only)", job.tx_hash, channel);
            }
            DeliveryOutcome::Failed(e) => {
                log::error!("❌ Failed to deliver {} to chat {}: {}", job.tx_hash, channel, e);
            }
        }

        let _ = job.reply.send(outcome);
    }
}

async fn deliver_with_fallback(
    sink: &dyn NotificationSink,
    channel: ChannelId,
    message: &RenderedMessage,
) -> DeliveryOutcome {
    let Some(media) = message.media.as_deref() else {
        return match sink.deliver(channel, &message.text, None).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) => DeliveryOutcome::Failed(e.to_string()),
        };
    };

    match sink.deliver(channel, &message.text, Some(media)).await {
        Ok(()) => DeliveryOutcome::Delivered,
        Err(e) => {
            log::warn!("⚠️  Media delivery to chat {} failed ({}), retrying as text", channel, e);
            let fallback = message.text_only();
            match sink.deliver(channel, &fallback.text, None).await {
                Ok(()) => DeliveryOutcome::DeliveredTextOnly,
                Err(e) => DeliveryOutcome::Failed(e.to_string()),
            }
        }
    }
}
