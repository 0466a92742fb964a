//! Buyflow Runtime
//!
//! Runs both chain schedulers against one shared pipeline:
//! - Loads configuration from the environment (`.env` supported)
//! - Builds RPC clients, price oracle, trade history, fanout
//! - Spawns one poll scheduler per chain
//! - Shuts down cleanly on CTRL+C (no watermark advanced past unprocessed blocks)
//!
//! Usage:
//!   cargo run --release --bin buyflow
//!
//! Environment variables:
//!   BSC_RPC_URL / ETH_RPC_URL - JSON-RPC endpoints (required)
//!   TELEGRAM_BOT_TOKEN - Bot token (unset: notifications are only logged)
//!   SUBSCRIBER_CHAT_IDS - Comma-separated chat ids to notify
//!   RUST_LOG - Log filter (default: info)

use buyflow::pipeline::{
    classifier::signal_for,
    config::PipelineConfig,
    ChainScheduler, CoinGeckoSource, DedupStore, InMemorySubscriberRegistry, LogSink, MessageBranding, NotificationFanout,
    NotificationSink, PriceOracle, RpcChainClient, StatusQuery, TelegramSink, TradeClassifier, TradePipeline,
};
use dotenv::dotenv;
use log::{error, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 Buyflow Runtime");

    let config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!("✅ Configuration loaded");
    for chain in &config.chains {
        info!(
            "   ├─ [{}] pool {} | every {:?} | lookback {} | max {} blocks",
            chain.chain.tag(),
            chain.pool_address,
            chain.poll_interval,
            chain.lookback_blocks,
            chain.max_blocks_per_poll
        );
    }
    info!("   ├─ Price TTL: {:?}", config.price_ttl);
    info!("   ├─ Retry: {} attempts, ceiling {:?}", config.retry.max_attempts, config.retry.max_delay);
    info!("   └─ Subscribers: {}", config.subscribers.len());

    // Shared state
    let store = Arc::new(DedupStore::new(config.history_capacity));
    let registry = Arc::new(InMemorySubscriberRegistry::with_subscribers(config.subscribers.iter().copied()));

    let sink: Arc<dyn NotificationSink> = match &config.telegram_bot_token {
        Some(token) => Arc::new(TelegramSink::new(token, config.rpc_timeout)?),
        None => {
            warn!("⚠️  TELEGRAM_BOT_TOKEN not set, notifications will only be logged");
            Arc::new(LogSink)
        }
    };

    let branding = MessageBranding::new(
        config.bot_handle.clone(),
        config.staking_url.clone(),
        config.merch_url.clone(),
    )
    .with_markets(&config.chains);

    let fanout = NotificationFanout::new(
        registry.clone(),
        sink,
        config.max_concurrent_deliveries,
        &config.token_symbol,
    )
    .with_branding(branding)
    .with_queue_capacity(config.delivery_queue_capacity);
    let fanout = Arc::new(fanout);

    let assets: Vec<String> = config.chains.iter().map(|c| c.price_asset.clone()).collect();
    let oracle = Arc::new(PriceOracle::new(
        Arc::new(CoinGeckoSource::new(&config.price_api_url, config.rpc_timeout)?),
        assets,
        config.price_ttl,
        config.default_prices.clone(),
    ));

    let pipeline = Arc::new(TradePipeline::new(store.clone(), oracle, fanout.clone()));
    let status = StatusQuery::new(store.clone(), registry.clone());
    let signal = signal_for(config.trade_signal);
    info!("✅ Pipeline created (trade signal: {})", signal.name());

    // One scheduler per chain
    let cancel = CancellationToken::new();
    let mut handles = Vec::with_capacity(config.chains.len());

    for chain_config in &config.chains {
        let client = Arc::new(RpcChainClient::new(
            chain_config.chain,
            &chain_config.rpc_url,
            config.rpc_timeout,
        )?);
        let classifier = TradeClassifier::new(chain_config, signal.clone(), &config.media_base_url);
        let scheduler = ChainScheduler::new(
            chain_config.clone(),
            client,
            classifier,
            pipeline.clone(),
            &config.retry,
            cancel.clone(),
        );

        info!("   ├─ Starting {} scheduler", chain_config.chain);
        handles.push(tokio::spawn(scheduler.run()));
    }

    info!("🔄 Press CTRL+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("");
            info!("⚠️  Received CTRL+C, shutting down...");
        }
        Err(err) => {
            error!("❌ Failed to listen for CTRL+C: {}", err);
        }
    }

    cancel.cancel();

    for handle in handles {
        match handle.await {
            Ok(Some(watermark)) => {
                info!("   ├─ [{}] stopped, next block {}", watermark.chain.tag(), watermark.next_block);
            }
            Ok(None) => {}
            Err(e) => error!("❌ Scheduler task failed: {}", e),
        }
    }

    fanout.shutdown().await;

    for (chain, latest) in status.latest_by_chain() {
        match latest {
            Some(record) => info!("   ├─ [{}] last trade {} at block {}", chain.tag(), record.tx_hash, record.block_number),
            None => info!("   ├─ [{}] no trades recorded", chain.tag()),
        }
    }
    info!("✅ Buyflow stopped ({} trades tracked)", store.total_seen());
    Ok(())
}
