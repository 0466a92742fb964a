//! Spot price oracle with TTL caching
//!
//! `PriceOracle::snapshot()` never fails:
//! 1. Within `min_refresh` of the last fetch attempt → cached snapshot
//! 2. Otherwise fetch from the `PriceSource`
//! 3. On failure → last good snapshot (stale), else built-in defaults
//!
//! The cache lock is held across the fetch, so callers arriving during a
//! refresh wait for it and all receive the same snapshot.
//!
//! ## API Reference (CoinGecko)
//!
//! Endpoint: `{base}/simple/price?ids={a,b}&vs_currencies=usd`
//! Returns: `{ "<id>": { "usd": <price> }, ... }`

use super::error::{PipelineError, PipelineResult};
use super::types::PriceSnapshot;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// USD unit prices for the requested asset ids
    async fn fetch(&self, assets: &[String]) -> PipelineResult<HashMap<String, f64>>;
}

/// CoinGecko `simple/price` client
pub struct CoinGeckoSource {
    base_url: String,
    http: reqwest::Client,
}

impl CoinGeckoSource {
    pub fn new(base_url: &str, timeout: Duration) -> PipelineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Configuration(format!("price HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    async fn fetch(&self, assets: &[String]) -> PipelineResult<HashMap<String, f64>> {
        let url = format!("{}/simple/price", self.base_url);
        let ids = assets.join(",");

        let response = self
            .http
            .get(&url)
            .query(&[("ids", ids.as_str()), ("vs_currencies", "usd")])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PipelineError::RateLimited { retry_after: None });
        }
        if !response.status().is_success() {
            return Err(PipelineError::TransientNetwork(format!(
                "price API error: {}",
                response.status()
            )));
        }

        let body: HashMap<String, HashMap<String, f64>> = response.json().await?;

        Ok(body
            .into_iter()
            .filter_map(|(asset, quotes)| quotes.get("usd").map(|usd| (asset, *usd)))
            .collect())
    }
}

#[derive(Debug, Default)]
struct PriceCache {
    last_good: Option<PriceSnapshot>,
    last_attempt: Option<Instant>,
}

/// TTL-cached price snapshot provider
pub struct PriceOracle {
    source: Arc<dyn PriceSource>,
    assets: Vec<String>,
    min_refresh: Duration,
    defaults: HashMap<String, f64>,
    cache: Mutex<PriceCache>,
}

impl PriceOracle {
    pub fn new(
        source: Arc<dyn PriceSource>,
        assets: Vec<String>,
        min_refresh: Duration,
        defaults: HashMap<String, f64>,
    ) -> Self {
        let mut assets = assets;
        assets.sort();
        assets.dedup();

        Self {
            source,
            assets,
            min_refresh,
            defaults,
            cache: Mutex::new(PriceCache::default()),
        }
    }

    pub async fn snapshot(&self) -> PriceSnapshot {
        let mut cache = self.cache.lock().await;

        if let Some(attempted) = cache.last_attempt {
            if attempted.elapsed() < self.min_refresh {
                return cache
                    .last_good
                    .clone()
                    .unwrap_or_else(|| self.default_snapshot());
            }
        }

        cache.last_attempt = Some(Instant::now());

        match self.source.fetch(&self.assets).await {
            Ok(prices) if !prices.is_empty() => {
                let mut prices = prices;
                for (asset, price) in &self.defaults {
                    prices.entry(asset.clone()).or_insert(*price);
                }
                let snapshot = PriceSnapshot {
                    prices,
                    fetched_at: Some(chrono::Utc::now().timestamp()),
                };
                log::debug!("💲 Refreshed prices: {:?}", snapshot.prices);
                cache.last_good = Some(snapshot.clone());
                snapshot
            }
            Ok(_) => {
                log::warn!("⚠️  Price source returned no quotes for {:?}", self.assets);
                self.fallback(&cache)
            }
            Err(e) => {
                log::warn!("⚠️  Price refresh failed: {}", e);
                self.fallback(&cache)
            }
        }
    }

    fn fallback(&self, cache: &PriceCache) -> PriceSnapshot {
        match &cache.last_good {
            Some(snapshot) => {
                log::warn!("⚠️  Serving stale prices fetched at {:?}", snapshot.fetched_at);
                snapshot.clone()
            }
            None => {
                log::warn!("⚠️  No price fetched yet, serving defaults {:?}", self.defaults);
                self.default_snapshot()
            }
        }
    }

    fn default_snapshot(&self) -> PriceSnapshot {
        PriceSnapshot {
            prices: self.defaults.clone(),
            fetched_at: None,
        }
    }
}
