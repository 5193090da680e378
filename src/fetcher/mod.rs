//! External price sources and the ordered fallback chain in front of them.

pub mod coincap;
pub mod coingecko;
pub mod fmp;
pub mod universe;
pub mod yahoo;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::registry::Registry;
use crate::types::{Asset, Category, PriceObservation};

pub use coincap::CoinCapSource;
pub use coingecko::CoinGeckoSource;
pub use fmp::FmpSource;
pub use yahoo::YahooSource;

/// Observations from one source plus the number of requested assets it could not price.
#[derive(Debug, Default, Clone)]
pub struct SourceBatch {
    pub observations: Vec<PriceObservation>,
    pub failed: usize,
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    fn id(&self) -> &'static str;

    /// Price every asset it can. Per-asset failures are counted in `failed`, never
    /// returned as an error. `as_of` is the calendar day snapshot sources stamp on
    /// their observations; bar sources date each bar themselves.
    async fn fetch(&self, assets: &[Asset], as_of: NaiveDate) -> Result<SourceBatch>;
}

/// Winning source and its batch.
#[derive(Debug)]
pub struct ChainOutcome {
    pub source: &'static str,
    pub batch: SourceBatch,
}

/// Sources tried in order; the first that prices at least one asset wins.
#[derive(Clone)]
pub struct SourceChain {
    sources: Vec<Arc<dyn PriceSource>>,
}

impl SourceChain {
    pub fn new(sources: Vec<Arc<dyn PriceSource>>) -> Self {
        Self { sources }
    }

    pub fn source_ids(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.id()).collect()
    }

    pub async fn fetch(&self, assets: &[Asset], as_of: NaiveDate) -> Result<ChainOutcome> {
        let mut attempts = Vec::new();

        for source in &self.sources {
            match source.fetch(assets, as_of).await {
                Ok(batch) if !batch.observations.is_empty() || assets.is_empty() => {
                    info!(
                        source = source.id(),
                        priced = batch.observations.len(),
                        failed = batch.failed,
                        "Fetched {} observations from {} ({} assets failed)",
                        batch.observations.len(),
                        source.id(),
                        batch.failed,
                    );
                    return Ok(ChainOutcome { source: source.id(), batch });
                }
                Ok(batch) => {
                    warn!(source = source.id(), "Source returned no usable prices, trying next");
                    attempts.push(format!("{}: no usable prices ({} failed)", source.id(), batch.failed));
                }
                Err(e) => {
                    warn!(source = source.id(), "Source failed, trying next: {e}");
                    attempts.push(format!("{}: {e}", source.id()));
                }
            }
        }

        if attempts.is_empty() {
            attempts.push("no sources configured".to_string());
        }
        Err(AppError::SourcesExhausted(attempts))
    }
}

/// One fallback chain per category, built from the registry's source ids.
#[derive(Clone)]
pub struct MarketData {
    chains: HashMap<Category, SourceChain>,
}

impl MarketData {
    pub fn new(chains: HashMap<Category, SourceChain>) -> Self {
        Self { chains }
    }

    pub fn from_config(cfg: &Config, registry: &Registry) -> Result<Self> {
        let client = http_client(cfg)?;
        let delay = Duration::from_millis(cfg.fetch_batch_delay_ms);
        let mut chains = HashMap::new();

        for competition in registry.configs() {
            let mut sources: Vec<Arc<dyn PriceSource>> = Vec::new();
            for &id in competition.data_sources {
                match id {
                    "yahoo" => sources.push(Arc::new(YahooSource::new(
                        client.clone(),
                        cfg.yahoo_api_url.clone(),
                        delay,
                    ))),
                    "fmp" => match &cfg.fmp_api_key {
                        Some(key) => sources.push(Arc::new(FmpSource::new(
                            client.clone(),
                            cfg.fmp_api_url.clone(),
                            key.clone(),
                            delay,
                        ))),
                        None => info!("FMP_API_KEY not set: {} runs without the fmp fallback", competition.category),
                    },
                    "coingecko" => sources.push(Arc::new(CoinGeckoSource::new(
                        client.clone(),
                        cfg.coingecko_api_url.clone(),
                        delay,
                    ))),
                    "coincap" => sources.push(Arc::new(CoinCapSource::new(
                        client.clone(),
                        cfg.coincap_api_url.clone(),
                        delay,
                    ))),
                    other => warn!("Unknown data source id {other:?} for {}", competition.category),
                }
            }
            chains.insert(competition.category, SourceChain::new(sources));
        }

        Ok(Self::new(chains))
    }

    pub fn chain(&self, category: Category) -> Option<&SourceChain> {
        self.chains.get(&category)
    }
}

pub fn http_client(cfg: &Config) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.fetch_timeout_secs))
        .user_agent(concat!("daily-pick/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

pub(crate) async fn get_json(client: &reqwest::Client, url: &str) -> Result<serde_json::Value> {
    Ok(client.get(url).send().await?.error_for_status()?.json().await?)
}

/// Sleep between batches, never before the first.
pub(crate) async fn pause_before_batch(index: usize, delay: Duration) {
    if index > 0 && !delay.is_zero() {
        debug!("Pausing {}ms before batch {index}", delay.as_millis());
        tokio::time::sleep(delay).await;
    }
}

/// Numeric JSON field that some APIs send as a string.
pub(crate) fn json_f64(v: Option<&serde_json::Value>) -> Option<f64> {
    let v = v?;
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        .filter(|x| x.is_finite())
}


#[cfg(test)]
mod tests {
    use super::stub::StubSource;
    use super::*;
    use std::sync::atomic::Ordering;

    fn asset(symbol: &str) -> Asset {
        Asset { symbol: symbol.to_string(), name: symbol.to_string(), external_key: symbol.to_lowercase() }
    }

    fn obs(symbol: &str) -> PriceObservation {
        PriceObservation {
            category: Category::Crypto,
            symbol: symbol.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 16).unwrap(),
            close: 1.0,
            previous_close: None,
            change_pct: Some(1.0),
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 16).unwrap()
    }

    #[tokio::test]
    async fn first_successful_source_wins() {
        let primary = Arc::new(StubSource::with_prices("primary", vec![obs("BTC")]));
        let secondary = Arc::new(StubSource::with_prices("secondary", vec![obs("BTC")]));
        let chain = SourceChain::new(vec![primary.clone(), secondary.clone()]);
        let outcome = chain.fetch(&[asset("BTC"), asset("ETH")], day()).await.unwrap();
        assert_eq!(outcome.source, "primary");
        assert_eq!(outcome.batch.failed, 1);
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn falls_back_on_error_and_on_empty_result() {
        let down = Arc::new(StubSource::failing("down"));
        let empty = Arc::new(StubSource::with_prices("empty", vec![]));
        let good = Arc::new(StubSource::with_prices("good", vec![obs("ETH")]));
        let chain = SourceChain::new(vec![down, empty, good]);
        let outcome = chain.fetch(&[asset("ETH")], day()).await.unwrap();
        assert_eq!(outcome.source, "good");
        assert_eq!(outcome.batch.observations.len(), 1);
    }

    #[tokio::test]
    async fn exhaustion_reports_every_attempt() {
        let chain = SourceChain::new(vec![
            Arc::new(StubSource::failing("a")),
            Arc::new(StubSource::failing("b")),
        ]);
        match chain.fetch(&[asset("ETH")], day()).await {
            Err(AppError::SourcesExhausted(attempts)) => {
                assert_eq!(attempts.len(), 2);
                assert!(attempts[0].starts_with("a:"));
                assert!(attempts[1].starts_with("b:"));
            }
            other => panic!("expected SourcesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_chain_is_exhausted() {
        let chain = SourceChain::new(vec![]);
        assert!(matches!(
            chain.fetch(&[asset("ETH")], day()).await,
            Err(AppError::SourcesExhausted(_))
        ));
    }

    #[test]
    fn json_numbers_accept_strings() {
        let v = serde_json::json!({"a": "1.5", "b": 2.0, "c": "x", "d": null});
        assert_eq!(json_f64(v.get("a")), Some(1.5));
        assert_eq!(json_f64(v.get("b")), Some(2.0));
        assert_eq!(json_f64(v.get("c")), None);
        assert_eq!(json_f64(v.get("d")), None);
        assert_eq!(json_f64(v.get("missing")), None);
    }
}
