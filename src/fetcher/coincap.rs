use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::debug;

use crate::config::ID_BATCH_SIZE;
use crate::error::Result;
use crate::fetcher::{get_json, json_f64, pause_before_batch, PriceSource, SourceBatch};
use crate::types::{Asset, Category, PriceObservation};

/// CoinCap `/assets?ids=...`. Numbers arrive as strings.
pub struct CoinCapSource {
    client: reqwest::Client,
    base_url: String,
    delay: Duration,
}

impl CoinCapSource {
    pub fn new(client: reqwest::Client, base_url: String, delay: Duration) -> Self {
        Self { client, base_url, delay }
    }
}

#[async_trait]
impl PriceSource for CoinCapSource {
    fn id(&self) -> &'static str {
        "coincap"
    }

    async fn fetch(&self, assets: &[Asset], as_of: NaiveDate) -> Result<SourceBatch> {
        let mut batch = SourceBatch::default();

        for (i, chunk) in assets.chunks(ID_BATCH_SIZE).enumerate() {
            pause_before_batch(i, self.delay).await;
            let ids: Vec<&str> = chunk.iter().map(|a| coincap_id(&a.external_key)).collect();
            let url = format!("{}/assets?ids={}", self.base_url, ids.join(","));

            match get_json(&self.client, &url).await {
                Ok(resp) => {
                    let parsed = parse_assets(&resp, chunk, as_of);
                    batch.failed += chunk.len() - parsed.len();
                    batch.observations.extend(parsed);
                }
                Err(e) => {
                    debug!("coincap batch {i} failed: {e}");
                    batch.failed += chunk.len();
                }
            }
        }

        Ok(batch)
    }
}

/// Universe keys are CoinGecko ids; CoinCap names a few coins differently.
pub fn coincap_id(key: &str) -> &str {
    match key {
        "avalanche-2" => "avalanche",
        "binancecoin" => "binance-coin",
        "matic-network" => "polygon",
        "near" => "near-protocol",
        other => other,
    }
}

pub fn parse_assets(v: &serde_json::Value, assets: &[Asset], as_of: NaiveDate) -> Vec<PriceObservation> {
    let by_id: HashMap<&str, &Asset> =
        assets.iter().map(|a| (coincap_id(&a.external_key), a)).collect();
    let Some(items) = v.get("data").and_then(|d| d.as_array()) else {
        return Vec::new();
    };

    let mut out: Vec<PriceObservation> = Vec::new();
    for item in items {
        let Some(asset) = item.get("id").and_then(|s| s.as_str()).and_then(|s| by_id.get(s)) else {
            continue;
        };
        let Some(close) = json_f64(item.get("priceUsd")) else {
            continue;
        };
        if out.iter().any(|o| o.symbol == asset.symbol) {
            continue;
        }
        let change_pct = json_f64(item.get("changePercent24Hr"));
        let previous_close = change_pct
            .map(|p| close / (1.0 + p / 100.0))
            .filter(|c| c.is_finite());
        out.push(PriceObservation {
            category: Category::Crypto,
            symbol: asset.symbol.clone(),
            date: as_of,
            close,
            previous_close,
            change_pct,
        });
    }
    out
}
