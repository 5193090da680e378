use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::debug;

use crate::config::ID_BATCH_SIZE;
use crate::error::Result;
use crate::fetcher::{get_json, json_f64, pause_before_batch, PriceSource, SourceBatch};
use crate::types::{Asset, Category, PriceObservation};

/// CoinGecko `/coins/markets`, keyed by coin id (`bitcoin`, `ethereum`, ...).
/// Snapshot quotes are stamped with the caller's `as_of` day.
pub struct CoinGeckoSource {
    client: reqwest::Client,
    base_url: String,
    delay: Duration,
}

impl CoinGeckoSource {
    pub fn new(client: reqwest::Client, base_url: String, delay: Duration) -> Self {
        Self { client, base_url, delay }
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    fn id(&self) -> &'static str {
        "coingecko"
    }

    async fn fetch(&self, assets: &[Asset], as_of: NaiveDate) -> Result<SourceBatch> {
        let mut batch = SourceBatch::default();

        for (i, chunk) in assets.chunks(ID_BATCH_SIZE).enumerate() {
            pause_before_batch(i, self.delay).await;
            let ids: Vec<&str> = chunk.iter().map(|a| a.external_key.as_str()).collect();
            let url = format!(
                "{}/coins/markets?vs_currency=usd&ids={}&price_change_percentage=24h",
                self.base_url,
                ids.join(",")
            );

            match get_json(&self.client, &url).await {
                Ok(resp) => {
                    let parsed = parse_markets(&resp, chunk, as_of);
                    batch.failed += chunk.len() - parsed.len();
                    batch.observations.extend(parsed);
                }
                Err(e) => {
                    debug!("coingecko batch {i} failed: {e}");
                    batch.failed += chunk.len();
                }
            }
        }

        Ok(batch)
    }
}

pub fn parse_markets(v: &serde_json::Value, assets: &[Asset], as_of: NaiveDate) -> Vec<PriceObservation> {
    let by_id: HashMap<&str, &Asset> = assets.iter().map(|a| (a.external_key.as_str(), a)).collect();
    let Some(items) = v.as_array() else {
        return Vec::new();
    };

    let mut out: Vec<PriceObservation> = Vec::new();
    for item in items {
        let Some(asset) = item.get("id").and_then(|s| s.as_str()).and_then(|s| by_id.get(s)) else {
            continue;
        };
        let Some(close) = json_f64(item.get("current_price")) else {
            continue;
        };
        if out.iter().any(|o| o.symbol == asset.symbol) {
            continue;
        }
        let previous_close = json_f64(item.get("price_change_24h")).map(|d| close - d);
        out.push(PriceObservation {
            category: Category::Crypto,
            symbol: asset.symbol.clone(),
            date: as_of,
            close,
            previous_close,
            change_pct: json_f64(item.get("price_change_percentage_24h")),
        });
    }
    out
}
