use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::debug;

use crate::config::ID_BATCH_SIZE;
use crate::error::Result;
use crate::fetcher::{get_json, json_f64, pause_before_batch, PriceSource, SourceBatch};
use crate::types::{Asset, Category, PriceObservation};

/// Financial Modeling Prep batch quote endpoint. Only registered when an API key is
/// configured.
pub struct FmpSource {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    delay: Duration,
}

impl FmpSource {
    pub fn new(client: reqwest::Client, base_url: String, api_key: String, delay: Duration) -> Self {
        Self { client, base_url, api_key, delay }
    }
}

#[async_trait]
impl PriceSource for FmpSource {
    fn id(&self) -> &'static str {
        "fmp"
    }

    async fn fetch(&self, assets: &[Asset], as_of: NaiveDate) -> Result<SourceBatch> {
        let mut batch = SourceBatch::default();

        for (i, chunk) in assets.chunks(ID_BATCH_SIZE).enumerate() {
            pause_before_batch(i, self.delay).await;
            let tickers: Vec<&str> = chunk.iter().map(|a| a.external_key.as_str()).collect();
            let url = format!(
                "{}/api/v3/quote/{}?apikey={}",
                self.base_url,
                tickers.join(","),
                self.api_key
            );

            let resp = match get_json(&self.client, &url).await {
                Ok(v) => v,
                Err(e) => {
                    debug!("fmp batch {i} failed: {e}");
                    batch.failed += chunk.len();
                    continue;
                }
            };

            let parsed = parse_quotes(&resp, chunk, as_of);
            batch.failed += chunk.len() - parsed.len();
            batch.observations.extend(parsed);
        }

        Ok(batch)
    }
}

/// Quote array → observations for the requested assets. Unknown tickers and
/// records without a price are dropped.
pub fn parse_quotes(v: &serde_json::Value, assets: &[Asset], as_of: NaiveDate) -> Vec<PriceObservation> {
    let by_key: HashMap<&str, &Asset> = assets.iter().map(|a| (a.external_key.as_str(), a)).collect();
    let Some(items) = v.as_array() else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for item in items {
        let Some(asset) = item.get("symbol").and_then(|s| s.as_str()).and_then(|s| by_key.get(s)) else {
            continue;
        };
        let Some(close) = json_f64(item.get("price")) else {
            continue;
        };
        if out.iter().any(|o: &PriceObservation| o.symbol == asset.symbol) {
            continue;
        }
        out.push(PriceObservation {
            category: Category::Equity,
            symbol: asset.symbol.clone(),
            date: as_of,
            close,
            previous_close: json_f64(item.get("previousClose")),
            change_pct: json_f64(item.get("changesPercentage")),
        });
    }
    out
}
