use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use futures_util::future::join_all;
use tracing::debug;

use crate::clock;
use crate::config::SYMBOL_BATCH_SIZE;
use crate::error::{AppError, Result};
use crate::fetcher::{get_json, json_f64, pause_before_batch, PriceSource, SourceBatch};
use crate::types::{Asset, Category, PriceObservation};

/// Yahoo Finance v8 chart endpoint, one request per symbol. Returns the last five
/// daily bars so the previous session's close is stored alongside today's.
pub struct YahooSource {
    client: reqwest::Client,
    base_url: String,
    delay: Duration,
}

impl YahooSource {
    pub fn new(client: reqwest::Client, base_url: String, delay: Duration) -> Self {
        Self { client, base_url, delay }
    }

    async fn fetch_symbol(&self, asset: &Asset) -> Result<Vec<PriceObservation>> {
        let url = format!(
            "{}/v8/finance/chart/{}?range=5d&interval=1d",
            self.base_url, asset.external_key
        );
        let resp = get_json(&self.client, &url).await?;
        parse_chart(&resp, &asset.symbol)
            .ok_or_else(|| AppError::InvalidRecord(format!("yahoo chart for {}", asset.symbol)))
    }
}

#[async_trait]
impl PriceSource for YahooSource {
    fn id(&self) -> &'static str {
        "yahoo"
    }

    async fn fetch(&self, assets: &[Asset], _as_of: NaiveDate) -> Result<SourceBatch> {
        let mut batch = SourceBatch::default();

        for (i, chunk) in assets.chunks(SYMBOL_BATCH_SIZE).enumerate() {
            pause_before_batch(i, self.delay).await;
            let results = join_all(chunk.iter().map(|a| self.fetch_symbol(a))).await;
            for (asset, result) in chunk.iter().zip(results) {
                match result {
                    Ok(bars) if !bars.is_empty() => batch.observations.extend(bars),
                    Ok(_) => {
                        debug!(symbol = %asset.symbol, "yahoo returned no bars");
                        batch.failed += 1;
                    }
                    Err(e) => {
                        debug!(symbol = %asset.symbol, "yahoo fetch failed: {e}");
                        batch.failed += 1;
                    }
                }
            }
        }

        Ok(batch)
    }
}

/// Daily bars from a chart response, each dated by its ET session day. Bars with a
/// null close are skipped. The first bar's previous close comes from
/// `meta.chartPreviousClose`.
pub fn parse_chart(v: &serde_json::Value, symbol: &str) -> Option<Vec<PriceObservation>> {
    let result = v.get("chart")?.get("result")?.as_array()?.first()?;
    let timestamps = result.get("timestamp")?.as_array()?;
    let closes = result
        .get("indicators")?
        .get("quote")?
        .as_array()?
        .first()?
        .get("close")?
        .as_array()?;

    let mut previous = json_f64(result.get("meta").and_then(|m| m.get("chartPreviousClose")));
    let mut bars: Vec<PriceObservation> = Vec::with_capacity(timestamps.len());

    for (ts, close) in timestamps.iter().zip(closes) {
        let Some(close) = json_f64(Some(close)) else {
            continue;
        };
        let Some(instant) = ts.as_i64().and_then(|t| DateTime::from_timestamp(t, 0)) else {
            continue;
        };
        let date = clock::et_fields(instant).date;

        // A live session can appear twice (last bar plus the regular-market bar).
        if let Some(last) = bars.last_mut().filter(|b| b.date == date) {
            last.close = close;
            previous = Some(close);
            continue;
        }

        bars.push(PriceObservation {
            category: Category::Equity,
            symbol: symbol.to_string(),
            date,
            close,
            previous_close: previous,
            change_pct: None,
        });
        previous = Some(close);
    }

    Some(bars)
}
