//! Create / close / end transitions. Each action is a pure `now → bool` predicate
//! plus a run body whose only state lives in the datastore markers.

pub mod close;
pub mod create;
pub mod end;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::info;

use crate::db::Datastore;
use crate::error::{AppError, Result};
use crate::fetcher::universe;
use crate::fetcher::MarketData;
use crate::registry::{CompetitionConfig, Registry};
use crate::types::{ActionKind, Asset, Category};

/// Everything a lifecycle action needs. Cheap to clone.
#[derive(Clone)]
pub struct ActionContext {
    pub store: Arc<dyn Datastore>,
    pub market: MarketData,
    pub registry: Registry,
    universes: Arc<HashMap<Category, Vec<Asset>>>,
}

impl ActionContext {
    /// Candidate universes come from the bundled `data/` lists.
    pub fn new(store: Arc<dyn Datastore>, market: MarketData, registry: Registry) -> Self {
        let universes = Category::ALL.iter().map(|&c| (c, universe::universe(c))).collect();
        Self::with_universes(store, market, registry, universes)
    }

    pub fn with_universes(
        store: Arc<dyn Datastore>,
        market: MarketData,
        registry: Registry,
        universes: HashMap<Category, Vec<Asset>>,
    ) -> Self {
        Self { store, market, registry, universes: Arc::new(universes) }
    }

    pub fn universe(&self, category: Category) -> &[Asset] {
        self.universes.get(&category).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Whether `kind` should fire for this category at `now`.
pub fn is_due(kind: ActionKind, config: &CompetitionConfig, now: DateTime<Utc>) -> bool {
    match kind {
        ActionKind::Create => create::is_due(config, now),
        ActionKind::Close => close::is_due(config, now),
        ActionKind::End => end::is_due(config, now),
    }
}

/// Run one action for one category and return its JSON summary.
pub async fn run(
    kind: ActionKind,
    ctx: &ActionContext,
    category: Category,
    now: DateTime<Utc>,
) -> Result<serde_json::Value> {
    let config = ctx
        .registry
        .get_config(category)
        .ok_or(AppError::UnknownCategory(category))?;
    match kind {
        ActionKind::Create => create::run(ctx, config, now).await,
        ActionKind::Close => close::run(ctx, config, now).await,
        ActionKind::End => end::run(ctx, config, now).await,
    }
}

/// Outcome of one price refresh through a category's source chain.
#[derive(Debug, Clone, Serialize)]
pub struct PriceRefresh {
    pub source: &'static str,
    pub stored: usize,
    pub failed: usize,
}

/// Fetch `assets` through the category's chain and upsert what comes back.
pub(crate) async fn refresh_prices(
    ctx: &ActionContext,
    category: Category,
    assets: &[Asset],
    as_of: NaiveDate,
    fetched_at: DateTime<Utc>,
) -> Result<PriceRefresh> {
    let chain = ctx.market.chain(category).ok_or_else(|| {
        AppError::SourcesExhausted(vec![format!("no sources configured for {category}")])
    })?;
    let outcome = chain.fetch(assets, as_of).await?;
    let stored = ctx
        .store
        .upsert_price_observations(&outcome.batch.observations, fetched_at)
        .await?;
    info!(
        category = %category,
        source = outcome.source,
        stored,
        failed = outcome.batch.failed,
        "Stored {stored} {category} observations from {}",
        outcome.source,
    );
    Ok(PriceRefresh { source: outcome.source, stored, failed: outcome.batch.failed })
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the action tests.

    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::fetcher::stub::StubSource;
    use crate::fetcher::SourceChain;
    use crate::types::PriceObservation;
    use chrono::TimeZone;

    pub fn asset(symbol: &str) -> Asset {
        Asset {
            symbol: symbol.to_string(),
            name: format!("{symbol} Inc."),
            external_key: symbol.to_string(),
        }
    }

    pub fn observation(
        category: Category,
        symbol: &str,
        date: NaiveDate,
        close: f64,
        change_pct: Option<f64>,
    ) -> PriceObservation {
        PriceObservation {
            category,
            symbol: symbol.to_string(),
            date,
            close,
            previous_close: None,
            change_pct,
        }
    }

    pub fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Context over `store` whose every category draws from one stub source.
    pub fn context(
        store: Arc<MemoryStore>,
        source: Option<StubSource>,
        universe: Vec<Asset>,
    ) -> ActionContext {
        let chain = match source {
            Some(s) => SourceChain::new(vec![Arc::new(s)]),
            None => SourceChain::new(vec![]),
        };
        let chains = Category::ALL.iter().map(|&c| (c, chain.clone())).collect();
        let universes = Category::ALL.iter().map(|&c| (c, universe.clone())).collect();
        ActionContext::with_universes(store, MarketData::new(chains), Registry::default(), universes)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::registry::{CRYPTO, EQUITY};

    #[test]
    fn dispatch_matches_category_minutes() {
        // 2024-01-16 00:01 ET (EST)
        let create = utc(2024, 1, 16, 5, 1);
        assert!(is_due(ActionKind::Create, &EQUITY, create));
        assert!(is_due(ActionKind::Create, &CRYPTO, create));
        assert!(!is_due(ActionKind::Close, &EQUITY, create));
        assert!(!is_due(ActionKind::End, &EQUITY, create));

        // 00:05 ET fires crypto end only; equity ends at 00:10.
        let crypto_end = utc(2024, 1, 16, 5, 5);
        assert!(is_due(ActionKind::End, &CRYPTO, crypto_end));
        assert!(!is_due(ActionKind::End, &EQUITY, crypto_end));
        assert!(is_due(ActionKind::End, &EQUITY, utc(2024, 1, 16, 5, 10)));
    }

    #[tokio::test]
    async fn unregistered_category_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let mut ctx = context(store.clone(), None, vec![]);
        ctx.registry = Registry::new(vec![&CRYPTO]);
        let err = run(ActionKind::Close, &ctx, Category::Equity, utc(2024, 1, 16, 3, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnknownCategory(Category::Equity)));
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn refresh_without_sources_reports_exhaustion() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone(), None, vec![]);
        let err = refresh_prices(&ctx, Category::Crypto, &[asset("BTC")], date(2024, 1, 16), utc(2024, 1, 17, 5, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SourcesExhausted(_)));
    }
}
