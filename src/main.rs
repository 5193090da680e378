mod api;
mod clock;
mod config;
mod db;
mod error;
mod fetcher;
mod lifecycle;
mod registry;
mod scheduler;
mod scorer;
mod timing;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::db::{Datastore, SqliteStore};
use crate::error::Result;
use crate::fetcher::MarketData;
use crate::lifecycle::ActionContext;
use crate::registry::Registry;
use crate::scheduler::Scheduler;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let store: Arc<dyn Datastore> = Arc::new(SqliteStore::connect(&cfg.db_path).await?);

    // --- Registry and market data ---
    let registry = Registry::default();
    let market = MarketData::from_config(&cfg, &registry)?;
    for competition in registry.configs() {
        let sources = market
            .chain(competition.category)
            .map(|c| c.source_ids().join(" → "))
            .unwrap_or_default();
        info!(
            "{} ({}): create {} / close {} / end {} ET, min {} participants, sources [{sources}]",
            competition.display_name,
            competition.category,
            competition.create_at,
            competition.close_at,
            competition.end_at,
            competition.min_participants,
        );
    }

    for category in crate::types::Category::ALL {
        if registry.get_config(category).is_none() {
            warn!("{category} has no competition config; its actions will be reported as failed");
        }
    }

    let ctx = ActionContext::new(store, market, registry);
    for category in crate::types::Category::ALL {
        info!("{category} universe: {} assets", ctx.universe(category).len());
    }

    // --- Scheduler ---
    let health = Arc::new(HealthState::new());
    let scheduler = Arc::new(Scheduler::new(ctx, Arc::clone(&health)));

    if cfg.scheduler_tick_secs > 0 {
        let poller = Arc::clone(&scheduler);
        let tick_secs = cfg.scheduler_tick_secs;
        tokio::spawn(async move { poller.run(tick_secs).await });
        info!("Internal poller ticking every {tick_secs}s");
    } else {
        info!("SCHEDULER_TICK_SECS=0: internal poller disabled, waiting for external triggers");
    }

    if cfg.cron_secret.is_none() {
        warn!("CRON_SECRET not set: POST /api/cron/scheduler will answer 500 misconfigured");
    }

    // --- HTTP API server ---
    let api_state = ApiState {
        scheduler,
        health,
        cron_secret: cfg.cron_secret.as_deref().map(Arc::from),
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
