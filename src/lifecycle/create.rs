use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::clock::et_fields;
use crate::error::Result;
use crate::lifecycle::{refresh_prices, ActionContext};
use crate::registry::CompetitionConfig;
use crate::timing::{
    generate_slug, generate_timing, generate_title, next_day, previous_day, should_run,
};
use crate::types::{NewCompetition, NewOption};

pub fn is_due(config: &CompetitionConfig, now: DateTime<Utc>) -> bool {
    let et = et_fields(now);
    config.create_at.matches(et.hour, et.minute) && should_run(config, next_day(et.date))
}

/// Prefetch prices for the day that just ended, then upsert tomorrow's
/// competition and its options.
///
/// A fetch that exhausts every source does not stop creation: the competition
/// and options are still written and the failure is reported in the summary.
pub async fn run(
    ctx: &ActionContext,
    config: &CompetitionConfig,
    now: DateTime<Utc>,
) -> Result<serde_json::Value> {
    let timing = generate_timing(now);
    let evaluation_date = timing.evaluation_date();

    if !should_run(config, evaluation_date) {
        info!(
            category = %config.category,
            "Skipping create: {evaluation_date} is not a trading day for {}",
            config.category
        );
        return Ok(json!({
            "skipped": true,
            "reason": "not_a_trading_day",
            "evaluation_date": evaluation_date.to_string(),
        }));
    }

    let assets = ctx.universe(config.category);
    // Just after midnight the 24h snapshots describe the day that has just finished.
    let as_of = previous_day(et_fields(now).date);

    let (refresh, data_error) = match refresh_prices(ctx, config.category, assets, as_of, now).await {
        Ok(r) => (Some(r), None),
        Err(e) => {
            warn!(category = %config.category, "Price prefetch failed: {e}");
            (None, Some(e.to_string()))
        }
    };

    let slug = generate_slug(config.slug_prefix, evaluation_date);
    let pending = NewCompetition {
        category: config.category,
        title: generate_title(config, evaluation_date),
        slug: slug.clone(),
        start_at: timing.start_at,
        deadline_at: timing.deadline_at,
        eval_start_at: timing.eval_start_at,
        eval_end_at: timing.eval_end_at,
    };
    debug!(slug = %slug, phase = %pending.phase(), "Upserting {slug}");
    let competition = ctx.store.upsert_competition(&pending).await?;

    let mut seen = HashSet::new();
    let options: Vec<NewOption> = assets
        .iter()
        .filter(|a| seen.insert(a.symbol.as_str()))
        .map(|a| NewOption {
            competition_id: competition.id,
            symbol: a.symbol.clone(),
            name: a.name.clone(),
            external_key: a.external_key.clone(),
        })
        .collect();
    let options_added = ctx.store.upsert_options(&options).await?;

    info!(
        category = %config.category,
        competition_id = competition.id,
        slug = %slug,
        phase = %competition.phase(),
        "Created {slug} with {options_added} options (deadline {})",
        timing.deadline_at,
    );

    Ok(json!({
        "competition_id": competition.id,
        "slug": slug,
        "title": competition.title,
        "timezone": timing.timezone,
        "deadline_at": timing.deadline_at.to_rfc3339(),
        "eval_end_at": timing.eval_end_at.to_rfc3339(),
        "accepting_guesses": competition.accepts_guesses(now),
        "options_added": options_added,
        "data_fetched": refresh.is_some(),
        "data_source": refresh.as_ref().map(|r| r.source),
        "data_stored": refresh.as_ref().map_or(0, |r| r.stored),
        "data_failed": refresh.as_ref().map_or(assets.len(), |r| r.failed),
        "data_error": data_error,
    }))
}
