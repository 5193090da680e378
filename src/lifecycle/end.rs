use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::clock::et_fields;
use crate::config::END_NO_DATA_GRACE_HOURS;
use crate::error::Result;
use crate::lifecycle::{refresh_prices, ActionContext};
use crate::registry::CompetitionConfig;
use crate::scorer::{rank, score_guesses, to_results};
use crate::timing::{previous_day, should_run};
use crate::types::{Asset, Competition};

pub fn is_due(config: &CompetitionConfig, now: DateTime<Utc>) -> bool {
    let et = et_fields(now);
    config.end_at.matches(et.hour, et.minute) && should_run(config, previous_day(et.date))
}

#[derive(Debug)]
enum Outcome {
    Ended { ranked: usize, scored: usize, winners: Vec<String> },
    /// No usable evaluation-day prices yet; the competition stays open for a
    /// later window until the grace period runs out.
    NoData,
    /// Another run stamped `ended_at` first.
    AlreadyEnded,
}

/// Rank, score, then stamp `ended_at` on every competition whose evaluation
/// window has passed. The marker is written last so a failure part-way leaves
/// the competition due for the next window; results and scores are upserts.
///
/// Only rows fetched after the window closed count as evaluation prices. A
/// competition still without any after `END_NO_DATA_GRACE_HOURS` is ended with
/// zero results and every guess scores 0.
pub async fn run(
    ctx: &ActionContext,
    config: &CompetitionConfig,
    now: DateTime<Utc>,
) -> Result<serde_json::Value> {
    let due = ctx.store.competitions_due_for_end(config.category, now).await?;

    let mut ended = Vec::new();
    let mut skipped_no_data = Vec::new();
    let mut failed = 0usize;

    for competition in &due {
        match end_one(ctx, config, competition, now).await {
            Ok(Outcome::Ended { ranked, scored, winners }) => {
                info!(
                    category = %config.category,
                    competition_id = competition.id,
                    slug = %competition.slug,
                    ranked,
                    scored,
                    "Ended {}: {ranked} ranked, {scored} scored, winners {winners:?}",
                    competition.slug
                );
                ended.push(json!({
                    "competition_id": competition.id,
                    "slug": competition.slug,
                    "ranked": ranked,
                    "scored": scored,
                    "winners": winners,
                }));
            }
            Ok(Outcome::NoData) => {
                warn!(
                    category = %config.category,
                    competition_id = competition.id,
                    "No evaluation prices for {} on {}, leaving it open",
                    competition.slug,
                    competition.evaluation_date()
                );
                skipped_no_data.push(competition.slug.clone());
            }
            Ok(Outcome::AlreadyEnded) => {}
            Err(e) => {
                failed += 1;
                error!(
                    category = %config.category,
                    competition_id = competition.id,
                    "Failed to end {}: {e}",
                    competition.slug
                );
            }
        }
    }

    Ok(json!({
        "due": due.len(),
        "ended": ended.len(),
        "failed": failed,
        "skipped_no_data": skipped_no_data,
        "competitions": ended,
    }))
}

async fn end_one(
    ctx: &ActionContext,
    config: &CompetitionConfig,
    competition: &Competition,
    now: DateTime<Utc>,
) -> Result<Outcome> {
    let category = competition.category;
    let evaluation_date = competition.evaluation_date();
    let options = ctx.store.options_for(competition.id).await?;

    let assets: Vec<Asset> = options
        .iter()
        .map(|o| Asset {
            symbol: o.symbol.clone(),
            name: o.name.clone(),
            external_key: o.external_key.clone(),
        })
        .collect();
    // The snapshot sources report the last 24h, so only the morning-after run
    // may date what they return to the evaluation day.
    if previous_day(et_fields(now).date) == evaluation_date {
        if let Err(e) = refresh_prices(ctx, category, &assets, evaluation_date, now).await {
            warn!(
                competition_id = competition.id,
                "Price refresh for {} failed, ranking stored prices: {e}",
                competition.slug
            );
        }
    } else {
        debug!(
            competition_id = competition.id,
            "{} is a late retry, ranking stored prices only",
            competition.slug
        );
    }

    let window_closed = competition.eval_end_at.with_timezone(&Utc);
    let symbols: Vec<String> = options.iter().map(|o| o.symbol.clone()).collect();
    let evaluation = ctx
        .store
        .observations_on(category, evaluation_date, &symbols, window_closed)
        .await?;
    if evaluation.is_empty() {
        if now - window_closed < Duration::hours(END_NO_DATA_GRACE_HOURS) {
            return Ok(Outcome::NoData);
        }
        warn!(
            competition_id = competition.id,
            "Still no prices for {} after {END_NO_DATA_GRACE_HOURS}h, ending with zero results",
            competition.slug
        );
    }
    let baseline = ctx
        .store
        .latest_observations_before(category, evaluation_date, &symbols)
        .await?;

    let ranked = rank(&baseline, &evaluation, config.allow_ties);
    let results = to_results(competition.id, &ranked, &options);
    ctx.store.upsert_ranked_results(&results).await?;

    let guesses = ctx.store.guesses_for(competition.id).await?;
    let scores = score_guesses(config, competition.id, &guesses, &results, &options);
    ctx.store.upsert_scores(&scores).await?;

    if !ctx.store.mark_ended(competition.id, now).await? {
        return Ok(Outcome::AlreadyEnded);
    }

    let winners = ranked.iter().filter(|r| r.is_winner).map(|r| r.symbol.clone()).collect();
    Ok(Outcome::Ended { ranked: results.len(), scored: scores.len(), winners })
}
