use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::clock::et_fields;
use crate::error::Result;
use crate::lifecycle::ActionContext;
use crate::registry::CompetitionConfig;
use crate::timing::{next_day, should_run};
use crate::types::Competition;

pub fn is_due(config: &CompetitionConfig, now: DateTime<Utc>) -> bool {
    let et = et_fields(now);
    config.close_at.matches(et.hour, et.minute) && should_run(config, next_day(et.date))
}

/// Stamp `closed_at` on every competition past its deadline and snapshot its
/// vote count. A competition that fails is logged and left for the next tick.
pub async fn run(
    ctx: &ActionContext,
    config: &CompetitionConfig,
    now: DateTime<Utc>,
) -> Result<serde_json::Value> {
    let due = ctx.store.competitions_due_for_close(config.category, now).await?;

    let mut closed = Vec::new();
    let mut failed = 0usize;
    for competition in &due {
        match close_one(ctx, competition, now).await {
            Ok(Some(votes)) => {
                info!(
                    category = %config.category,
                    competition_id = competition.id,
                    slug = %competition.slug,
                    votes,
                    "Closed {} with {votes} votes",
                    competition.slug
                );
                closed.push(json!({
                    "competition_id": competition.id,
                    "slug": competition.slug,
                    "votes": votes,
                }));
            }
            Ok(None) => {}
            Err(e) => {
                failed += 1;
                warn!(
                    category = %config.category,
                    competition_id = competition.id,
                    "Failed to close {}: {e}",
                    competition.slug
                );
            }
        }
    }

    Ok(json!({
        "due": due.len(),
        "closed": closed.len(),
        "failed": failed,
        "competitions": closed,
    }))
}

/// `None` when another run already stamped the marker.
async fn close_one(
    ctx: &ActionContext,
    competition: &Competition,
    now: DateTime<Utc>,
) -> Result<Option<i64>> {
    if !ctx.store.mark_closed(competition.id, now).await? {
        return Ok(None);
    }
    let votes = ctx.store.count_guesses(competition.id).await?;
    Ok(Some(votes))
}
