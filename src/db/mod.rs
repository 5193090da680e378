//! Datastore seam. Every mutation is an upsert on a natural key or an update by
//! id, so re-running a whole tick is safe.

pub mod models;
pub mod sqlite;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::Result;
use crate::types::{
    Category, Competition, CompetitionOption, Guess, NewCompetition, NewOption, PriceObservation,
    RankedResult, Score,
};

pub use sqlite::SqliteStore;

#[async_trait]
pub trait Datastore: Send + Sync {
    /// Cheap reachability probe used before a tick does any work.
    async fn ping(&self) -> Result<()>;

    /// Insert or update by `slug`. Existing transition markers are left untouched.
    async fn upsert_competition(&self, competition: &NewCompetition) -> Result<Competition>;

    /// Insert or update by `(competition_id, symbol)`. Returns rows written.
    async fn upsert_options(&self, options: &[NewOption]) -> Result<usize>;

    async fn options_for(&self, competition_id: i64) -> Result<Vec<CompetitionOption>>;

    /// `category = ? AND deadline_at < now AND closed_at IS NULL`, oldest deadline first.
    async fn competitions_due_for_close(
        &self,
        category: Category,
        now: DateTime<Utc>,
    ) -> Result<Vec<Competition>>;

    /// `category = ? AND eval_end_at < now AND ended_at IS NULL`, oldest first.
    async fn competitions_due_for_end(
        &self,
        category: Category,
        now: DateTime<Utc>,
    ) -> Result<Vec<Competition>>;

    /// Stamps `closed_at` only if it is still unset. Returns whether a row changed.
    async fn mark_closed(&self, competition_id: i64, at: DateTime<Utc>) -> Result<bool>;

    /// Stamps `ended_at` only if it is still unset. Returns whether a row changed.
    async fn mark_ended(&self, competition_id: i64, at: DateTime<Utc>) -> Result<bool>;

    async fn count_guesses(&self, competition_id: i64) -> Result<i64>;

    async fn guesses_for(&self, competition_id: i64) -> Result<Vec<Guess>>;

    /// Insert or update by `(category, symbol, date)`, stamping `fetched_at`.
    /// A rewrite replaces every price column. Returns rows written.
    async fn upsert_price_observations(
        &self,
        observations: &[PriceObservation],
        fetched_at: DateTime<Utc>,
    ) -> Result<usize>;

    /// Observations dated exactly `date` for the given symbols, fetched at or
    /// after `fetched_since`.
    async fn observations_on(
        &self,
        category: Category,
        date: NaiveDate,
        symbols: &[String],
        fetched_since: DateTime<Utc>,
    ) -> Result<Vec<PriceObservation>>;

    /// Per symbol, the latest observation dated strictly before `date`.
    async fn latest_observations_before(
        &self,
        category: Category,
        date: NaiveDate,
        symbols: &[String],
    ) -> Result<Vec<PriceObservation>>;

    /// Insert or update by `(competition_id, option_id)`.
    async fn upsert_ranked_results(&self, results: &[RankedResult]) -> Result<usize>;

    async fn ranked_results_for(&self, competition_id: i64) -> Result<Vec<RankedResult>>;

    /// Insert or update by `(user_id, competition_id)`.
    async fn upsert_scores(&self, scores: &[Score]) -> Result<usize>;

    async fn scores_for(&self, competition_id: i64) -> Result<Vec<Score>>;
}
