//! In-memory `Datastore` for handler and scheduler tests. Counts every call so tests
//! can assert that a rejected trigger never touched storage.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::db::Datastore;
use crate::error::{AppError, Result};
use crate::types::{
    Category, Competition, CompetitionOption, Guess, NewCompetition, NewOption, PriceObservation,
    RankedResult, Score,
};

#[derive(Default)]
struct Tables {
    competitions: Vec<Competition>,
    options: Vec<CompetitionOption>,
    guesses: Vec<Guess>,
    /// Each row with the instant it was written.
    observations: Vec<(PriceObservation, DateTime<Utc>)>,
    results: Vec<RankedResult>,
    scores: Vec<Score>,
    next_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    calls: AtomicUsize,
    unreachable: AtomicBool,
    /// Competition ids whose guesses read fails, to exercise per-entity isolation.
    failing_guesses: Mutex<HashSet<i64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_unreachable(&self, v: bool) {
        self.unreachable.store(v, Ordering::SeqCst);
    }

    pub fn fail_guesses_for(&self, competition_id: i64) {
        self.failing_guesses.lock().unwrap().insert(competition_id);
    }

    pub fn insert_guess(&self, user_id: &str, competition_id: i64, option_id: i64) {
        let mut t = self.tables.lock().unwrap();
        t.guesses.retain(|g| !(g.user_id == user_id && g.competition_id == competition_id));
        t.guesses.push(Guess { user_id: user_id.to_string(), competition_id, option_id });
    }

    pub fn competition(&self, id: i64) -> Option<Competition> {
        self.tables.lock().unwrap().competitions.iter().find(|c| c.id == id).cloned()
    }

    pub fn all_competitions(&self) -> Vec<Competition> {
        self.tables.lock().unwrap().competitions.clone()
    }

    fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AppError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

fn utc(ts: &DateTime<chrono::FixedOffset>) -> DateTime<Utc> {
    ts.with_timezone(&Utc)
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        self.enter()
    }

    async fn upsert_competition(&self, c: &NewCompetition) -> Result<Competition> {
        self.enter()?;
        let mut t = self.tables.lock().unwrap();
        if let Some(existing) = t.competitions.iter_mut().find(|e| e.slug == c.slug) {
            existing.title = c.title.clone();
            existing.start_at = c.start_at;
            existing.deadline_at = c.deadline_at;
            existing.eval_start_at = c.eval_start_at;
            existing.eval_end_at = c.eval_end_at;
            return Ok(existing.clone());
        }
        t.next_id += 1;
        let row = Competition {
            id: t.next_id,
            category: c.category,
            title: c.title.clone(),
            slug: c.slug.clone(),
            start_at: c.start_at,
            deadline_at: c.deadline_at,
            eval_start_at: c.eval_start_at,
            eval_end_at: c.eval_end_at,
            closed_at: None,
            ended_at: None,
        };
        t.competitions.push(row.clone());
        Ok(row)
    }

    async fn upsert_options(&self, options: &[NewOption]) -> Result<usize> {
        self.enter()?;
        let mut t = self.tables.lock().unwrap();
        for o in options {
            if let Some(existing) = t
                .options
                .iter_mut()
                .find(|e| e.competition_id == o.competition_id && e.symbol == o.symbol)
            {
                existing.name = o.name.clone();
                existing.external_key = o.external_key.clone();
                continue;
            }
            t.next_id += 1;
            let id = t.next_id;
            t.options.push(CompetitionOption {
                id,
                competition_id: o.competition_id,
                symbol: o.symbol.clone(),
                name: o.name.clone(),
                external_key: o.external_key.clone(),
            });
        }
        Ok(options.len())
    }

    async fn options_for(&self, competition_id: i64) -> Result<Vec<CompetitionOption>> {
        self.enter()?;
        let t = self.tables.lock().unwrap();
        Ok(t.options.iter().filter(|o| o.competition_id == competition_id).cloned().collect())
    }

    async fn competitions_due_for_close(
        &self,
        category: Category,
        now: DateTime<Utc>,
    ) -> Result<Vec<Competition>> {
        self.enter()?;
        let t = self.tables.lock().unwrap();
        Ok(t.competitions
            .iter()
            .filter(|c| c.category == category && utc(&c.deadline_at) < now && c.closed_at.is_none())
            .cloned()
            .collect())
    }

    async fn competitions_due_for_end(
        &self,
        category: Category,
        now: DateTime<Utc>,
    ) -> Result<Vec<Competition>> {
        self.enter()?;
        let t = self.tables.lock().unwrap();
        Ok(t.competitions
            .iter()
            .filter(|c| c.category == category && utc(&c.eval_end_at) < now && c.ended_at.is_none())
            .cloned()
            .collect())
    }

    async fn mark_closed(&self, competition_id: i64, at: DateTime<Utc>) -> Result<bool> {
        self.enter()?;
        let mut t = self.tables.lock().unwrap();
        match t.competitions.iter_mut().find(|c| c.id == competition_id && c.closed_at.is_none()) {
            Some(c) => {
                c.closed_at = Some(at.fixed_offset());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_ended(&self, competition_id: i64, at: DateTime<Utc>) -> Result<bool> {
        self.enter()?;
        let mut t = self.tables.lock().unwrap();
        match t.competitions.iter_mut().find(|c| c.id == competition_id && c.ended_at.is_none()) {
            Some(c) => {
                c.ended_at = Some(at.fixed_offset());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count_guesses(&self, competition_id: i64) -> Result<i64> {
        self.enter()?;
        let t = self.tables.lock().unwrap();
        Ok(t.guesses.iter().filter(|g| g.competition_id == competition_id).count() as i64)
    }

    async fn guesses_for(&self, competition_id: i64) -> Result<Vec<Guess>> {
        self.enter()?;
        if self.failing_guesses.lock().unwrap().contains(&competition_id) {
            return Err(AppError::Unavailable(format!("guesses for {competition_id}")));
        }
        let t = self.tables.lock().unwrap();
        Ok(t.guesses.iter().filter(|g| g.competition_id == competition_id).cloned().collect())
    }

    async fn upsert_price_observations(
        &self,
        observations: &[PriceObservation],
        fetched_at: DateTime<Utc>,
    ) -> Result<usize> {
        self.enter()?;
        let mut t = self.tables.lock().unwrap();
        for o in observations {
            t.observations.retain(|(e, _)| {
                !(e.category == o.category && e.symbol == o.symbol && e.date == o.date)
            });
            t.observations.push((o.clone(), fetched_at));
        }
        Ok(observations.len())
    }

    async fn observations_on(
        &self,
        category: Category,
        date: NaiveDate,
        symbols: &[String],
        fetched_since: DateTime<Utc>,
    ) -> Result<Vec<PriceObservation>> {
        self.enter()?;
        let t = self.tables.lock().unwrap();
        let mut out: Vec<PriceObservation> = t
            .observations
            .iter()
            .filter(|(o, at)| {
                o.category == category
                    && o.date == date
                    && *at >= fetched_since
                    && symbols.contains(&o.symbol)
            })
            .map(|(o, _)| o.clone())
            .collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(out)
    }

    async fn latest_observations_before(
        &self,
        category: Category,
        date: NaiveDate,
        symbols: &[String],
    ) -> Result<Vec<PriceObservation>> {
        self.enter()?;
        let t = self.tables.lock().unwrap();
        let mut out = Vec::new();
        for symbol in symbols {
            let latest = t
                .observations
                .iter()
                .map(|(o, _)| o)
                .filter(|o| o.category == category && &o.symbol == symbol && o.date < date)
                .max_by_key(|o| o.date);
            if let Some(o) = latest {
                out.push(o.clone());
            }
        }
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(out)
    }

    async fn upsert_ranked_results(&self, results: &[RankedResult]) -> Result<usize> {
        self.enter()?;
        let mut t = self.tables.lock().unwrap();
        for r in results {
            t.results
                .retain(|e| !(e.competition_id == r.competition_id && e.option_id == r.option_id));
            t.results.push(r.clone());
        }
        Ok(results.len())
    }

    async fn ranked_results_for(&self, competition_id: i64) -> Result<Vec<RankedResult>> {
        self.enter()?;
        let t = self.tables.lock().unwrap();
        let mut out: Vec<RankedResult> =
            t.results.iter().filter(|r| r.competition_id == competition_id).cloned().collect();
        out.sort_by_key(|r| r.rank);
        Ok(out)
    }

    async fn upsert_scores(&self, scores: &[Score]) -> Result<usize> {
        self.enter()?;
        let mut t = self.tables.lock().unwrap();
        for s in scores {
            t.scores
                .retain(|e| !(e.user_id == s.user_id && e.competition_id == s.competition_id));
            t.scores.push(s.clone());
        }
        Ok(scores.len())
    }

    async fn scores_for(&self, competition_id: i64) -> Result<Vec<Score>> {
        self.enter()?;
        let t = self.tables.lock().unwrap();
        let mut out: Vec<Score> =
            t.scores.iter().filter(|s| s.competition_id == competition_id).cloned().collect();
        out.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(out)
    }
}
