/// Row types for the tables in `migrations/`. Timestamps are RFC 3339 text with the
/// offset that was in force locally, so they round-trip without normalisation.
use chrono::{DateTime, FixedOffset, NaiveDate, SecondsFormat, Utc};

use crate::error::{AppError, Result};
use crate::types::{
    Category, Competition, CompetitionOption, Guess, PriceObservation, RankedResult, Score,
};

#[derive(Debug, sqlx::FromRow)]
pub struct CompetitionRow {
    pub id: i64,
    pub category: String,
    pub title: String,
    pub slug: String,
    pub start_at: String,
    pub deadline_at: String,
    pub eval_start_at: String,
    pub eval_end_at: String,
    pub closed_at: Option<String>,
    pub ended_at: Option<String>,
}

impl TryFrom<CompetitionRow> for Competition {
    type Error = AppError;

    fn try_from(row: CompetitionRow) -> Result<Self> {
        Ok(Competition {
            id: row.id,
            category: parse_category(&row.category)?,
            title: row.title,
            slug: row.slug,
            start_at: parse_ts(&row.start_at)?,
            deadline_at: parse_ts(&row.deadline_at)?,
            eval_start_at: parse_ts(&row.eval_start_at)?,
            eval_end_at: parse_ts(&row.eval_end_at)?,
            closed_at: row.closed_at.as_deref().map(parse_ts).transpose()?,
            ended_at: row.ended_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct OptionRow {
    pub id: i64,
    pub competition_id: i64,
    pub symbol: String,
    pub name: String,
    pub external_key: String,
}

impl From<OptionRow> for CompetitionOption {
    fn from(row: OptionRow) -> Self {
        CompetitionOption {
            id: row.id,
            competition_id: row.competition_id,
            symbol: row.symbol,
            name: row.name,
            external_key: row.external_key,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct GuessRow {
    pub user_id: String,
    pub competition_id: i64,
    pub option_id: i64,
}

impl From<GuessRow> for Guess {
    fn from(row: GuessRow) -> Self {
        Guess {
            user_id: row.user_id,
            competition_id: row.competition_id,
            option_id: row.option_id,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct PriceObservationRow {
    pub category: String,
    pub symbol: String,
    pub date: String,
    pub close: f64,
    pub previous_close: Option<f64>,
    pub change_pct: Option<f64>,
}

impl TryFrom<PriceObservationRow> for PriceObservation {
    type Error = AppError;

    fn try_from(row: PriceObservationRow) -> Result<Self> {
        Ok(PriceObservation {
            category: parse_category(&row.category)?,
            symbol: row.symbol,
            date: parse_date(&row.date)?,
            close: row.close,
            previous_close: row.previous_close,
            change_pct: row.change_pct,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct RankedResultRow {
    pub competition_id: i64,
    pub option_id: i64,
    pub pct_change: f64,
    pub is_winner: i64,
    pub rank: i64,
}

impl From<RankedResultRow> for RankedResult {
    fn from(row: RankedResultRow) -> Self {
        RankedResult {
            competition_id: row.competition_id,
            option_id: row.option_id,
            pct_change: row.pct_change,
            is_winner: row.is_winner != 0,
            rank: row.rank.max(0) as u32,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct ScoreRow {
    pub user_id: String,
    pub competition_id: i64,
    pub points: i64,
    pub metadata: String,
}

impl TryFrom<ScoreRow> for Score {
    type Error = AppError;

    fn try_from(row: ScoreRow) -> Result<Self> {
        Ok(Score {
            user_id: row.user_id,
            competition_id: row.competition_id,
            points: row.points.max(0) as u32,
            metadata: serde_json::from_str(&row.metadata)?,
        })
    }
}

pub fn format_ts(ts: &DateTime<FixedOffset>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, false)
}

pub fn format_utc(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, false)
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_ts(s: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s)
        .map_err(|e| AppError::InvalidRecord(format!("timestamp {s:?}: {e}")))
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| AppError::InvalidRecord(format!("date {s:?}: {e}")))
}

fn parse_category(s: &str) -> Result<Category> {
    Category::parse(s).ok_or_else(|| AppError::InvalidRecord(format!("category {s:?}")))
}
