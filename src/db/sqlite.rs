use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::db::models::{
    format_date, format_ts, format_utc, CompetitionRow, GuessRow, OptionRow,
    PriceObservationRow, RankedResultRow, ScoreRow,
};
use crate::db::Datastore;
use crate::error::Result;
use crate::types::{
    Category, Competition, CompetitionOption, Guess, NewCompetition, NewOption, PriceObservation,
    RankedResult, Score,
};

const COMPETITION_COLUMNS: &str = "id, category, title, slug, start_at, deadline_at, \
     eval_start_at, eval_end_at, closed_at, ended_at";

/// SQLite-backed datastore. Each method is one statement or a loop of independent
/// single-row upserts; nothing spans tables in a transaction.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path` and apply migrations.
    /// `:memory:` gives a private single-connection database.
    pub async fn connect(db_path: &str) -> Result<Self> {
        let pool = if db_path == ":memory:" {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect("sqlite::memory:")
                .await?
        } else {
            let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?
                .create_if_missing(true);
            SqlitePoolOptions::new().connect_with(options).await?
        };
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database ready at {db_path}");
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn competitions_due(
        &self,
        marker_column: &str,
        due_column: &str,
        category: Category,
        now: DateTime<Utc>,
    ) -> Result<Vec<Competition>> {
        let sql = format!(
            "SELECT {COMPETITION_COLUMNS} FROM competitions \
             WHERE category = ? \
               AND CAST(strftime('%s', {due_column}) AS INTEGER) < ? \
               AND {marker_column} IS NULL \
             ORDER BY CAST(strftime('%s', {due_column}) AS INTEGER) ASC, id ASC"
        );
        let rows: Vec<CompetitionRow> = sqlx::query_as(&sql)
            .bind(category.as_str())
            .bind(now.timestamp())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Competition::try_from).collect()
    }

    async fn stamp_marker(&self, marker_column: &str, id: i64, at: DateTime<Utc>) -> Result<bool> {
        let sql = format!(
            "UPDATE competitions SET {marker_column} = ? WHERE id = ? AND {marker_column} IS NULL"
        );
        let done = sqlx::query(&sql)
            .bind(format_utc(&at))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[async_trait]
impl Datastore for SqliteStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert_competition(&self, c: &NewCompetition) -> Result<Competition> {
        let sql = format!(
            r#"
            INSERT INTO competitions (category, title, slug, start_at, deadline_at, eval_start_at, eval_end_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(slug) DO UPDATE SET
                title = excluded.title,
                start_at = excluded.start_at,
                deadline_at = excluded.deadline_at,
                eval_start_at = excluded.eval_start_at,
                eval_end_at = excluded.eval_end_at
            RETURNING {COMPETITION_COLUMNS}
            "#
        );
        let row: CompetitionRow = sqlx::query_as(&sql)
            .bind(c.category.as_str())
            .bind(&c.title)
            .bind(&c.slug)
            .bind(format_ts(&c.start_at))
            .bind(format_ts(&c.deadline_at))
            .bind(format_ts(&c.eval_start_at))
            .bind(format_ts(&c.eval_end_at))
            .fetch_one(&self.pool)
            .await?;
        Competition::try_from(row)
    }

    async fn upsert_options(&self, options: &[NewOption]) -> Result<usize> {
        let mut written = 0usize;
        for o in options {
            let done = sqlx::query(
                r#"
                INSERT INTO options (competition_id, symbol, name, external_key)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(competition_id, symbol) DO UPDATE SET
                    name = excluded.name,
                    external_key = excluded.external_key
                "#,
            )
            .bind(o.competition_id)
            .bind(&o.symbol)
            .bind(&o.name)
            .bind(&o.external_key)
            .execute(&self.pool)
            .await?;
            written += done.rows_affected() as usize;
        }
        Ok(written)
    }

    async fn options_for(&self, competition_id: i64) -> Result<Vec<CompetitionOption>> {
        let rows: Vec<OptionRow> = sqlx::query_as(
            "SELECT id, competition_id, symbol, name, external_key FROM options \
             WHERE competition_id = ? ORDER BY id ASC",
        )
        .bind(competition_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(CompetitionOption::from).collect())
    }

    async fn competitions_due_for_close(
        &self,
        category: Category,
        now: DateTime<Utc>,
    ) -> Result<Vec<Competition>> {
        self.competitions_due("closed_at", "deadline_at", category, now).await
    }

    async fn competitions_due_for_end(
        &self,
        category: Category,
        now: DateTime<Utc>,
    ) -> Result<Vec<Competition>> {
        self.competitions_due("ended_at", "eval_end_at", category, now).await
    }

    async fn mark_closed(&self, competition_id: i64, at: DateTime<Utc>) -> Result<bool> {
        self.stamp_marker("closed_at", competition_id, at).await
    }

    async fn mark_ended(&self, competition_id: i64, at: DateTime<Utc>) -> Result<bool> {
        self.stamp_marker("ended_at", competition_id, at).await
    }

    async fn count_guesses(&self, competition_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM guesses WHERE competition_id = ?")
            .bind(competition_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn guesses_for(&self, competition_id: i64) -> Result<Vec<Guess>> {
        let rows: Vec<GuessRow> = sqlx::query_as(
            "SELECT user_id, competition_id, option_id FROM guesses \
             WHERE competition_id = ? ORDER BY user_id ASC",
        )
        .bind(competition_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Guess::from).collect())
    }

    async fn upsert_price_observations(
        &self,
        observations: &[PriceObservation],
        fetched_at: DateTime<Utc>,
    ) -> Result<usize> {
        let fetched_at = format_utc(&fetched_at);
        let mut written = 0usize;
        for o in observations {
            let done = sqlx::query(
                r#"
                INSERT INTO price_observations
                    (category, symbol, date, close, previous_close, change_pct, fetched_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(category, symbol, date) DO UPDATE SET
                    close = excluded.close,
                    previous_close = excluded.previous_close,
                    change_pct = excluded.change_pct,
                    fetched_at = excluded.fetched_at
                "#,
            )
            .bind(o.category.as_str())
            .bind(&o.symbol)
            .bind(format_date(o.date))
            .bind(o.close)
            .bind(o.previous_close)
            .bind(o.change_pct)
            .bind(&fetched_at)
            .execute(&self.pool)
            .await?;
            written += done.rows_affected() as usize;
        }
        Ok(written)
    }

    async fn observations_on(
        &self,
        category: Category,
        date: NaiveDate,
        symbols: &[String],
        fetched_since: DateTime<Utc>,
    ) -> Result<Vec<PriceObservation>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT category, symbol, date, close, previous_close, change_pct \
             FROM price_observations \
             WHERE category = ? AND date = ? \
               AND CAST(strftime('%s', fetched_at) AS INTEGER) >= ? \
               AND symbol IN ({}) \
             ORDER BY symbol ASC",
            placeholders(symbols.len())
        );
        let mut query = sqlx::query_as::<_, PriceObservationRow>(&sql)
            .bind(category.as_str())
            .bind(format_date(date))
            .bind(fetched_since.timestamp());
        for s in symbols {
            query = query.bind(s);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(PriceObservation::try_from).collect()
    }

    async fn latest_observations_before(
        &self,
        category: Category,
        date: NaiveDate,
        symbols: &[String],
    ) -> Result<Vec<PriceObservation>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT p.category, p.symbol, p.date, p.close, p.previous_close, p.change_pct \
             FROM price_observations p \
             WHERE p.category = ? AND p.symbol IN ({}) \
               AND p.date = ( \
                   SELECT MAX(q.date) FROM price_observations q \
                   WHERE q.category = p.category AND q.symbol = p.symbol AND q.date < ? \
               ) \
             ORDER BY p.symbol ASC",
            placeholders(symbols.len())
        );
        let mut query = sqlx::query_as::<_, PriceObservationRow>(&sql).bind(category.as_str());
        for s in symbols {
            query = query.bind(s);
        }
        let rows = query.bind(format_date(date)).fetch_all(&self.pool).await?;
        rows.into_iter().map(PriceObservation::try_from).collect()
    }

    async fn upsert_ranked_results(&self, results: &[RankedResult]) -> Result<usize> {
        let mut written = 0usize;
        for r in results {
            let done = sqlx::query(
                r#"
                INSERT INTO ranked_results (competition_id, option_id, pct_change, is_winner, rank)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(competition_id, option_id) DO UPDATE SET
                    pct_change = excluded.pct_change,
                    is_winner = excluded.is_winner,
                    rank = excluded.rank
                "#,
            )
            .bind(r.competition_id)
            .bind(r.option_id)
            .bind(r.pct_change)
            .bind(i64::from(r.is_winner))
            .bind(i64::from(r.rank))
            .execute(&self.pool)
            .await?;
            written += done.rows_affected() as usize;
        }
        Ok(written)
    }

    async fn ranked_results_for(&self, competition_id: i64) -> Result<Vec<RankedResult>> {
        let rows: Vec<RankedResultRow> = sqlx::query_as(
            "SELECT competition_id, option_id, pct_change, is_winner, rank FROM ranked_results \
             WHERE competition_id = ? ORDER BY rank ASC",
        )
        .bind(competition_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RankedResult::from).collect())
    }

    async fn upsert_scores(&self, scores: &[Score]) -> Result<usize> {
        let mut written = 0usize;
        for s in scores {
            let metadata = serde_json::to_string(&s.metadata)?;
            let done = sqlx::query(
                r#"
                INSERT INTO scores (user_id, competition_id, points, metadata)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(user_id, competition_id) DO UPDATE SET
                    points = excluded.points,
                    metadata = excluded.metadata
                "#,
            )
            .bind(&s.user_id)
            .bind(s.competition_id)
            .bind(i64::from(s.points))
            .bind(metadata)
            .execute(&self.pool)
            .await?;
            written += done.rows_affected() as usize;
        }
        Ok(written)
    }

    async fn scores_for(&self, competition_id: i64) -> Result<Vec<Score>> {
        let rows: Vec<ScoreRow> = sqlx::query_as(
            "SELECT user_id, competition_id, points, metadata FROM scores \
             WHERE competition_id = ? ORDER BY user_id ASC",
        )
        .bind(competition_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Score::try_from).collect()
    }
}
