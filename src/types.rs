use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Category / action kind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Equity,
    Crypto,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Equity, Category::Crypto];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Equity => "equity",
            Category::Crypto => "crypto",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "equity" => Some(Category::Equity),
            "crypto" => Some(Category::Crypto),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The three lifecycle transitions the scheduler can fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Create,
    Close,
    End,
}

impl ActionKind {
    pub const ALL: [ActionKind; 3] = [ActionKind::Create, ActionKind::Close, ActionKind::End];
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionKind::Create => "create",
            ActionKind::Close => "close",
            ActionKind::End => "end",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Competition
// ---------------------------------------------------------------------------

/// Lifecycle phase. Monotonic: a competition never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Timing generated, row not yet persisted.
    Scheduled,
    VotingOpen,
    Closed,
    Ended,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Scheduled => "scheduled",
            Phase::VotingOpen => "voting-open",
            Phase::Closed => "closed",
            Phase::Ended => "ended",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Competition {
    pub id: i64,
    pub category: Category,
    pub title: String,
    pub slug: String,
    pub start_at: DateTime<FixedOffset>,
    pub deadline_at: DateTime<FixedOffset>,
    pub eval_start_at: DateTime<FixedOffset>,
    pub eval_end_at: DateTime<FixedOffset>,
    pub closed_at: Option<DateTime<FixedOffset>>,
    pub ended_at: Option<DateTime<FixedOffset>>,
}

impl Competition {
    /// Phase derived from the transition markers alone. A competition past its
    /// deadline stays `VotingOpen` until the close action stamps `closed_at`.
    pub fn phase(&self) -> Phase {
        if self.ended_at.is_some() {
            Phase::Ended
        } else if self.closed_at.is_some() {
            Phase::Closed
        } else {
            Phase::VotingOpen
        }
    }

    /// True while new guesses may be accepted.
    pub fn accepts_guesses(&self, now: DateTime<Utc>) -> bool {
        self.phase() == Phase::VotingOpen && now < self.deadline_at.with_timezone(&Utc)
    }

    /// Calendar day (reference timezone) whose performance decides the winner.
    pub fn evaluation_date(&self) -> NaiveDate {
        self.eval_start_at.date_naive()
    }
}

/// A competition about to be upserted by slug.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCompetition {
    pub category: Category,
    pub title: String,
    pub slug: String,
    pub start_at: DateTime<FixedOffset>,
    pub deadline_at: DateTime<FixedOffset>,
    pub eval_start_at: DateTime<FixedOffset>,
    pub eval_end_at: DateTime<FixedOffset>,
}

impl NewCompetition {
    pub fn phase(&self) -> Phase {
        Phase::Scheduled
    }
}

// ---------------------------------------------------------------------------
// Options, guesses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompetitionOption {
    pub id: i64,
    pub competition_id: i64,
    pub symbol: String,
    pub name: String,
    /// Coin id for crypto, ticker for equities.
    pub external_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOption {
    pub competition_id: i64,
    pub symbol: String,
    pub name: String,
    pub external_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Guess {
    pub user_id: String,
    pub competition_id: i64,
    pub option_id: i64,
}

/// One candidate asset from a category's universe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub symbol: String,
    pub name: String,
    pub external_key: String,
}

// ---------------------------------------------------------------------------
// Prices and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceObservation {
    pub category: Category,
    pub symbol: String,
    pub date: NaiveDate,
    pub close: f64,
    pub previous_close: Option<f64>,
    /// Daily change in percent units (2.5 means +2.5%).
    pub change_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    pub competition_id: i64,
    pub option_id: i64,
    /// Fractional change over the evaluation window (0.025 means +2.5%).
    pub pct_change: f64,
    pub is_winner: bool,
    pub rank: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Score {
    pub user_id: String,
    pub competition_id: i64,
    pub points: u32,
    /// Display-only payload. Never read back by scoring.
    pub metadata: serde_json::Value,
}
