//! Static per-category competition rules.

use crate::types::Category;

/// Ranks beyond this earn nothing.
pub const MAX_SCORING_RANK: u32 = 16;

/// Points for ranks 1..=16. Strictly decreasing.
pub const POINTS_TABLE: [u32; MAX_SCORING_RANK as usize] =
    [100, 80, 65, 55, 45, 38, 32, 27, 22, 18, 14, 11, 8, 5, 3, 1];

/// Local hour and minute (reference timezone) at which an action fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinuteOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl MinuteOfDay {
    pub const fn new(hour: u32, minute: u32) -> Self {
        Self { hour, minute }
    }

    pub fn matches(&self, hour: u32, minute: u32) -> bool {
        self.hour == hour && self.minute == minute
    }
}

impl std::fmt::Display for MinuteOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompetitionConfig {
    pub category: Category,
    pub display_name: &'static str,
    /// Slug prefix, e.g. `sp500-best`.
    pub slug_prefix: &'static str,
    pub points_table: &'static [u32],
    /// Crypto trades 24/7. Equities only evaluate Monday through Friday.
    pub runs_on_weekends: bool,
    /// Informational only; scoring never checks it.
    pub min_participants: u32,
    /// Source ids in fallback order.
    pub data_sources: &'static [&'static str],
    /// When true every asset sharing the best change is flagged a winner.
    pub allow_ties: bool,
    pub create_at: MinuteOfDay,
    pub close_at: MinuteOfDay,
    pub end_at: MinuteOfDay,
}

impl CompetitionConfig {
    pub fn points_for_rank(&self, rank: Option<u32>) -> u32 {
        points_for_rank(self.points_table, rank)
    }
}

/// Points for a 1-based rank. Ranks outside the table, and absent ranks, earn 0.
pub fn points_for_rank(table: &[u32], rank: Option<u32>) -> u32 {
    match rank {
        Some(r) if (1..=MAX_SCORING_RANK).contains(&r) => {
            table.get((r - 1) as usize).copied().unwrap_or(0)
        }
        _ => 0,
    }
}

pub static EQUITY: CompetitionConfig = CompetitionConfig {
    category: Category::Equity,
    display_name: "S&P 500 Best Performer",
    slug_prefix: "sp500-best",
    points_table: &POINTS_TABLE,
    runs_on_weekends: false,
    min_participants: 1,
    data_sources: &["yahoo", "fmp"],
    allow_ties: true,
    create_at: MinuteOfDay::new(0, 1),
    close_at: MinuteOfDay::new(22, 1),
    end_at: MinuteOfDay::new(0, 10),
};

pub static CRYPTO: CompetitionConfig = CompetitionConfig {
    category: Category::Crypto,
    display_name: "Crypto Best Performer",
    slug_prefix: "crypto-best",
    points_table: &POINTS_TABLE,
    runs_on_weekends: true,
    min_participants: 1,
    data_sources: &["coingecko", "coincap"],
    allow_ties: true,
    create_at: MinuteOfDay::new(0, 1),
    close_at: MinuteOfDay::new(22, 1),
    end_at: MinuteOfDay::new(0, 5),
};

/// Loaded once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct Registry {
    configs: Vec<&'static CompetitionConfig>,
}

impl Registry {
    pub fn new(configs: Vec<&'static CompetitionConfig>) -> Self {
        Self { configs }
    }

    pub fn get_config(&self, category: Category) -> Option<&'static CompetitionConfig> {
        self.configs.iter().copied().find(|c| c.category == category)
    }

    pub fn configs(&self) -> impl Iterator<Item = &'static CompetitionConfig> + '_ {
        self.configs.iter().copied()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(vec![&EQUITY, &CRYPTO])
    }
}
