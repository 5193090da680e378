use chrono::{DateTime, Days, FixedOffset, NaiveDate, Utc};
use serde::Serialize;

use crate::clock::{et_fields, is_weekday_date, local_at};
use crate::config::REFERENCE_TIMEZONE;
use crate::registry::CompetitionConfig;

/// Lifecycle timestamps for the competition evaluated tomorrow.
/// Each carries the UTC offset of its own local civil time; a DST change between
/// deadline and evaluation end shows up as two different offsets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompetitionTiming {
    pub start_at: DateTime<FixedOffset>,
    pub deadline_at: DateTime<FixedOffset>,
    pub eval_start_at: DateTime<FixedOffset>,
    pub eval_end_at: DateTime<FixedOffset>,
    pub timezone: &'static str,
}

impl CompetitionTiming {
    pub fn evaluation_date(&self) -> NaiveDate {
        self.eval_start_at.date_naive()
    }
}

pub fn generate_timing(now: DateTime<Utc>) -> CompetitionTiming {
    let today = et_fields(now).date;
    let tomorrow = next_day(today);

    let start_at = local_at(tomorrow, 0, 0, 0);
    CompetitionTiming {
        start_at,
        deadline_at: local_at(today, 22, 0, 0),
        eval_start_at: start_at,
        eval_end_at: local_at(tomorrow, 23, 59, 59),
        timezone: REFERENCE_TIMEZONE,
    }
}

/// `{prefix}-{YYYY}-{MM}-{DD}`
pub fn generate_slug(prefix: &str, date: NaiveDate) -> String {
    format!("{prefix}-{}", date.format("%Y-%m-%d"))
}

/// Weekend gate. Always true for categories that run seven days a week.
pub fn should_run(config: &CompetitionConfig, date: NaiveDate) -> bool {
    config.runs_on_weekends || is_weekday_date(date)
}

/// Human title, e.g. `S&P 500 Best Performer: Tuesday, January 16, 2024`.
pub fn generate_title(config: &CompetitionConfig, date: NaiveDate) -> String {
    format!("{}: {}", config.display_name, date.format("%A, %B %-d, %Y"))
}

pub fn next_day(date: NaiveDate) -> NaiveDate {
    date.checked_add_days(Days::new(1)).unwrap_or(date)
}

pub fn previous_day(date: NaiveDate) -> NaiveDate {
    date.checked_sub_days(Days::new(1)).unwrap_or(date)
}
