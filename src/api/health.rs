//! Shared health state for the /health endpoint.
//! Updated by the scheduler after every tick, whether polled or triggered.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::api::latency::LatencyStats;
use crate::types::{ActionKind, Category};

/// Most recent run of one (category, action).
#[derive(Debug, Clone, Serialize)]
pub struct LastOutcome {
    pub at: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Default)]
pub struct HealthState {
    ticks: AtomicU64,
    /// Unix seconds of the last tick (0 = none yet).
    last_tick_at: AtomicI64,
    last_actions_executed: AtomicU64,
    outcomes: DashMap<(Category, ActionKind), LastOutcome>,
    pub tick_latency: LatencyStats,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tick(&self, at: DateTime<Utc>, actions_executed: usize) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.last_tick_at.store(at.timestamp(), Ordering::Relaxed);
        self.last_actions_executed
            .store(actions_executed as u64, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, category: Category, kind: ActionKind, outcome: LastOutcome) {
        self.outcomes.insert((category, kind), outcome);
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn last_tick_at(&self) -> Option<DateTime<Utc>> {
        match self.last_tick_at.load(Ordering::Relaxed) {
            0 => None,
            secs => DateTime::from_timestamp(secs, 0),
        }
    }

    pub fn last_actions_executed(&self) -> u64 {
        self.last_actions_executed.load(Ordering::Relaxed)
    }

    /// `"{category}.{action}" → outcome`, sorted by key.
    pub fn outcomes(&self) -> Vec<(String, LastOutcome)> {
        let mut out: Vec<(String, LastOutcome)> = self
            .outcomes
            .iter()
            .map(|e| {
                let (category, kind) = e.key();
                (format!("{category}.{kind}"), e.value().clone())
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fresh_state_has_no_ticks() {
        let h = HealthState::new();
        assert_eq!(h.ticks(), 0);
        assert!(h.last_tick_at().is_none());
        assert!(h.outcomes().is_empty());
    }

    #[test]
    fn keeps_only_the_latest_outcome_per_action() {
        let h = HealthState::new();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 16, 5, 1, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 17, 5, 1, 0).unwrap();
        h.record_tick(t1, 2);
        h.record_outcome(
            Category::Crypto,
            ActionKind::Create,
            LastOutcome { at: t1, success: false, error: Some("down".into()) },
        );
        h.record_tick(t2, 1);
        h.record_outcome(
            Category::Crypto,
            ActionKind::Create,
            LastOutcome { at: t2, success: true, error: None },
        );
        h.record_outcome(
            Category::Equity,
            ActionKind::Create,
            LastOutcome { at: t2, success: true, error: None },
        );

        assert_eq!(h.ticks(), 2);
        assert_eq!(h.last_tick_at(), Some(t2));
        assert_eq!(h.last_actions_executed(), 1);
        let outcomes = h.outcomes();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].0, "crypto.create");
        assert!(outcomes[0].1.success);
        assert_eq!(outcomes[1].0, "equity.create");
    }
}
