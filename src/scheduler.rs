use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::api::health::{HealthState, LastOutcome};
use crate::clock;
use crate::db::Datastore;
use crate::error::AppError;
use crate::lifecycle::{self, ActionContext};
use crate::types::{ActionKind, Category};

#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub category: Category,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    fn ok(kind: ActionKind, category: Category, result: serde_json::Value) -> Self {
        Self { kind, category, success: true, result: Some(result), error: None }
    }

    fn failed(kind: ActionKind, category: Category, error: String) -> Self {
        Self { kind, category, success: false, result: None, error: Some(error) }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub timestamp: DateTime<Utc>,
    pub actions_executed: usize,
    pub results: Vec<ActionResult>,
}

/// Evaluates every (category, action) against one instant and runs the matches.
pub struct Scheduler {
    ctx: ActionContext,
    health: Arc<HealthState>,
    /// Held for a whole tick; the poller and the trigger endpoint take turns.
    tick_lock: Mutex<()>,
}

impl Scheduler {
    pub fn new(ctx: ActionContext, health: Arc<HealthState>) -> Self {
        Self { ctx, health, tick_lock: Mutex::new(()) }
    }

    pub fn store(&self) -> &Arc<dyn Datastore> {
        &self.ctx.store
    }

    /// One tick. Categories run concurrently in their own tasks; within a category
    /// due actions run in create → close → end order. A handler error or panic
    /// becomes a failed result and never affects its siblings.
    ///
    /// Ticks never overlap: a second caller waits, then sees the markers the
    /// first one wrote.
    pub async fn execute(&self, now: DateTime<Utc>) -> Report {
        let _tick = self.tick_lock.lock().await;
        let started = Instant::now();
        debug!(
            "Tick at {} {:02}:{:02} ET (weekday {}, trading day: {})",
            clock::et_date_string(now),
            clock::et_hour(now),
            clock::et_minute(now),
            clock::et_weekday(now),
            clock::is_weekday(now),
        );

        let mut results = Vec::new();
        let mut tasks = Vec::new();
        let mut unregistered = Vec::new();

        for category in Category::ALL {
            let Some(config) = self.ctx.registry.get_config(category) else {
                unregistered.push(category);
                continue;
            };

            let due: Vec<ActionKind> = ActionKind::ALL
                .into_iter()
                .filter(|&kind| lifecycle::is_due(kind, config, now))
                .collect();
            if due.is_empty() {
                continue;
            }

            let ctx = self.ctx.clone();
            let kinds = due.clone();
            let handle = tokio::spawn(async move {
                let mut out = Vec::with_capacity(kinds.len());
                for kind in kinds {
                    info!(category = %category, action = %kind, "Running {category} {kind}");
                    let result = match lifecycle::run(kind, &ctx, category, now).await {
                        Ok(summary) => ActionResult::ok(kind, category, summary),
                        Err(e) => {
                            error!(category = %category, action = %kind, "{category} {kind} failed: {e}");
                            ActionResult::failed(kind, category, e.to_string())
                        }
                    };
                    out.push(result);
                }
                out
            });
            tasks.push((category, due, handle));
        }

        // An unregistered category has no minutes of its own. Its failure is
        // reported for the actions some registered category runs this minute.
        let due_anywhere: Vec<ActionKind> = ActionKind::ALL
            .into_iter()
            .filter(|kind| tasks.iter().any(|(_, due, _)| due.contains(kind)))
            .collect();
        for category in unregistered {
            if due_anywhere.is_empty() {
                continue;
            }
            let err = AppError::UnknownCategory(category).to_string();
            warn!(category = %category, "{err}");
            results.extend(
                due_anywhere
                    .iter()
                    .map(|&kind| ActionResult::failed(kind, category, err.clone())),
            );
        }

        for (category, due, handle) in tasks {
            match handle.await {
                Ok(out) => results.extend(out),
                Err(e) => {
                    error!(category = %category, "{category} task aborted: {e}");
                    let msg = format!("task aborted: {e}");
                    results.extend(due.into_iter().map(|kind| ActionResult::failed(kind, category, msg.clone())));
                }
            }
        }

        let report = Report { timestamp: now, actions_executed: results.len(), results };
        self.record(&report, started.elapsed());
        report
    }

    fn record(&self, report: &Report, elapsed: Duration) {
        self.health.record_tick(report.timestamp, report.actions_executed);
        self.health.tick_latency.record(elapsed);
        for r in &report.results {
            self.health.record_outcome(
                r.category,
                r.kind,
                LastOutcome { at: report.timestamp, success: r.success, error: r.error.clone() },
            );
        }
    }

    /// Internal poller. Waits for the next minute boundary, then ticks every
    /// `tick_secs`. A tick is skipped when the datastore is unreachable.
    pub async fn run(self: Arc<Self>, tick_secs: u64) {
        let now = Utc::now();
        let to_boundary = 60 - u64::from(now.second());
        tokio::time::sleep(Duration::from_secs(to_boundary)).await;

        let mut interval = tokio::time::interval(Duration::from_secs(tick_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let now = Utc::now();
            if let Err(e) = self.store().ping().await {
                warn!("Skipping tick, datastore unreachable: {e}");
                continue;
            }
            let report = self.execute(now).await;
            if report.actions_executed > 0 {
                let failed = report.results.iter().filter(|r| !r.success).count();
                info!(
                    actions = report.actions_executed,
                    failed,
                    "Tick ran {} actions ({failed} failed)",
                    report.actions_executed
                );
            }
        }
    }
}
