use chrono::{Duration, NaiveDate, Utc};
use tracing::{info, warn};

use crate::error::JobError;

use super::{Deadline, ItemOutcome, JobContext, JobKind, JobParams, JobSummary};

const DEFAULT_DAYS_BACK: i64 = 1;
const DEFAULT_DAYS_AHEAD: i64 = 14;
const MAX_WINDOW_DAYS: i64 = 62;

/// Inclusive `YYYY-MM-DD` window around `today`.
pub fn schedule_window(today: NaiveDate, days_back: i64, days_ahead: i64) -> (String, String) {
    let back = days_back.clamp(0, MAX_WINDOW_DAYS);
    let ahead = days_ahead.clamp(0, MAX_WINDOW_DAYS);
    let from = today - Duration::days(back);
    let to = today + Duration::days(ahead);
    (from.format("%Y-%m-%d").to_string(), to.format("%Y-%m-%d").to_string())
}

pub async fn run(ctx: &JobContext, params: &JobParams, deadline: &Deadline) -> Result<JobSummary, JobError> {
    let mut summary = JobSummary::new(JobKind::Events);
    let (from, to) = schedule_window(
        Utc::now().date_naive(),
        params.days_back.unwrap_or(DEFAULT_DAYS_BACK),
        params.days_ahead.unwrap_or(DEFAULT_DAYS_AHEAD),
    );
    let mut events = ctx.sources.chzzk.esports_schedules(&from, &to).await;
    if let Some(limit) = params.limit {
        events.truncate(limit);
    }
    info!(%from, %to, events = events.len(), "events: schedule fetched");

    for event in &events {
        if deadline.expired() {
            summary.timed_out = true;
            summary.counts.record(ItemOutcome::Skipped);
            continue;
        }
        match ctx.store.upsert_event(event).await {
            Ok(outcome) => summary.counts.record(outcome.into()),
            Err(err) => {
                warn!(seq = event.seq, error = %err, "events: upsert failed");
                summary.counts.record(ItemOutcome::Failed);
            }
        }
    }
    Ok(summary)
}
