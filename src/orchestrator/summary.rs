use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use crate::database_ops::reconcile::OfflineOutcome;
use crate::database_ops::store::WriteOutcome;

use super::JobKind;

/// Per-item tallies. "Some items failed" is the routine case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Counts {
    pub fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Created => {
                self.processed += 1;
                self.created += 1;
            }
            ItemOutcome::Updated => {
                self.processed += 1;
                self.updated += 1;
            }
            ItemOutcome::Failed => {
                self.processed += 1;
                self.failed += 1;
            }
            ItemOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn absorb(&mut self, other: Counts) {
        self.processed += other.processed;
        self.created += other.created;
        self.updated += other.updated;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Created,
    Updated,
    Failed,
    /// Not attempted: out of budget, denylisted, or nothing to write.
    Skipped,
}

impl From<WriteOutcome> for ItemOutcome {
    fn from(w: WriteOutcome) -> Self {
        match w {
            WriteOutcome::Inserted => Self::Created,
            WriteOutcome::Updated => Self::Updated,
        }
    }
}

/// Wall-clock budget for one run.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn expired(&self) -> bool {
        self.started.elapsed() >= self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// JSON contract returned to the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job: &'static str,
    #[serde(flatten)]
    pub counts: Counts,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub sections: BTreeMap<&'static str, Counts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offline: Option<OfflineOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

impl JobSummary {
    pub fn new(kind: JobKind) -> Self {
        Self {
            job: kind.as_str(),
            counts: Counts::default(),
            sections: BTreeMap::new(),
            offline: None,
            details: None,
            timed_out: false,
            elapsed_ms: 0,
        }
    }

    pub fn section(&mut self, name: &'static str) -> &mut Counts {
        self.sections.entry(name).or_default()
    }

    /// Stamp timing and log the outcome.
    pub fn finish(mut self, deadline: &Deadline) -> Self {
        self.elapsed_ms = deadline.elapsed().as_millis() as u64;
        self.timed_out = self.timed_out || deadline.expired();
        info!(
            job = self.job,
            processed = self.counts.processed,
            created = self.counts.created,
            updated = self.counts.updated,
            failed = self.counts.failed,
            skipped = self.counts.skipped,
            timed_out = self.timed_out,
            elapsed_ms = self.elapsed_ms,
            "job finished"
        );
        self
    }
}
