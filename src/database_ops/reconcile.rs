use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{info, warn};

use crate::database_ops::store::Store;
use crate::util::env::env_parse;

/// Must exceed the shortest job interval.
pub const GRACE_PERIOD_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OfflinePolicy {
    /// `is_live = false`, viewers zeroed.
    #[default]
    Mark,
    Delete,
}

impl FromStr for OfflinePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mark" | "offline" => Ok(Self::Mark),
            "delete" => Ok(Self::Delete),
            other => bail!("unknown offline policy {other:?} (expected mark or delete)"),
        }
    }
}

/// Grace period from `OFFLINE_GRACE_MINUTES`, never below the fixed minimum.
pub fn grace_period_from_env() -> Duration {
    let minutes: i64 = env_parse("OFFLINE_GRACE_MINUTES", GRACE_PERIOD_MINUTES);
    Duration::minutes(minutes.max(GRACE_PERIOD_MINUTES))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OfflineOutcome {
    /// True when the active set was empty and nothing was considered.
    pub skipped: bool,
    pub policy: OfflinePolicy,
    pub candidates: usize,
    pub affected: u64,
}

/// Retire live rows not seen in this run and not seen by anyone within the grace period.
///
/// An empty active set is treated as a failed fetch, never as "all offline".
pub async fn reconcile_offline(
    store: &dyn Store,
    active: &[String],
    grace: Duration,
    policy: OfflinePolicy,
    now: DateTime<Utc>,
) -> Result<OfflineOutcome> {
    if active.is_empty() {
        warn!("offline reconciliation skipped: no active channels observed this run");
        return Ok(OfflineOutcome {
            skipped: true,
            policy,
            ..Default::default()
        });
    }
    let grace = grace.max(Duration::minutes(GRACE_PERIOD_MINUTES));
    let cutoff = now - grace;
    let stale = store.stale_live_streams(active, cutoff).await?;
    let ids: Vec<i64> = stale.iter().map(|s| s.id).collect();
    let affected = if ids.is_empty() {
        0
    } else {
        match policy {
            OfflinePolicy::Mark => store.mark_streams_offline(&ids).await?,
            OfflinePolicy::Delete => store.delete_streams(&ids).await?,
        }
    };
    info!(
        active = active.len(),
        candidates = ids.len(),
        affected,
        ?policy,
        %cutoff,
        "offline reconciliation done"
    );
    Ok(OfflineOutcome {
        skipped: false,
        policy,
        candidates: ids.len(),
        affected,
    })
}
