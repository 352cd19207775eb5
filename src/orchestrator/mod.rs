//! Scheduled jobs. Each run is stateless and idempotent: every write is keyed
//! on a stable external identifier, so overlapping runs need no lock.

pub mod evaluations;
pub mod events;
pub mod metadata;
pub mod streams;
pub mod summary;
pub mod top_games;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::config::{AppConfig, JobBudgets};
use crate::database_ops::chzzk::client::ChzzkClient;
use crate::database_ops::igdb::client::IgdbService;
use crate::database_ops::reconcile::{OfflinePolicy, GRACE_PERIOD_MINUTES};
use crate::database_ops::steam::provider::SteamProvider;
use crate::database_ops::store::Store;
use crate::error::JobError;

pub use streams::StreamMode;
pub use summary::{Counts, Deadline, ItemOutcome, JobSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    TopGames,
    Streams,
    Metadata,
    Evaluations,
    Events,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TopGames => "top-games",
            Self::Streams => "streams",
            Self::Metadata => "metadata",
            Self::Evaluations => "evaluations",
            Self::Events => "events",
        }
    }

    pub fn from_slug(s: &str) -> Option<Self> {
        [
            Self::TopGames,
            Self::Streams,
            Self::Metadata,
            Self::Evaluations,
            Self::Events,
        ]
        .into_iter()
        .find(|k| k.as_str() == s)
    }
}

/// External read adapters, built once per process so throttles and the
/// catalog token are shared across runs.
#[derive(Clone)]
pub struct Sources {
    pub chzzk: ChzzkClient,
    pub steam: SteamProvider,
    pub igdb: Arc<IgdbService>,
}

impl Sources {
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Ok(Self {
            chzzk: ChzzkClient::new(cfg.chzzk.clone())?,
            steam: SteamProvider::new(cfg.steam.clone())?,
            igdb: Arc::new(IgdbService::new(cfg.igdb.clone())?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct JobSettings {
    pub offline_grace: chrono::Duration,
    pub budgets: JobBudgets,
    /// Parallel items per job; each adapter still enforces its own spacing.
    pub concurrency: usize,
    pub evaluation_skip_steam_ids: Vec<i64>,
    pub evaluation_skip_igdb_titles: Vec<String>,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            offline_grace: chrono::Duration::minutes(GRACE_PERIOD_MINUTES),
            budgets: JobBudgets::default(),
            concurrency: 2,
            evaluation_skip_steam_ids: Vec::new(),
            evaluation_skip_igdb_titles: Vec::new(),
        }
    }
}

impl JobSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            offline_grace: cfg.offline_grace,
            budgets: cfg.budgets.clone(),
            concurrency: cfg.chzzk.limits.concurrency.max(1),
            evaluation_skip_steam_ids: cfg.evaluation_skip_steam_ids.clone(),
            evaluation_skip_igdb_titles: cfg.evaluation_skip_igdb_titles.clone(),
        }
    }
}

/// Everything a job run needs: the write-level store plus the adapters.
#[derive(Clone)]
pub struct JobContext {
    pub store: Arc<dyn Store>,
    pub sources: Sources,
    pub settings: JobSettings,
}

/// Caller tuning knobs. Unset fields fall back to per-job defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobParams {
    /// Batch cap (streams, games or categories depending on the job).
    pub limit: Option<usize>,
    /// Process this single game only.
    pub game_id: Option<i64>,
    pub steam_app_id: Option<i64>,
    pub mode: Option<StreamMode>,
    pub policy: Option<OfflinePolicy>,
    pub review_limit: Option<usize>,
    pub critic_limit: Option<usize>,
    pub days_back: Option<i64>,
    pub days_ahead: Option<i64>,
}

pub async fn run_job(kind: JobKind, ctx: &JobContext, params: &JobParams) -> Result<JobSummary, JobError> {
    info!(job = kind.as_str(), ?params, "job started");
    let deadline = Deadline::new(ctx.settings.budgets.for_job(kind));
    let summary = match kind {
        JobKind::TopGames => top_games::run(ctx, params, &deadline).await?,
        JobKind::Streams => streams::run(ctx, params, &deadline).await?,
        JobKind::Metadata => metadata::run(ctx, params, &deadline).await?,
        JobKind::Evaluations => evaluations::run(ctx, params, &deadline).await?,
        JobKind::Events => events::run(ctx, params, &deadline).await?,
    };
    Ok(summary.finish(&deadline))
}
