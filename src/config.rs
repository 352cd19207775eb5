use std::time::Duration;

use crate::database_ops::chzzk::client::ChzzkConfig;
use crate::database_ops::igdb::client::IgdbConfig;
use crate::database_ops::reconcile::grace_period_from_env;
use crate::database_ops::steam::provider::SteamConfig;
use crate::orchestrator::JobKind;
use crate::util::env::{env_list, env_opt, env_parse};

#[derive(Debug, Clone)]
pub struct JobBudgets {
    pub top_games: Duration,
    pub streams: Duration,
    pub metadata: Duration,
    pub evaluations: Duration,
    pub events: Duration,
}

impl Default for JobBudgets {
    fn default() -> Self {
        Self {
            top_games: Duration::from_secs(60),
            streams: Duration::from_secs(120),
            metadata: Duration::from_secs(300),
            evaluations: Duration::from_secs(120),
            events: Duration::from_secs(60),
        }
    }
}

impl JobBudgets {
    pub fn from_env() -> Self {
        let d = Self::default();
        let secs = |key: &str, fallback: Duration| Duration::from_secs(env_parse(key, fallback.as_secs()));
        Self {
            top_games: secs("JOB_BUDGET_SECS_TOP_GAMES", d.top_games),
            streams: secs("JOB_BUDGET_SECS_STREAMS", d.streams),
            metadata: secs("JOB_BUDGET_SECS_METADATA", d.metadata),
            evaluations: secs("JOB_BUDGET_SECS_EVALUATIONS", d.evaluations),
            events: secs("JOB_BUDGET_SECS_EVENTS", d.events),
        }
    }

    pub fn for_job(&self, kind: JobKind) -> Duration {
        match kind {
            JobKind::TopGames => self.top_games,
            JobKind::Streams => self.streams,
            JobKind::Metadata => self.metadata,
            JobKind::Evaluations => self.evaluations,
            JobKind::Events => self.events,
        }
    }
}

/// Process-wide settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub cron_secret: Option<String>,
    /// `APP_ENV` is development/local: the scheduler secret becomes optional.
    pub dev_mode: bool,
    /// Read-level DSN.
    pub database_url: Option<String>,
    /// Write-level DSN used by every job.
    pub service_database_url: Option<String>,
    pub db_max_conns: u32,
    pub api_host: String,
    pub api_port: u16,
    pub allowed_origins: Vec<String>,
    pub chzzk: ChzzkConfig,
    pub steam: SteamConfig,
    pub igdb: IgdbConfig,
    pub offline_grace: chrono::Duration,
    pub budgets: JobBudgets,
    pub evaluation_skip_steam_ids: Vec<i64>,
    pub evaluation_skip_igdb_titles: Vec<String>,
}

pub fn is_dev_env(app_env: Option<&str>) -> bool {
    matches!(
        app_env.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("development" | "dev" | "local")
    )
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            cron_secret: env_opt("CRON_SECRET"),
            dev_mode: is_dev_env(env_opt("APP_ENV").as_deref()),
            database_url: env_opt("DATABASE_URL"),
            service_database_url: env_opt("DATABASE_SERVICE_URL"),
            db_max_conns: env_parse("DB_MAX_CONNS", 10u32),
            api_host: env_opt("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            api_port: env_parse("API_PORT", 8080u16),
            allowed_origins: env_list("ALLOWED_ORIGINS"),
            chzzk: ChzzkConfig::from_env(),
            steam: SteamConfig::from_env(),
            igdb: IgdbConfig::from_env(),
            offline_grace: grace_period_from_env(),
            budgets: JobBudgets::from_env(),
            evaluation_skip_steam_ids: env_list("EVALUATION_SKIP_STEAM_IDS")
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect(),
            // Titles contain spaces, so only commas separate entries here.
            evaluation_skip_igdb_titles: env_opt("EVALUATION_SKIP_IGDB_TITLES")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_env_detection() {
        assert!(is_dev_env(Some("development")));
        assert!(is_dev_env(Some(" Local ")));
        assert!(!is_dev_env(Some("production")));
        assert!(!is_dev_env(None));
    }

    #[test]
    fn budgets_per_job() {
        let b = JobBudgets::default();
        assert_eq!(b.for_job(JobKind::Metadata), Duration::from_secs(300));
        assert_eq!(b.for_job(JobKind::TopGames), Duration::from_secs(60));
    }
}
