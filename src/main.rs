use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use livegame_sync::config::AppConfig;
use livegame_sync::database_ops::reconcile::OfflinePolicy;
use livegame_sync::database_ops::store::{MemoryStore, PgStore, Store};
use livegame_sync::error::JobError;
use livegame_sync::logging::init_tracing;
use livegame_sync::orchestrator::{run_job, JobContext, JobKind, JobParams, JobSettings, Sources, StreamMode};
use livegame_sync::util::db::Db;
use livegame_sync::util::env as env_util;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "livegame-sync", version, about = "Live game discovery and metadata sync")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Run one job once and print its JSON summary
    Run {
        #[arg(value_enum)]
        job: JobKind,
        /// Use an empty in-memory store instead of DATABASE_SERVICE_URL
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Batch cap (streams, games or categories depending on the job)
        #[arg(long)]
        limit: Option<usize>,
        /// Process this game id only
        #[arg(long)]
        game_id: Option<i64>,
        /// Process the game with this storefront id only
        #[arg(long)]
        steam_app_id: Option<i64>,
        /// Stream discovery source
        #[arg(long, value_enum)]
        mode: Option<StreamMode>,
        /// What to do with streams that went offline
        #[arg(long, value_enum)]
        policy: Option<OfflinePolicy>,
        #[arg(long)]
        review_limit: Option<usize>,
        #[arg(long)]
        critic_limit: Option<usize>,
        #[arg(long)]
        days_back: Option<i64>,
        #[arg(long)]
        days_ahead: Option<i64>,
    },
    /// Report which settings and credentials are present (values are never printed)
    CheckEnv,
}

async fn write_store(cfg: &AppConfig, dry_run: bool) -> Result<Arc<dyn Store>> {
    if dry_run {
        info!("dry run: writing to an in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let url = cfg
        .service_database_url
        .as_deref()
        .ok_or_else(|| JobError::config("DATABASE_SERVICE_URL is required (or pass --dry-run)"))?;
    let db = Db::connect(url, cfg.db_max_conns)
        .await
        .context("connecting with DATABASE_SERVICE_URL")?;
    Ok(Arc::new(PgStore::new(db)))
}

fn check_env(cfg: &AppConfig) {
    let present = |v: bool| if v { "set" } else { "missing" };
    println!("CRON_SECRET            {}", present(cfg.cron_secret.is_some()));
    println!("APP_ENV dev mode       {}", cfg.dev_mode);
    println!("DATABASE_URL           {}", present(cfg.database_url.is_some()));
    println!("DATABASE_SERVICE_URL   {}", present(cfg.service_database_url.is_some()));
    println!("TWITCH credentials     {}", present(cfg.igdb.has_credentials()));
    println!("offline grace          {} min", cfg.offline_grace.num_minutes());
    println!("chzzk                  {}", cfg.chzzk.base_url);
    println!("steam                  {} ({})", cfg.steam.base_url, cfg.steam.region);
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    init_tracing("info,sqlx=warn")?;
    let cli = Cli::parse();
    let cfg = AppConfig::from_env();

    match cli.command {
        Commands::CheckEnv => check_env(&cfg),
        Commands::Run {
            job,
            dry_run,
            limit,
            game_id,
            steam_app_id,
            mode,
            policy,
            review_limit,
            critic_limit,
            days_back,
            days_ahead,
        } => {
            let ctx = JobContext {
                store: write_store(&cfg, dry_run).await?,
                sources: Sources::from_config(&cfg)?,
                settings: JobSettings::from_config(&cfg),
            };
            let params = JobParams {
                limit,
                game_id,
                steam_app_id,
                mode,
                policy,
                review_limit,
                critic_limit,
                days_back,
                days_ahead,
            };
            let summary = run_job(job, &ctx, &params).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}
