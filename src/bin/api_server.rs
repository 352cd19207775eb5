// HTTP entry point for the scheduler and the presentation read path

use anyhow::Result;
use livegame_sync::api::{ApiServer, AppState};
use livegame_sync::config::AppConfig;
use livegame_sync::database_ops::store::{PgStore, Store};
use livegame_sync::logging::init_tracing;
use livegame_sync::orchestrator::{JobSettings, Sources};
use livegame_sync::util::db::Db;
use livegame_sync::util::env as env_util;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> Result<()> {
    env_util::init_env();
    init_tracing("info,sqlx=warn")?;

    tracing::info!("Initializing livegame-sync API server");

    let cfg = AppConfig::from_env();
    let server = ApiServer::from_config(&cfg)?;

    // Read-level handle is required; the write-level one only gates the jobs.
    let database_url = env_util::env_req("DATABASE_URL")?;
    let reader: Arc<dyn Store> = Arc::new(PgStore::new(
        Db::connect_read_only(&database_url, cfg.db_max_conns).await?,
    ));
    let writer: Option<Arc<dyn Store>> = match &cfg.service_database_url {
        Some(url) => Some(Arc::new(PgStore::new(Db::connect(url, cfg.db_max_conns).await?))),
        None => {
            tracing::warn!("DATABASE_SERVICE_URL is not set: cron jobs will fail with a configuration error");
            None
        }
    };

    tracing::info!("Database connected successfully");

    let state = AppState::new(
        Some(reader),
        writer,
        Sources::from_config(&cfg)?,
        JobSettings::from_config(&cfg),
    );
    server.run(state).await?;

    Ok(())
}
