// API server implementation using actix-web

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;

use crate::api::{auth, middleware, routes};
use crate::config::AppConfig;
use crate::database_ops::store::Store;
use crate::orchestrator::{JobContext, JobSettings, Sources};

/// Shared handler state. Two store handles, one per privilege level.
#[derive(Clone)]
pub struct AppState {
    /// Read-level store for the presentation read paths.
    pub reader: Option<Arc<dyn Store>>,
    /// Write-level store; jobs fail with a configuration error without it.
    pub writer: Option<Arc<dyn Store>>,
    pub sources: Sources,
    pub settings: JobSettings,
    pub started: Instant,
}

impl AppState {
    pub fn new(
        reader: Option<Arc<dyn Store>>,
        writer: Option<Arc<dyn Store>>,
        sources: Sources,
        settings: JobSettings,
    ) -> Self {
        Self {
            reader,
            writer,
            sources,
            settings,
            started: Instant::now(),
        }
    }

    /// Job context over the write-level store, if one is configured.
    pub fn job_context(&self) -> Option<JobContext> {
        Some(JobContext {
            store: self.writer.clone()?,
            sources: self.sources.clone(),
            settings: self.settings.clone(),
        })
    }
}

pub struct ApiServer {
    pub host: String,
    pub port: u16,
    pub cron_secret: Option<String>,
    pub dev_mode: bool,
    pub allowed_origins: Vec<String>,
}

impl ApiServer {
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        if cfg.cron_secret.is_none() && !cfg.dev_mode {
            tracing::warn!("CRON_SECRET is not set: every cron request will be rejected");
        }
        Ok(Self {
            host: cfg.api_host.clone(),
            port: cfg.api_port,
            cron_secret: cfg.cron_secret.clone(),
            dev_mode: cfg.dev_mode,
            allowed_origins: cfg.allowed_origins.clone(),
        })
    }

    /// Start the HTTP server
    pub async fn run(self, state: AppState) -> Result<()> {
        let bind_addr = format!("{}:{}", self.host, self.port);

        tracing::info!(
            host = %self.host,
            port = %self.port,
            dev_mode = self.dev_mode,
            write_access = state.writer.is_some(),
            "Starting livegame-sync API server"
        );

        let state = web::Data::new(state);
        let cron_secret = self.cron_secret.clone();
        let dev_mode = self.dev_mode;
        let allowed_origins = self.allowed_origins.clone();

        HttpServer::new(move || {
            let (logger, compress) = middleware::setup_middleware();
            let cors = middleware::setup_cors(&allowed_origins);
            let auth = auth::Auth::new(cron_secret.clone(), dev_mode);

            App::new()
                .app_data(state.clone())
                .wrap(auth)
                .wrap(cors)
                .wrap(compress)
                .wrap(logger)
                .configure(routes::configure_routes)
        })
        .bind(&bind_addr)
        .with_context(|| format!("Failed to bind to {}", bind_addr))?
        .run()
        .await
        .context("HTTP server error")?;

        Ok(())
    }
}
