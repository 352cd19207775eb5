use anyhow::Result;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

/// Thin handle over a Postgres pool. One `Db` per privilege level: the read-level
/// DSN serves read paths, the service DSN (bypasses row-level restrictions) is
/// what the scheduled jobs write through.
#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options(database_url)?)
            .await?;
        info!("connected to db");
        Ok(Self { pool })
    }

    /// Same as `connect` but every session is forced read-only, so a mis-wired
    /// read handle can never write.
    #[instrument(skip(database_url))]
    pub async fn connect_read_only(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("SET default_transaction_read_only = on")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect_with(connect_options(database_url)?)
            .await?;
        info!("connected to db (read-only)");
        Ok(Self { pool })
    }

    pub async fn ping(&self) -> bool {
        sqlx::query_scalar::<_, bool>("SELECT true")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}

fn connect_options(database_url: &str) -> Result<PgConnectOptions> {
    let mut opts = PgConnectOptions::from_str(database_url)?;
    // Ensure TLS is enabled when DSN contains sslmode=require
    if database_url.contains("sslmode=require") {
        opts = opts.ssl_mode(PgSslMode::Require);
    }
    // PgBouncer txn mode safe
    Ok(opts.statement_cache_capacity(0))
}
