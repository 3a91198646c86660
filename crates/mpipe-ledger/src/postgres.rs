//! PostgreSQL ledger over the `media` table.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use mpipe_models::ProcessStatus;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{classify_unapplied, StatusLedger};
use crate::metrics::LedgerMetrics;

/// Ledger connection configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub database_url: String,
    /// Pool size shared by every worker
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl LedgerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> LedgerResult<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| LedgerError::config_error("DATABASE_URL not set"))?,
            max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(10),
            acquire_timeout: Duration::from_secs(30),
        })
    }
}

/// [`StatusLedger`] backed by PostgreSQL.
///
/// Every transition is a single conditional `UPDATE`, so concurrent workers
/// need no coordination beyond the row lock the database takes.
#[derive(Clone)]
pub struct PgStatusLedger {
    pool: PgPool,
    metrics: LedgerMetrics,
}

impl PgStatusLedger {
    /// Open the shared pool.
    pub async fn connect(config: &LedgerConfig) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await?;

        info!(max_connections = config.max_connections, "Connected to ledger database");
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            metrics: LedgerMetrics::noop(),
        }
    }

    pub fn with_metrics(mut self, metrics: LedgerMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Create the `media` table if it does not exist.
    pub async fn migrate(&self) -> LedgerResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Record a new upload as `IN_QUEUE`. Existing rows are left untouched.
    pub async fn register(&self, filename: &str) -> LedgerResult<()> {
        sqlx::query(
            "INSERT INTO media (filename, process_status) VALUES ($1, $2) \
             ON CONFLICT (filename) DO NOTHING",
        )
        .bind(filename)
        .bind(ProcessStatus::InQueue.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply_update(&self, filename: &str, status: ProcessStatus) -> LedgerResult<()> {
        let started = Instant::now();
        let result = sqlx::query(
            "UPDATE media SET process_status = $1 \
             WHERE filename = $2 AND process_status <> 'SUCCESS'",
        )
        .bind(status.as_str())
        .bind(filename)
        .execute(&self.pool)
        .await?;

        debug!(
            filename,
            status = %status,
            rows = result.rows_affected(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Ledger update"
        );

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let current = self.status(filename).await?;
        classify_unapplied(filename, status, current)
    }
}

#[async_trait]
impl StatusLedger for PgStatusLedger {
    async fn is_already_processed(&self, filename: &str) -> LedgerResult<bool> {
        Ok(self.status(filename).await? == Some(ProcessStatus::Success))
    }

    async fn update_status(&self, filename: &str, status: ProcessStatus) -> LedgerResult<()> {
        let result = self.apply_update(filename, status).await;
        if let Err(ref e) = result {
            if !e.is_conflict() {
                warn!(filename, status = %status, error = %e, "Ledger update failed");
            }
        }
        self.metrics.record_update(status, result.as_ref().map(|_| ()));
        result
    }

    async fn status(&self, filename: &str) -> LedgerResult<Option<ProcessStatus>> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT process_status FROM media WHERE filename = $1")
                .bind(filename)
                .fetch_optional(&self.pool)
                .await?;

        raw.map(|s| s.parse::<ProcessStatus>())
            .transpose()
            .map_err(LedgerError::from)
    }
}
