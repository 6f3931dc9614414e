/// Pipeline Module
///
/// Orchestrates one migration run: Extract → Transform → Backup →
/// Reconcile-Delete → Load → Mark-Exported, with a connection opened and
/// closed around every stage and statistics tracked along the way.
///
/// Delivery is at-least-once. If a run fails after Load but before
/// Mark-Exported, the rows stay pending at the source and the next run loads
/// them again; Reconcile-Delete keeps that reload free of duplicates. There is
/// no rollback: after a failure past Backup, recovery is a manual restore from
/// the backup table.
use crate::config::MigrationConfig;
use crate::db::{ConnectionProvider, TableConnection};
use crate::error::{MigrateError, StoreError};
use crate::etl::{backup, extract, load, mark, reconcile, transform};
use crate::models::{RowBatch, TableRef};
use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Transform,
    Backup,
    ReconcileDelete,
    Load,
    MarkExported,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Extract => write!(f, "Extract"),
            Stage::Transform => write!(f, "Transform"),
            Stage::Backup => write!(f, "Backup"),
            Stage::ReconcileDelete => write!(f, "Reconcile-Delete"),
            Stage::Load => write!(f, "Load"),
            Stage::MarkExported => write!(f, "Mark-Exported"),
        }
    }
}

/// Where a run stands; each successful stage moves it one step forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Extracted,
    Transformed,
    BackedUp,
    Reconciled,
    Loaded,
    Marked,
    Failed(Stage),
}

/// Pipeline execution statistics
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub rows_extracted: usize,
    pub rows_transformed: usize,
    pub rows_deleted: u64,
    pub rows_inserted: u64,
    pub duplicates_dropped: usize,
    pub nulls_normalized: usize,
    pub rows_marked: u64,
    pub elapsed_time: Duration,
}

impl PipelineStats {
    pub fn rows_per_second(&self) -> f64 {
        let secs = self.elapsed_time.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.rows_inserted as f64 / secs
        }
    }
}

/// Outcome of one run
#[derive(Debug)]
pub struct RunReport {
    pub state: RunState,
    pub stats: PipelineStats,
    pub error: Option<MigrateError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Print final statistics
    pub fn print_summary(&self) {
        let stats = &self.stats;
        println!("\n📊 Migration Statistics:");
        println!("   ⏱️  Total time: {:.2}s", stats.elapsed_time.as_secs_f64());
        println!("   📥 Rows extracted: {}", stats.rows_extracted);
        println!("   🔧 Rows transformed: {}", stats.rows_transformed);
        println!("   🧹 Rows deleted at destination: {}", stats.rows_deleted);
        println!(
            "   💾 Rows inserted: {} ({} duplicates dropped, {} missing timestamps nulled)",
            stats.rows_inserted, stats.duplicates_dropped, stats.nulls_normalized
        );
        println!("   ✅ Rows marked exported: {}", stats.rows_marked);
        println!("   ⚡ Throughput: {:.0} rows/sec", stats.rows_per_second());
        println!("   🏁 Final state: {:?}", self.state);

        if let Some(error) = &self.error {
            println!("\n❌ Run failed: {}", error);
        }
    }
}

/// Main migration pipeline
pub struct Pipeline<P: ConnectionProvider> {
    provider: P,
    config: MigrationConfig,
}

impl<P: ConnectionProvider> Pipeline<P> {
    /// Create a new pipeline instance
    pub fn new(provider: P, config: MigrationConfig) -> Self {
        Self { provider, config }
    }

    /// Run every stage once.
    ///
    /// Never panics on a stage failure: the failure is returned in the report
    /// together with the state the run stopped in.
    pub async fn run(&self) -> RunReport {
        let start_time = Instant::now();
        let mut stats = PipelineStats::default();
        let mut state = RunState::Idle;

        tracing::info!("Starting migration from {} to {}", self.config.source, self.config.destination);

        let lease = if self.config.lease {
            match self.acquire_lease().await {
                Ok(conn) => Some(conn),
                Err(e) => {
                    tracing::error!("Migration not started: {}", e);
                    stats.elapsed_time = start_time.elapsed();
                    return RunReport { state, stats, error: Some(e) };
                }
            }
        } else {
            None
        };

        let result = self.run_stages(&mut state, &mut stats).await;

        if let Some(conn) = lease {
            self.release_lease(conn).await;
        }

        stats.elapsed_time = start_time.elapsed();

        match result {
            Ok(()) => {
                tracing::info!("Migration finished in state {:?}", state);
                RunReport { state, stats, error: None }
            }
            Err(e) => {
                if let Some(stage) = e.stage() {
                    state = RunState::Failed(stage);
                }
                tracing::error!("Migration failed in state {:?}: {}", state, e);
                RunReport { state, stats, error: Some(e) }
            }
        }
    }

    async fn run_stages(&self, state: &mut RunState, stats: &mut PipelineStats) -> Result<(), MigrateError> {
        let extracted = self.extract().await?;
        stats.rows_extracted = extracted.len();
        *state = RunState::Extracted;

        if extracted.is_empty() {
            tracing::info!("No pending rows in {}, nothing to migrate", self.config.source);
            return Ok(());
        }

        let transformed = transform::enrich(&extracted, &self.config)?;
        stats.rows_transformed = transformed.len();
        *state = RunState::Transformed;

        self.backup().await?;
        *state = RunState::BackedUp;

        stats.rows_deleted = self.reconcile(&transformed).await?;
        *state = RunState::Reconciled;

        let outcome = self.load(&transformed).await?;
        stats.rows_inserted = outcome.rows_inserted;
        stats.duplicates_dropped = outcome.duplicates_dropped;
        stats.nulls_normalized = outcome.nulls_normalized;
        *state = RunState::Loaded;

        stats.rows_marked = self.mark(&extracted).await?;
        *state = RunState::Marked;

        Ok(())
    }

    async fn extract(&self) -> Result<RowBatch, MigrateError> {
        let mut conn = self.open(Stage::Extract).await?;
        let result =
            self.timed(Stage::Extract, &self.config.source, extract::extract_pending(&mut conn, &self.config)).await;
        self.close(Stage::Extract, conn).await;
        result
    }

    async fn backup(&self) -> Result<(), MigrateError> {
        let mut conn = self.open(Stage::Backup).await?;
        let result =
            self.timed(Stage::Backup, &self.config.backup, backup::snapshot_destination(&mut conn, &self.config)).await;
        self.close(Stage::Backup, conn).await;
        result
    }

    async fn reconcile(&self, batch: &RowBatch) -> Result<u64, MigrateError> {
        let mut conn = self.open(Stage::ReconcileDelete).await?;
        let result = self
            .timed(
                Stage::ReconcileDelete,
                &self.config.destination,
                reconcile::delete_superseded(&mut conn, batch, &self.config),
            )
            .await;
        self.close(Stage::ReconcileDelete, conn).await;
        result
    }

    async fn load(&self, batch: &RowBatch) -> Result<load::LoadOutcome, MigrateError> {
        let mut conn = self.open(Stage::Load).await?;
        let result =
            self.timed(Stage::Load, &self.config.destination, load::append_rows(&mut conn, batch, &self.config)).await;
        self.close(Stage::Load, conn).await;
        result
    }

    async fn mark(&self, original: &RowBatch) -> Result<u64, MigrateError> {
        let mut conn = self.open(Stage::MarkExported).await?;
        let result = self
            .timed(Stage::MarkExported, &self.config.source, mark::mark_exported(&mut conn, original, &self.config))
            .await;
        self.close(Stage::MarkExported, conn).await;
        result
    }

    async fn open(&self, stage: Stage) -> Result<P::Connection, MigrateError> {
        self.provider.open().await.map_err(|source| MigrateError::Connection { stage, source })
    }

    // Close failures are only logged: the stage result is already decided.
    async fn close(&self, stage: Stage, conn: P::Connection) {
        if let Err(e) = conn.close().await {
            tracing::warn!("Failed to close {} connection cleanly: {}", stage, e);
        }
    }

    /// Apply the configured stage timeout, if any
    async fn timed<T, F>(&self, stage: Stage, table: &TableRef, fut: F) -> Result<T, MigrateError>
    where
        F: Future<Output = Result<T, MigrateError>>,
    {
        match self.config.stage_timeout() {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(MigrateError::at_stage(stage, table, StoreError::Timeout(limit))),
            },
            None => fut.await,
        }
    }

    async fn acquire_lease(&self) -> Result<P::Connection, MigrateError> {
        let key = self.config.lease_key();
        let mut conn =
            self.provider.open().await.map_err(|source| MigrateError::Lease { key: key.clone(), source })?;

        match conn.try_acquire_lease(&key).await {
            Ok(true) => {
                tracing::debug!("Acquired lease {}", key);
                Ok(conn)
            }
            Ok(false) => {
                self.close_lease_connection(conn).await;
                Err(MigrateError::LeaseUnavailable { key })
            }
            Err(source) => {
                self.close_lease_connection(conn).await;
                Err(MigrateError::Lease { key, source })
            }
        }
    }

    async fn release_lease(&self, mut conn: P::Connection) {
        let key = self.config.lease_key();
        if let Err(e) = conn.release_lease(&key).await {
            tracing::warn!("Failed to release lease {}: {}", key, e);
        }
        self.close_lease_connection(conn).await;
    }

    async fn close_lease_connection(&self, conn: P::Connection) {
        if let Err(e) = conn.close().await {
            tracing::warn!("Failed to close lease connection cleanly: {}", e);
        }
    }
}
