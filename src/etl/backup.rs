/// Backup Module
///
/// Replaces the backup table with a full copy of the destination table. The
/// backup is the only recovery path for the mutating stages that follow, so
/// the pipeline does not go on unless this stage succeeds.
use crate::config::MigrationConfig;
use crate::db::TableConnection;
use crate::error::MigrateError;
use crate::pipeline::Stage;

/// Drop the previous backup, then copy the destination into it.
///
/// The copy only runs once the drop succeeded. If the copy fails the backup
/// table is left absent; the destination itself is never touched here.
pub async fn snapshot_destination<C: TableConnection>(
    conn: &mut C,
    config: &MigrationConfig,
) -> Result<(), MigrateError> {
    let fail = |e| MigrateError::at_stage(Stage::Backup, &config.backup, e);

    tracing::info!("Dropping {} if it exists", config.backup);
    conn.drop_table_if_exists(&config.backup).await.map_err(fail)?;

    tracing::info!("Creating backup table {} from {}", config.backup, config.destination);
    conn.create_table_as_copy(&config.backup, &config.destination).await.map_err(fail)?;

    tracing::info!("Backup table {} created successfully", config.backup);
    Ok(())
}
