/// Reconcile Module
///
/// Removes destination rows that the incoming batch supersedes, so the append
/// that follows cannot produce duplicate natural keys.
use crate::config::MigrationConfig;
use crate::db::TableConnection;
use crate::error::{MigrateError, StoreError};
use crate::models::RowBatch;
use crate::pipeline::Stage;

/// Delete every destination row whose natural key appears in `batch`.
///
/// With no usable keys in the batch this issues no statement at all; an
/// unguarded `DELETE` would wipe the destination.
pub async fn delete_superseded<C: TableConnection>(
    conn: &mut C,
    batch: &RowBatch,
    config: &MigrationConfig,
) -> Result<u64, MigrateError> {
    let keys = batch.key_tuples(&config.natural_key).ok_or_else(|| {
        let column = config.natural_key.iter().find(|c| !batch.has_column(c)).cloned().unwrap_or_default();
        MigrateError::at_stage(
            Stage::ReconcileDelete,
            &config.destination,
            StoreError::UnknownColumn { table: config.destination.clone(), column },
        )
    })?;

    if keys.is_empty() {
        tracing::info!("No natural keys in batch, nothing to delete from {}", config.destination);
        return Ok(0);
    }

    tracing::info!("Deleting rows from {} matching {} natural keys", config.destination, keys.len());
    let deleted = conn
        .delete_where_in(&config.destination, &config.natural_key, &keys)
        .await
        .map_err(|e| MigrateError::at_stage(Stage::ReconcileDelete, &config.destination, e))?;

    tracing::info!("Deleted {} superseded rows from {}", deleted, config.destination);
    Ok(deleted)
}
