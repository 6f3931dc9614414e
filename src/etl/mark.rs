/// Mark Module
///
/// Flips the sentinel on the source rows that were migrated. This is the
/// commit point of a run: until it succeeds, the rows stay pending and the
/// next run extracts them again.
use crate::config::MigrationConfig;
use crate::db::TableConnection;
use crate::error::{MigrateError, StoreError};
use crate::models::RowBatch;
use crate::pipeline::Stage;

/// Set the sentinel to now for every source row whose identifier is in `original`.
///
/// `original` is the batch as extracted, before the transform stage.
pub async fn mark_exported<C: TableConnection>(
    conn: &mut C,
    original: &RowBatch,
    config: &MigrationConfig,
) -> Result<u64, MigrateError> {
    let id_column = std::slice::from_ref(&config.id_column);
    let ids: Vec<_> = original
        .key_tuples(id_column)
        .ok_or_else(|| {
            MigrateError::at_stage(
                Stage::MarkExported,
                &config.source,
                StoreError::UnknownColumn { table: config.source.clone(), column: config.id_column.clone() },
            )
        })?
        .into_iter()
        .flatten()
        .collect();

    if ids.is_empty() {
        tracing::info!("No identifiers to mark in {}", config.source);
        return Ok(0);
    }

    tracing::info!("Updating {} in {} for {} rows", config.sentinel_column, config.source, ids.len());
    let marked = conn
        .touch_where_in(&config.source, &config.sentinel_column, &config.id_column, &ids)
        .await
        .map_err(|e| MigrateError::at_stage(Stage::MarkExported, &config.source, e))?;

    tracing::info!("{} updated for {} rows in {}", config.sentinel_column, marked, config.source);
    Ok(marked)
}
