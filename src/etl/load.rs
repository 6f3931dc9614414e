/// Load Module
///
/// Appends the transformed batch to the destination table. Conflicting rows
/// were already removed by the reconcile stage, so this is a plain insert.
use crate::config::MigrationConfig;
use crate::db::TableConnection;
use crate::error::{MigrateError, StoreError};
use crate::models::RowBatch;
use crate::pipeline::Stage;

/// What the load stage did to the batch before and during the insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    pub rows_inserted: u64,
    pub duplicates_dropped: usize,
    pub nulls_normalized: usize,
}

/// Normalize missing timestamps to NULL and collapse identical rows.
///
/// `temporal_columns` are the destination's date and timestamp columns.
pub fn prepare_for_load(batch: &RowBatch, temporal_columns: &[String]) -> (RowBatch, LoadOutcome) {
    let mut prepared = batch.clone();
    let nulls_normalized = prepared.normalize_temporal_nulls(temporal_columns);
    let duplicates_dropped = prepared.dedup_rows();

    (prepared, LoadOutcome { rows_inserted: 0, duplicates_dropped, nulls_normalized })
}

/// Append `batch` to the destination table, all rows or none.
///
/// A batch column the destination does not have is fatal.
pub async fn append_rows<C: TableConnection>(
    conn: &mut C,
    batch: &RowBatch,
    config: &MigrationConfig,
) -> Result<LoadOutcome, MigrateError> {
    let fail = |e| MigrateError::at_stage(Stage::Load, &config.destination, e);

    if batch.is_empty() {
        tracing::info!("Nothing to load into {}", config.destination);
        return Ok(LoadOutcome::default());
    }

    let destination_columns = conn.table_columns(&config.destination).await.map_err(fail)?;
    if let Some(column) = batch.columns().iter().find(|c| !destination_columns.iter().any(|d| &d.name == *c)) {
        return Err(fail(StoreError::UnknownColumn { table: config.destination.clone(), column: column.clone() }));
    }

    let temporal: Vec<String> =
        destination_columns.into_iter().filter(|c| c.is_temporal()).map(|c| c.name).collect();
    let (prepared, mut outcome) = prepare_for_load(batch, &temporal);
    if outcome.duplicates_dropped > 0 {
        tracing::info!("Dropped {} duplicate rows before load", outcome.duplicates_dropped);
    }

    tracing::info!("Writing {} rows to {}", prepared.len(), config.destination);
    outcome.rows_inserted = conn.insert_rows(&config.destination, &prepared).await.map_err(fail)?;

    tracing::info!("Inserted {} rows into {}", outcome.rows_inserted, config.destination);
    Ok(outcome)
}
