/// Extract Module
///
/// Reads the rows of the source table that are still waiting to be exported.
use crate::config::MigrationConfig;
use crate::db::TableConnection;
use crate::error::MigrateError;
use crate::models::{RowBatch, Value};
use crate::pipeline::Stage;

/// Fetch every source row whose sentinel holds the pending value.
///
/// An empty batch is a normal outcome and means there is nothing to migrate.
pub async fn extract_pending<C: TableConnection>(
    conn: &mut C,
    config: &MigrationConfig,
) -> Result<RowBatch, MigrateError> {
    let pending = Value::Date(config.pending_value);

    tracing::info!("Extracting rows from {} where {} = {}", config.source, config.sentinel_column, pending);

    let batch = conn
        .select_where_eq(&config.source, &config.sentinel_column, &pending)
        .await
        .map_err(|e| MigrateError::at_stage(Stage::Extract, &config.source, e))?;

    tracing::info!("Extracted {} pending rows from {}", batch.len(), config.source);
    Ok(batch)
}
