/// Transform Module
///
/// Enriches extracted rows with constant columns before they are loaded.
/// Pure: no I/O, and the input batch is left untouched.
use crate::config::MigrationConfig;
use crate::error::{MigrateError, StoreError};
use crate::models::{RowBatch, Value};
use crate::pipeline::Stage;

/// Return a copy of `batch` with every enrichment column set on every row.
///
/// Existing columns are never dropped or renamed; an enrichment column that
/// already exists is overwritten in place. The whole batch fails if a column
/// the later stages need is missing.
pub fn enrich(batch: &RowBatch, config: &MigrationConfig) -> Result<RowBatch, MigrateError> {
    let mut required = config.natural_key.iter().chain(std::iter::once(&config.id_column));
    if let Some(missing) = required.find(|c| !batch.has_column(c)) {
        return Err(MigrateError::at_stage(
            Stage::Transform,
            &config.source,
            StoreError::UnknownColumn { table: config.source.clone(), column: missing.clone() },
        ));
    }

    let mut enriched = batch.clone();
    for (column, value) in &config.enrichment {
        enriched.set_constant(column, &Value::text(value.as_str()));
    }

    tracing::info!(
        "Transformed {} rows, added {:?}",
        enriched.len(),
        config.enrichment.keys().collect::<Vec<_>>()
    );
    Ok(enriched)
}
