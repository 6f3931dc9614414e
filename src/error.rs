/// Error Module
///
/// Typed failures for the migration run. `StoreError` describes what went wrong
/// at the table-access layer; `MigrateError` adds the stage and table it
/// happened in.
use crate::models::TableRef;
use crate::pipeline::Stage;
use std::time::Duration;
use thiserror::Error;

/// Failure at the table-access layer
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("missing connection field `{0}`")]
    MissingCredential(&'static str),

    #[error("invalid identifier {0:?}")]
    InvalidIdentifier(String),

    #[error("table {0} does not exist")]
    MissingTable(TableRef),

    #[error("column `{column}` is not present in {table}")]
    UnknownColumn { table: TableRef, column: String },

    #[error("column `{column}` has unsupported type {type_name}")]
    UnsupportedType { column: String, type_name: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure of a migration run
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("could not open a connection for the {stage} stage: {source}")]
    Connection {
        stage: Stage,
        #[source]
        source: StoreError,
    },

    #[error("another run holds the lease on {key}")]
    LeaseUnavailable { key: String },

    #[error("lease on {key} could not be taken: {source}")]
    Lease {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("extract from {table} failed: {source}")]
    Extract {
        table: TableRef,
        #[source]
        source: StoreError,
    },

    #[error("transform of rows from {table} failed: {source}")]
    Transform {
        table: TableRef,
        #[source]
        source: StoreError,
    },

    #[error("backup into {table} failed: {source}")]
    Backup {
        table: TableRef,
        #[source]
        source: StoreError,
    },

    #[error("reconcile-delete on {table} failed: {source}")]
    Delete {
        table: TableRef,
        #[source]
        source: StoreError,
    },

    #[error("load into {table} failed: {source}")]
    Load {
        table: TableRef,
        #[source]
        source: StoreError,
    },

    #[error("mark-exported on {table} failed: {source}")]
    MarkExported {
        table: TableRef,
        #[source]
        source: StoreError,
    },
}

impl MigrateError {
    /// Wrap a table-access failure in the variant belonging to `stage`
    pub fn at_stage(stage: Stage, table: &TableRef, source: StoreError) -> Self {
        let table = table.clone();
        match stage {
            Stage::Extract => Self::Extract { table, source },
            Stage::Transform => Self::Transform { table, source },
            Stage::Backup => Self::Backup { table, source },
            Stage::ReconcileDelete => Self::Delete { table, source },
            Stage::Load => Self::Load { table, source },
            Stage::MarkExported => Self::MarkExported { table, source },
        }
    }

    /// The stage the run failed in, if it got that far
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Config(_) | Self::LeaseUnavailable { .. } | Self::Lease { .. } => None,
            Self::Connection { stage, .. } => Some(*stage),
            Self::Extract { .. } => Some(Stage::Extract),
            Self::Transform { .. } => Some(Stage::Transform),
            Self::Backup { .. } => Some(Stage::Backup),
            Self::Delete { .. } => Some(Stage::ReconcileDelete),
            Self::Load { .. } => Some(Stage::Load),
            Self::MarkExported { .. } => Some(Stage::MarkExported),
        }
    }
}
