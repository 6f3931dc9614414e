/// Configuration Module
///
/// Describes which tables and columns one migration run works on. Values come
/// from defaults, an optional JSON file, `MIGRATE_*` environment variables and
/// finally CLI flags, in that order of precedence.
use crate::cli::Cli;
use crate::error::MigrateError;
use crate::models::TableRef;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationConfig {
    /// Staging table the pending rows are read from
    pub source: TableRef,
    /// Table the rows are migrated into
    pub destination: TableRef,
    /// Single-generation snapshot of `destination`
    pub backup: TableRef,
    pub sentinel_column: String,
    /// Sentinel value marking a source row as not yet exported
    pub pending_value: NaiveDate,
    /// Destination columns identifying a logical entity
    pub natural_key: Vec<String>,
    /// Source column used to flip the sentinel after a successful load
    pub id_column: String,
    /// Constant columns added to every row by the transform stage
    pub enrichment: BTreeMap<String, String>,
    /// Serialize runs per destination table with an advisory lease
    pub lease: bool,
    pub stage_timeout_secs: Option<u64>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            source: TableRef::new("stg", "lps_map"),
            destination: TableRef::new("public", "lps_map"),
            backup: TableRef::new("bkp", "lps_map"),
            sentinel_column: "exported_at".to_string(),
            pending_value: NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or(NaiveDate::MAX),
            natural_key: vec!["base".to_string()],
            id_column: "message_id".to_string(),
            enrichment: BTreeMap::from([("product_id".to_string(), "ABCD".to_string())]),
            lease: true,
            stage_timeout_secs: None,
        }
    }
}

impl MigrationConfig {
    /// Load a configuration file; missing fields keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MigrateError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| MigrateError::Config(format!("cannot read {}: {}", path.display(), e)))?;

        serde_json::from_str(&contents)
            .map_err(|e| MigrateError::Config(format!("cannot parse {}: {}", path.display(), e)))
    }

    /// Apply `MIGRATE_SOURCE`, `MIGRATE_DESTINATION` and `MIGRATE_BACKUP` overrides
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), MigrateError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (key, slot) in [
            ("MIGRATE_SOURCE", &mut self.source),
            ("MIGRATE_DESTINATION", &mut self.destination),
            ("MIGRATE_BACKUP", &mut self.backup),
        ] {
            if let Some(raw) = lookup(key) {
                *slot = parse_table(key, &raw)?;
            }
        }
        Ok(())
    }

    /// Apply CLI overrides
    pub fn merge_cli(&mut self, cli: &Cli) -> Result<(), MigrateError> {
        if let Some(raw) = &cli.source {
            self.source = parse_table("--source", raw)?;
        }
        if let Some(raw) = &cli.destination {
            self.destination = parse_table("--destination", raw)?;
        }
        if let Some(raw) = &cli.backup {
            self.backup = parse_table("--backup", raw)?;
        }
        if !cli.natural_key.is_empty() {
            self.natural_key = cli.natural_key.clone();
        }
        if let Some(id) = &cli.id_column {
            self.id_column = id.clone();
        }
        if let Some(secs) = cli.stage_timeout {
            self.stage_timeout_secs = Some(secs);
        }
        if cli.no_lease {
            self.lease = false;
        }
        Ok(())
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_secs.map(Duration::from_secs)
    }

    /// Key the single-flight lease is taken on
    pub fn lease_key(&self) -> String {
        format!("export-migrator:{}", self.destination)
    }

    /// Reject configurations that would make a run unsafe
    pub fn validate(&self) -> Result<(), MigrateError> {
        if self.natural_key.is_empty() {
            return Err(MigrateError::Config("at least one natural-key column is required".to_string()));
        }

        let identifiers = [&self.sentinel_column, &self.id_column]
            .into_iter()
            .chain(self.natural_key.iter())
            .chain(self.enrichment.keys());
        for ident in identifiers {
            if ident.trim().is_empty() {
                return Err(MigrateError::Config("column names must not be empty".to_string()));
            }
        }

        if self.backup == self.destination || self.backup == self.source {
            return Err(MigrateError::Config(format!(
                "backup table {} must differ from the source and destination tables",
                self.backup
            )));
        }

        if let Some(column) =
            self.enrichment.keys().find(|c| self.natural_key.contains(*c) || **c == self.id_column)
        {
            return Err(MigrateError::Config(format!(
                "enrichment column `{}` would overwrite a key or identifier column",
                column
            )));
        }

        if self.stage_timeout_secs == Some(0) {
            return Err(MigrateError::Config("stage timeout must be greater than 0".to_string()));
        }

        Ok(())
    }
}

fn parse_table(origin: &str, raw: &str) -> Result<TableRef, MigrateError> {
    TableRef::parse(raw)
        .ok_or_else(|| MigrateError::Config(format!("{} expects SCHEMA.TABLE, got {:?}", origin, raw)))
}
