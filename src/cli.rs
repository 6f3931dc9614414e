/// CLI Module
///
/// Command-line interface configuration using clap.
use clap::Parser;
use std::path::PathBuf;

/// Export Migrator
///
/// Move pending staging rows into the destination table, keeping a backup of
/// the destination and marking the source rows as exported.
#[derive(Parser, Debug)]
#[command(name = "export-migrator")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// JSON file describing the migration (tables, columns, enrichment)
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Source table (overrides the config file and MIGRATE_SOURCE)
    #[arg(short = 's', long, value_name = "SCHEMA.TABLE")]
    pub source: Option<String>,

    /// Destination table (overrides the config file and MIGRATE_DESTINATION)
    #[arg(short = 'd', long, value_name = "SCHEMA.TABLE")]
    pub destination: Option<String>,

    /// Backup table (overrides the config file and MIGRATE_BACKUP)
    #[arg(short = 'b', long, value_name = "SCHEMA.TABLE")]
    pub backup: Option<String>,

    /// Natural-key column; repeat for a composite key
    #[arg(short = 'k', long = "natural-key", value_name = "COLUMN")]
    pub natural_key: Vec<String>,

    /// Source column identifying the rows to mark as exported
    #[arg(long, value_name = "COLUMN")]
    pub id_column: Option<String>,

    /// Abort a stage that runs longer than this
    #[arg(long, value_name = "SECONDS")]
    pub stage_timeout: Option<u64>,

    /// Skip the single-flight lease on the destination table
    #[arg(long)]
    pub no_lease: bool,
}

impl Cli {
    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        for (flag, value) in [("--source", &self.source), ("--destination", &self.destination), ("--backup", &self.backup)]
        {
            if let Some(raw) = value {
                if crate::models::TableRef::parse(raw).is_none() {
                    anyhow::bail!("{} expects SCHEMA.TABLE, got {:?}", flag, raw);
                }
            }
        }

        if self.stage_timeout == Some(0) {
            anyhow::bail!("Stage timeout must be greater than 0");
        }

        if self.natural_key.iter().any(|k| k.trim().is_empty()) {
            anyhow::bail!("Natural-key columns must not be empty");
        }

        Ok(())
    }
}
