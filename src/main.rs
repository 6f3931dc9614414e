/// Export Migrator
///
/// Moves pending rows from a staging table into a destination table: extract,
/// enrich, back up the destination, delete superseded rows, append, then mark
/// the source rows as exported.
mod cli;
mod config;
mod db;
mod error;
mod etl;
mod models;
mod pipeline;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use config::MigrationConfig;
use db::{ConnectionDescriptor, PgProvider};
use pipeline::Pipeline;
use std::env;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    cli.validate().context("Invalid arguments")?;

    println!("🚀 Starting export migrator...");

    let config = load_config(&cli)?;
    println!("📤 Source:      {}", config.source);
    println!("📥 Destination: {}", config.destination);
    println!("🗄️  Backup:      {}", config.backup);

    let descriptor = ConnectionDescriptor::from_env(|key| env::var(key).ok());
    tracing::debug!("Connection descriptor: {:?}", descriptor);

    let pipeline = Pipeline::new(PgProvider::new(descriptor), config);
    let report = pipeline.run().await;
    report.print_summary();

    if let Some(error) = report.error {
        return Err(error).context("Migration run failed");
    }

    println!("\n✨ Migration complete!");
    Ok(())
}

/// Resolve the run configuration: defaults, config file, environment, then flags
fn load_config(cli: &Cli) -> Result<MigrationConfig> {
    let mut config = match &cli.config {
        Some(path) => MigrationConfig::from_file(path).context("Failed to load configuration file")?,
        None => MigrationConfig::default(),
    };

    config.apply_env(|key| env::var(key).ok()).context("Invalid table in environment")?;
    config.merge_cli(cli).context("Invalid command-line override")?;
    config.validate().context("Invalid configuration")?;

    Ok(config)
}
