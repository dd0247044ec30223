//! PPI maintenance tool
//!
//! One-shot batch jobs against the local store and snapshot files.
//!
//! **Usage:**
//! ```bash
//! ppi-tool reconcile [--limit N]
//! ppi-tool apply-overrides --file overrides.json [--fields description,risks]
//! ppi-tool extract-overrides --input dump.txt --output overrides.json
//! ppi-tool sync-questions [--limit N]
//! ppi-tool import-questions --file catalog.csv
//! ppi-tool stage-status --projects projects.json --csv status.csv [--derive-status]
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ppi_common::config::{self, Config, ConfigOverrides};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;

use ppi_sync::services::{
    extract_overrides_file, import_question_catalog, update_snapshot_file, QuestionSync,
    SourceClient, SyncService,
};

/// PPI maintenance tool
#[derive(Parser, Debug)]
#[command(name = "ppi-tool")]
#[command(about = "Batch jobs for the PPI project store")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch projects from the registry and reconcile them into the store
    Reconcile {
        /// Only the first N listed projects
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Merge a curated override file onto every stored project
    ApplyOverrides {
        /// Override JSON file
        #[arg(long, value_name = "FILE")]
        file: PathBuf,

        /// Comma-separated fields the overrides may set (default: all)
        #[arg(long, value_name = "LIST")]
        fields: Option<String>,
    },

    /// Recover curated overrides from an HTTP log dump
    ExtractOverrides {
        #[arg(long, value_name = "FILE")]
        input: PathBuf,

        #[arg(long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Fold questionnaire answers into stored projects
    SyncQuestions {
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Replace the question catalog from a CSV file
    ImportQuestions {
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
    },

    /// Apply a stage-status CSV to a JSON project snapshot
    StageStatus {
        #[arg(long, value_name = "FILE")]
        projects: PathBuf,

        #[arg(long, value_name = "FILE")]
        csv: PathBuf,

        /// Recompute each project's overall status from its stages
        #[arg(long)]
        derive_status: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = config::load_toml_or_default(args.config.as_deref())
        .context("Failed to load configuration file")?;
    ppi_sync::config::init_tracing(&toml_config.logging.level);

    info!(
        "ppi-tool v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let mut overrides = ConfigOverrides {
        database_path: args.db,
        ..Default::default()
    };
    if let Command::ApplyOverrides { file, fields } = &args.command {
        overrides.overrides_path = Some(file.clone());
        overrides.override_fields = fields.clone();
    }
    let config = Config::resolve(toml_config, overrides).context("Invalid configuration")?;

    match args.command {
        Command::Reconcile { limit } => {
            let pool = open_database(&config).await?;
            let driver = ppi_sync::config::build_driver(&config)?;
            let source = source_client(&config)?;
            let service =
                SyncService::new(pool, source, driver, config.source.fetch_concurrency);
            let summary = service
                .sync_projects(limit)
                .await
                .context("Reconciliation run failed")?;
            report("Reconciliation", &summary)
        }

        Command::ApplyOverrides { .. } => {
            let pool = open_database(&config).await?;
            let driver = ppi_sync::config::build_driver(&config)?;
            let summary = driver
                .apply_overrides(&pool)
                .await
                .context("Override application failed")?;
            report("Override application", &summary)
        }

        Command::ExtractOverrides { input, output } => {
            let summary = extract_overrides_file(&input, &output)
                .with_context(|| format!("Failed to extract overrides from {}", input.display()))?;
            report("Override extraction", &summary)
        }

        Command::SyncQuestions { limit } => {
            let pool = open_database(&config).await?;
            let resolver = ppi_sync::config::identity_resolver(&config);
            let questions = QuestionSync::new(pool, source_client(&config)?, resolver);
            let summary = questions
                .sync_all(limit, None)
                .await
                .context("Question sync failed")?;
            report("Question sync", &summary)
        }

        Command::ImportQuestions { file } => {
            let pool = open_database(&config).await?;
            let catalog = import_question_catalog(&pool, &file)
                .await
                .with_context(|| format!("Failed to import {}", file.display()))?;
            #[derive(Serialize)]
            struct ImportSummary {
                imported: usize,
                duplicates: usize,
                invalid: usize,
            }
            report(
                "Question import",
                &ImportSummary {
                    imported: catalog.questions.len(),
                    duplicates: catalog.duplicates.len(),
                    invalid: catalog.invalid,
                },
            )
        }

        Command::StageStatus {
            projects,
            csv,
            derive_status,
        } => {
            let summary = update_snapshot_file(&projects, &csv, derive_status)
                .with_context(|| format!("Failed to update {}", projects.display()))?;
            report("Stage status update", &summary)
        }
    }
}

async fn open_database(config: &Config) -> Result<SqlitePool> {
    ppi_common::db::init_database(&config.database_path)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))
}

fn source_client(config: &Config) -> Result<Arc<SourceClient>> {
    let client =
        SourceClient::new(config.source.clone()).context("Failed to create source client")?;
    Ok(Arc::new(client))
}

/// Print the run summary as JSON on stdout
fn report<T: Serialize>(label: &str, summary: &T) -> Result<()> {
    println!("{} summary:", label);
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}
