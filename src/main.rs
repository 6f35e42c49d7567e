use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use dialoguer::Confirm;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use variant_migrate::models::MigrationRun;
use variant_migrate::{Config, MigrationError, Orchestrator};

#[derive(Parser)]
#[command(
    name = "variant-migrate",
    about = "Migrate legacy product sizes into the product variant schema",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Read-only analysis of the current data; never mutates anything
    Validate {
        /// Also persist the validation report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Backup, evolve schema and migrate, skipping the validation phase
    Migrate {
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
        /// Walk the full loop without inserting anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate, then run the full migration pipeline
    Full {
        /// Skip the confirmation prompt
        #[arg(long)]
        auto_confirm: bool,
    },
    /// Delete the rows a previous run inserted, using its report file
    Rollback {
        /// Path to the run's persisted report JSON
        #[arg(long)]
        report: PathBuf,
        /// Refuse unless the report belongs to this run id
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Prompted walkthrough: validate, confirm, migrate
    Interactive,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            1
        }
    };
    process::exit(code);
}

async fn run(cli: Cli) -> Result<(), MigrationError> {
    let config = Config::from_env()?;

    // The run identifier is minted before anything else so the per-run log
    // file can capture the whole execution, connection included.
    let run = MigrationRun::begin();
    init_tracing(&config.backup_dir, &run.run_id)?;
    info!(run_id = %run.run_id, "Starting variant-migrate");

    let pool = config.connect().await?;

    let command = cli.command.unwrap_or(Command::Interactive);
    let result = dispatch(command, pool.clone(), config, run).await;

    pool.close().await;
    result
}

async fn dispatch(
    command: Command,
    pool: PgPool,
    config: Config,
    run: MigrationRun,
) -> Result<(), MigrationError> {
    match command {
        Command::Validate { json } => {
            let mut orchestrator = Orchestrator::with_run(pool, config, run);
            orchestrator.validate_only(json).await?;
            Ok(())
        }
        Command::Migrate { force, dry_run } => {
            if !force
                && !confirm(
                    "Migrate without the validation phase? A backup is taken first.",
                )?
            {
                println!("Aborted.");
                return Ok(());
            }
            let mut orchestrator = Orchestrator::with_run(pool, config, run);
            orchestrator.execute(false, dry_run).await?;
            Ok(())
        }
        Command::Full { auto_confirm } => {
            let mut orchestrator = Orchestrator::with_run(pool, config, run);
            let report = orchestrator.validate_only(false).await?;
            if !auto_confirm
                && !confirm(&format!(
                    "Proceed with migrating {} source records?",
                    report.tables.total_sizes
                ))?
            {
                println!("Aborted.");
                return Ok(());
            }
            // The pre-flight pass above was this run's validation
            orchestrator.execute(false, false).await?;
            Ok(())
        }
        Command::Rollback { report, run_id } => {
            if let Some(expected) = run_id {
                let loaded = variant_migrate::Reporter::load(&report)?;
                if loaded.run.run_id != expected {
                    return Err(MigrationError::Backup(format!(
                        "report {} belongs to run {}, not {expected}",
                        report.display(),
                        loaded.run.run_id
                    )));
                }
            }
            let deleted = Orchestrator::rollback_from_report(pool, &report).await?;
            println!("Rolled back {deleted} rows.");
            Ok(())
        }
        Command::Interactive => {
            println!("{}", "Product size → variant migration".bold());
            println!("Step 1/2: validation (read-only)\n");

            let mut orchestrator = Orchestrator::with_run(pool, config, run);
            let report = orchestrator.validate_only(false).await?;

            if report.tables.total_sizes == 0 {
                println!("Nothing to migrate.");
                return Ok(());
            }
            if !confirm(&format!(
                "Step 2/2: migrate {} source records ({} will be skipped as conflicts)?",
                report.tables.total_sizes,
                report.conflicts.len()
            ))? {
                println!("Aborted.");
                return Ok(());
            }
            // Step 1 was this run's validation
            orchestrator.execute(false, false).await?;
            Ok(())
        }
    }
}

fn confirm(prompt: &str) -> Result<bool, MigrationError> {
    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| MigrationError::Io(std::io::Error::other(e.to_string())))
}

/// Console layer plus a plain-text per-run log file under the backup dir.
fn init_tracing(backup_dir: &str, run_id: &str) -> Result<(), MigrationError> {
    fs::create_dir_all(backup_dir)?;
    let log_path = Path::new(backup_dir).join(format!("{run_id}.log"));
    let log_file = File::create(&log_path)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "variant_migrate=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Arc::new(log_file))
                .with_ansi(false),
        )
        .init();

    Ok(())
}
