//! Run reporting.
//!
//! Pure aggregation over the run's counters, timings and ledger: a JSON
//! report file for machines (and forensic manual rollback), a colorized
//! console summary for the operator, and a fixed set of rule-based
//! recommendations. The report is attempted even after a failed run so the
//! ledger survives for manual recovery.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::MigrationError;
use crate::models::MigrationRun;

/// The persisted per-run report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    pub generated_at: DateTime<Utc>,
    pub success: bool,
    pub run: MigrationRun,
    pub recommendations: Vec<String>,
}

pub struct Reporter {
    backup_dir: PathBuf,
}

impl Reporter {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }

    /// Aggregate the run into a report structure.
    pub fn generate(&self, run: &MigrationRun, success: bool) -> MigrationReport {
        MigrationReport {
            generated_at: Utc::now(),
            success,
            run: run.clone(),
            recommendations: recommendations(run, success),
        }
    }

    /// Write the report JSON next to the backup, named by run id.
    pub fn write_json(&self, report: &MigrationReport) -> Result<PathBuf, MigrationError> {
        fs::create_dir_all(&self.backup_dir)?;
        let path = self.report_path(&report.run.run_id);
        fs::write(&path, serde_json::to_vec_pretty(report)?)?;
        info!(path = %path.display(), "Migration report written");
        Ok(path)
    }

    pub fn report_path(&self, run_id: &str) -> PathBuf {
        self.backup_dir.join(format!("{run_id}-report.json"))
    }

    /// Reload a persisted report, e.g. for a manual ledger-driven rollback.
    pub fn load(path: &Path) -> Result<MigrationReport, MigrationError> {
        let raw = fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Print the operator-facing summary. Always printed, success or not.
    pub fn print_summary(&self, report: &MigrationReport) {
        let run = &report.run;
        let c = &run.counters;

        println!();
        if report.success {
            println!("{}", "Migration run completed".green().bold());
        } else {
            println!("{}", "Migration run FAILED".red().bold());
        }
        println!("  Run id:    {}", run.run_id);
        println!("  Processed: {}", c.processed);
        println!("  Migrated:  {}", c.migrated.to_string().green());
        println!("  Skipped:   {}", c.skipped.to_string().yellow());
        println!(
            "  Errors:    {}",
            if c.errors > 0 {
                c.errors.to_string().red().to_string()
            } else {
                c.errors.to_string()
            }
        );

        if !run.phase_timings.is_empty() {
            println!("  Phase durations:");
            for timing in &run.phase_timings {
                println!("    {:<16} {} ms", timing.phase, timing.duration_ms);
            }
        }

        if let Some(backup) = &run.ledger.backup_file {
            println!("  Backup:    {backup}");
        }

        for error in &run.ledger.record_errors {
            println!(
                "  {} source #{}: {}",
                "record error".red(),
                error.source_id,
                error.message
            );
        }

        if !report.recommendations.is_empty() {
            println!("  Recommendations:");
            for rec in &report.recommendations {
                println!("    - {}", rec.cyan());
            }
        }
        println!();
    }
}

/// Fixed rules mapping run outcomes to operator advice.
fn recommendations(run: &MigrationRun, success: bool) -> Vec<String> {
    let c = &run.counters;
    let mut recs = Vec::new();

    if c.errors > 0 {
        recs.push(format!(
            "Review the {} failed records in the report's error ledger before re-running",
            c.errors
        ));
    }
    if c.skipped > 0 {
        recs.push(format!(
            "{} records were skipped as existing duplicates; resolve them manually and re-run if they should migrate",
            c.skipped
        ));
    }
    if success
        && c.errors == 0
        && c.processed > 0
        && c.migrated == c.processed - c.skipped
    {
        recs.push(
            "Every source row is now covered by a destination row; the legacy size table can be retired".to_string(),
        );
    }
    if !success && run.ledger.backup_created {
        recs.push(format!(
            "A backup exists at {}; use it together with the inserted-id ledger for manual recovery",
            run.ledger
                .backup_file
                .as_deref()
                .unwrap_or("the backup directory")
        ));
    }

    recs
}
