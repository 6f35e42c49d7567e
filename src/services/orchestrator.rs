//! Run orchestration.
//!
//! Sequences the pipeline phases through an explicit state machine:
//! `Idle → BackingUp → Validating → EvolvingSchema → Migrating → Verifying
//! → Reporting → Done`, with `RollingBack → Failed` reachable from any
//! state once a backup exists. A backup failure goes straight to `Failed`
//! with zero mutation and nothing to roll back. No state is re-entered
//! within one run; a retry is a new run with a new identifier.

use std::path::Path;
use std::time::Instant;

use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::MigrationError;
use crate::models::MigrationRun;
use crate::services::{
    BackupManager, EngineConfig, MigrationEngine, MigrationReport, PostVerifier, Reporter,
    RollbackController, SchemaEvolver, ValidationReport, Validator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    BackingUp,
    Validating,
    EvolvingSchema,
    Migrating,
    Verifying,
    Reporting,
    RollingBack,
    Done,
    Failed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::BackingUp => "backing_up",
            Self::Validating => "validating",
            Self::EvolvingSchema => "evolving_schema",
            Self::Migrating => "migrating",
            Self::Verifying => "verifying",
            Self::Reporting => "reporting",
            Self::RollingBack => "rolling_back",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Legal forward transitions. `RollingBack` is reachable from every
    /// post-backup state; `Done` and `Failed` are terminal.
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (Idle, BackingUp) | (Idle, Failed) => true,
            (BackingUp, Validating) | (BackingUp, Failed) => true,
            // migrate-only runs skip the validation phase
            (BackingUp, EvolvingSchema) => true,
            (Validating, EvolvingSchema) => true,
            (EvolvingSchema, Migrating) => true,
            (Migrating, Verifying) => true,
            (Verifying, Reporting) => true,
            (Reporting, Done) | (Reporting, Failed) => true,
            (Validating | EvolvingSchema | Migrating | Verifying | Reporting, RollingBack) => true,
            (RollingBack, Failed) => true,
            _ => false,
        }
    }
}

pub struct Orchestrator {
    pool: PgPool,
    config: Config,
    run: MigrationRun,
    phase: Phase,
}

impl Orchestrator {
    pub fn new(pool: PgPool, config: Config) -> Self {
        Self::with_run(pool, config, MigrationRun::begin())
    }

    /// Take over a run created by the caller (the CLI creates the run first
    /// so the per-run log file can be opened before connecting).
    pub fn with_run(pool: PgPool, config: Config, run: MigrationRun) -> Self {
        Self {
            pool,
            config,
            run,
            phase: Phase::Idle,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run.run_id
    }

    /// Read-only validation pass; no run state machine involved.
    ///
    /// Records the warning count on the run, so a pre-flight validation
    /// followed by `execute(false, _)` still reports it: each run validates
    /// once, not once per phase.
    pub async fn validate_only(
        &mut self,
        persist_json: bool,
    ) -> Result<ValidationReport, MigrationError> {
        let report = Validator::new(self.pool.clone()).validate().await?;
        report.print_summary();
        self.run.counters.validation_warnings = report.warnings.len() as u64;
        if persist_json {
            let path = Path::new(&self.config.backup_dir)
                .join(format!("{}-validation.json", self.run.run_id));
            report.write_json(&path)?;
        }
        Ok(report)
    }

    /// Execute the mutating pipeline.
    ///
    /// `include_validation` is false for migrate-only runs. The report is
    /// generated, written and printed regardless of outcome, and a failure
    /// after backup creation triggers an automatic ledger rollback.
    pub async fn execute(
        &mut self,
        include_validation: bool,
        dry_run: bool,
    ) -> Result<MigrationReport, MigrationError> {
        let result = self.pipeline(include_validation, dry_run).await;
        let success = result.is_ok();

        if success {
            self.transition(Phase::Reporting);
        } else if let Err(e) = &result {
            error!(run_id = %self.run.run_id, error = %e, "Run failed");
            if self.run.ledger.backup_created {
                self.transition(Phase::RollingBack);
                let started = Instant::now();
                match RollbackController::new(self.pool.clone())
                    .rollback(&self.run)
                    .await
                {
                    Ok(deleted) => {
                        info!(deleted = deleted, "Automatic rollback completed")
                    }
                    Err(rollback_err) => error!(
                        error = %rollback_err,
                        "Automatic rollback failed; recover manually from the report ledger"
                    ),
                }
                self.run
                    .record_phase("rollback", started.elapsed().as_millis() as u64);
            }
        }

        self.run.finish();

        // The report is forensic data: always attempt it, even mid-failure.
        let reporter = Reporter::new(&self.config.backup_dir);
        let report = reporter.generate(&self.run, success);
        if let Err(write_err) = reporter.write_json(&report) {
            error!(error = %write_err, "Failed to persist the migration report");
        }
        reporter.print_summary(&report);

        self.transition(if success { Phase::Done } else { Phase::Failed });

        result.map(|_| report)
    }

    async fn pipeline(
        &mut self,
        include_validation: bool,
        dry_run: bool,
    ) -> Result<(), MigrationError> {
        self.transition(Phase::BackingUp);
        let started = Instant::now();
        BackupManager::new(self.pool.clone(), &self.config.backup_dir)
            .create_backup(&mut self.run)
            .await?;
        self.run
            .record_phase("backup", started.elapsed().as_millis() as u64);

        if include_validation {
            self.transition(Phase::Validating);
            let started = Instant::now();
            let report = Validator::new(self.pool.clone()).validate().await?;
            self.run.counters.validation_warnings = report.warnings.len() as u64;
            self.run
                .record_phase("validation", started.elapsed().as_millis() as u64);
        }

        self.transition(Phase::EvolvingSchema);
        let started = Instant::now();
        SchemaEvolver::new(self.pool.clone())
            .enhance_schema(&mut self.run)
            .await?;
        self.run
            .record_phase("schema", started.elapsed().as_millis() as u64);

        self.transition(Phase::Migrating);
        let started = Instant::now();
        MigrationEngine::new(
            self.pool.clone(),
            EngineConfig {
                batch_size: self.config.batch_size,
                dry_run,
            },
        )
        .migrate(&mut self.run)
        .await?;
        self.run
            .record_phase("migration", started.elapsed().as_millis() as u64);

        self.transition(Phase::Verifying);
        let started = Instant::now();
        PostVerifier::new(self.pool.clone()).verify().await?;
        self.run
            .record_phase("verification", started.elapsed().as_millis() as u64);

        Ok(())
    }

    /// Manual rollback driven by a previously persisted report file.
    pub async fn rollback_from_report(
        pool: PgPool,
        report_path: &Path,
    ) -> Result<u64, MigrationError> {
        let report = Reporter::load(report_path)?;
        info!(
            run_id = %report.run.run_id,
            inserted = report.run.ledger.inserted_variant_ids.len(),
            "Rolling back from persisted report"
        );
        RollbackController::new(pool).rollback(&report.run).await
    }

    fn transition(&mut self, next: Phase) {
        if !self.phase.can_transition_to(next) {
            warn!(
                from = self.phase.as_str(),
                to = next.as_str(),
                "Unexpected phase transition"
            );
        }
        info!(
            from = self.phase.as_str(),
            to = next.as_str(),
            "Phase transition"
        );
        self.phase = next;
    }
}
