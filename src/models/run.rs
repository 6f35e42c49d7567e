//! Per-run state: identifier, counters, phase timings and the rollback ledger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything one migration execution did.
///
/// Created at run start, mutated by every phase, serialized into the report
/// file at run end (success or failure). The ledger portion is what the
/// rollback controller consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub counters: RunCounters,
    pub phase_timings: Vec<PhaseTiming>,
    pub ledger: RollbackLedger,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunCounters {
    /// Source records read
    pub processed: u64,
    /// Destination rows inserted
    pub migrated: u64,
    /// Records skipped because a matching destination row already exists
    pub skipped: u64,
    /// Per-record failures (contained, run continues)
    pub errors: u64,
    /// Warnings raised during pre-validation
    pub validation_warnings: u64,
}

/// Wall-clock duration of one pipeline phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub phase: String,
    pub duration_ms: u64,
}

/// The record of every reversible thing the run did.
///
/// Inserted row ids are also logged as they happen, so a hard crash still
/// leaves enough trail to reconstruct what the run inserted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackLedger {
    pub backup_created: bool,
    pub backup_file: Option<String>,
    /// DDL statements applied by schema evolution (audit only; not reverted)
    pub applied_ddl: Vec<String>,
    /// Identifiers of destination rows inserted by this run
    pub inserted_variant_ids: Vec<i32>,
    pub record_errors: Vec<RecordError>,
}

/// A contained per-record failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordError {
    pub source_id: i32,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl MigrationRun {
    /// Start a new run with a fresh identifier.
    pub fn begin() -> Self {
        Self {
            run_id: new_run_id(),
            started_at: Utc::now(),
            finished_at: None,
            counters: RunCounters::default(),
            phase_timings: Vec::new(),
            ledger: RollbackLedger::default(),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn record_phase(&mut self, phase: &str, duration_ms: u64) {
        self.phase_timings.push(PhaseTiming {
            phase: phase.to_string(),
            duration_ms,
        });
    }

    pub fn record_error(&mut self, source_id: i32, message: String) {
        self.counters.errors += 1;
        self.ledger.record_errors.push(RecordError {
            source_id,
            message,
            at: Utc::now(),
        });
    }
}

/// Unique run identifier: UTC timestamp plus a random suffix.
fn new_run_id() -> String {
    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("migration-{stamp}-{}", &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_unique_and_well_formed() {
        let a = new_run_id();
        let b = new_run_id();
        assert_ne!(a, b);
        assert!(a.starts_with("migration-"));
        // migration- + yyyymmdd-hhmmss + - + 8 hex chars
        assert_eq!(a.len(), "migration-".len() + 15 + 1 + 8);
    }

    #[test]
    fn record_error_updates_counter_and_ledger() {
        let mut run = MigrationRun::begin();
        run.record_error(42, "boom".to_string());
        assert_eq!(run.counters.errors, 1);
        assert_eq!(run.ledger.record_errors.len(), 1);
        assert_eq!(run.ledger.record_errors[0].source_id, 42);
    }
}
