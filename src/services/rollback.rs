//! Insert-only rollback.
//!
//! Deletes every destination row recorded in the run's ledger, inside one
//! transaction. Schema changes are never reverted: additive columns and
//! indexes are safe to keep. A rollback without a prior backup is refused
//! outright rather than attempted.

use sqlx::PgPool;
use tracing::{info, warn};

use crate::error::MigrationError;
use crate::models::MigrationRun;

pub struct RollbackController {
    pool: PgPool,
}

impl RollbackController {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Refuse to operate on a run that never produced a backup.
    fn ensure_backup(run: &MigrationRun) -> Result<(), MigrationError> {
        if run.ledger.backup_created {
            Ok(())
        } else {
            Err(MigrationError::NoBackup(run.run_id.clone()))
        }
    }

    /// Delete the rows this run inserted.
    pub async fn rollback(&self, run: &MigrationRun) -> Result<u64, MigrationError> {
        Self::ensure_backup(run)?;

        let ids = &run.ledger.inserted_variant_ids;
        if ids.is_empty() {
            info!(run_id = %run.run_id, "Nothing to roll back, ledger is empty");
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;

        // Characteristic links cascade conceptually; delete them first in
        // case the join table has no FK ON DELETE CASCADE.
        sqlx::query("DELETE FROM variant_characteristics_simple WHERE variant_id = ANY($1)")
            .bind(ids)
            .execute(&mut *tx)
            .await?;

        let deleted = sqlx::query("DELETE FROM product_variants WHERE id = ANY($1)")
            .bind(ids)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        if deleted != ids.len() as u64 {
            warn!(
                expected = ids.len(),
                deleted = deleted,
                "Rollback deleted fewer rows than the ledger lists"
            );
        }
        info!(
            run_id = %run.run_id,
            deleted = deleted,
            "Rollback completed; schema changes retained by design"
        );

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_is_refused_without_backup() {
        let run = MigrationRun::begin();
        let err = RollbackController::ensure_backup(&run).unwrap_err();
        assert!(matches!(err, MigrationError::NoBackup(_)));

        let mut backed_up = MigrationRun::begin();
        backed_up.ledger.backup_created = true;
        assert!(RollbackController::ensure_backup(&backed_up).is_ok());
    }
}
