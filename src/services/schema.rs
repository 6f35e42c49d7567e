//! Additive schema evolution for the destination table.
//!
//! Every statement is idempotent (IF NOT EXISTS), so re-running against an
//! already-evolved table is a no-op. The whole list runs inside one
//! transaction: either the destination table gains all of the new columns
//! and indexes, or none of them.
//!
//! Applied statements are appended to the run ledger for audit, but they
//! are deliberately never reverted by rollback: additive columns are safe
//! to retain even after a failed data migration.

use sqlx::PgPool;
use tracing::info;

use crate::error::MigrationError;
use crate::models::MigrationRun;

/// Ordered DDL applied to `product_variants`
const ENHANCEMENTS: &[&str] = &[
    "ALTER TABLE product_variants ADD COLUMN IF NOT EXISTS size_name VARCHAR(255)",
    "ALTER TABLE product_variants ADD COLUMN IF NOT EXISTS size_value VARCHAR(255)",
    "ALTER TABLE product_variants ADD COLUMN IF NOT EXISTS dimensions JSONB",
    "ALTER TABLE product_variants ADD COLUMN IF NOT EXISTS specifications JSONB",
    "CREATE INDEX IF NOT EXISTS idx_product_variants_size_name \
         ON product_variants (size_name)",
    "CREATE INDEX IF NOT EXISTS idx_product_variants_master_sku \
         ON product_variants (master_id, sku)",
    "CREATE INDEX IF NOT EXISTS idx_product_variants_dimensions \
         ON product_variants USING GIN (dimensions)",
    "CREATE INDEX IF NOT EXISTS idx_product_variants_specifications \
         ON product_variants USING GIN (specifications)",
];

pub struct SchemaEvolver {
    pool: PgPool,
}

impl SchemaEvolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the enhancement list in order, inside one transaction.
    ///
    /// A failing statement rolls the whole transaction back and aborts the
    /// run with the offending statement in the error.
    pub async fn enhance_schema(&self, run: &mut MigrationRun) -> Result<(), MigrationError> {
        let mut tx = self.pool.begin().await?;
        let mut applied = Vec::with_capacity(ENHANCEMENTS.len());

        for statement in ENHANCEMENTS {
            if let Err(source) = sqlx::query(statement).execute(&mut *tx).await {
                tx.rollback().await?;
                return Err(MigrationError::SchemaEvolution {
                    statement: (*statement).to_string(),
                    source,
                });
            }
            applied.push((*statement).to_string());
            info!(statement = *statement, "Applied schema enhancement");
        }

        tx.commit().await?;
        run.ledger.applied_ddl.extend(applied);

        info!(
            statements = ENHANCEMENTS.len(),
            "Destination schema evolved"
        );
        Ok(())
    }

    /// The statements this evolver would apply, for display in dry runs.
    pub fn planned_statements() -> &'static [&'static str] {
        ENHANCEMENTS
    }
}
