//! Post-migration integrity verification.
//!
//! Re-queries counts and constraints after the engine finishes. Count
//! comparisons are logged for the operator rather than asserted, because
//! the destination table may legitimately hold pre-existing unrelated rows.
//! Null required fields and broken parent references are fatal.

use sqlx::PgPool;
use tracing::{info, warn};

use crate::error::MigrationError;

pub struct PostVerifier {
    pool: PgPool,
}

impl PostVerifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all post-migration checks.
    ///
    /// Returns `IntegrityViolation` on any fatal finding; duplicate SKUs
    /// are a warning only, since the legacy data may carry real duplicates.
    pub async fn verify(&self) -> Result<(), MigrationError> {
        let source_count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM product_sizes")
            .fetch_one(&self.pool)
            .await?;
        let variant_count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM product_variants")
            .fetch_one(&self.pool)
            .await?;
        let migrated_shape_count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM product_variants
            WHERE size_name IS NOT NULL
               OR size_value IS NOT NULL
               OR specifications IS NOT NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        info!(
            source_rows = source_count,
            variant_rows = variant_count,
            migrated_shape_rows = migrated_shape_count,
            "Post-migration counts (compare manually; destination may pre-exist)"
        );

        let null_required = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM product_variants
            WHERE master_id IS NULL OR name IS NULL OR btrim(name) = ''
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        if null_required > 0 {
            return Err(MigrationError::IntegrityViolation(format!(
                "{null_required} destination rows have a null parent reference or empty name"
            )));
        }

        let orphaned = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM product_variants pv
            LEFT JOIN products p ON p.id = pv.master_id
            WHERE p.id IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        if orphaned > 0 {
            return Err(MigrationError::IntegrityViolation(format!(
                "{orphaned} destination rows reference a product that does not exist"
            )));
        }

        let duplicate_skus = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM (
                SELECT master_id, sku
                FROM product_variants
                WHERE sku IS NOT NULL AND btrim(sku) <> ''
                GROUP BY master_id, sku
                HAVING COUNT(*) > 1
            ) dup
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        if duplicate_skus > 0 {
            warn!(
                groups = duplicate_skus,
                "Duplicate business keys remain after migration (legacy data)"
            );
        }

        info!("Post-migration verification passed");
        Ok(())
    }
}
