//! Pre-migration validation.
//!
//! Read-only analysis of the current schema and data state. The only check
//! that blocks a run is a missing table; everything else (orphans,
//! duplicate SKUs, candidate conflicts) is surfaced as a warning for the
//! operator and re-detected independently by the engine's skip gate.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use tracing::{info, warn};

use crate::error::MigrationError;

/// Structured result of one validation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub tables: TableStats,
    pub quality: QualityStats,
    /// Destination-table index inventory, for confirming schema evolution
    pub indexes: Vec<IndexInfo>,
    /// Source rows that already have a matching destination row
    pub conflicts: Vec<ConflictCandidate>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableStats {
    pub total_sizes: i64,
    pub distinct_products: i64,
    pub existing_variants: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityStats {
    /// Source rows carrying a non-empty business key
    pub with_sku: i64,
    /// Source rows with no display name
    pub missing_name: i64,
    /// Distinct SKU values shared by more than one source row
    pub duplicate_sku_groups: i64,
    /// Source rows whose parent product no longer exists
    pub orphaned_sources: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IndexInfo {
    pub name: String,
    pub definition: String,
}

/// A source row that collides with a pre-existing destination row.
///
/// The scan is intentionally broader than the engine's skip gate: a name
/// match is flagged even when the SKUs differ, so near-duplicates reach the
/// operator's report.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ConflictCandidate {
    pub source_id: i32,
    pub product_id: i32,
    pub sku: Option<String>,
    pub name: Option<String>,
    pub variant_id: i32,
    pub matched_on: String,
}

/// Read-only validation service
pub struct Validator {
    pool: PgPool,
}

impl Validator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the full validation pass. Never mutates state.
    pub async fn validate(&self) -> Result<ValidationReport, MigrationError> {
        let started_at = Utc::now();

        // Hard-blocking check: both tables must exist before anything else
        // is queried.
        for table in ["product_sizes", "product_variants"] {
            if !self.table_exists(table).await? {
                return Err(MigrationError::MissingTable(table.to_string()));
            }
        }

        let tables = self.table_stats().await?;
        let quality = self.quality_stats().await?;
        let indexes = self.index_inventory().await?;
        let conflicts = self.conflict_scan().await?;

        let mut warnings = Vec::new();
        if quality.orphaned_sources > 0 {
            warnings.push(format!(
                "{} source rows reference a product that no longer exists",
                quality.orphaned_sources
            ));
        }
        if quality.duplicate_sku_groups > 0 {
            warnings.push(format!(
                "{} SKU values are shared by more than one source row",
                quality.duplicate_sku_groups
            ));
        }
        if quality.missing_name > 0 {
            warnings.push(format!(
                "{} source rows have no display name and will get a placeholder",
                quality.missing_name
            ));
        }
        if !conflicts.is_empty() {
            warnings.push(format!(
                "{} source rows already have a matching destination row and will be skipped",
                conflicts.len()
            ));
        }

        for warning in &warnings {
            warn!("{warning}");
        }
        info!(
            total_sizes = tables.total_sizes,
            distinct_products = tables.distinct_products,
            existing_variants = tables.existing_variants,
            conflicts = conflicts.len(),
            "Validation pass completed"
        );

        Ok(ValidationReport {
            started_at,
            completed_at: Utc::now(),
            tables,
            quality,
            indexes,
            conflicts,
            warnings,
        })
    }

    async fn table_exists(&self, table: &str) -> Result<bool, MigrationError> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT to_regclass($1) IS NOT NULL")
            .bind(format!("public.{table}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn table_stats(&self) -> Result<TableStats, MigrationError> {
        let total_sizes = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM product_sizes")
            .fetch_one(&self.pool)
            .await?;
        let distinct_products =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(DISTINCT product_id) FROM product_sizes")
                .fetch_one(&self.pool)
                .await?;
        let existing_variants =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM product_variants")
                .fetch_one(&self.pool)
                .await?;
        Ok(TableStats {
            total_sizes,
            distinct_products,
            existing_variants,
        })
    }

    async fn quality_stats(&self) -> Result<QualityStats, MigrationError> {
        let with_sku = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM product_sizes WHERE sku IS NOT NULL AND btrim(sku) <> ''",
        )
        .fetch_one(&self.pool)
        .await?;

        let missing_name = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM product_sizes WHERE name IS NULL OR btrim(name) = ''",
        )
        .fetch_one(&self.pool)
        .await?;

        let duplicate_sku_groups = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM (
                SELECT sku
                FROM product_sizes
                WHERE sku IS NOT NULL AND btrim(sku) <> ''
                GROUP BY sku
                HAVING COUNT(*) > 1
            ) dup
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let orphaned_sources = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM product_sizes ps
            LEFT JOIN products p ON p.id = ps.product_id
            WHERE p.id IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QualityStats {
            with_sku,
            missing_name,
            duplicate_sku_groups,
            orphaned_sources,
        })
    }

    async fn index_inventory(&self) -> Result<Vec<IndexInfo>, MigrationError> {
        let indexes = sqlx::query_as::<_, IndexInfo>(
            r#"
            SELECT indexname AS name, indexdef AS definition
            FROM pg_indexes
            WHERE schemaname = 'public' AND tablename = 'product_variants'
            ORDER BY indexname
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(indexes)
    }

    async fn conflict_scan(&self) -> Result<Vec<ConflictCandidate>, MigrationError> {
        let conflicts = sqlx::query_as::<_, ConflictCandidate>(
            r#"
            SELECT
                ps.id AS source_id,
                ps.product_id,
                ps.sku,
                ps.name,
                pv.id AS variant_id,
                CASE
                    WHEN ps.sku IS NOT NULL AND btrim(ps.sku) <> '' AND ps.sku = pv.sku
                        THEN 'sku'
                    ELSE 'name'
                END AS matched_on
            FROM product_sizes ps
            JOIN product_variants pv
              ON pv.master_id = ps.product_id
             AND ((ps.sku IS NOT NULL AND btrim(ps.sku) <> '' AND ps.sku = pv.sku)
                  OR ps.name = pv.name)
            ORDER BY ps.product_id, ps.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(conflicts)
    }
}

impl ValidationReport {
    /// Print the operator-facing validation summary.
    pub fn print_summary(&self) {
        use colored::Colorize;

        println!();
        println!("{}", "Validation report".bold());
        println!("  Source rows:          {}", self.tables.total_sizes);
        println!("  Distinct products:    {}", self.tables.distinct_products);
        println!("  Existing variants:    {}", self.tables.existing_variants);
        println!("  Rows with SKU:        {}", self.quality.with_sku);
        println!("  Rows missing name:    {}", self.quality.missing_name);
        println!("  Duplicate SKU groups: {}", self.quality.duplicate_sku_groups);
        println!("  Orphaned rows:        {}", self.quality.orphaned_sources);
        println!("  Destination indexes:  {}", self.indexes.len());

        if self.conflicts.is_empty() {
            println!("  {}", "No candidate conflicts".green());
        } else {
            println!(
                "  {} candidate conflicts (will be skipped by the engine):",
                self.conflicts.len().to_string().yellow()
            );
            for conflict in &self.conflicts {
                println!(
                    "    source #{} (product {}) matches variant #{} on {}",
                    conflict.source_id,
                    conflict.product_id,
                    conflict.variant_id,
                    conflict.matched_on
                );
            }
        }
        for warning in &self.warnings {
            println!("  {} {warning}", "warning:".yellow());
        }
        println!();
    }

    /// Persist the report as JSON next to the run's other artifacts.
    pub fn write_json(&self, path: &Path) -> Result<(), MigrationError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "Validation report written");
        Ok(())
    }
}
