//! Pre-migration backup snapshots.
//!
//! Both tables are serialized in full to a JSON file named by the run
//! identifier before any write phase starts. A failure anywhere in here
//! aborts the run with zero mutation; there is no such thing as a partial
//! migration without a confirmed backup on disk.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use tracing::info;

use crate::error::MigrationError;
use crate::models::{MigrationRun, SourceRecord, VariantRecord};

/// Column metadata captured with the snapshot
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
}

/// Point-in-time JSON capture of both tables plus their schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub schema: SchemaSnapshot,
    pub product_sizes: Vec<SourceRecord>,
    pub product_variants: Vec<VariantRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub product_sizes: Vec<ColumnInfo>,
    pub product_variants: Vec<ColumnInfo>,
}

pub struct BackupManager {
    pool: PgPool,
    backup_dir: PathBuf,
}

impl BackupManager {
    pub fn new(pool: PgPool, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            backup_dir: backup_dir.into(),
        }
    }

    /// Snapshot both tables and write the backup file for this run.
    ///
    /// Reads everything through one transaction so the two table dumps are
    /// a consistent point-in-time view. On success the ledger records the
    /// backup so later phases (and rollback) may proceed.
    pub async fn create_backup(&self, run: &mut MigrationRun) -> Result<PathBuf, MigrationError> {
        let mut tx = self.pool.begin().await?;

        let sizes_schema = Self::column_info(&mut tx, "product_sizes").await?;
        let variants_schema = Self::column_info(&mut tx, "product_variants").await?;

        let sizes = sqlx::query_as::<_, SourceRecord>(&format!(
            "SELECT {} FROM product_sizes ORDER BY product_id, id",
            SourceRecord::COLUMNS
        ))
        .fetch_all(&mut *tx)
        .await?;

        // On a re-run the destination already carries the evolved columns
        // with prior-run data; select whatever the live table actually has.
        let variants = sqlx::query_as::<_, VariantRecord>(&format!(
            "SELECT {} FROM product_variants ORDER BY master_id, id",
            variant_select_list(&variants_schema)
        ))
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let snapshot = BackupSnapshot {
            run_id: run.run_id.clone(),
            created_at: Utc::now(),
            schema: SchemaSnapshot {
                product_sizes: sizes_schema,
                product_variants: variants_schema,
            },
            product_sizes: sizes,
            product_variants: variants,
        };

        let path = self.backup_path(&run.run_id);
        write_snapshot(&snapshot, &path)?;

        run.ledger.backup_created = true;
        run.ledger.backup_file = Some(path.display().to_string());

        info!(
            path = %path.display(),
            source_rows = snapshot.product_sizes.len(),
            variant_rows = snapshot.product_variants.len(),
            "Backup snapshot confirmed on disk"
        );

        Ok(path)
    }

    pub fn backup_path(&self, run_id: &str) -> PathBuf {
        self.backup_dir.join(format!("{run_id}-backup.json"))
    }

    async fn column_info(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        table: &str,
    ) -> Result<Vec<ColumnInfo>, MigrationError> {
        let columns = sqlx::query_as::<_, ColumnInfo>(
            r#"
            SELECT
                column_name AS name,
                data_type,
                (is_nullable = 'YES') AS nullable,
                column_default AS "default"
            FROM information_schema.columns
            WHERE table_schema = 'public' AND table_name = $1
            ORDER BY ordinal_position
            "#,
        )
        .bind(table)
        .fetch_all(&mut **tx)
        .await?;
        Ok(columns)
    }
}

/// Column list for the destination dump: the base columns plus whichever
/// evolved columns the live table already has.
fn variant_select_list(schema: &[ColumnInfo]) -> String {
    let mut columns = VariantRecord::COLUMNS.to_string();
    for evolved in VariantRecord::EVOLVED_COLUMNS {
        if schema.iter().any(|c| c.name == *evolved) {
            columns.push_str(", ");
            columns.push_str(evolved);
        }
    }
    columns
}

/// Write the snapshot atomically: temp file, fsync, rename into place.
fn write_snapshot(snapshot: &BackupSnapshot, path: &Path) -> Result<(), MigrationError> {
    let dir = path
        .parent()
        .ok_or_else(|| MigrationError::Backup("backup path has no parent directory".into()))?;
    fs::create_dir_all(dir)?;

    let tmp_path = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(snapshot)?;

    let mut file = File::create(&tmp_path)?;
    file.write_all(&json)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp_path, path)?;

    // Confirm it actually landed before any write phase is allowed to run.
    if !path.exists() {
        return Err(MigrationError::Backup(format!(
            "backup file {} missing after rename",
            path.display()
        )));
    }
    Ok(())
}
