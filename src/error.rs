use thiserror::Error;

/// Migration-wide error taxonomy.
///
/// Fatal variants abort the run; per-record failures never surface here —
/// they are contained inside the engine loop and recorded on the run ledger.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A required table is absent; the only hard-blocking validation check
    #[error("Required table is missing: {0}")]
    MissingTable(String),

    /// Schema evolution DDL failed; the DDL transaction has been rolled back
    #[error("Schema evolution failed at statement `{statement}`: {source}")]
    SchemaEvolution {
        statement: String,
        #[source]
        source: sqlx::Error,
    },

    /// Post-migration integrity check failed (data loss or broken references)
    #[error("Integrity violation after migration: {0}")]
    IntegrityViolation(String),

    /// Rollback was requested but no backup exists for this run
    #[error("Rollback refused: no backup was created for run {0}")]
    NoBackup(String),

    /// Backup snapshot could not be written; the run aborts before mutation
    #[error("Backup failed: {0}")]
    Backup(String),

    /// Database error outside the per-record error path
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}
