pub mod attrs;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod slug;

pub use config::{Config, ConfigError, DatabaseSettings};
pub use error::MigrationError;
pub use models::{MigrationRun, NewVariant, RollbackLedger, RunCounters, SourceRecord, VariantRecord};
pub use services::{
    BackupManager, BackupSnapshot, EngineConfig, MigrationEngine, MigrationReport, Orchestrator,
    Phase, PostVerifier, Reporter, RollbackController, SchemaEvolver, ValidationReport, Validator,
};
