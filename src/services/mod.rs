pub mod backup;
pub mod engine;
pub mod orchestrator;
pub mod report;
pub mod rollback;
pub mod schema;
pub mod validator;
pub mod verifier;

pub use backup::{BackupManager, BackupSnapshot, ColumnInfo};
pub use engine::{EngineConfig, MigrationEngine};
pub use orchestrator::{Orchestrator, Phase};
pub use report::{MigrationReport, Reporter};
pub use rollback::RollbackController;
pub use schema::SchemaEvolver;
pub use validator::{ConflictCandidate, IndexInfo, ValidationReport, Validator};
pub use verifier::PostVerifier;
