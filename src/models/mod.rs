pub mod run;
pub mod source;
pub mod variant;

pub use run::{MigrationRun, PhaseTiming, RecordError, RollbackLedger, RunCounters};
pub use source::SourceRecord;
pub use variant::{CharacteristicLink, NewVariant, VariantRecord};
