// SCD Dimension Engine - Core Library
// Exposes all modules for use in the ETL CLI and tests

pub mod error;
pub mod normalize;      // Field kinds and canonical comparison
pub mod config;         // Natural key, tracked fields, table
pub mod temporal;       // Rows, intervals, change events
pub mod extractor;      // Record Extractor
pub mod classifier;     // Change Classifier
pub mod store;          // Dimension Store Interface (memory + SQLite)
pub mod writer;         // Version Writer
pub mod driver;         // Reconciliation Driver
pub mod audit;          // Integrity checks at rest
pub mod observability;

// Re-export commonly used types
pub use error::{AbortedRun, Result, ScdError};
pub use normalize::{CanonicalValue, FieldComparator, FieldKind};
pub use config::{ScdConfig, TrackedFields};
pub use temporal::{
    Attributes, ChangeEvent, ChangeEventType, DimensionRow, EffectiveInterval,
    NewDimensionRow, SourceRecord,
};
pub use extractor::{RawRow, RecordExtractor};
pub use classifier::{classify, classify_detailed, ChangeKind, Classification};
pub use store::{in_transaction, DimensionStore, MemoryStore, SqliteStore};
pub use writer::{ApplyOutcome, VersionWriter};
pub use driver::{ReconciliationDriver, RecordError, RecordOutcome, RunSummary};
pub use audit::{audit_dimension, AuditReport, QualityIssue, Severity};
pub use observability::{init_logging, LogFormat};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
