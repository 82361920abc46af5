//! Versioned SQL migration engine
//!
//! Discovers ordered `NN-description.sql` scripts, tracks executed content
//! checksums in a persistent table, and executes untracked or changed scripts
//! transactionally. Re-running the engine against an unchanged script set
//! performs zero work.

pub mod definitions;
pub mod discovery;
pub mod runner;
pub mod splitter;

pub use definitions::{
    ExecutionReason, MigrationDecision, MigrationOptions, MigrationRecord, MigrationRunResult,
    MigrationScript, ScriptResult, ValidationIssue,
};
pub use discovery::{discover_scripts, validate_ordering};
pub use runner::{MigrationEngine, MigrationEngineConfig};
pub use splitter::split_statements;
