//! Suite registry
//!
//! Loads suite descriptors and resolves cross-suite imports to one
//! revision per suite name.

pub mod loader;
pub mod source;

pub use loader::{compare_revisions, ConflictPolicy, RegisteredSuite, Registry};
pub use source::{load_suite_dir, DirectorySuiteSource, LoadedSuite, SuiteSource};
