//! Core build logic
//!
//! Descriptor parsing, graph construction and variant resolution are pure.
//! The executor and assembler touch the filesystem only through
//! [`crate::infra`].
//!
//! # Submodules
//!
//! - [`descriptor`] - Suite descriptor (suite.toml) parsing and validation
//! - [`graph`] - Dependency graph and build order
//! - [`platform`] - Target environment and platform branch selection
//! - [`variant`] - Overlay and platform branch resolution
//! - [`fingerprint`] - Build fingerprints and the build cache
//! - [`builder`] - Build execution
//! - [`build_env`] - Environment handed to build steps
//! - [`assemble`] - Distribution layout assembly
//! - [`lock`] - Lock file handling
//! - [`global_config`] - Global configuration management

pub mod assemble;
pub mod build_env;
pub mod builder;
pub mod descriptor;
pub mod fingerprint;
pub mod global_config;
pub mod graph;
pub mod lock;
pub mod platform;
pub mod variant;
