//! Suiteforge - build graph resolver and distribution assembler
//!
//! Loads a set of suites (each described by a `suite.toml`) together with
//! everything they import, turns their libraries, projects and
//! distributions into one dependency graph, resolves JDK overlays and
//! platform branches for a target environment, builds the graph in
//! parallel and lays out distributions.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Graph, variants, executor and assembler
//! - [`registry`] - Suite loading and version conflict resolution
//! - [`infra`] - Infrastructure layer (network, filesystem, processes)
//! - [`config`] - Configuration constants
//! - [`error`] - Error types and exit codes

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;
pub mod registry;

#[cfg(test)]
pub mod test_utils;
