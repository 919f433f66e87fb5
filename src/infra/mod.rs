//! Infrastructure layer
//!
//! Handles all I/O operations: network, filesystem, and external processes.
//! This module is the only place where side effects occur.

pub mod artifact_store;
pub mod dirs;
pub mod download;
pub mod filesystem;
pub mod keyed_lock;
pub mod toolchain;
