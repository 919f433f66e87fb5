//! Configuration constants
//!
//! - [`defaults`] - Default values for build and download settings
//! - [`urls`] - Well-known mirror URLs

pub mod defaults;
pub mod urls;
