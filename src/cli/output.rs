//! Output formatting and progress indicators
//!
//! This module provides utilities for displaying progress bars,
//! status lines and errors to the user.

use indicatif::{ProgressBar, ProgressStyle};

use crate::core::builder::{BuildObserver, NodeReport};
use crate::core::graph::NodeId;
use crate::error::ForgeError;

/// How much the user wants to see
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputConfig {
    pub quiet: bool,
    pub json: bool,
    pub verbose: u8,
}

impl OutputConfig {
    pub fn new(quiet: bool, json: bool, verbose: u8) -> Self {
        Self {
            quiet,
            json,
            verbose,
        }
    }

    /// Whether human-readable output is printed
    pub fn human(&self) -> bool {
        !self.quiet && !self.json
    }

    /// Default log level directive for the tracing subscriber
    pub fn log_directive(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "error",
            (false, 0) => "warn",
            (false, 1) => "info",
            (false, 2) => "debug",
            (false, _) => "trace",
        }
    }
}

/// Create a spinner for operations with unknown duration
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}

/// Create a progress bar for build nodes
pub fn create_build_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} nodes ({msg})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░"),
    );
    pb
}

/// Status message prefixes
pub mod status {
    /// Success prefix (green checkmark)
    pub const SUCCESS: &str = "✓";

    /// Error prefix (red X)
    pub const ERROR: &str = "✗";

    /// Warning prefix (yellow triangle)
    pub const WARNING: &str = "⚠";

    /// Info prefix (blue circle)
    pub const INFO: &str = "ℹ";
}

/// Progress bar advancing once per finished node
pub struct BuildProgress {
    bar: Option<ProgressBar>,
}

impl BuildProgress {
    pub fn new(total: usize, output: &OutputConfig) -> Self {
        Self {
            bar: output
                .human()
                .then(|| create_build_bar(total as u64)),
        }
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

impl BuildObserver for BuildProgress {
    fn node_started(&self, node: &NodeId) {
        if let Some(bar) = &self.bar {
            bar.set_message(node.to_string());
        }
    }

    fn node_finished(&self, report: &NodeReport) {
        let Some(bar) = &self.bar else {
            return;
        };
        bar.inc(1);
        if !report.status.is_success() {
            bar.println(format!(
                "{} {} {}",
                status::ERROR,
                report.node,
                report.status.label()
            ));
        }
    }
}

/// Exit code for an error returned by a command
///
/// Errors that do not carry a [`ForgeError`] are usage or IO problems.
pub fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<ForgeError>())
        .map_or(1, ForgeError::exit_code)
}

/// Print an error and its causes to stderr
pub fn display_error(error: &anyhow::Error) {
    eprintln!("{} {error}", status::ERROR);
    for cause in error.chain().skip(1) {
        eprintln!("  caused by: {cause}");
    }
}
