//! Build command implementation
//!
//! Implements `suiteforge build` to build targets and lay out distributions.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::cli::commands::{Session, SessionArgs};
use crate::cli::output::{status, BuildProgress, OutputConfig};
use crate::core::builder::{BuildReport, ExecutorOptions, FailMode};
use crate::core::graph::NodeKind;
use crate::error::ForgeError;

/// Build options
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Nodes to build; everything when empty
    pub targets: Vec<String>,
    /// Number of parallel jobs
    pub jobs: Option<usize>,
    /// Cancel unstarted nodes after the first failure
    pub fail_fast: bool,
    /// Ignore cached fingerprints
    pub force: bool,
    /// Fail if suites differ from the lock file
    pub locked: bool,
    /// Distribution export directory (defaults to `<suite>/dist`)
    pub dist_dir: Option<PathBuf>,
}

/// Execute the build command
pub async fn execute(args: &SessionArgs, options: BuildOptions, output: &OutputConfig) -> Result<()> {
    let session = Session::load(args).context("Failed to load suites")?;
    session
        .sync_lock(options.locked)
        .with_context(|| format!("Lock file check failed for {}", session.lock_path().display()))?;

    let env = session.environment(args).map_err(ForgeError::from)?;
    let resolved = session
        .resolve(&env, &options.targets)
        .with_context(|| format!("Failed to resolve the build graph for {env}"))?;

    let fail_mode = if options.fail_fast || session.config.build.fail_fast.unwrap_or(false) {
        FailMode::FailFast
    } else {
        FailMode::BestEffort
    };
    let dist_dir = options
        .dist_dir
        .clone()
        .unwrap_or_else(|| session.suite_dir.join("dist"));
    let executor_options = ExecutorOptions {
        jobs: session.jobs(options.jobs),
        fail_mode,
        force: options.force,
        dist_dir: Some(dist_dir.clone()),
    };

    tracing::info!(
        nodes = resolved.graph.len(),
        jobs = executor_options.jobs,
        %env,
        "starting build"
    );

    let progress = BuildProgress::new(resolved.graph.len(), output);
    let executor = session.executor(executor_options);
    let report = executor.execute(resolved, &progress).await;
    progress.finish();

    if output.json {
        println!("{}", report.to_json()?);
    } else if !output.quiet {
        print_summary(&report, &dist_dir);
    }

    match report.failure() {
        Some(failure) => Err(failure.into()),
        None => Ok(()),
    }
}

fn print_summary(report: &BuildReport, dist_dir: &Path) {
    for (node, error) in report.errors() {
        eprintln!("{} {node}: {error}", status::ERROR);
    }
    for node in &report.nodes {
        if node.kind == NodeKind::Distribution && node.status.is_success() {
            println!(
                "{} {} -> {}",
                status::SUCCESS,
                node.node,
                dist_dir.join(node.node.name()).display()
            );
        }
    }
    println!(
        "{} {} built, {} cached, {} failed, {} skipped, {} cancelled ({})",
        if report.is_success() {
            status::SUCCESS
        } else {
            status::ERROR
        },
        report.count("built"),
        report.count("cached"),
        report.count("failed"),
        report.count("skipped"),
        report.count("cancelled"),
        report.environment,
    );
}
