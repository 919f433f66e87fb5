//! Fetch command implementation
//!
//! Implements `suiteforge fetch` to download and verify every library
//! reachable from the targets, without building anything.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::commands::{Session, SessionArgs};
use crate::cli::output::{create_spinner, status, OutputConfig};
use crate::core::builder::ExecutorOptions;
use crate::core::graph::NodeId;
use crate::error::{ArtifactError, ForgeError};

#[derive(Debug, Serialize)]
struct FetchEntry<'a> {
    library: &'a NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Execute the fetch command
pub async fn execute(
    args: &SessionArgs,
    targets: &[String],
    jobs: Option<usize>,
    locked: bool,
    output: &OutputConfig,
) -> Result<()> {
    let session = Session::load(args).context("Failed to load suites")?;
    session
        .sync_lock(locked)
        .with_context(|| format!("Lock file check failed for {}", session.lock_path().display()))?;

    let env = session.environment(args).map_err(ForgeError::from)?;
    let resolved = session
        .resolve(&env, targets)
        .with_context(|| format!("Failed to resolve the build graph for {env}"))?;

    let executor = session.executor(ExecutorOptions {
        jobs: session.jobs(jobs),
        ..ExecutorOptions::default()
    });

    let spinner = output.human().then(|| create_spinner("Fetching libraries..."));
    let results = executor.fetch_libraries(&resolved).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let entries: Vec<FetchEntry<'_>> = results
        .iter()
        .map(|(id, result)| match result {
            Ok(fetched) => FetchEntry {
                library: id,
                path: Some(fetched.path.display().to_string()),
                cached: fetched.from_cache,
                error: None,
            },
            Err(e) => FetchEntry {
                library: id,
                path: None,
                cached: false,
                error: Some(e.to_string()),
            },
        })
        .collect();

    if output.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if !output.quiet {
        for entry in &entries {
            match (&entry.error, entry.cached) {
                (Some(error), _) => eprintln!("{} {}: {error}", status::ERROR, entry.library),
                (None, true) => println!("{} {} (cached)", status::INFO, entry.library),
                (None, false) => println!("{} {}", status::SUCCESS, entry.library),
            }
        }
        println!("{} {} libraries", status::INFO, entries.len());
    }

    let mut errors: Vec<ArtifactError> = results
        .into_iter()
        .filter_map(|(_, result)| result.err())
        .collect();
    if errors.is_empty() {
        return Ok(());
    }
    let failed = errors.len();
    // integrity failures outrank fetch failures
    let worst = errors
        .iter()
        .position(|e| matches!(e, ArtifactError::Integrity { .. }))
        .unwrap_or(0);
    Err(ForgeError::from(errors.swap_remove(worst)))
        .with_context(|| format!("{failed} library fetch(es) failed"))
}
