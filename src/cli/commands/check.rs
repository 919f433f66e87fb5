//! Check command implementation
//!
//! Implements `suiteforge check` to validate suites, the build graph and,
//! when a JDK is known, variant resolution without building.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::commands::{Session, SessionArgs};
use crate::cli::output::{status, OutputConfig};

#[derive(Debug, Serialize)]
struct CheckSummary {
    suites: Vec<SuiteSummary>,
    nodes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    environment: Option<String>,
    overlays: Vec<(String, String)>,
    warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SuiteSummary {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    revision: Option<String>,
    importers: Vec<String>,
}

/// Execute the check command
pub async fn execute(args: &SessionArgs, output: &OutputConfig) -> Result<()> {
    let session = Session::load(args).context("Suite validation failed")?;

    let mut warnings: Vec<String> = session
        .toolchain()
        .check_available()
        .into_iter()
        .map(|e| e.to_string())
        .collect();

    let mut environment = None;
    let mut overlays = Vec::new();
    match session.environment(args) {
        Ok(env) => {
            let resolved = session
                .resolve(&env, &[])
                .with_context(|| format!("Variant resolution failed for {env}"))?;
            overlays = resolved
                .overlaid()
                .map(|(target, overlay)| (target.to_string(), overlay.to_string()))
                .collect();
            environment = Some(env.to_string());
        }
        Err(e) => warnings.push(format!("variant resolution not checked: {e}")),
    }

    let summary = CheckSummary {
        suites: session
            .registry
            .suites()
            .iter()
            .map(|suite| SuiteSummary {
                name: suite.name().to_string(),
                revision: suite.revision.clone(),
                importers: suite.importers.clone(),
            })
            .collect(),
        nodes: session.graph.len(),
        environment,
        overlays,
        warnings,
    };

    if output.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if !output.quiet {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &CheckSummary) {
    println!("{} {} suite(s) loaded", status::SUCCESS, summary.suites.len());
    for suite in &summary.suites {
        match &suite.revision {
            Some(rev) => println!("  • {} @ {rev}", suite.name),
            None => println!("  • {}", suite.name),
        }
    }
    println!("{} Build graph is acyclic ({} nodes)", status::SUCCESS, summary.nodes);
    if let Some(env) = &summary.environment {
        println!("{} Variants resolve for {env}", status::SUCCESS);
        for (target, overlay) in &summary.overlays {
            println!("  • {target} uses overlay {overlay}");
        }
    }
    for warning in &summary.warnings {
        println!("{} {warning}", status::WARNING);
    }
}
