//! Graph command implementation
//!
//! Implements `suiteforge graph`. With a known JDK the resolved graph is
//! shown, otherwise the graph as declared.

use anyhow::{Context, Result};

use crate::cli::commands::{Session, SessionArgs};
use crate::cli::output::OutputConfig;
use crate::core::graph::Graph;
use crate::error::ForgeError;

/// Execute the graph command
pub async fn execute(
    args: &SessionArgs,
    targets: &[String],
    dot: bool,
    output: &OutputConfig,
) -> Result<()> {
    let session = Session::load(args).context("Failed to load suites")?;

    let graph: Graph = match session.environment(args) {
        Ok(env) => {
            session
                .resolve(&env, targets)
                .with_context(|| format!("Failed to resolve the build graph for {env}"))?
                .graph
        }
        Err(e) => {
            tracing::info!(reason = %e, "showing unresolved graph");
            session.restricted(targets).map_err(ForgeError::from)?
        }
    };

    if dot {
        print!("{}", graph.to_dot());
    } else if output.json {
        let order: Vec<&str> = graph.build_order().iter().map(|id| id.as_str()).collect();
        println!("{}", serde_json::to_string_pretty(&order)?);
    } else {
        for (position, id) in graph.build_order().iter().enumerate() {
            let kind = graph.node(id).map(|n| n.kind.to_string()).unwrap_or_default();
            println!("{:>4}  {id}  ({kind})", position + 1);
        }
    }
    Ok(())
}
