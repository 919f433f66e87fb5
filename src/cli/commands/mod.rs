//! CLI command implementations
//!
//! Each command is implemented in its own submodule. Loading the suites,
//! the lock file and the graph is shared through [`session::Session`].

pub mod build;
pub mod check;
pub mod fetch;
pub mod graph;
pub mod session;

use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::cli::output::OutputConfig;

pub use session::Session;

/// Options shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct SessionArgs {
    /// Directory of the primary suite
    #[arg(short = 'C', long, global = true, default_value = ".")]
    pub suite_dir: PathBuf,

    /// Additional suites loaded as entry points
    #[arg(long = "dynamic-import", global = true, value_name = "SUITE")]
    pub dynamic_imports: Vec<String>,

    /// Extra directories searched for imported suites
    #[arg(long = "search-root", global = true, value_name = "DIR")]
    pub search_roots: Vec<PathBuf>,

    /// Target JDK version class
    #[arg(long, global = true, env = "SUITEFORGE_JDK")]
    pub jdk: Option<u32>,

    /// Target operating system (defaults to the host)
    #[arg(long, global = true)]
    pub os: Option<String>,

    /// Target architecture (defaults to the host)
    #[arg(long, global = true)]
    pub arch: Option<String>,

    /// Suite version conflict policy: strict or latest
    #[arg(long, global = true)]
    pub conflict_policy: Option<String>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build targets and everything they depend on
    Build {
        /// Nodes to build, `name` or `suite:name` (builds everything if empty)
        targets: Vec<String>,

        /// Number of parallel jobs
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Cancel nodes not yet started after the first failure
        #[arg(long)]
        fail_fast: bool,

        /// Rebuild nodes even when their fingerprint is cached
        #[arg(short, long)]
        force: bool,

        /// Fail if resolved suites differ from the lock file
        #[arg(long)]
        locked: bool,

        /// Where finished distributions are exported
        #[arg(long)]
        dist_dir: Option<PathBuf>,
    },

    /// Download and verify libraries
    Fetch {
        /// Nodes whose libraries are fetched (all if empty)
        targets: Vec<String>,

        /// Number of parallel downloads
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Fail if resolved suites differ from the lock file
        #[arg(long)]
        locked: bool,
    },

    /// Validate suites and the build graph without building
    Check,

    /// Print the build order or the dependency graph
    Graph {
        /// Nodes to restrict the graph to (all if empty)
        targets: Vec<String>,

        /// Render in Graphviz DOT format
        #[arg(long)]
        dot: bool,
    },
}

impl Commands {
    /// Execute the command
    pub async fn run(self, args: &SessionArgs, output: &OutputConfig) -> Result<()> {
        match self {
            Self::Build {
                targets,
                jobs,
                fail_fast,
                force,
                locked,
                dist_dir,
            } => {
                let options = build::BuildOptions {
                    targets,
                    jobs,
                    fail_fast,
                    force,
                    locked,
                    dist_dir,
                };
                build::execute(args, options, output).await
            }
            Self::Fetch {
                targets,
                jobs,
                locked,
            } => fetch::execute(args, &targets, jobs, locked, output).await,
            Self::Check => check::execute(args, output).await,
            Self::Graph { targets, dot } => graph::execute(args, &targets, dot, output).await,
        }
    }
}
