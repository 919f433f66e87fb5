//! Toolchain invocation
//!
//! Compilers and code generators are opaque external programs. The build
//! executor talks to them through the [`Toolchain`] trait so tests can
//! substitute an in-process implementation.

use std::fmt;
use std::path::PathBuf;
use std::process::Command;

use crate::core::build_env::BuildEnvironment;
use crate::error::ToolchainError;

/// Kind of external step run for a project
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStep {
    /// Code generation ahead of compilation
    Processor,
    /// Main compile step
    Compile,
}

impl BuildStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processor => "processor",
            Self::Compile => "compile",
        }
    }
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs external build steps
pub trait Toolchain: Send + Sync {
    /// Run `step` for the project described by `env`
    ///
    /// `command` is a per-project argv that overrides the configured one.
    fn run(
        &self,
        step: BuildStep,
        command: Option<&[String]>,
        env: &BuildEnvironment,
    ) -> Result<(), ToolchainError>;

    /// Stable description of what `run` would execute, folded into fingerprints
    fn identity(&self, step: BuildStep, command: Option<&[String]>) -> String;
}

/// Toolchain spawning configured commands
#[derive(Debug, Clone, Default)]
pub struct CommandToolchain {
    compiler: Option<Vec<String>>,
    processor: Option<Vec<String>>,
}

impl CommandToolchain {
    pub fn new(compiler: Option<Vec<String>>, processor: Option<Vec<String>>) -> Self {
        Self {
            compiler: compiler.filter(|argv| !argv.is_empty()),
            processor: processor.filter(|argv| !argv.is_empty()),
        }
    }

    fn argv<'a>(&'a self, step: BuildStep, command: Option<&'a [String]>) -> Option<&'a [String]> {
        command.filter(|argv| !argv.is_empty()).or(match step {
            BuildStep::Compile => self.compiler.as_deref(),
            BuildStep::Processor => self.processor.as_deref(),
        })
    }

    /// Check every configured program resolves on PATH
    pub fn check_available(&self) -> Vec<ToolchainError> {
        [&self.compiler, &self.processor]
            .into_iter()
            .flatten()
            .filter_map(|argv| argv.first())
            .filter(|program| which::which(program.as_str()).is_err())
            .map(|program| ToolchainError::NotFound {
                program: program.clone(),
            })
            .collect()
    }
}

fn resolve_program(program: &str, env: &BuildEnvironment) -> Result<PathBuf, ToolchainError> {
    which::which_in(program, std::env::var_os("PATH"), &env.project_dir).map_err(|_| {
        ToolchainError::NotFound {
            program: program.to_string(),
        }
    })
}

impl Toolchain for CommandToolchain {
    fn run(
        &self,
        step: BuildStep,
        command: Option<&[String]>,
        env: &BuildEnvironment,
    ) -> Result<(), ToolchainError> {
        let argv = self
            .argv(step, command)
            .ok_or_else(|| ToolchainError::NotConfigured {
                step: step.to_string(),
            })?;
        let (program, args) = argv.split_first().ok_or_else(|| ToolchainError::NotConfigured {
            step: step.to_string(),
        })?;
        let resolved = resolve_program(program, env)?;

        tracing::debug!(node = %env.node, %step, program = %resolved.display(), "running build step");

        let output = Command::new(&resolved)
            .args(args)
            .current_dir(&env.project_dir)
            .envs(env.to_env_map())
            .output()
            .map_err(|e| ToolchainError::Spawn {
                program: program.clone(),
                error: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolchainError::Failed {
                program: program.clone(),
                status: output.status.to_string(),
                stderr: tail(&stderr, 20),
            });
        }

        Ok(())
    }

    fn identity(&self, step: BuildStep, command: Option<&[String]>) -> String {
        self.argv(step, command)
            .map(|argv| argv.join(" "))
            .unwrap_or_default()
    }
}

/// Last `lines` lines of process output
fn tail(text: &str, lines: usize) -> String {
    let collected: Vec<&str> = text.lines().collect();
    let start = collected.len().saturating_sub(lines);
    collected[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::platform::Environment;
    use tempfile::TempDir;

    fn env_in(dir: &std::path::Path) -> BuildEnvironment {
        BuildEnvironment::new(
            "s:p",
            dir.to_path_buf(),
            dir.join("out"),
            Environment::new(11, "linux", "amd64"),
        )
    }

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_unconfigured_step_fails() {
        let temp = TempDir::new().unwrap();
        let toolchain = CommandToolchain::new(None, Some(vec![]));
        let err = toolchain
            .run(BuildStep::Processor, None, &env_in(temp.path()))
            .unwrap_err();
        assert_eq!(
            err,
            ToolchainError::NotConfigured {
                step: "processor".into()
            }
        );
    }

    #[test]
    fn test_missing_program_reported() {
        let temp = TempDir::new().unwrap();
        let toolchain = CommandToolchain::new(Some(argv(&["definitely-not-a-compiler-xyz"])), None);
        let err = toolchain
            .run(BuildStep::Compile, None, &env_in(temp.path()))
            .unwrap_err();
        assert!(matches!(err, ToolchainError::NotFound { .. }));
        assert_eq!(toolchain.check_available().len(), 1);
    }

    #[test]
    fn test_identity_prefers_project_command() {
        let toolchain = CommandToolchain::new(Some(argv(&["javac", "-g"])), None);
        assert_eq!(toolchain.identity(BuildStep::Compile, None), "javac -g");
        let custom = argv(&["make", "all"]);
        assert_eq!(
            toolchain.identity(BuildStep::Compile, Some(&custom)),
            "make all"
        );
        assert_eq!(toolchain.identity(BuildStep::Processor, None), "");
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc", 2), "b\nc");
        assert_eq!(tail("a", 5), "a");
    }

    #[cfg(unix)]
    #[test]
    fn test_step_runs_with_environment() {
        let temp = TempDir::new().unwrap();
        let toolchain = CommandToolchain::new(
            Some(argv(&[
                "sh",
                "-c",
                "mkdir -p \"$SF_OUTPUT_DIR\" && echo \"$SF_PROJECT $SF_JDK\" > \"$SF_OUTPUT_DIR/info\"",
            ])),
            None,
        );
        toolchain
            .run(BuildStep::Compile, None, &env_in(temp.path()))
            .unwrap();
        let info = std::fs::read_to_string(temp.path().join("out/info")).unwrap();
        assert_eq!(info.trim(), "p 11");
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_step_captures_stderr() {
        let temp = TempDir::new().unwrap();
        let toolchain =
            CommandToolchain::new(Some(argv(&["sh", "-c", "echo broken >&2; exit 3"])), None);
        let err = toolchain
            .run(BuildStep::Compile, None, &env_in(temp.path()))
            .unwrap_err();
        match err {
            ToolchainError::Failed { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
