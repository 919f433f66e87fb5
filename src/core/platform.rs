//! Build environment and platform selection
//!
//! Descriptors key conditional data by `(os, arch)` pairs where either
//! side may be the `<others>` wildcard. Selection is pure: the most
//! specific branch matching the environment wins.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::config::defaults::OTHERS;

static COMPLIANCE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

/// Target environment of a build invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Environment {
    /// JDK version class (8, 11, 17, ...)
    pub jdk: u32,
    /// Operating system name as used in descriptors (linux, darwin, windows)
    pub os: String,
    /// Architecture name as used in descriptors (amd64, aarch64)
    pub arch: String,
}

impl Environment {
    pub fn new(jdk: u32, os: &str, arch: &str) -> Self {
        Self {
            jdk,
            os: os.to_string(),
            arch: arch.to_string(),
        }
    }

    /// Environment describing the host machine
    pub fn host(jdk: u32) -> Self {
        Self::new(jdk, host_os(), host_arch())
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "jdk{} {}/{}", self.jdk, self.os, self.arch)
    }
}

/// Host operating system in descriptor naming
pub fn host_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// Host architecture in descriptor naming
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        other => other,
    }
}

/// A conditional branch keyed by os and arch
pub trait PlatformBranch {
    fn os(&self) -> &str;
    fn arch(&self) -> &str;
}

/// Select the branch applicable to `env`
///
/// Lookup order: `(os, arch)`, `(os, <others>)`, `(<others>, arch)`,
/// `(<others>, <others>)`. Returns `None` when nothing matches.
pub fn select_branch<'a, B: PlatformBranch>(branches: &'a [B], env: &Environment) -> Option<&'a B> {
    let candidates = [
        (env.os.as_str(), env.arch.as_str()),
        (env.os.as_str(), OTHERS),
        (OTHERS, env.arch.as_str()),
        (OTHERS, OTHERS),
    ];
    candidates.iter().find_map(|(os, arch)| {
        branches
            .iter()
            .find(|branch| branch.os() == *os && branch.arch() == *arch)
    })
}

/// Whether an optional os/arch restriction admits `env`
pub fn restriction_matches(os: Option<&str>, arch: Option<&str>, env: &Environment) -> bool {
    let admits = |wanted: Option<&str>, actual: &str| match wanted {
        None => true,
        Some(value) => value == OTHERS || value == actual,
    };
    admits(os, &env.os) && admits(arch, &env.arch)
}

/// A range of JDK versions a project compiles against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JavaCompliance {
    pub low: u32,
    /// Inclusive upper bound; `None` means unbounded
    pub high: Option<u32>,
}

impl JavaCompliance {
    /// Parse `8`, `1.8`, `8+`, `11+` or `9..11`
    pub fn parse(value: &str) -> Result<Self, String> {
        let re = COMPLIANCE
            .get_or_init(|| Regex::new(r"^(?:1\.)?(\d+)(?:(\+)|\.\.(?:1\.)?(\d+))?$"))
            .as_ref()
            .map_err(|e| format!("Invalid regex: {e}"))?;
        let caps = re
            .captures(value.trim())
            .ok_or_else(|| format!("invalid java compliance '{value}'"))?;

        let number = |s: &str| {
            s.parse::<u32>()
                .map_err(|e| format!("invalid java compliance '{value}': {e}"))
        };

        let low = number(&caps[1])?;
        let high = if caps.get(2).is_some() {
            None
        } else if let Some(upper) = caps.get(3) {
            let high = number(upper.as_str())?;
            if high < low {
                return Err(format!("empty java compliance range '{value}'"));
            }
            Some(high)
        } else {
            Some(low)
        };

        Ok(Self { low, high })
    }

    /// Whether a JDK of version class `jdk` satisfies this compliance
    pub fn matches(&self, jdk: u32) -> bool {
        jdk >= self.low && self.high.map_or(true, |high| jdk <= high)
    }
}

impl fmt::Display for JavaCompliance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.high {
            None => write!(f, "{}+", self.low),
            Some(high) if high == self.low => write!(f, "{}", self.low),
            Some(high) => write!(f, "{}..{high}", self.low),
        }
    }
}
