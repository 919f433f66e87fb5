//! Default configuration values

/// Maximum number of download attempts per URL
pub const MAX_DOWNLOAD_RETRIES: u32 = 3;

/// Base delay for download retry backoff (in milliseconds)
pub const DOWNLOAD_BASE_DELAY_MS: u64 = 1000;

/// Upper bound for a single backoff delay (in milliseconds)
pub const DOWNLOAD_MAX_DELAY_MS: u64 = 30_000;

/// Name of a suite descriptor file
pub const SUITE_FILE: &str = "suite.toml";

/// Name of the suite lock file, next to the primary suite descriptor
pub const LOCK_FILE: &str = "suites.lock";

/// Wildcard key matching any operating system or architecture
pub const OTHERS: &str = "<others>";

/// Default source directory of a project
pub const DEFAULT_SOURCE_DIR: &str = "src";

/// Minimum proptest iterations
pub const MIN_PROPTEST_ITERATIONS: u32 = 100;
