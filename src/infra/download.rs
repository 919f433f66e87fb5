//! HTTP download functionality
//!
//! Handles downloading files with checksum computation while streaming,
//! local `file://` mirrors, and retry with exponential backoff.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::config::defaults;
use crate::error::DownloadError;

/// Hash algorithm of a declared checksum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Sha1,
    Sha256,
}

impl ChecksumAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    fn hasher(self) -> StreamHasher {
        match self {
            Self::Sha1 => StreamHasher::Sha1(Sha1::new()),
            Self::Sha256 => StreamHasher::Sha256(Sha256::new()),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared content checksum
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    /// Lowercase hex digest
    pub value: String,
}

impl Checksum {
    pub fn new(algorithm: ChecksumAlgorithm, value: &str) -> Self {
        Self {
            algorithm,
            value: value.trim().to_lowercase(),
        }
    }

    /// Whether `actual` (hex) equals this checksum
    pub fn matches(&self, actual: &str) -> bool {
        self.value == actual.to_lowercase()
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

enum StreamHasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl StreamHasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Download result containing file path and metadata
#[derive(Debug)]
pub struct DownloadResult {
    /// Path to the downloaded file
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Hex digest of the downloaded content
    pub checksum: String,
}

/// Download manager for fetching files with retry
#[derive(Debug, Clone)]
pub struct DownloadManager {
    /// HTTP client
    client: reqwest::Client,
    /// Maximum attempts per URL
    max_retries: u32,
    /// Base delay for exponential backoff (in milliseconds)
    base_delay_ms: u64,
}

impl DownloadManager {
    /// Create a new download manager
    pub fn new() -> Self {
        Self::with_config(defaults::MAX_DOWNLOAD_RETRIES, defaults::DOWNLOAD_BASE_DELAY_MS)
    }

    /// Create a download manager with custom settings
    pub fn with_config(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(300))
                .connect_timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            max_retries: max_retries.max(1),
            base_delay_ms,
        }
    }

    /// Get max retries
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Download a file with retry logic, hashing it with `algorithm`
    ///
    /// Rejected requests (4xx other than 408/429) are not retried.
    /// The destination is removed if every attempt fails.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        algorithm: ChecksumAlgorithm,
    ) -> Result<DownloadResult, DownloadError> {
        let mut attempts = 0;
        let mut last_error = None;
        let mut delay_ms = self.base_delay_ms;

        while attempts < self.max_retries {
            attempts += 1;

            match self.download_once(url, dest, algorithm).await {
                Ok(result) => return Ok(result),
                Err(e @ DownloadError::Rejected { .. }) => {
                    last_error = Some(e);
                    break;
                }
                Err(e) => {
                    tracing::debug!(url, attempt = attempts, error = %e, "download attempt failed");
                    last_error = Some(e);

                    if attempts < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        delay_ms = (delay_ms * 2).min(defaults::DOWNLOAD_MAX_DELAY_MS);
                    }
                }
            }
        }

        // Clean up partial download on failure
        let _ = tokio::fs::remove_file(dest).await;

        Err(last_error.unwrap_or_else(|| DownloadError::MaxRetriesExceeded {
            url: url.to_string(),
            retries: self.max_retries,
        }))
    }

    /// Single download attempt without retry
    async fn download_once(
        &self,
        url: &str,
        dest: &Path,
        algorithm: ChecksumAlgorithm,
    ) -> Result<DownloadResult, DownloadError> {
        if let Some(local) = url.strip_prefix("file://") {
            return copy_local(url, Path::new(local), dest, algorithm).await;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::NetworkError {
                url: url.to_string(),
                error: e.to_string(),
            })?;

        let status = response.status();
        if status.is_client_error() && status.as_u16() != 408 && status.as_u16() != 429 {
            return Err(DownloadError::Rejected {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(DownloadError::NetworkError {
                url: url.to_string(),
                error: format!("HTTP {status}"),
            });
        }

        let mut file = create_dest(dest).await?;
        let mut hasher = algorithm.hasher();
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| DownloadError::NetworkError {
                url: url.to_string(),
                error: e.to_string(),
            })?;

            file.write_all(&chunk)
                .await
                .map_err(|e| DownloadError::IoError {
                    path: dest.to_path_buf(),
                    error: e.to_string(),
                })?;

            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
        }

        file.flush().await.map_err(|e| DownloadError::IoError {
            path: dest.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(DownloadResult {
            path: dest.to_path_buf(),
            size: downloaded,
            checksum: hasher.finalize_hex(),
        })
    }
}

impl Default for DownloadManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn create_dest(dest: &Path) -> Result<File, DownloadError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::IoError {
                path: parent.to_path_buf(),
                error: e.to_string(),
            })?;
    }

    File::create(dest).await.map_err(|e| DownloadError::IoError {
        path: dest.to_path_buf(),
        error: e.to_string(),
    })
}

async fn copy_local(
    url: &str,
    source: &Path,
    dest: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<DownloadResult, DownloadError> {
    let content = tokio::fs::read(source).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DownloadError::Rejected {
                url: url.to_string(),
                status: 404,
            }
        } else {
            DownloadError::IoError {
                path: source.to_path_buf(),
                error: e.to_string(),
            }
        }
    })?;

    let mut file = create_dest(dest).await?;
    file.write_all(&content)
        .await
        .map_err(|e| DownloadError::IoError {
            path: dest.to_path_buf(),
            error: e.to_string(),
        })?;
    file.flush().await.map_err(|e| DownloadError::IoError {
        path: dest.to_path_buf(),
        error: e.to_string(),
    })?;

    Ok(DownloadResult {
        path: dest.to_path_buf(),
        size: content.len() as u64,
        checksum: compute_checksum(algorithm, &content),
    })
}

/// Compute the hex digest of data
pub fn compute_checksum(algorithm: ChecksumAlgorithm, data: &[u8]) -> String {
    let mut hasher = algorithm.hasher();
    hasher.update(data);
    hasher.finalize_hex()
}

/// Verify the checksum of a file on disk
pub async fn verify_checksum(path: &Path, expected: &Checksum) -> Result<bool, DownloadError> {
    let content = tokio::fs::read(path)
        .await
        .map_err(|e| DownloadError::IoError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

    Ok(expected.matches(&compute_checksum(expected.algorithm, &content)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // ============================================
    // Unit Tests - Checksum computation
    // ============================================

    #[test]
    fn test_compute_sha256() {
        assert_eq!(
            compute_checksum(ChecksumAlgorithm::Sha256, b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_compute_sha1() {
        assert_eq!(
            compute_checksum(ChecksumAlgorithm::Sha1, b"hello world"),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
    }

    #[test]
    fn test_checksum_comparison_is_case_insensitive() {
        let checksum = Checksum::new(
            ChecksumAlgorithm::Sha1,
            "2AAE6C35C94FCFB415DBE95F408B9CE91EE846ED",
        );
        assert!(checksum.matches("2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"));
        assert_eq!(
            checksum.to_string(),
            "sha1:2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
    }

    #[tokio::test]
    async fn test_verify_checksum_on_disk() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("test.txt");
        std::fs::write(&file_path, b"hello world").unwrap();

        let good = Checksum::new(
            ChecksumAlgorithm::Sha256,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9",
        );
        let bad = Checksum::new(ChecksumAlgorithm::Sha256, &"0".repeat(64));
        assert!(verify_checksum(&file_path, &good).await.unwrap());
        assert!(!verify_checksum(&file_path, &bad).await.unwrap());
    }

    #[test]
    fn test_download_manager_clamps_retries() {
        assert_eq!(DownloadManager::with_config(0, 10).max_retries(), 1);
        assert_eq!(DownloadManager::new().max_retries(), 3);
    }

    // ============================================
    // Async Tests - Download functionality
    // ============================================

    #[tokio::test]
    async fn test_download_success_hashes_stream() {
        let mock_server = MockServer::start().await;
        let content = b"test file content";

        Mock::given(method("GET"))
            .and(path("/test.jar"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(content.to_vec()))
            .mount(&mock_server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("nested/test.jar");
        let manager = DownloadManager::with_config(3, 10);

        let result = manager
            .download(
                &format!("{}/test.jar", mock_server.uri()),
                &dest,
                ChecksumAlgorithm::Sha1,
            )
            .await
            .unwrap();

        assert_eq!(result.checksum, compute_checksum(ChecksumAlgorithm::Sha1, content));
        assert_eq!(result.size, content.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), content);
    }

    #[tokio::test]
    async fn test_download_retry_on_server_error() {
        let mock_server = MockServer::start().await;
        let content = b"retry content";

        Mock::given(method("GET"))
            .and(path("/retry.jar"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/retry.jar"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(content.to_vec()))
            .mount(&mock_server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("retry.jar");
        let manager = DownloadManager::with_config(3, 10);

        let result = manager
            .download(
                &format!("{}/retry.jar", mock_server.uri()),
                &dest,
                ChecksumAlgorithm::Sha256,
            )
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/missing.jar"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("missing.jar");
        let manager = DownloadManager::with_config(3, 10);

        let result = manager
            .download(
                &format!("{}/missing.jar", mock_server.uri()),
                &dest,
                ChecksumAlgorithm::Sha256,
            )
            .await;

        assert!(matches!(result, Err(DownloadError::Rejected { status: 404, .. })));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_max_retries_exceeded_removes_partial_file() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/fail.jar"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&mock_server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("fail.jar");
        let manager = DownloadManager::with_config(3, 10);

        let result = manager
            .download(
                &format!("{}/fail.jar", mock_server.uri()),
                &dest,
                ChecksumAlgorithm::Sha256,
            )
            .await;

        assert!(result.is_err());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_file_url_is_copied() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("mirror.jar");
        std::fs::write(&source, b"local bytes").unwrap();
        let dest = temp.path().join("out/copy.jar");

        let result = DownloadManager::with_config(1, 10)
            .download(
                &format!("file://{}", source.display()),
                &dest,
                ChecksumAlgorithm::Sha256,
            )
            .await
            .unwrap();

        assert_eq!(
            result.checksum,
            compute_checksum(ChecksumAlgorithm::Sha256, b"local bytes")
        );
        assert_eq!(std::fs::read(dest).unwrap(), b"local bytes");
    }

    // ============================================
    // Property-Based Tests
    // ============================================

    fn data_strategy() -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(any::<u8>(), 0..1000)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// A checksum only ever verifies the exact bytes it was computed from
        #[test]
        fn prop_truncation_changes_checksum(data in data_strategy()) {
            prop_assume!(!data.is_empty());
            let full = Checksum::new(
                ChecksumAlgorithm::Sha256,
                &compute_checksum(ChecksumAlgorithm::Sha256, &data),
            );
            let truncated = compute_checksum(ChecksumAlgorithm::Sha256, &data[..data.len() - 1]);
            prop_assert!(!full.matches(&truncated));
        }

        /// Digest lengths are fixed per algorithm
        #[test]
        fn prop_checksum_format(data in data_strategy()) {
            let sha1 = compute_checksum(ChecksumAlgorithm::Sha1, &data);
            let sha256 = compute_checksum(ChecksumAlgorithm::Sha256, &data);
            prop_assert_eq!(sha1.len(), 40);
            prop_assert_eq!(sha256.len(), 64);
            prop_assert!(sha256.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }
}
