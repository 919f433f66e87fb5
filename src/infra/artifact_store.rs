//! Checksum-addressed artifact store
//!
//! Libraries are cached at
//! `<downloads>/<algo>/<checksum[0..2]>/<checksum>/<file>`. Bytes only reach
//! that path after their checksum matched; downloads stream into a `.part`
//! sibling first. Fetches of the same checksum are serialized.

use std::path::{Path, PathBuf};

use crate::core::descriptor::LibraryDescriptor;
use crate::error::ArtifactError;
use crate::infra::download::{verify_checksum, Checksum, DownloadManager};
use crate::infra::keyed_lock::KeyedLocks;

/// A library resolved to a verified local file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub path: PathBuf,
    /// Whether the cache already held a verified copy
    pub from_cache: bool,
}

/// Local cache of verified library downloads
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    downloader: DownloadManager,
    maven_mirror: Option<String>,
    locks: KeyedLocks<Checksum>,
}

impl ArtifactStore {
    pub fn new(root: PathBuf, downloader: DownloadManager, maven_mirror: Option<String>) -> Self {
        Self {
            root,
            downloader,
            maven_mirror,
            locks: KeyedLocks::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache location of a blob
    pub fn blob_path(&self, checksum: &Checksum, file_name: &str) -> PathBuf {
        let prefix = &checksum.value[..2.min(checksum.value.len())];
        self.root
            .join(checksum.algorithm.as_str())
            .join(prefix)
            .join(&checksum.value)
            .join(file_name)
    }

    /// Fetch `library`, returning the verified local file
    ///
    /// URLs are tried in order. Transport failures move on to the next URL;
    /// a checksum mismatch aborts immediately.
    pub async fn fetch(
        &self,
        id: &str,
        library: &LibraryDescriptor,
    ) -> Result<Fetched, ArtifactError> {
        let checksum = library.checksum().ok_or_else(|| ArtifactError::Fetch {
            library: id.to_string(),
            errors: vec!["library declares no checksum".to_string()],
        })?;

        let _guard = self.locks.write(&checksum).await;

        let path = self.blob_path(&checksum, &library.file_name());
        if path.exists() {
            match verify_checksum(&path, &checksum).await {
                Ok(true) => {
                    tracing::debug!(library = %id, path = %path.display(), "artifact cache hit");
                    return Ok(Fetched {
                        path,
                        from_cache: true,
                    });
                }
                Ok(false) => {
                    tracing::warn!(library = %id, path = %path.display(), "cached artifact is corrupt, refetching");
                    self.discard(&path).await?;
                }
                Err(e) => {
                    tracing::warn!(library = %id, error = %e, "cannot verify cached artifact, refetching");
                    self.discard(&path).await?;
                }
            }
        }

        let part = part_path(&path);
        let mut errors = Vec::new();

        for url in library.download_urls(self.maven_mirror.as_deref()) {
            tracing::info!(library = %id, %url, "downloading");

            let result = match self
                .downloader
                .download(&url, &part, checksum.algorithm)
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(library = %id, %url, error = %e, "download failed");
                    errors.push(format!("{url}: {e}"));
                    continue;
                }
            };

            if !checksum.matches(&result.checksum) {
                self.discard(&part).await?;
                return Err(ArtifactError::Integrity {
                    library: id.to_string(),
                    url,
                    expected: checksum.to_string(),
                    actual: format!("{}:{}", checksum.algorithm, result.checksum),
                });
            }

            tokio::fs::rename(&part, &path)
                .await
                .map_err(|e| ArtifactError::IoError {
                    path: path.clone(),
                    error: e.to_string(),
                })?;

            tracing::info!(library = %id, size = result.size, "artifact verified");
            return Ok(Fetched {
                path,
                from_cache: false,
            });
        }

        Err(ArtifactError::Fetch {
            library: id.to_string(),
            errors,
        })
    }

    /// Fetch the source jar of `library`, if it declares one
    ///
    /// Source jars follow the same integrity rule as the library itself.
    pub async fn fetch_sources(
        &self,
        id: &str,
        library: &LibraryDescriptor,
    ) -> Result<Option<Fetched>, ArtifactError> {
        match library.sources() {
            Some(sources) => self.fetch(&format!("{id}.sources"), &sources).await.map(Some),
            None => Ok(None),
        }
    }

    async fn discard(&self, path: &Path) -> Result<(), ArtifactError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ArtifactError::IoError {
                path: path.to_path_buf(),
                error: e.to_string(),
            }),
        }
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::download::{compute_checksum, ChecksumAlgorithm};
    use std::sync::Arc;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CONTENT: &[u8] = b"library bytes";

    fn library(urls: Vec<String>, sha1: &str) -> LibraryDescriptor {
        LibraryDescriptor {
            name: "LIB".into(),
            urls,
            sha1: Some(sha1.into()),
            sha256: None,
            module_name: None,
            maven: None,
            dependencies: vec![],
            source_urls: vec![],
            source_sha1: None,
            source_sha256: None,
        }
    }

    fn store(temp: &TempDir) -> ArtifactStore {
        ArtifactStore::new(
            temp.path().join("downloads"),
            DownloadManager::with_config(2, 10),
            None,
        )
    }

    fn good_sha1() -> String {
        compute_checksum(ChecksumAlgorithm::Sha1, CONTENT)
    }

    #[test]
    fn test_blob_path_layout() {
        let temp = TempDir::new().unwrap();
        let checksum = Checksum::new(ChecksumAlgorithm::Sha1, "abcdef");
        assert_eq!(
            store(&temp).blob_path(&checksum, "lib.jar"),
            temp.path().join("downloads/sha1/ab/abcdef/lib.jar")
        );
    }

    #[tokio::test]
    async fn test_fetch_then_cache_hit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lib.jar"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(CONTENT.to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let lib = library(vec![format!("{}/lib.jar", server.uri())], &good_sha1());

        let first = store.fetch("s:LIB", &lib).await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(std::fs::read(&first.path).unwrap(), CONTENT);

        let second = store.fetch("s:LIB", &lib).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(first.path, second.path);
    }

    #[tokio::test]
    async fn test_mismatch_is_integrity_error_and_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lib.jar"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tampered".to_vec()))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let lib = library(vec![format!("{}/lib.jar", server.uri())], &good_sha1());

        let err = store.fetch("s:LIB", &lib).await.unwrap_err();
        assert!(matches!(err, ArtifactError::Integrity { .. }));

        let checksum = lib.checksum().unwrap();
        let blob = store.blob_path(&checksum, &lib.file_name());
        assert!(!blob.exists());
        assert!(!part_path(&blob).exists());
    }

    #[tokio::test]
    async fn test_source_jar_is_verified_like_the_library() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lib-sources.jar"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tampered".to_vec()))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let mut lib = library(vec![format!("{}/lib.jar", server.uri())], &good_sha1());
        lib.source_urls = vec![format!("{}/lib-sources.jar", server.uri())];
        lib.source_sha1 = Some(compute_checksum(ChecksumAlgorithm::Sha1, b"sources"));

        match store.fetch_sources("s:LIB", &lib).await.unwrap_err() {
            ArtifactError::Integrity { library, .. } => assert_eq!(library, "s:LIB.sources"),
            other => panic!("unexpected error: {other:?}"),
        }
        let sources = lib.sources().unwrap();
        assert!(!store
            .blob_path(&sources.checksum().unwrap(), &sources.file_name())
            .exists());

        lib.source_urls.clear();
        lib.source_sha1 = None;
        assert_eq!(store.fetch_sources("s:LIB", &lib).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_falls_through_to_next_url_on_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.jar"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/lib.jar"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(CONTENT.to_vec()))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let lib = library(
            vec![
                format!("{}/gone.jar", server.uri()),
                format!("{}/lib.jar", server.uri()),
            ],
            &good_sha1(),
        );

        let fetched = store(&temp).fetch("s:LIB", &lib).await.unwrap();
        assert_eq!(std::fs::read(fetched.path).unwrap(), CONTENT);
    }

    #[tokio::test]
    async fn test_all_urls_failing_reports_each() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let lib = library(
            vec![format!("{}/a.jar", server.uri()), format!("{}/b.jar", server.uri())],
            &good_sha1(),
        );

        match store(&temp).fetch("s:LIB", &lib).await.unwrap_err() {
            ArtifactError::Fetch { errors, .. } => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_is_refetched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lib.jar"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(CONTENT.to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let lib = library(vec![format!("{}/lib.jar", server.uri())], &good_sha1());
        let blob = store.blob_path(&lib.checksum().unwrap(), &lib.file_name());
        std::fs::create_dir_all(blob.parent().unwrap()).unwrap();
        std::fs::write(&blob, b"bit rot").unwrap();

        let fetched = store.fetch("s:LIB", &lib).await.unwrap();
        assert!(!fetched.from_cache);
        assert_eq!(std::fs::read(blob).unwrap(), CONTENT);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_download_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lib.jar"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(CONTENT.to_vec())
                    .set_delay(std::time::Duration::from_millis(50)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let store = Arc::new(store(&temp));
        let lib = Arc::new(library(
            vec![format!("{}/lib.jar", server.uri())],
            &good_sha1(),
        ));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = Arc::clone(&store);
            let lib = Arc::clone(&lib);
            handles.push(tokio::spawn(async move {
                store.fetch("s:LIB", &lib).await.unwrap()
            }));
        }
        let mut downloaded = 0;
        for handle in handles {
            if !handle.await.unwrap().from_cache {
                downloaded += 1;
            }
        }
        assert_eq!(downloaded, 1);
    }
}
