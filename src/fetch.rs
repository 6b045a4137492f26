//! Fetcher: render, resolve and download with cross-URL fallback.
//!
//! Candidate source pages are tried in order. Any failure on one page
//! (render, resolution, download) moves on to the next; exhausting them all
//! yields a [`FetchFailure`] carrying every per-URL reason.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{FileVersion, TrackedDocument};
use crate::resolver::{LinkResolver, ResolvedLink};
use crate::scrapers::{DownloadedFile, PageRenderer, PageSession};

/// Which step of an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStage {
    Render,
    Resolve,
    Download,
    Stage,
}

impl AttemptStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Render => "render",
            Self::Resolve => "resolve",
            Self::Download => "download",
            Self::Stage => "stage",
        }
    }
}

/// Why one candidate source URL did not yield a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub url: String,
    pub stage: AttemptStage,
    pub reason: String,
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.url, self.stage.as_str(), self.reason)
    }
}

/// Every candidate source URL failed.
#[derive(Debug, Error)]
#[error("All {} source URL(s) failed for {key}", .attempts.len())]
pub struct FetchFailure {
    pub key: String,
    pub attempts: Vec<AttemptFailure>,
}

impl FetchFailure {
    pub fn reasons(&self) -> Vec<String> {
        self.attempts.iter().map(|a| a.to_string()).collect()
    }
}

/// Downloaded bytes sitting in the staging directory.
///
/// The temp file is removed when this is dropped, so an abandoned fetch
/// leaves nothing behind.
#[derive(Debug)]
pub struct StagedFile {
    file: NamedTempFile,
    pub content_hash: String,
    pub byte_size: u64,
    pub suggested_filename: Option<String>,
    pub content_type: Option<String>,
}

impl StagedFile {
    /// Write `data` into a new temp file under `staging_dir`.
    pub fn write(
        staging_dir: &Path,
        data: &[u8],
        suggested_filename: Option<String>,
        content_type: Option<String>,
    ) -> std::io::Result<Self> {
        std::fs::create_dir_all(staging_dir)?;
        let mut file = tempfile::Builder::new()
            .prefix("fetch-")
            .suffix(".part")
            .tempfile_in(staging_dir)?;
        file.write_all(data)?;
        file.as_file().sync_all()?;

        Ok(Self {
            file,
            content_hash: FileVersion::compute_hash(data),
            byte_size: data.len() as u64,
            suggested_filename,
            content_type,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Rename the staged file to `dest` (same filesystem).
    pub fn promote(self, dest: &Path) -> std::io::Result<()> {
        self.file.persist(dest).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Successful fetch of one document.
#[derive(Debug)]
pub struct FetchedFile {
    pub staged: StagedFile,
    pub link: ResolvedLink,
    /// Failures on earlier candidate URLs before this one succeeded.
    pub earlier_failures: Vec<AttemptFailure>,
}

/// Result of rendering a page and resolving its link, without downloading.
#[derive(Debug)]
pub struct ScanResult {
    pub link: Option<ResolvedLink>,
    pub attempts: Vec<AttemptFailure>,
}

pub struct Fetcher {
    renderer: Arc<dyn PageRenderer>,
    resolver: LinkResolver,
    staging_dir: PathBuf,
    attempt_timeout: Duration,
}

impl Fetcher {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        staging_dir: impl Into<PathBuf>,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            renderer,
            resolver: LinkResolver::new(),
            staging_dir: staging_dir.into(),
            attempt_timeout,
        }
    }

    pub fn with_resolver(mut self, resolver: LinkResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Try each candidate source URL in order until one yields a file.
    pub async fn fetch(&self, document: &TrackedDocument) -> Result<FetchedFile, FetchFailure> {
        let mut failures = Vec::new();

        for url in &document.candidate_source_urls {
            match self.attempt(document, url).await {
                Ok((staged, link)) => {
                    if !failures.is_empty() {
                        info!(
                            "Fetched {} from fallback source {} after {} failure(s)",
                            document.key,
                            url,
                            failures.len()
                        );
                    }
                    return Ok(FetchedFile {
                        staged,
                        link,
                        earlier_failures: failures,
                    });
                }
                Err(failure) => {
                    warn!("Source {} failed for {}: {}", url, document.key, failure.reason);
                    failures.push(failure);
                }
            }
        }

        Err(FetchFailure {
            key: document.key.clone(),
            attempts: failures,
        })
    }

    /// Render each candidate source until the link resolves, without downloading.
    pub async fn scan(&self, document: &TrackedDocument) -> ScanResult {
        let mut attempts = Vec::new();

        for url in &document.candidate_source_urls {
            let mut session = match self.open(url).await {
                Ok(session) => session,
                Err(failure) => {
                    attempts.push(failure);
                    continue;
                }
            };

            let resolved = tokio::time::timeout(self.attempt_timeout, session.snapshot()).await;
            session.close().await;

            let failure = |stage, reason: String| AttemptFailure {
                url: url.clone(),
                stage,
                reason,
            };
            match resolved {
                Ok(Ok(snapshot)) => match self.resolver.resolve(document, &snapshot) {
                    Ok(link) => {
                        return ScanResult {
                            link: Some(link),
                            attempts,
                        }
                    }
                    Err(e) => attempts.push(failure(AttemptStage::Resolve, e.to_string())),
                },
                Ok(Err(e)) => attempts.push(failure(AttemptStage::Render, e.to_string())),
                Err(_) => attempts.push(failure(AttemptStage::Render, self.timeout_reason())),
            }
        }

        ScanResult {
            link: None,
            attempts,
        }
    }

    fn timeout_reason(&self) -> String {
        format!("timed out after {}s", self.attempt_timeout.as_secs())
    }

    async fn open(&self, url: &str) -> Result<Box<dyn PageSession>, AttemptFailure> {
        debug!("Opening {}", url);
        let failure = |reason: String| AttemptFailure {
            url: url.to_string(),
            stage: AttemptStage::Render,
            reason,
        };
        match tokio::time::timeout(self.attempt_timeout, self.renderer.open(url)).await {
            Ok(Ok(session)) => Ok(session),
            Ok(Err(e)) => Err(failure(e.to_string())),
            Err(_) => Err(failure(self.timeout_reason())),
        }
    }

    /// One candidate source URL. The session is closed on every path.
    async fn attempt(
        &self,
        document: &TrackedDocument,
        url: &str,
    ) -> Result<(StagedFile, ResolvedLink), AttemptFailure> {
        let mut session = self.open(url).await?;

        let result = tokio::time::timeout(
            self.attempt_timeout,
            self.resolve_and_download(document, session.as_mut()),
        )
        .await;
        session.close().await;

        let (downloaded, link) = match result {
            Ok(Ok(found)) => found,
            Ok(Err((stage, reason))) => {
                return Err(AttemptFailure {
                    url: url.to_string(),
                    stage,
                    reason,
                })
            }
            Err(_) => {
                return Err(AttemptFailure {
                    url: url.to_string(),
                    stage: AttemptStage::Download,
                    reason: self.timeout_reason(),
                })
            }
        };

        if !document.expected_format.matches_magic(&downloaded.data) {
            return Err(AttemptFailure {
                url: url.to_string(),
                stage: AttemptStage::Download,
                reason: format!(
                    "downloaded {} bytes from {} are not a {} file",
                    downloaded.data.len(),
                    link.url,
                    document.expected_format
                ),
            });
        }

        let staged = StagedFile::write(
            &self.staging_dir,
            &downloaded.data,
            downloaded.suggested_filename,
            downloaded.content_type,
        )
        .map_err(|e| AttemptFailure {
            url: url.to_string(),
            stage: AttemptStage::Stage,
            reason: e.to_string(),
        })?;

        debug!(
            "Staged {} bytes for {} at {}",
            staged.byte_size,
            document.key,
            staged.path().display()
        );
        Ok((staged, link))
    }

    async fn resolve_and_download(
        &self,
        document: &TrackedDocument,
        session: &mut dyn PageSession,
    ) -> Result<(DownloadedFile, ResolvedLink), (AttemptStage, String)> {
        let snapshot = session
            .snapshot()
            .await
            .map_err(|e| (AttemptStage::Render, e.to_string()))?;

        let link = self
            .resolver
            .resolve(document, &snapshot)
            .map_err(|e| (AttemptStage::Resolve, e.to_string()))?;
        info!(
            "Resolved {} via tier {} ('{}')",
            document.key, link.matched_tier, link.label
        );

        let downloaded = session
            .download(&link)
            .await
            .map_err(|e| (AttemptStage::Download, e.to_string()))?;
        Ok((downloaded, link))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory renderer for tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::resolver::ResolvedLink;
    use crate::scrapers::{DownloadedFile, PageRenderer, PageSession, PageSnapshot, RenderError};

    /// Serves fixed pages and files; unknown page URLs fail to render.
    #[derive(Default)]
    pub struct FakeRenderer {
        pub pages: Mutex<HashMap<String, String>>,
        pub files: Mutex<HashMap<String, Vec<u8>>>,
        pub opened: AtomicUsize,
        pub closed: std::sync::Arc<AtomicUsize>,
    }

    impl FakeRenderer {
        pub fn page(self, url: &str, html: &str) -> Self {
            self.pages
                .lock()
                .unwrap()
                .insert(url.to_string(), html.to_string());
            self
        }

        pub fn file(self, url: &str, data: &[u8]) -> Self {
            self.set_file(url, data);
            self
        }

        pub fn set_file(&self, url: &str, data: &[u8]) {
            self.files
                .lock()
                .unwrap()
                .insert(url.to_string(), data.to_vec());
        }
    }

    struct FakeSession {
        url: String,
        html: String,
        files: HashMap<String, Vec<u8>>,
        closed: std::sync::Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PageRenderer for FakeRenderer {
        async fn open(&self, url: &str) -> Result<Box<dyn PageSession>, RenderError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let html = self.pages.lock().unwrap().get(url).cloned().ok_or_else(|| {
                RenderError::Navigation {
                    url: url.to_string(),
                    reason: "net::ERR_CONNECTION_REFUSED".to_string(),
                }
            })?;
            Ok(Box::new(FakeSession {
                url: url.to_string(),
                html,
                files: self.files.lock().unwrap().clone(),
                closed: self.closed.clone(),
            }))
        }
    }

    #[async_trait]
    impl PageSession for FakeSession {
        async fn snapshot(&mut self) -> Result<PageSnapshot, RenderError> {
            Ok(PageSnapshot::new(self.url.clone(), self.html.clone()))
        }

        async fn download(&mut self, link: &ResolvedLink) -> Result<DownloadedFile, RenderError> {
            let data = self
                .files
                .get(&link.url)
                .cloned()
                .ok_or_else(|| RenderError::Download(format!("HTTP 404: {}", link.url)))?;
            Ok(DownloadedFile {
                data,
                suggested_filename: link.url.rsplit('/').next().map(str::to_string),
                content_type: None,
            })
        }

        async fn close(self: Box<Self>) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
