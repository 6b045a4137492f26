//! Operations over the set of tracked documents.
//!
//! A check walks the configured documents one at a time: fetch, submit to the
//! version store, report. A failure for one document is recorded in its
//! result and the walk moves on.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::decode::{
    self, Decoded, DecodeError, DecodedPdf, DecodedTable, DocumentHints, PdfDecoder, PdfQuery,
    ReadRequest, TableQuery,
};
use crate::fetch::Fetcher;
use crate::models::{
    CheckOutcome, CheckReport, CheckResult, FileFormat, FileVersion, StatusEntry, TrackedDocument,
};
use crate::resolver::ResolvedLink;
use crate::store::{PruneReport, Provenance, StoreError, SubmitMode, SubmitOutcome, VersionStore};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Unknown document '{key}' (tracked: {})", .known.join(", "))]
    UnknownDocument { key: String, known: Vec<String> },

    #[error("No published version of '{0}' yet; run a check first")]
    NoPublishedVersion(String),

    #[error("Published file for '{key}' is missing at {path}; run a forced download")]
    PublishedFileMissing { key: String, path: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode task failed: {0}")]
    Task(String),
}

/// Result of a cleanup across one or more documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub pruned: Vec<PruneReport>,
    /// Stale staging entries removed.
    pub staging_removed: Vec<String>,
}

/// What a scan found for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanEntry {
    pub key: String,
    pub display_name: String,
    pub link: Option<ResolvedLink>,
    pub failures: Vec<String>,
}

pub struct Monitor {
    documents: Vec<TrackedDocument>,
    fetcher: Fetcher,
    store: Arc<VersionStore>,
    pdf: PdfDecoder,
    clock: Arc<dyn Clock>,
    retain_versions: usize,
    staging_max_age: Duration,
}

impl Monitor {
    pub fn new(
        documents: Vec<TrackedDocument>,
        fetcher: Fetcher,
        store: Arc<VersionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            documents,
            fetcher,
            store,
            pdf: PdfDecoder::default(),
            clock,
            retain_versions: 1,
            staging_max_age: Duration::from_secs(3600),
        }
    }

    pub fn with_pdf_decoder(mut self, pdf: PdfDecoder) -> Self {
        self.pdf = pdf;
        self
    }

    /// Materialized versions kept after a new one is accepted.
    pub fn with_retention(mut self, retain_versions: usize) -> Self {
        self.retain_versions = retain_versions.max(1);
        self
    }

    pub fn with_staging_max_age(mut self, max_age: Duration) -> Self {
        self.staging_max_age = max_age;
        self
    }

    pub fn documents(&self) -> &[TrackedDocument] {
        &self.documents
    }

    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    pub fn document(&self, key: &str) -> Result<&TrackedDocument, MonitorError> {
        self.documents
            .iter()
            .find(|d| d.key == key)
            .ok_or_else(|| MonitorError::UnknownDocument {
                key: key.to_string(),
                known: self.documents.iter().map(|d| d.key.clone()).collect(),
            })
    }

    fn select(&self, key: Option<&str>) -> Result<Vec<&TrackedDocument>, MonitorError> {
        match key {
            Some(key) => Ok(vec![self.document(key)?]),
            None => Ok(self.documents.iter().collect()),
        }
    }

    /// Fetch each selected document and keep content that changed.
    pub async fn check(&self, key: Option<&str>) -> Result<CheckReport, MonitorError> {
        self.run(key, SubmitMode::IfChanged).await
    }

    /// Like [`check`](Self::check), but also restores published bytes missing on disk.
    pub async fn download(&self, key: Option<&str>) -> Result<CheckReport, MonitorError> {
        self.run(key, SubmitMode::Force).await
    }

    async fn run(&self, key: Option<&str>, mode: SubmitMode) -> Result<CheckReport, MonitorError> {
        let documents = self.select(key)?;
        let checked_at = self.clock.now();
        let mut results = Vec::with_capacity(documents.len());

        for document in documents {
            let result = self.process(document, mode).await;
            info!("{}: {} ({})", result.key, result.outcome.label(), result.detail);
            results.push(result);
        }

        Ok(CheckReport {
            checked_at,
            results,
        })
    }

    async fn process(&self, document: &TrackedDocument, mode: SubmitMode) -> CheckResult {
        let key = document.key.clone();

        let fetched = match self.fetcher.fetch(document).await {
            Ok(fetched) => fetched,
            Err(failure) => {
                return CheckResult {
                    key,
                    detail: failure.to_string(),
                    outcome: CheckOutcome::FetchFailed {
                        reasons: failure.reasons(),
                    },
                    warnings: Vec::new(),
                }
            }
        };

        let mut warnings: Vec<String> = fetched
            .earlier_failures
            .iter()
            .map(|f| format!("skipped source: {}", f))
            .collect();
        if fetched.link.is_low_confidence() {
            warnings.push(format!(
                "low-confidence link match: tier {} matched {} elements, took '{}'",
                fetched.link.matched_tier, fetched.link.match_count, fetched.link.label
            ));
        }

        let provenance = Provenance {
            source_url: Some(fetched.link.source_url_used.clone()),
            link_label: Some(fetched.link.label.clone()),
        };
        let submitted = self
            .store
            .submit(
                &key,
                document.expected_format,
                fetched.staged,
                provenance,
                mode,
            )
            .await;

        match submitted {
            Ok(SubmitOutcome::Unchanged {
                content_hash,
                restored,
            }) => CheckResult {
                key,
                detail: if restored {
                    "published bytes restored".to_string()
                } else {
                    "unchanged".to_string()
                },
                outcome: CheckOutcome::Unchanged { content_hash },
                warnings,
            },
            Ok(SubmitOutcome::NewVersion {
                version,
                previous_hash,
            }) => {
                if let Err(e) = self.store.prune(&key, self.retain_versions).await {
                    warn!("Prune after new version of {} failed: {}", key, e);
                    warnings.push(format!("prune failed: {}", e));
                }
                CheckResult {
                    detail: format!(
                        "new version {} ({} bytes, {})",
                        version.short_hash(),
                        version.byte_size,
                        version.file_name
                    ),
                    key,
                    outcome: CheckOutcome::NewVersion {
                        version,
                        previous_hash,
                    },
                    warnings,
                }
            }
            Err(e) => {
                warn!("Submitting {} failed: {}", key, e);
                CheckResult {
                    key,
                    detail: e.to_string(),
                    outcome: CheckOutcome::FetchFailed {
                        reasons: vec![e.to_string()],
                    },
                    warnings,
                }
            }
        }
    }

    /// Current version of every tracked document, in configuration order.
    pub fn status(&self) -> Result<Vec<StatusEntry>, MonitorError> {
        self.documents
            .iter()
            .map(|document| {
                let record = self.store.record(&document.key)?;
                let current = record.current_version();
                let materialized = record
                    .published
                    .as_ref()
                    .map(|p| self.store.files_dir(&document.key).join(&p.file_name).is_file())
                    .unwrap_or(false);
                Ok(StatusEntry {
                    key: document.key.clone(),
                    display_name: document.display_name.clone(),
                    current_version_hash: current.map(|v| v.content_hash.clone()),
                    observed_at: current.map(|v| v.observed_at),
                    byte_size: current.map(|v| v.byte_size),
                    history_length: record.history.len(),
                    materialized,
                })
            })
            .collect()
    }

    /// All versions of `key`, newest first.
    pub fn list_history(&self, key: &str) -> Result<Vec<FileVersion>, MonitorError> {
        self.document(key)?;
        Ok(self.store.history(key)?)
    }

    /// Prune materialized bytes and sweep stale staging files.
    pub async fn cleanup(
        &self,
        key: Option<&str>,
        keep: usize,
    ) -> Result<CleanupReport, MonitorError> {
        let mut report = CleanupReport::default();
        for document in self.select(key)? {
            report.pruned.push(self.store.prune(&document.key, keep).await?);
        }
        report.staging_removed = self.store.sweep_staging(self.staging_max_age)?;
        Ok(report)
    }

    pub async fn read_table(
        &self,
        key: &str,
        query: TableQuery,
    ) -> Result<DecodedTable, MonitorError> {
        match self.read(key, ReadRequest::Table(query)).await? {
            Decoded::Table(table) => Ok(table),
            Decoded::Pdf(_) => Err(wrong_format(FileFormat::Spreadsheet, FileFormat::Pdf)),
        }
    }

    pub async fn read_pdf(&self, key: &str, query: PdfQuery) -> Result<DecodedPdf, MonitorError> {
        match self.read(key, ReadRequest::Pdf(query)).await? {
            Decoded::Pdf(pdf) => Ok(pdf),
            Decoded::Table(_) => Err(wrong_format(FileFormat::Pdf, FileFormat::Spreadsheet)),
        }
    }

    /// Decode the published bytes of `key`.
    pub async fn read(&self, key: &str, request: ReadRequest) -> Result<Decoded, MonitorError> {
        let document = self.document(key)?;
        let (current, bytes) = match self.store.read_published(key).await {
            Ok(Some(published)) => published,
            Ok(None) => return Err(MonitorError::NoPublishedVersion(key.to_string())),
            Err(StoreError::PublishedMissing { key, path }) => {
                return Err(MonitorError::PublishedFileMissing {
                    key,
                    path: path.display().to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let format = current.file_format;
        let default_sheet = document.default_sheet.clone();
        let sections: BTreeMap<String, Vec<String>> = document.pdf_sections.clone();
        let pdf = self.pdf.clone();

        tokio::task::spawn_blocking(move || {
            let hints = DocumentHints {
                default_sheet: default_sheet.as_deref(),
                pdf_sections: Some(&sections),
            };
            decode::decode(format, &bytes, &request, hints, &pdf)
        })
        .await
        .map_err(|e| MonitorError::Task(e.to_string()))?
        .map_err(MonitorError::from)
    }

    /// Resolve each document's link without downloading it.
    pub async fn scan(&self, key: Option<&str>) -> Result<Vec<ScanEntry>, MonitorError> {
        let mut entries = Vec::new();
        for document in self.select(key)? {
            let result = self.fetcher.scan(document).await;
            entries.push(ScanEntry {
                key: document.key.clone(),
                display_name: document.display_name.clone(),
                link: result.link,
                failures: result.attempts.iter().map(|a| a.to_string()).collect(),
            });
        }
        Ok(entries)
    }
}

fn wrong_format(expected: FileFormat, actual: FileFormat) -> MonitorError {
    MonitorError::Decode(DecodeError::WrongFormat { expected, actual })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::decode::table::fixtures::regimen_workbook;
    use crate::decode::pdf::fixtures::numbered_text_pdf;
    use crate::fetch::testing::FakeRenderer;
    use crate::models::{FileFormat, LinkLabelTiers};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    const BOARD: &str = "https://board.example/list";
    const MIRROR: &str = "https://mirror.example/list";

    fn doc(key: &str, name: &str, format: FileFormat, file_url: &str) -> (TrackedDocument, String) {
        let html = format!(
            r#"<html><body><ul><li><a href="{}">{}</a> <img src="/icons/{}.gif"></li></ul></body></html>"#,
            file_url,
            name,
            format.extension()
        );
        (
            TrackedDocument {
                key: key.to_string(),
                display_name: name.to_string(),
                expected_format: format,
                candidate_source_urls: vec![BOARD.to_string()],
                link_label_tiers: LinkLabelTiers::default(),
                default_sheet: None,
                pdf_sections: Default::default(),
            },
            html,
        )
    }

    struct Harness {
        _dir: TempDir,
        renderer: Arc<FakeRenderer>,
        monitor: Monitor,
    }

    fn harness(documents: Vec<TrackedDocument>, renderer: FakeRenderer) -> Harness {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        ));
        let store = Arc::new(VersionStore::open(dir.path(), clock.clone()).unwrap());
        let renderer = Arc::new(renderer);
        let fetcher = Fetcher::new(renderer.clone(), store.staging_dir(), Duration::from_secs(5));
        let monitor = Monitor::new(documents, fetcher, store, clock);
        Harness {
            _dir: dir,
            renderer,
            monitor,
        }
    }

    fn regimen_setup() -> (TrackedDocument, FakeRenderer) {
        let (document, html) = doc(
            "regimens",
            "허가초과 항암요법",
            FileFormat::Spreadsheet,
            "/files/regimens.xlsx",
        );
        let renderer = FakeRenderer::default()
            .page(BOARD, &html)
            .file("https://board.example/files/regimens.xlsx", &regimen_workbook());
        (document, renderer)
    }

    #[tokio::test]
    async fn check_then_read_table() {
        let (document, renderer) = regimen_setup();
        let h = harness(vec![document], renderer);

        let report = h.monitor.check(None).await.unwrap();
        assert_eq!(report.results.len(), 1);
        assert!(report.results[0].outcome.is_new_version());
        assert!(report.has_updates());

        let table = h
            .monitor
            .read_table("regimens", TableQuery::default())
            .await
            .unwrap();
        assert_eq!(table.get(1, "시트명"), Some("난소암"));

        let err = h.monitor.read_pdf("regimens", PdfQuery::default()).await;
        assert!(matches!(
            err,
            Err(MonitorError::Decode(DecodeError::WrongFormat { .. }))
        ));
    }

    #[tokio::test]
    async fn one_failing_document_does_not_stop_the_batch() {
        let (regimens, renderer) = regimen_setup();
        let (mut broken, _) = doc("broken", "공고", FileFormat::Pdf, "/x.pdf");
        broken.candidate_source_urls = vec![MIRROR.to_string()];
        let h = harness(vec![broken, regimens], renderer);

        let report = h.monitor.check(None).await.unwrap();
        let keys: Vec<_> = report.results.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["broken", "regimens"]);
        assert!(report.results[0].outcome.is_failure());
        assert!(report.results[1].outcome.is_new_version());
        assert_eq!(report.updated_keys(), vec!["regimens"]);
    }

    #[tokio::test]
    async fn read_before_any_fetch_fails() {
        let (document, renderer) = regimen_setup();
        let h = harness(vec![document], renderer);
        assert!(matches!(
            h.monitor.read_table("regimens", TableQuery::default()).await,
            Err(MonitorError::NoPublishedVersion(_))
        ));
        assert!(matches!(
            h.monitor.read_table("nope", TableQuery::default()).await,
            Err(MonitorError::UnknownDocument { .. })
        ));
    }

    #[tokio::test]
    async fn forced_download_restores_missing_bytes() {
        let (document, renderer) = regimen_setup();
        let h = harness(vec![document], renderer);
        h.monitor.check(Some("regimens")).await.unwrap();

        let path = h.monitor.store().published_path("regimens").unwrap().unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(!h.monitor.status().unwrap()[0].materialized);

        let report = h.monitor.download(Some("regimens")).await.unwrap();
        assert_eq!(report.results[0].detail, "published bytes restored");
        assert!(matches!(
            report.results[0].outcome,
            CheckOutcome::Unchanged { .. }
        ));
        assert!(path.is_file());
        assert_eq!(h.monitor.list_history("regimens").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn read_reports_deleted_published_bytes() {
        let (document, renderer) = regimen_setup();
        let h = harness(vec![document], renderer);
        h.monitor.check(Some("regimens")).await.unwrap();

        let path = h.monitor.store().published_path("regimens").unwrap().unwrap();
        std::fs::remove_file(&path).unwrap();
        let err = h
            .monitor
            .read_table("regimens", TableQuery::default())
            .await
            .unwrap_err();
        match err {
            MonitorError::PublishedFileMissing { key, path: reported } => {
                assert_eq!(key, "regimens");
                assert_eq!(reported, path.display().to_string());
            }
            other => panic!("expected missing published file, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn new_version_prunes_old_bytes_but_keeps_history() {
        let (document, html) = doc("announce", "공고내용 전문", FileFormat::Pdf, "/a.pdf");
        let file_url = "https://board.example/a.pdf";
        let renderer = FakeRenderer::default()
            .page(BOARD, &html)
            .file(file_url, &numbered_text_pdf(2));
        let h = harness(vec![document], renderer);

        h.monitor.check(None).await.unwrap();
        h.renderer.set_file(file_url, &numbered_text_pdf(3));
        let report = h.monitor.check(None).await.unwrap();
        assert!(report.results[0].outcome.is_new_version());

        let history = h.monitor.list_history("announce").unwrap();
        assert_eq!(history.len(), 2);
        let files: Vec<_> = std::fs::read_dir(h.monitor.store().files_dir("announce"))
            .unwrap()
            .collect();
        assert_eq!(files.len(), 1);

        let pdf = h
            .monitor
            .read_pdf("announce", PdfQuery::default())
            .await
            .unwrap();
        assert_eq!(pdf.total_pages, 3);
    }

    #[tokio::test]
    async fn scan_reports_link_without_downloading() {
        let (document, renderer) = regimen_setup();
        let h = harness(vec![document], renderer);

        let entries = h.monitor.scan(None).await.unwrap();
        let link = entries[0].link.as_ref().unwrap();
        assert_eq!(link.matched_tier, 1);
        assert_eq!(link.url, "https://board.example/files/regimens.xlsx");
        assert!(h.monitor.status().unwrap()[0].current_version_hash.is_none());
    }

    #[tokio::test]
    async fn cleanup_reports_per_document() {
        let (document, renderer) = regimen_setup();
        let h = harness(vec![document], renderer);
        h.monitor.check(None).await.unwrap();

        let report = h.monitor.cleanup(None, 1).await.unwrap();
        assert_eq!(report.pruned.len(), 1);
        assert_eq!(report.pruned[0].kept.len(), 1);
        assert!(report.pruned[0].deleted.is_empty());
    }
}
