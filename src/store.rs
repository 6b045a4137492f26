//! Version store: content-addressed history plus the published file.
//!
//! Layout under the data directory:
//!
//! ```text
//! state/<key>.json            KeyRecord (history newest first + published pointer)
//! files/<key>/<stem>-<h8>.ext materialized bytes
//! staging/                    in-flight downloads
//! ```
//!
//! state/<key>.lock            advisory lock file
//!
//! Bytes are promoted into `files/` before the record is rewritten, and both
//! steps are atomic renames, so the record never points at a missing or
//! partial file. Read-compare-write for a key runs under that key's lock,
//! which is both an in-process mutex and an `flock` on the lock file, so a
//! daemon and a one-shot command sharing the data directory take turns.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use fs2::FileExt;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::fetch::StagedFile;
use crate::models::{FileFormat, FileVersion, KeyRecord};
use crate::storage::{
    ensure_dir, hash_file, mime_to_extension, sanitize_filename, split_filename,
    version_file_name, write_atomic, FILES_SUBDIR, STAGING_SUBDIR, STATE_SUBDIR,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Staged bytes for {key} changed before promotion (expected {expected}, found {actual})")]
    HashMismatchAfterTransfer {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("Published file for {key} is missing at {}", .path.display())]
    PublishedMissing { key: String, path: PathBuf },

    #[error("No version {hash} recorded for {key}")]
    UnknownVersion { key: String, hash: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt metadata record: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Whether an unchanged submission may repair missing bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    /// Regular check: unchanged content is discarded.
    IfChanged,
    /// Forced download: unchanged content re-materializes a missing published file.
    Force,
}

/// Where the submitted bytes came from.
#[derive(Debug, Clone, Default)]
pub struct Provenance {
    pub source_url: Option<String>,
    pub link_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Unchanged {
        content_hash: String,
        /// The published file was missing and has been written again.
        restored: bool,
    },
    NewVersion {
        version: FileVersion,
        previous_hash: Option<String>,
    },
}

/// What a prune removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PruneReport {
    pub key: String,
    pub deleted: Vec<String>,
    pub kept: Vec<String>,
    pub errors: Vec<String>,
}

/// One async mutex per key.
#[derive(Debug, Default)]
pub struct KeyLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

/// Held while a key's record and files are read or rewritten.
///
/// Dropping it releases the file lock, then the in-process mutex.
struct KeyGuard {
    file: File,
    _local: OwnedMutexGuard<()>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

pub struct VersionStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    locks: KeyLocks,
}

impl VersionStore {
    /// Open (and create) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let root = root.into();
        ensure_dir(&root.join(STATE_SUBDIR), "state directory")?;
        ensure_dir(&root.join(FILES_SUBDIR), "files directory")?;
        ensure_dir(&root.join(STAGING_SUBDIR), "staging directory")?;
        Ok(Self {
            root,
            clock,
            locks: KeyLocks::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_SUBDIR)
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.root
            .join(STATE_SUBDIR)
            .join(format!("{}.json", sanitize_filename(key)))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.root
            .join(STATE_SUBDIR)
            .join(format!("{}.lock", sanitize_filename(key)))
    }

    async fn lock_key(&self, key: &str, mode: LockMode) -> Result<KeyGuard, StoreError> {
        let local = self.locks.lock(key).await;
        let path = self.lock_path(key);
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&path)?;
            match mode {
                LockMode::Shared => FileExt::lock_shared(&file)?,
                LockMode::Exclusive => FileExt::lock_exclusive(&file)?,
            }
            Ok(file)
        })
        .await
        .map_err(|e| std::io::Error::other(format!("lock task failed: {}", e)))??;
        Ok(KeyGuard {
            file,
            _local: local,
        })
    }

    pub fn files_dir(&self, key: &str) -> PathBuf {
        self.root.join(FILES_SUBDIR).join(sanitize_filename(key))
    }

    /// Load the record for `key`; a key never seen before gets an empty one.
    pub fn record(&self, key: &str) -> Result<KeyRecord, StoreError> {
        let path = self.record_path(key);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(KeyRecord::new(key)),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, record: &KeyRecord) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.record_path(&record.key), &json)?;
        Ok(())
    }

    /// All versions for `key`, newest first.
    pub fn history(&self, key: &str) -> Result<Vec<FileVersion>, StoreError> {
        Ok(self.record(key)?.history)
    }

    /// Path of the published bytes, if a version has been accepted.
    pub fn published_path(&self, key: &str) -> Result<Option<PathBuf>, StoreError> {
        Ok(self
            .record(key)?
            .published
            .map(|p| self.files_dir(key).join(p.file_name)))
    }

    /// Current version and its bytes, or `None` before the first accepted
    /// version. Runs under the key's shared lock, so a concurrent promote
    /// and prune cannot delete the file between lookup and read.
    pub async fn read_published(
        &self,
        key: &str,
    ) -> Result<Option<(FileVersion, Vec<u8>)>, StoreError> {
        let _guard = self.lock_key(key, LockMode::Shared).await?;
        let record = self.record(key)?;
        let (Some(published), Some(current)) = (&record.published, record.current_version())
        else {
            return Ok(None);
        };

        let path = self.files_dir(key).join(&published.file_name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some((current.clone(), bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::PublishedMissing {
                    key: key.to_string(),
                    path,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Path of the bytes of a specific version, if still materialized.
    pub fn version_path(&self, key: &str, hash: &str) -> Result<PathBuf, StoreError> {
        let record = self.record(key)?;
        let version = record
            .history
            .iter()
            .find(|v| v.content_hash == hash || v.content_hash.starts_with(hash))
            .ok_or_else(|| StoreError::UnknownVersion {
                key: key.to_string(),
                hash: hash.to_string(),
            })?;
        Ok(self.files_dir(key).join(&version.file_name))
    }

    /// Compare staged bytes with the published version and accept them if new.
    pub async fn submit(
        &self,
        key: &str,
        format: FileFormat,
        staged: StagedFile,
        provenance: Provenance,
        mode: SubmitMode,
    ) -> Result<SubmitOutcome, StoreError> {
        let _guard = self.lock_key(key, LockMode::Exclusive).await?;
        let mut record = self.record(key)?;
        let files_dir = self.files_dir(key);

        if let Some(current) = record.current_version().cloned() {
            // Size first; only hash-compare when sizes agree.
            if current.byte_size == staged.byte_size && current.content_hash == staged.content_hash
            {
                let published = files_dir.join(&current.file_name);
                let restored = mode == SubmitMode::Force && !published.exists();
                if restored {
                    self.verify(key, &staged)?;
                    ensure_dir(&files_dir, "files directory")?;
                    staged.promote(&published)?;
                    info!("Restored missing published bytes for {}", key);
                } else {
                    debug!("{} unchanged ({})", key, current.short_hash());
                }
                return Ok(SubmitOutcome::Unchanged {
                    content_hash: current.content_hash,
                    restored,
                });
            }
        }

        self.verify(key, &staged)?;

        let file_name = match record
            .history
            .iter()
            .find(|v| v.content_hash == staged.content_hash)
        {
            Some(existing) => existing.file_name.clone(),
            None => materialized_name(key, format, &staged),
        };

        ensure_dir(&files_dir, "files directory")?;
        let content_hash = staged.content_hash.clone();
        let byte_size = staged.byte_size;
        let original_filename = staged.suggested_filename.clone();
        staged.promote(&files_dir.join(&file_name))?;

        let previous_hash = record.published.as_ref().map(|p| p.content_hash.clone());
        let version = record.accept(FileVersion {
            content_hash,
            byte_size,
            observed_at: self.clock.now(),
            file_format: format,
            file_name,
            source_url: provenance.source_url,
            link_label: provenance.link_label,
            original_filename,
        });
        self.save(&record)?;

        info!(
            "Accepted new version of {}: {} ({} bytes)",
            key,
            version.short_hash(),
            version.byte_size
        );
        Ok(SubmitOutcome::NewVersion {
            version,
            previous_hash,
        })
    }

    /// Re-hash the staged file on disk before it may be promoted.
    fn verify(&self, key: &str, staged: &StagedFile) -> Result<(), StoreError> {
        let actual = hash_file(staged.path())?;
        if actual != staged.content_hash {
            warn!("Staged bytes for {} changed on disk; refusing to promote", key);
            return Err(StoreError::HashMismatchAfterTransfer {
                key: key.to_string(),
                expected: staged.content_hash.clone(),
                actual,
            });
        }
        Ok(())
    }

    /// Delete materialized bytes of all but the `keep` newest versions.
    ///
    /// History records are never touched. The published file is always
    /// kept, and unreferenced files (from interrupted promotions) go too.
    pub async fn prune(&self, key: &str, keep: usize) -> Result<PruneReport, StoreError> {
        let _guard = self.lock_key(key, LockMode::Exclusive).await?;
        let record = self.record(key)?;

        let mut retained: HashSet<&str> = record
            .history
            .iter()
            .take(keep.max(1))
            .map(|v| v.file_name.as_str())
            .collect();
        if let Some(published) = &record.published {
            retained.insert(published.file_name.as_str());
        }

        let mut report = PruneReport {
            key: key.to_string(),
            ..Default::default()
        };

        let dir = self.files_dir(key);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if retained.contains(name.as_str()) {
                report.kept.push(name);
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => {
                    info!("Pruned {}/{}", key, name);
                    report.deleted.push(name);
                }
                Err(e) => {
                    warn!("Failed to prune {}/{}: {}", key, name, e);
                    report.errors.push(format!("{}: {}", name, e));
                }
            }
        }

        report.kept.sort();
        report.deleted.sort();
        Ok(report)
    }

    /// Remove staging entries older than `max_age` (left by killed processes).
    pub fn sweep_staging(&self, max_age: Duration) -> Result<Vec<String>, StoreError> {
        let now = SystemTime::now();
        let mut removed = Vec::new();

        for entry in std::fs::read_dir(self.staging_dir())? {
            let entry = entry?;
            let meta = entry.metadata()?;
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age < max_age {
                continue;
            }

            let path = entry.path();
            let result = if meta.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match result {
                Ok(()) => removed.push(entry.file_name().to_string_lossy().to_string()),
                Err(e) => warn!("Failed to remove stale staging entry {}: {}", path.display(), e),
            }
        }

        if !removed.is_empty() {
            info!("Removed {} stale staging entr(ies)", removed.len());
        }
        Ok(removed)
    }
}

/// `{stem}-{hash8}.{ext}`, preferring the server's filename and extension.
fn materialized_name(key: &str, format: FileFormat, staged: &StagedFile) -> String {
    let (stem, ext) = match staged.suggested_filename.as_deref() {
        Some(name) => split_filename(name),
        None => (key.to_string(), None),
    };
    let ext = ext
        .filter(|e| matches!(e.as_str(), "xlsx" | "xls" | "pdf"))
        .or_else(|| {
            staged
                .content_type
                .as_deref()
                .and_then(mime_to_extension)
                .map(str::to_string)
        })
        .unwrap_or_else(|| format.extension().to_string());
    version_file_name(&stem, &staged.content_hash, &ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use tempfile::{tempdir, TempDir};

    const KEY: &str = "항암화학요법_공고전문";

    fn store() -> (TempDir, VersionStore, Arc<ManualClock>) {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        ));
        let store = VersionStore::open(dir.path(), clock.clone()).unwrap();
        (dir, store, clock)
    }

    fn stage(store: &VersionStore, data: &[u8]) -> StagedFile {
        StagedFile::write(
            &store.staging_dir(),
            data,
            Some("공고전문.pdf".to_string()),
            None,
        )
        .unwrap()
    }

    async fn submit(store: &VersionStore, data: &[u8], mode: SubmitMode) -> SubmitOutcome {
        store
            .submit(KEY, FileFormat::Pdf, stage(store, data), Provenance::default(), mode)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn identical_bytes_are_idempotent() {
        let (_dir, store, _) = store();

        let first = submit(&store, b"%PDF-1.4 v1", SubmitMode::IfChanged).await;
        let second = submit(&store, b"%PDF-1.4 v1", SubmitMode::IfChanged).await;

        assert!(matches!(first, SubmitOutcome::NewVersion { previous_hash: None, .. }));
        assert!(matches!(second, SubmitOutcome::Unchanged { restored: false, .. }));
        assert_eq!(store.history(KEY).unwrap().len(), 1);
        assert_eq!(
            std::fs::read_dir(store.staging_dir()).unwrap().count(),
            0,
            "unchanged staged bytes are discarded"
        );
    }

    #[tokio::test]
    async fn new_content_prepends_history_and_publishes() {
        let (_dir, store, clock) = store();

        submit(&store, b"%PDF-1.4 v1", SubmitMode::IfChanged).await;
        clock.advance(chrono::Duration::days(1));
        let outcome = submit(&store, b"%PDF-1.4 v2", SubmitMode::IfChanged).await;

        let SubmitOutcome::NewVersion {
            version,
            previous_hash,
        } = outcome
        else {
            panic!("expected new version");
        };
        assert_eq!(
            previous_hash.as_deref(),
            Some(FileVersion::compute_hash(b"%PDF-1.4 v1").as_str())
        );
        assert!(version.file_name.starts_with("공고전문-"));
        assert!(version.file_name.ends_with(".pdf"));

        let history = store.history(KEY).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content_hash, version.content_hash);
        assert!(history[0].observed_at > history[1].observed_at);

        let published = store.published_path(KEY).unwrap().unwrap();
        assert_eq!(std::fs::read(published).unwrap(), b"%PDF-1.4 v2");
    }

    #[tokio::test]
    async fn crash_before_promotion_keeps_previous_version() {
        let (_dir, store, _) = store();
        submit(&store, b"%PDF-1.4 v1", SubmitMode::IfChanged).await;

        // Staged but never submitted: process died between staging and promotion.
        let staged = stage(&store, b"%PDF-1.4 v2 partial");
        drop(staged);

        let published = store.published_path(KEY).unwrap().unwrap();
        assert_eq!(std::fs::read(&published).unwrap(), b"%PDF-1.4 v1");
        assert_eq!(store.history(KEY).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn promoted_bytes_without_record_leave_pointer_intact() {
        let (_dir, store, _) = store();
        submit(&store, b"%PDF-1.4 v1", SubmitMode::IfChanged).await;

        // Bytes renamed into place but the record was never rewritten.
        let orphan = store.files_dir(KEY).join("공고전문-deadbeef.pdf");
        stage(&store, b"%PDF-1.4 v2").promote(&orphan).unwrap();

        let published = store.published_path(KEY).unwrap().unwrap();
        assert_ne!(published, orphan);
        assert_eq!(std::fs::read(&published).unwrap(), b"%PDF-1.4 v1");

        let report = store.prune(KEY, 1).await.unwrap();
        assert_eq!(report.deleted, vec!["공고전문-deadbeef.pdf".to_string()]);
        assert!(published.exists());
    }

    #[tokio::test]
    async fn tampered_staging_is_rejected() {
        let (_dir, store, _) = store();
        submit(&store, b"%PDF-1.4 v1", SubmitMode::IfChanged).await;

        let staged = stage(&store, b"%PDF-1.4 v2");
        std::fs::write(staged.path(), b"%PDF-1.4 v2 truncated").unwrap();
        let err = store
            .submit(
                KEY,
                FileFormat::Pdf,
                staged,
                Provenance::default(),
                SubmitMode::IfChanged,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::HashMismatchAfterTransfer { .. }));
        assert_eq!(store.history(KEY).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn forced_submit_restores_missing_bytes() {
        let (_dir, store, _) = store();
        submit(&store, b"%PDF-1.4 v1", SubmitMode::IfChanged).await;
        let published = store.published_path(KEY).unwrap().unwrap();
        std::fs::remove_file(&published).unwrap();

        let plain = submit(&store, b"%PDF-1.4 v1", SubmitMode::IfChanged).await;
        assert!(matches!(plain, SubmitOutcome::Unchanged { restored: false, .. }));
        assert!(!published.exists());

        let forced = submit(&store, b"%PDF-1.4 v1", SubmitMode::Force).await;
        assert!(matches!(forced, SubmitOutcome::Unchanged { restored: true, .. }));
        assert_eq!(std::fs::read(&published).unwrap(), b"%PDF-1.4 v1");
        assert_eq!(store.history(KEY).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reverted_content_reuses_original_version() {
        let (_dir, store, clock) = store();
        submit(&store, b"%PDF-1.4 v1", SubmitMode::IfChanged).await;
        clock.advance(chrono::Duration::hours(24));
        submit(&store, b"%PDF-1.4 v2", SubmitMode::IfChanged).await;
        clock.advance(chrono::Duration::hours(24));
        let outcome = submit(&store, b"%PDF-1.4 v1", SubmitMode::IfChanged).await;

        assert!(outcome_is_new(&outcome));
        let history = store.history(KEY).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(
            history[0].content_hash,
            FileVersion::compute_hash(b"%PDF-1.4 v1")
        );
        assert_eq!(history[0].observed_at, clock.now());
        assert!(history[0].observed_at > history[1].observed_at);
    }

    fn outcome_is_new(outcome: &SubmitOutcome) -> bool {
        matches!(outcome, SubmitOutcome::NewVersion { .. })
    }

    #[tokio::test]
    async fn prune_keeps_history_records() {
        let (_dir, store, _) = store();
        submit(&store, b"%PDF-1.4 v1", SubmitMode::IfChanged).await;
        submit(&store, b"%PDF-1.4 v2", SubmitMode::IfChanged).await;
        submit(&store, b"%PDF-1.4 v3", SubmitMode::IfChanged).await;

        let report = store.prune(KEY, 1).await.unwrap();

        assert_eq!(report.deleted.len(), 2);
        assert_eq!(report.kept.len(), 1);
        assert_eq!(store.history(KEY).unwrap().len(), 3);
        let published = store.published_path(KEY).unwrap().unwrap();
        assert_eq!(std::fs::read(published).unwrap(), b"%PDF-1.4 v3");
    }

    #[tokio::test]
    async fn prune_zero_still_keeps_published() {
        let (_dir, store, _) = store();
        submit(&store, b"%PDF-1.4 v1", SubmitMode::IfChanged).await;

        let report = store.prune(KEY, 0).await.unwrap();
        assert!(report.deleted.is_empty());
        assert!(store.published_path(KEY).unwrap().unwrap().exists());
    }

    #[tokio::test]
    async fn concurrent_submits_for_one_key_serialize() {
        let (_dir, store, _) = store();
        let store = Arc::new(store);

        let a = {
            let store = store.clone();
            let staged = stage(&store, b"%PDF-1.4 same");
            tokio::spawn(async move {
                store
                    .submit(KEY, FileFormat::Pdf, staged, Provenance::default(), SubmitMode::IfChanged)
                    .await
                    .unwrap()
            })
        };
        let b = {
            let store = store.clone();
            let staged = stage(&store, b"%PDF-1.4 same");
            tokio::spawn(async move {
                store
                    .submit(KEY, FileFormat::Pdf, staged, Provenance::default(), SubmitMode::IfChanged)
                    .await
                    .unwrap()
            })
        };

        let outcomes = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(outcomes.iter().filter(|o| outcome_is_new(o)).count(), 1);
        assert_eq!(store.history(KEY).unwrap().len(), 1);
    }

    /// Two stores on one root stand in for a daemon and a one-shot command.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn separate_store_instances_do_not_lose_versions() {
        let (dir, first, clock) = store();
        let first = Arc::new(first);
        let second = Arc::new(VersionStore::open(dir.path(), clock).unwrap());

        let writer = |store: Arc<VersionStore>, tag: &'static str| {
            tokio::spawn(async move {
                for i in 0..20 {
                    let data = format!("%PDF-1.4 {} {}", tag, i);
                    let staged = stage(&store, data.as_bytes());
                    let outcome = store
                        .submit(KEY, FileFormat::Pdf, staged, Provenance::default(), SubmitMode::IfChanged)
                        .await
                        .unwrap();
                    assert!(outcome_is_new(&outcome));
                }
            })
        };

        let a = writer(first.clone(), "a");
        let b = writer(second.clone(), "b");
        a.await.unwrap();
        b.await.unwrap();

        assert_eq!(first.history(KEY).unwrap().len(), 40);
        assert_eq!(second.history(KEY).unwrap().len(), 40);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reads_never_see_a_pruned_published_file() {
        let (dir, writer, clock) = store();
        submit(&writer, b"%PDF-1.4 v0", SubmitMode::IfChanged).await;
        let writer = Arc::new(writer);
        let reader = Arc::new(VersionStore::open(dir.path(), clock).unwrap());

        let churn = {
            let writer = writer.clone();
            tokio::spawn(async move {
                for i in 1..=30 {
                    let data = format!("%PDF-1.4 v{}", i);
                    submit(&writer, data.as_bytes(), SubmitMode::IfChanged).await;
                    writer.prune(KEY, 1).await.unwrap();
                }
            })
        };

        for _ in 0..200 {
            let (version, bytes) = reader.read_published(KEY).await.unwrap().unwrap();
            assert_eq!(FileVersion::compute_hash(&bytes), version.content_hash);
            tokio::task::yield_now().await;
        }
        churn.await.unwrap();
    }

    #[tokio::test]
    async fn read_published_reports_missing_bytes() {
        let (_dir, store, _) = store();
        assert!(store.read_published(KEY).await.unwrap().is_none());

        submit(&store, b"%PDF-1.4 v1", SubmitMode::IfChanged).await;
        let path = store.published_path(KEY).unwrap().unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(
            store.read_published(KEY).await,
            Err(StoreError::PublishedMissing { .. })
        ));
    }

    #[test]
    fn stale_staging_entries_are_swept() {
        let (_dir, store, _) = store();
        std::fs::write(store.staging_dir().join("fetch-old.part"), b"x").unwrap();
        std::fs::create_dir(store.staging_dir().join("download-old")).unwrap();

        let removed = store.sweep_staging(Duration::ZERO).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(std::fs::read_dir(store.staging_dir()).unwrap().count(), 0);
    }

    #[test]
    fn unknown_key_has_empty_record() {
        let (_dir, store, _) = store();
        let record = store.record("missing").unwrap();
        assert!(record.history.is_empty());
        assert!(store.published_path("missing").unwrap().is_none());
        assert!(matches!(
            store.version_path("missing", "abc"),
            Err(StoreError::UnknownVersion { .. })
        ));
    }
}
