//! Version history models.
//!
//! Versions are content-addressed: a version is identified by the SHA-256
//! of its bytes, so re-fetching identical content never creates a new one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::FileFormat;

/// One distinct content observed for a tracked document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
    /// SHA-256 hash of the content, hex encoded.
    pub content_hash: String,
    /// Size in bytes.
    pub byte_size: u64,
    /// When this content was first accepted.
    pub observed_at: DateTime<Utc>,
    pub file_format: FileFormat,
    /// Materialized filename under the document's files directory.
    pub file_name: String,
    /// Page the download link was found on.
    #[serde(default)]
    pub source_url: Option<String>,
    /// Label of the link element that was followed.
    #[serde(default)]
    pub link_label: Option<String>,
    /// Filename suggested by the server, if any.
    #[serde(default)]
    pub original_filename: Option<String>,
}

impl FileVersion {
    /// Compute SHA-256 hash of content.
    pub fn compute_hash(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hex::encode(hasher.finalize())
    }

    /// Abbreviated hash for display.
    pub fn short_hash(&self) -> &str {
        &self.content_hash[..self.content_hash.len().min(16)]
    }
}

/// Pointer to the currently published version of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedFile {
    pub content_hash: String,
    /// Filename relative to the document's files directory.
    pub file_name: String,
}

/// Durable metadata for one tracked key: history plus current pointer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub key: String,
    #[serde(default)]
    pub published: Option<PublishedFile>,
    /// All accepted versions, newest first.
    #[serde(default)]
    pub history: Vec<FileVersion>,
}

impl KeyRecord {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            published: None,
            history: Vec::new(),
        }
    }

    /// Version the published pointer refers to.
    pub fn current_version(&self) -> Option<&FileVersion> {
        let published = self.published.as_ref()?;
        self.history
            .iter()
            .find(|v| v.content_hash == published.content_hash)
    }

    /// Record a newly accepted version and point the published file at it.
    ///
    /// A hash already present in history is moved to the front instead of
    /// being duplicated, keeping hashes unique within the key. It takes the
    /// new observation time so history stays newest first by timestamp.
    pub fn accept(&mut self, version: FileVersion) -> FileVersion {
        let accepted = match self
            .history
            .iter()
            .position(|v| v.content_hash == version.content_hash)
        {
            Some(idx) => {
                let mut seen_again = self.history.remove(idx);
                seen_again.observed_at = version.observed_at;
                seen_again.source_url = version.source_url.or(seen_again.source_url);
                seen_again.link_label = version.link_label.or(seen_again.link_label);
                seen_again
            }
            None => version,
        };

        self.published = Some(PublishedFile {
            content_hash: accepted.content_hash.clone(),
            file_name: accepted.file_name.clone(),
        });
        self.history.insert(0, accepted.clone());
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn version(content: &[u8], name: &str) -> FileVersion {
        FileVersion {
            content_hash: FileVersion::compute_hash(content),
            byte_size: content.len() as u64,
            observed_at: Utc::now(),
            file_format: FileFormat::Pdf,
            file_name: name.to_string(),
            source_url: None,
            link_label: None,
            original_filename: None,
        }
    }

    #[test]
    fn test_compute_hash() {
        let hash = FileVersion::compute_hash(b"Hello, World!");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, FileVersion::compute_hash(b"Hello, World!"));
    }

    #[test]
    fn accept_prepends_and_publishes() {
        let mut record = KeyRecord::new("doc");
        record.accept(version(b"v1", "a.pdf"));
        record.accept(version(b"v2", "b.pdf"));

        assert_eq!(record.history.len(), 2);
        assert_eq!(record.history[0].file_name, "b.pdf");
        assert_eq!(record.current_version().unwrap().file_name, "b.pdf");
    }

    #[test]
    fn accept_keeps_hashes_unique() {
        let day = |d| Utc.with_ymd_and_hms(2024, 5, d, 0, 0, 0).unwrap();
        let at = |content: &[u8], name: &str, d| FileVersion {
            observed_at: day(d),
            ..version(content, name)
        };

        let mut record = KeyRecord::new("doc");
        record.accept(at(b"v1", "a.pdf", 1));
        record.accept(at(b"v2", "b.pdf", 2));
        let reverted = record.accept(at(b"v1", "c.pdf", 3));

        assert_eq!(record.history.len(), 2);
        assert_eq!(reverted.observed_at, day(3));
        assert!(record.history[0].observed_at > record.history[1].observed_at);
        assert_eq!(reverted.file_name, "a.pdf");
        assert_eq!(record.published.as_ref().unwrap().file_name, "a.pdf");
    }
}
