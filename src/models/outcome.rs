//! Per-document results reported by check and status operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::FileVersion;

/// What a check did for one tracked document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckOutcome {
    /// Fetched content matches the published version.
    Unchanged { content_hash: String },
    /// Fetched content was accepted as a new version.
    NewVersion {
        version: FileVersion,
        previous_hash: Option<String>,
    },
    /// Content could not be fetched (or could not be promoted).
    FetchFailed { reasons: Vec<String> },
}

impl CheckOutcome {
    pub fn is_new_version(&self) -> bool {
        matches!(self, Self::NewVersion { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::FetchFailed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Unchanged { .. } => "unchanged",
            Self::NewVersion { .. } => "new_version",
            Self::FetchFailed { .. } => "fetch_failed",
        }
    }
}

/// Outcome for one document, plus a human-readable detail line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub key: String,
    #[serde(flatten)]
    pub outcome: CheckOutcome,
    pub detail: String,
    /// Set when the link was resolved with low confidence.
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Results of one check cycle, in configuration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckReport {
    pub checked_at: DateTime<Utc>,
    pub results: Vec<CheckResult>,
}

impl CheckReport {
    pub fn has_updates(&self) -> bool {
        self.results.iter().any(|r| r.outcome.is_new_version())
    }

    pub fn updated_keys(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.outcome.is_new_version())
            .map(|r| r.key.as_str())
            .collect()
    }
}

/// Current state of one tracked document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub key: String,
    pub display_name: String,
    pub current_version_hash: Option<String>,
    pub observed_at: Option<DateTime<Utc>>,
    pub byte_size: Option<u64>,
    pub history_length: usize,
    /// Whether the published bytes are present on disk.
    pub materialized: bool,
}
