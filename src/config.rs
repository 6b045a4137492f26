//! Configuration management.
//!
//! A config file is optional; without one the two HIRA anticancer documents
//! are tracked with default settings. Discovery order:
//!
//! 1. `--config <path>`
//! 2. `$HIRA_CONFIG`
//! 3. `<data_dir>/hirawatch.toml`
//! 4. built-in defaults

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decode::PdfPolicy;
use crate::models::TrackedDocument;
use crate::scrapers::BrowserEngineConfig;

pub const CONFIG_ENV: &str = "HIRA_CONFIG";
pub const DATA_DIR_ENV: &str = "HIRA_DATA_DIR";
pub const CONFIG_FILENAME: &str = "hirawatch.toml";
const DEFAULT_DATA_DIRNAME: &str = ".hira-anticancer-data";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {format} config {path}: {message}")]
    Parse {
        path: PathBuf,
        format: &'static str,
        message: String,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Per-source-URL attempt timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_timeout: Option<u64>,
    /// Materialized versions kept per document after a new one arrives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain_versions: Option<usize>,
    /// Staging files older than this are swept by cleanup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_max_age_secs: Option<u64>,
    #[serde(default)]
    pub browser: BrowserEngineConfig,
    #[serde(default)]
    pub pdf: PdfPolicy,
    /// Tracked documents. Empty means the HIRA defaults.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<TrackedDocument>,
    /// Path this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a specific file path.
    /// TOML, YAML or JSON, chosen by extension (JSON when unknown).
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let parse_err = |format: &'static str, message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            format,
            message,
        };

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents).map_err(|e| parse_err("TOML", e.to_string()))?,
            "yaml" | "yml" => {
                serde_yaml::from_str(&contents).map_err(|e| parse_err("YAML", e.to_string()))?
            }
            _ => serde_json::from_str(&contents).map_err(|e| parse_err("JSON", e.to_string()))?,
        };

        config.source_path = Some(path.to_path_buf());
        config.validate()?;
        Ok(config)
    }

    /// Directory relative paths in this config resolve against.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Expand `~` and resolve relative paths against `base_dir`.
    pub fn resolve_path(path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Tracked documents, falling back to the HIRA defaults.
    pub fn documents(&self) -> Vec<TrackedDocument> {
        if self.documents.is_empty() {
            TrackedDocument::hira_defaults()
        } else {
            self.documents.clone()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for doc in &self.documents {
            if doc.key.trim().is_empty() {
                return Err(ConfigError::Invalid("document with empty key".to_string()));
            }
            if !seen.insert(doc.key.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate document key '{}'",
                    doc.key
                )));
            }
            if doc.candidate_source_urls.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "document '{}' has no candidate_source_urls",
                    doc.key
                )));
            }
            for url in &doc.candidate_source_urls {
                url::Url::parse(url).map_err(|e| {
                    ConfigError::Invalid(format!("document '{}': bad URL '{}': {}", doc.key, url, e))
                })?;
            }
        }
        if self.pdf.max_pages_per_call == 0 {
            return Err(ConfigError::Invalid(
                "pdf.max_pages_per_call must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub attempt_timeout: u64,
    pub retain_versions: usize,
    pub staging_max_age_secs: u64,
    pub browser: BrowserEngineConfig,
    pub pdf: PdfPolicy,
    pub documents: Vec<TrackedDocument>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::with_data_dir(default_data_dir())
    }
}

impl Settings {
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            attempt_timeout: 120,
            retain_versions: 1,
            staging_max_age_secs: 3600,
            browser: BrowserEngineConfig::default(),
            pdf: PdfPolicy::default(),
            documents: TrackedDocument::hira_defaults(),
        }
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}

/// `~/.hira-anticancer-data`, or `./.hira-anticancer-data` without a home.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_DATA_DIRNAME)
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides discovery).
    pub config_path: Option<PathBuf>,
    /// Data directory override (`--data-dir`).
    pub data_dir: Option<PathBuf>,
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .map(|s| PathBuf::from(shellexpand::tilde(&s).as_ref()))
}

/// Find the config file to use, if any.
fn discover_config(options: &LoadOptions, data_dir: &Path) -> Option<PathBuf> {
    if let Some(path) = &options.config_path {
        return Some(path.clone());
    }
    if let Some(path) = env_path(CONFIG_ENV) {
        tracing::debug!("Using config from ${}: {}", CONFIG_ENV, path.display());
        return Some(path);
    }
    let next_to_data = data_dir.join(CONFIG_FILENAME);
    next_to_data.is_file().then_some(next_to_data)
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub fn load_settings_with_options(
    options: LoadOptions,
) -> Result<(Settings, Config), ConfigError> {
    // Data dir precedence: flag > env > (config file) > default.
    let data_dir_override = options
        .data_dir
        .clone()
        .map(|d| PathBuf::from(shellexpand::tilde(&d.to_string_lossy()).as_ref()))
        .or_else(|| env_path(DATA_DIR_ENV));
    let search_dir = data_dir_override.clone().unwrap_or_else(default_data_dir);

    let config = match discover_config(&options, &search_dir) {
        Some(path) => {
            tracing::debug!("Loading config from {}", path.display());
            Config::load_from_path(&path)?
        }
        None => Config::default(),
    };

    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let data_dir = match (data_dir_override, &config.data_dir) {
        (Some(dir), _) => dir,
        (None, Some(dir)) => Config::resolve_path(dir, &base_dir),
        (None, None) => default_data_dir(),
    };

    let mut settings = Settings::with_data_dir(data_dir);
    if let Some(timeout) = config.attempt_timeout {
        settings.attempt_timeout = timeout;
    }
    if let Some(keep) = config.retain_versions {
        settings.retain_versions = keep.max(1);
    }
    if let Some(age) = config.staging_max_age_secs {
        settings.staging_max_age_secs = age;
    }
    settings.browser = config.browser.clone();
    settings.pdf = config.pdf.clone();
    settings.documents = config.documents();

    Ok((settings, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileFormat;
    use tempfile::TempDir;

    #[test]
    fn empty_config_tracks_hira_defaults() {
        let config = Config::default();
        let docs = config.documents();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].expected_format, FileFormat::Spreadsheet);
    }

    #[test]
    fn loads_toml_with_documents_and_policy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hirawatch.toml");
        std::fs::write(
            &path,
            r#"
            data_dir = "data"
            attempt_timeout = 45

            [pdf]
            max_pages_per_call = 20
            text_extractor = "lopdf"

            [pdf.classifier]
            min_rules = 12

            [[documents]]
            key = "notice"
            display_name = "Notice"
            expected_format = "pdf"
            candidate_source_urls = ["https://example.com/board"]
            "#,
        )
        .unwrap();

        let (settings, config) = load_settings_with_options(LoadOptions {
            config_path: Some(path),
            data_dir: None,
        })
        .unwrap();

        assert_eq!(settings.data_dir, dir.path().join("data"));
        assert_eq!(settings.attempt_timeout, 45);
        assert_eq!(settings.pdf.max_pages_per_call, 20);
        assert_eq!(settings.pdf.classifier.min_rules, 12);
        assert_eq!(settings.pdf.classifier.sparse_text_chars, 40);
        assert_eq!(settings.documents.len(), 1);
        assert_eq!(config.documents[0].key, "notice");
    }

    #[test]
    fn loads_yaml_and_json_by_extension() {
        let dir = TempDir::new().unwrap();
        let yaml = dir.path().join("c.yaml");
        std::fs::write(&yaml, "retain_versions: 3\n").unwrap();
        assert_eq!(Config::load_from_path(&yaml).unwrap().retain_versions, Some(3));

        let json = dir.path().join("c.json");
        std::fs::write(&json, r#"{"attempt_timeout": 10}"#).unwrap();
        assert_eq!(Config::load_from_path(&json).unwrap().attempt_timeout, Some(10));
    }

    #[test]
    fn rejects_duplicate_keys_and_bad_urls() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.toml");
        let doc = |key: &str, url: &str| {
            format!(
                "[[documents]]\nkey = \"{}\"\ndisplay_name = \"x\"\nexpected_format = \"pdf\"\ncandidate_source_urls = [\"{}\"]\n",
                key, url
            )
        };

        std::fs::write(&path, doc("a", "https://x.example") + &doc("a", "https://y.example"))
            .unwrap();
        assert!(matches!(
            Config::load_from_path(&path),
            Err(ConfigError::Invalid(_))
        ));

        std::fs::write(&path, doc("a", "not a url")).unwrap();
        assert!(matches!(
            Config::load_from_path(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn explicit_data_dir_wins_over_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.json");
        std::fs::write(&path, r#"{"data_dir": "/somewhere/else"}"#).unwrap();
        let (settings, _) = load_settings_with_options(LoadOptions {
            config_path: Some(path),
            data_dir: Some(dir.path().join("override")),
        })
        .unwrap();
        assert_eq!(settings.data_dir, dir.path().join("override"));
    }

    #[test]
    fn test_resolve_path() {
        let base = Path::new("/base");
        assert_eq!(Config::resolve_path("/abs", base), PathBuf::from("/abs"));
        assert_eq!(Config::resolve_path("rel", base), PathBuf::from("/base/rel"));
    }
}
