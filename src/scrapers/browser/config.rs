//! `[browser]` section of the settings file.

use serde::{Deserialize, Serialize};

/// How board pages are rendered and downloads captured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserEngineConfig {
    /// Whether automation markers are hidden from the site.
    #[serde(default)]
    pub engine: BrowserEngineType,

    /// Set to false to watch the page while debugging link resolution.
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Passed to Chrome as `--proxy-server`.
    #[serde(default)]
    pub proxy: Option<String>,

    /// Seconds allowed for CDP requests and the page reaching `complete`.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Seconds to wait for a click-triggered download to land on disk.
    #[serde(default = "default_download_timeout")]
    pub download_timeout: u64,

    /// Extra settle time after the DOM is ready, for boards that render
    /// their attachment list from script.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Wait for this CSS selector before taking a snapshot.
    #[serde(default)]
    pub wait_for_selector: Option<String>,

    /// User agent presented to the site.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Appended to the launch flags.
    #[serde(default)]
    pub chrome_args: Vec<String>,

    /// DevTools endpoint of an already running browser, `ws://host:9222`.
    /// Sessions attach to it instead of launching Chrome.
    #[serde(default)]
    pub remote_url: Option<String>,
}

impl Default for BrowserEngineConfig {
    fn default() -> Self {
        Self {
            engine: BrowserEngineType::default(),
            headless: default_headless(),
            proxy: None,
            timeout: default_timeout(),
            download_timeout: default_download_timeout(),
            settle_ms: default_settle_ms(),
            wait_for_selector: None,
            user_agent: default_user_agent(),
            chrome_args: Vec::new(),
            remote_url: None,
        }
    }
}

pub fn default_headless() -> bool {
    true
}

pub fn default_timeout() -> u64 {
    30
}

pub fn default_download_timeout() -> u64 {
    60
}

pub fn default_settle_ms() -> u64 {
    1500
}

pub fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string()
}

/// Automation fingerprint handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BrowserEngineType {
    /// Hide `navigator.webdriver` and launch without the automation flag.
    #[default]
    Stealth,

    /// Plain Chrome.
    Standard,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config: BrowserEngineConfig = toml::from_str(
            r#"
            headless = false
            remote_url = "ws://localhost:9222"
            "#,
        )
        .unwrap();
        assert!(!config.headless);
        assert_eq!(config.engine, BrowserEngineType::Stealth);
        assert_eq!(config.timeout, 30);
        assert_eq!(config.download_timeout, 60);
        assert!(config.user_agent.contains("Chrome"));
    }
}
