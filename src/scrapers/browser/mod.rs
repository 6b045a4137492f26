//! Headless Chrome page renderer.
//!
//! Uses chromiumoxide (CDP). Every [`PageRenderer::open`] call launches (or
//! attaches to) a browser for that one attempt; the session tears it down
//! again on close.

mod config;
#[cfg(feature = "browser")]
mod launch;
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
mod scripts;
#[cfg(feature = "browser")]
mod session;

pub use config::{BrowserEngineConfig, BrowserEngineType};

use std::path::PathBuf;

use async_trait::async_trait;

use super::{PageRenderer, PageSession, RenderError};

#[cfg(feature = "browser")]
use session::BrowserSession;

/// Page renderer backed by Chrome/Chromium.
pub struct BrowserRenderer {
    config: BrowserEngineConfig,
    /// Parent directory for per-session download folders.
    download_root: PathBuf,
}

impl BrowserRenderer {
    pub fn new(config: BrowserEngineConfig, download_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            download_root: download_root.into(),
        }
    }

    pub fn config(&self) -> &BrowserEngineConfig {
        &self.config
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl PageRenderer for BrowserRenderer {
    async fn open(&self, url: &str) -> Result<Box<dyn PageSession>, RenderError> {
        std::fs::create_dir_all(&self.download_root)?;
        let download_dir = tempfile::Builder::new()
            .prefix("download-")
            .tempdir_in(&self.download_root)?;

        let connection = launch::connect(&self.config).await?;
        let mut session = BrowserSession::new(connection, download_dir, self.config.clone());

        if let Err(e) = session.navigate(url).await {
            Box::new(session).close().await;
            return Err(e);
        }
        Ok(Box::new(session))
    }
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl PageRenderer for BrowserRenderer {
    async fn open(&self, _url: &str) -> Result<Box<dyn PageSession>, RenderError> {
        let _ = &self.download_root;
        Err(RenderError::Unavailable(
            "built without the `browser` feature; no page renderer is available".to_string(),
        ))
    }
}
