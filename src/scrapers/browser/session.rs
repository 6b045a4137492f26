//! One live page in a browser launched for a single fetch attempt.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::{Browser, Page};
use serde::Deserialize;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::{BrowserEngineConfig, BrowserEngineType};
use super::launch::Connection;
use super::scripts;
use crate::resolver::{ElementLocator, ResolvedLink};
use crate::scrapers::{
    filename_from_disposition, DownloadedFile, PageSession, PageSnapshot, RenderError,
};

#[derive(Debug, Deserialize)]
struct FrameCapture {
    url: String,
    html: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FetchResult {
    error: Option<String>,
    content_type: Option<String>,
    disposition: Option<String>,
    data: Option<String>,
}

pub(super) struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    /// Whether closing the session should shut the browser process down.
    owned: bool,
    page: Option<Page>,
    download_dir: TempDir,
    config: BrowserEngineConfig,
}

impl BrowserSession {
    pub(super) fn new(
        connection: Connection,
        download_dir: TempDir,
        config: BrowserEngineConfig,
    ) -> Self {
        Self {
            browser: connection.browser,
            handler: connection.handler,
            owned: connection.owned,
            page: None,
            download_dir,
            config,
        }
    }

    fn page(&self) -> Result<&Page, RenderError> {
        self.page
            .as_ref()
            .ok_or_else(|| RenderError::Unavailable("session has no open page".to_string()))
    }

    /// Open a tab, route downloads into the session folder and load `url`.
    pub(super) async fn navigate(&mut self, url: &str) -> Result<(), RenderError> {
        let nav_err = |e: &dyn std::fmt::Display| RenderError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        };

        match SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(self.download_dir.path().to_string_lossy().to_string())
            .build()
        {
            Ok(params) => {
                if let Err(e) = self.browser.execute(params).await {
                    warn!("Could not set download directory: {}", e);
                }
            }
            Err(e) => warn!("Could not build download behavior: {}", e),
        }

        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| nav_err(&e))?;
        page.execute(SetUserAgentOverrideParams::new(self.config.user_agent.clone()))
            .await
            .map_err(|e| nav_err(&e))?;
        self.page = Some(page.clone());

        info!("Navigating to {}", url);
        let nav_params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| nav_err(&e))?;
        page.execute(nav_params).await.map_err(|e| nav_err(&e))?;

        let ready_timeout = Duration::from_secs(self.config.timeout);
        let ready = page.evaluate(scripts::WAIT_FOR_READY.to_string());
        match tokio::time::timeout(ready_timeout, ready).await {
            Ok(Ok(result)) => {
                let state: String = result
                    .into_value()
                    .unwrap_or_else(|_| "unknown".to_string());
                debug!("Page ready state: {}", state);
            }
            Ok(Err(e)) => return Err(nav_err(&e)),
            Err(_) => return Err(RenderError::Timeout(self.config.timeout)),
        }

        tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;

        if self.config.engine == BrowserEngineType::Stealth {
            for script in scripts::STEALTH {
                if let Err(e) = page.evaluate(script.to_string()).await {
                    debug!("Stealth script injection skipped: {}", e);
                }
            }
        }

        if let Some(ref selector) = self.config.wait_for_selector {
            debug!("Waiting for selector: {}", selector);
            match tokio::time::timeout(ready_timeout, page.find_element(selector.as_str())).await {
                Ok(Ok(_)) => debug!("Selector found"),
                Ok(Err(e)) => warn!("Selector not found: {}", e),
                Err(_) => warn!("Timeout waiting for selector"),
            }
        }

        Ok(())
    }

    async fn fetch_in_page(&self, url: &str) -> Result<DownloadedFile, RenderError> {
        let page = self.page()?;
        info!("Fetching {} from page context", url);

        let result: FetchResult = page
            .evaluate(scripts::fetch_binary(url))
            .await
            .map_err(|e| RenderError::Download(e.to_string()))?
            .into_value()
            .map_err(|e| RenderError::Download(format!("Failed to parse fetch result: {}", e)))?;

        if let Some(error) = result.error {
            return Err(RenderError::Download(format!(
                "In-page fetch of {} failed: {}",
                url, error
            )));
        }

        let data = base64::engine::general_purpose::STANDARD
            .decode(result.data.unwrap_or_default())
            .map_err(|e| RenderError::Download(format!("Failed to decode base64 data: {}", e)))?;

        let suggested_filename = result
            .disposition
            .as_deref()
            .and_then(filename_from_disposition)
            .or_else(|| filename_from_url(url));

        info!(
            "Downloaded {} bytes, content-type: {}",
            data.len(),
            result.content_type.as_deref().unwrap_or("unknown")
        );

        Ok(DownloadedFile {
            data,
            suggested_filename,
            content_type: result.content_type,
        })
    }

    async fn click_and_wait(&self, locator: &ElementLocator) -> Result<DownloadedFile, RenderError> {
        let page = self.page()?;
        let before = list_files(self.download_dir.path()).await?;

        debug!("Clicking {} (frame {:?})", locator.css_path, locator.frame);
        let outcome: String = page
            .evaluate(scripts::click_element(locator.frame, &locator.css_path))
            .await
            .map_err(|e| RenderError::Download(e.to_string()))?
            .into_value()
            .unwrap_or_else(|_| "unknown".to_string());
        if outcome != "clicked" {
            return Err(RenderError::Download(format!(
                "Could not click download trigger: {}",
                outcome
            )));
        }

        let path = wait_for_download(
            self.download_dir.path(),
            &before,
            Duration::from_secs(self.config.download_timeout),
        )
        .await?;

        let data = tokio::fs::read(&path).await?;
        let suggested_filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string());
        info!(
            "Downloaded {} bytes via click ({})",
            data.len(),
            suggested_filename.as_deref().unwrap_or("unnamed")
        );

        Ok(DownloadedFile {
            data,
            suggested_filename,
            content_type: None,
        })
    }
}

#[async_trait]
impl PageSession for BrowserSession {
    async fn snapshot(&mut self) -> Result<PageSnapshot, RenderError> {
        let page = self.page()?;
        let nav_err = |e: chromiumoxide::error::CdpError| RenderError::Navigation {
            url: String::new(),
            reason: e.to_string(),
        };

        let url = page.url().await.map_err(nav_err)?.unwrap_or_default();
        let html = page.content().await.map_err(nav_err)?;

        let captured = page.evaluate(scripts::CAPTURE_FRAMES.to_string()).await;
        let frames: Vec<FrameCapture> = match captured {
            Ok(result) => result.into_value().unwrap_or_default(),
            Err(e) => {
                debug!("Frame capture failed: {}", e);
                Vec::new()
            }
        };
        debug!("Captured {} with {} frame(s)", url, frames.len());

        let mut snapshot = PageSnapshot::new(url, html);
        for frame in frames {
            snapshot = snapshot.with_frame(PageSnapshot::new(frame.url, frame.html));
        }
        Ok(snapshot)
    }

    async fn download(&mut self, link: &ResolvedLink) -> Result<DownloadedFile, RenderError> {
        match &link.click {
            Some(locator) => self.click_and_wait(locator).await,
            None => self.fetch_in_page(&link.url).await,
        }
    }

    async fn close(mut self: Box<Self>) {
        if let Some(page) = self.page.take() {
            let _ = page.close().await;
        }
        if self.owned {
            if let Err(e) = self.browser.close().await {
                debug!("Browser close failed: {}", e);
            }
            let _ = self.browser.wait().await;
        }
        self.handler.abort();
    }
}

async fn list_files(dir: &Path) -> Result<HashSet<PathBuf>, RenderError> {
    let mut files = HashSet::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        files.insert(entry.path());
    }
    Ok(files)
}

/// Poll `dir` until a new, fully written file appears.
///
/// Chrome writes to `*.crdownload` and renames on completion; a file is
/// considered done once its size is unchanged across two polls.
async fn wait_for_download(
    dir: &Path,
    before: &HashSet<PathBuf>,
    timeout: Duration,
) -> Result<PathBuf, RenderError> {
    let poll = Duration::from_millis(250);
    let deadline = tokio::time::Instant::now() + timeout;
    let mut last: Option<(PathBuf, u64)> = None;

    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(poll).await;

        let candidate = list_files(dir)
            .await?
            .into_iter()
            .filter(|p| !before.contains(p))
            .find(|p| p.extension().and_then(|e| e.to_str()) != Some("crdownload"));

        if let Some(path) = candidate {
            let size = tokio::fs::metadata(&path).await?.len();
            if size > 0 && last.as_ref() == Some(&(path.clone(), size)) {
                return Ok(path);
            }
            last = Some((path, size));
        }
    }

    Err(RenderError::Timeout(timeout.as_secs()))
}

fn filename_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if last.is_empty() || !last.contains('.') {
        return None;
    }
    urlencoding::decode(last).ok().map(|s| s.into_owned())
}
