//! Page rendering capability used by the fetcher.
//!
//! The core only needs two things from a browser: a rendered DOM snapshot
//! of a page, and the ability to trigger a download from that same page.
//! Both happen inside one [`PageSession`] so cookies and script state set by
//! the page apply to the download.

pub mod browser;

use async_trait::async_trait;
use thiserror::Error;

pub use browser::{BrowserEngineConfig, BrowserEngineType, BrowserRenderer};

use crate::resolver::ResolvedLink;

/// Errors raised by a page renderer.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Browser unavailable: {0}")]
    Unavailable(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Rendered DOM of a page (after script execution).
#[derive(Debug, Clone, Default)]
pub struct PageSnapshot {
    /// URL the page ended up at, used to resolve relative links.
    pub url: String,
    /// Serialized HTML of the main document.
    pub html: String,
    /// Embedded sub-documents (iframes), in document order.
    pub frames: Vec<PageSnapshot>,
}

impl PageSnapshot {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
            frames: Vec::new(),
        }
    }

    pub fn with_frame(mut self, frame: PageSnapshot) -> Self {
        self.frames.push(frame);
        self
    }
}

/// Bytes obtained from a download trigger.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub data: Vec<u8>,
    /// Filename suggested by the server or browser.
    pub suggested_filename: Option<String>,
    pub content_type: Option<String>,
}

/// Opens browser sessions.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Navigate to `url` in a fresh session.
    async fn open(&self, url: &str) -> Result<Box<dyn PageSession>, RenderError>;
}

/// A live page in a browser session.
///
/// Callers must call [`PageSession::close`] on every exit path.
#[async_trait]
pub trait PageSession: Send {
    /// Capture the rendered DOM, including same-origin frames.
    async fn snapshot(&mut self) -> Result<PageSnapshot, RenderError>;

    /// Follow a resolved link and return the downloaded bytes.
    async fn download(&mut self, link: &ResolvedLink) -> Result<DownloadedFile, RenderError>;

    /// Release the session.
    async fn close(self: Box<Self>);
}

/// Extract the filename from a `Content-Disposition` header.
///
/// Prefers the RFC 5987 `filename*=` form, which is how Korean filenames
/// are usually sent.
pub fn filename_from_disposition(header: &str) -> Option<String> {
    let mut plain = None;
    for part in header.split(';').map(str::trim) {
        let Some((name, value)) = part.split_once('=') else {
            continue;
        };
        match name.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = value.trim().rsplit('\'').next().unwrap_or(value);
                if let Ok(decoded) = urlencoding::decode(encoded.trim_matches('"')) {
                    if !decoded.is_empty() {
                        return Some(decoded.into_owned());
                    }
                }
            }
            "filename" => {
                let value = value.trim().trim_matches('"');
                if !value.is_empty() {
                    plain = Some(
                        urlencoding::decode(value)
                            .map(|s| s.into_owned())
                            .unwrap_or_else(|_| value.to_string()),
                    );
                }
            }
            _ => {}
        }
    }
    plain
}
