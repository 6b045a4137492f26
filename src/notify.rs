//! Check-result notifications.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::kst;
use crate::models::{CheckOutcome, CheckReport};

pub const TELEGRAM_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
pub const TELEGRAM_CHAT_ENV: &str = "TELEGRAM_CHAT_ID";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram rejected the message: {0}")]
    Rejected(String),
}

/// Delivers check reports somewhere a human will see them.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send `report`. Without `force`, reports with no new version are skipped.
    /// Returns whether a message was sent.
    async fn notify(&self, report: &CheckReport, force: bool) -> Result<bool, NotifyError>;
}

/// Telegram Bot API notifier.
pub struct TelegramNotifier {
    client: reqwest::Client,
    token: String,
    chat_id: String,
    api_base: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            token: token.into(),
            chat_id: chat_id.into(),
            api_base: "https://api.telegram.org".to_string(),
        })
    }

    /// Build from `TELEGRAM_BOT_TOKEN` / `TELEGRAM_CHAT_ID`; `None` when unset.
    pub fn from_env() -> Option<Self> {
        let token = std::env::var(TELEGRAM_TOKEN_ENV).ok().filter(|s| !s.is_empty());
        let chat_id = std::env::var(TELEGRAM_CHAT_ENV).ok().filter(|s| !s.is_empty());
        match (token, chat_id) {
            (Some(token), Some(chat_id)) => match Self::new(token, chat_id) {
                Ok(notifier) => Some(notifier),
                Err(e) => {
                    warn!("Telegram client setup failed: {}", e);
                    None
                }
            },
            _ => {
                debug!(
                    "{} / {} not set; notifications disabled",
                    TELEGRAM_TOKEN_ENV, TELEGRAM_CHAT_ENV
                );
                None
            }
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, report: &CheckReport, force: bool) -> Result<bool, NotifyError> {
        if !force && !report.has_updates() {
            info!("No updates; notification skipped");
            return Ok(false);
        }

        let text = render_message(report);
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        let response = self
            .client
            .post(&url)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text: &text,
                parse_mode: "HTML",
                disable_web_page_preview: true,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected(format!("{}: {}", status, body)));
        }
        info!("Notification sent to chat {}", self.chat_id);
        Ok(true)
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// HTML message body for a report.
pub fn render_message(report: &CheckReport) -> String {
    let when = report.checked_at.with_timezone(&kst());
    let mut lines = vec![
        if report.has_updates() {
            "<b>HIRA 항암요법 업데이트</b>".to_string()
        } else {
            "<b>HIRA 항암요법 확인 결과</b>".to_string()
        },
        format!("{} KST", when.format("%Y-%m-%d %H:%M")),
        String::new(),
    ];

    for result in &report.results {
        let key = escape_html(&result.key);
        let line = match &result.outcome {
            CheckOutcome::NewVersion { version, .. } => format!(
                "🆕 <b>{}</b>: new version <code>{}</code> ({} bytes)",
                key,
                version.short_hash(),
                version.byte_size
            ),
            CheckOutcome::Unchanged { .. } => format!("✅ {}: unchanged", key),
            CheckOutcome::FetchFailed { .. } => {
                format!("⚠️ {}: {}", key, escape_html(&result.detail))
            }
        };
        lines.push(line);
        for warning in &result.warnings {
            lines.push(format!("   └ {}", escape_html(warning)));
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CheckResult, FileFormat, FileVersion};
    use chrono::{TimeZone, Utc};

    fn report(outcomes: Vec<(&str, CheckOutcome, &str)>) -> CheckReport {
        CheckReport {
            checked_at: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            results: outcomes
                .into_iter()
                .map(|(key, outcome, detail)| CheckResult {
                    key: key.to_string(),
                    outcome,
                    detail: detail.to_string(),
                    warnings: vec![],
                })
                .collect(),
        }
    }

    #[test]
    fn message_lists_each_document() {
        let version = FileVersion {
            content_hash: "ab".repeat(32),
            byte_size: 1024,
            observed_at: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            file_format: FileFormat::Pdf,
            file_name: "a.pdf".to_string(),
            source_url: None,
            link_label: None,
            original_filename: None,
        };
        let msg = render_message(&report(vec![
            (
                "공고",
                CheckOutcome::NewVersion {
                    version,
                    previous_hash: None,
                },
                "",
            ),
            (
                "regimens",
                CheckOutcome::FetchFailed { reasons: vec![] },
                "render <timeout>",
            ),
        ]));

        assert!(msg.starts_with("<b>HIRA 항암요법 업데이트</b>"));
        assert!(msg.contains("2024-05-01 09:00 KST"));
        assert!(msg.contains("<code>abababababababab</code>"));
        assert!(msg.contains("render &lt;timeout&gt;"));
    }

    #[tokio::test]
    async fn unchanged_report_is_not_sent_unless_forced() {
        // Unroutable base: a send attempt would fail, a skip returns Ok(false).
        let notifier = TelegramNotifier::new("t", "c")
            .unwrap()
            .with_api_base("http://127.0.0.1:9");
        let quiet = report(vec![(
            "regimens",
            CheckOutcome::Unchanged {
                content_hash: "x".to_string(),
            },
            "unchanged",
        )]);
        assert!(!notifier.notify(&quiet, false).await.unwrap());
        assert!(notifier.notify(&quiet, true).await.is_err());
    }
}
