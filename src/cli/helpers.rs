//! Shared helpers for CLI commands.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::clock::{kst, Clock, SystemClock};
use crate::config::Settings;
use crate::decode::PdfDecoder;
use crate::fetch::Fetcher;
use crate::monitor::Monitor;
use crate::notify::{Notifier, TelegramNotifier};
use crate::schedule::{ScheduleStore, Scheduler};
use crate::scrapers::BrowserRenderer;
use crate::store::VersionStore;

/// Everything a command needs, wired from settings.
pub struct App {
    pub settings: Settings,
    pub monitor: Arc<Monitor>,
    pub scheduler: Scheduler,
    pub notifier: Option<Arc<dyn Notifier>>,
}

impl App {
    pub fn build(settings: Settings) -> anyhow::Result<Self> {
        settings.ensure_directories()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(VersionStore::open(&settings.data_dir, clock.clone())?);

        let renderer = Arc::new(BrowserRenderer::new(
            settings.browser.clone(),
            store.staging_dir(),
        ));
        let fetcher = Fetcher::new(
            renderer,
            store.staging_dir(),
            Duration::from_secs(settings.attempt_timeout),
        );

        let monitor = Arc::new(
            Monitor::new(settings.documents.clone(), fetcher, store, clock.clone())
                .with_pdf_decoder(PdfDecoder::new(settings.pdf.clone()))
                .with_retention(settings.retain_versions)
                .with_staging_max_age(Duration::from_secs(settings.staging_max_age_secs)),
        );

        let notifier: Option<Arc<dyn Notifier>> =
            TelegramNotifier::from_env().map(|n| Arc::new(n) as Arc<dyn Notifier>);
        let scheduler = Scheduler::new(ScheduleStore::new(&settings.data_dir), monitor.clone(), clock)
            .with_notifier(notifier.clone());

        Ok(Self {
            settings,
            monitor,
            scheduler,
            notifier,
        })
    }
}

/// Print `value` as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Format bytes as human-readable size.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// `2024-05-01 09:00 KST`.
pub fn format_kst(at: chrono::DateTime<chrono::Utc>) -> String {
    at.with_timezone(&kst()).format("%Y-%m-%d %H:%M KST").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_format_kst() {
        let at = chrono::Utc.with_ymd_and_hms(2024, 4, 30, 15, 5, 0).unwrap();
        assert_eq!(format_kst(at), "2024-05-01 00:05 KST");
    }
}
