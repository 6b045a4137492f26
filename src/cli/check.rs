//! Check, download, status, history, cleanup and scan commands.

use console::style;

use super::helpers::{format_bytes, format_kst, print_json, App};
use crate::models::{CheckOutcome, CheckReport};
use crate::resolver::Confidence;

/// When `check` sends a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyMode {
    Off,
    OnChange,
    Always,
}

impl NotifyMode {
    pub fn from_flags(notify: bool, force: bool) -> Self {
        match (notify, force) {
            (_, true) => Self::Always,
            (true, false) => Self::OnChange,
            (false, false) => Self::Off,
        }
    }
}

pub async fn cmd_check(
    app: &App,
    key: Option<&str>,
    notify: NotifyMode,
    json: bool,
) -> anyhow::Result<()> {
    let report = app.monitor.check(key).await?;

    if notify != NotifyMode::Off {
        match &app.notifier {
            Some(notifier) => {
                if let Err(e) = notifier.notify(&report, notify == NotifyMode::Always).await {
                    eprintln!("{} Notification failed: {}", style("!").yellow(), e);
                }
            }
            None => eprintln!(
                "{} --notify given but TELEGRAM_BOT_TOKEN / TELEGRAM_CHAT_ID are not set",
                style("!").yellow()
            ),
        }
    }

    if json {
        return print_json(&report);
    }
    print_report(&report);
    Ok(())
}

pub async fn cmd_download(app: &App, key: Option<&str>, json: bool) -> anyhow::Result<()> {
    let report = app.monitor.download(key).await?;
    if json {
        return print_json(&report);
    }
    print_report(&report);
    Ok(())
}

fn print_report(report: &CheckReport) {
    println!(
        "\n{} {}",
        style("Check").bold(),
        style(format_kst(report.checked_at)).dim()
    );
    println!("{}", "-".repeat(60));

    for result in &report.results {
        match &result.outcome {
            CheckOutcome::NewVersion { version, .. } => println!(
                "{} {:<20} new version {} ({})",
                style("+").green().bold(),
                result.key,
                style(version.short_hash()).cyan(),
                format_bytes(version.byte_size)
            ),
            CheckOutcome::Unchanged { content_hash } => println!(
                "{} {:<20} {} {}",
                style("=").dim(),
                result.key,
                result.detail,
                style(&content_hash[..content_hash.len().min(16)]).dim()
            ),
            CheckOutcome::FetchFailed { reasons } => {
                println!(
                    "{} {:<20} {}",
                    style("x").red().bold(),
                    result.key,
                    style(&result.detail).red()
                );
                for reason in reasons {
                    println!("    {}", style(reason).dim());
                }
            }
        }
        for warning in &result.warnings {
            println!("    {} {}", style("warning:").yellow(), warning);
        }
    }

    let updated = report.updated_keys();
    println!();
    if updated.is_empty() {
        println!("{}", style("No new versions").dim());
    } else {
        println!(
            "{} new version(s): {}",
            style(updated.len()).green().bold(),
            updated.join(", ")
        );
    }
}

pub fn cmd_status(app: &App, json: bool) -> anyhow::Result<()> {
    let entries = app.monitor.status()?;
    if json {
        return print_json(&entries);
    }

    println!("\n{}", style("Tracked documents").bold());
    println!("{}", "-".repeat(60));
    println!("{:<20} {}", "Data dir:", app.settings.data_dir.display());
    println!();

    for entry in &entries {
        println!("{} ({})", style(&entry.display_name).cyan(), entry.key);
        match (&entry.current_version_hash, entry.observed_at) {
            (Some(hash), Some(at)) => {
                println!("  {:<16} {}", "Version:", &hash[..hash.len().min(16)]);
                println!("  {:<16} {}", "Observed:", format_kst(at));
                if let Some(size) = entry.byte_size {
                    println!("  {:<16} {}", "Size:", format_bytes(size));
                }
                println!("  {:<16} {}", "History:", entry.history_length);
                if !entry.materialized {
                    println!(
                        "  {}",
                        style("published file missing; run download to restore").yellow()
                    );
                }
            }
            _ => println!("  {}", style("never downloaded").dim()),
        }
        println!();
    }
    Ok(())
}

pub fn cmd_history(app: &App, key: &str, limit: Option<usize>, json: bool) -> anyhow::Result<()> {
    let mut history = app.monitor.list_history(key)?;
    if let Some(limit) = limit {
        history.truncate(limit);
    }
    if json {
        return print_json(&history);
    }

    if history.is_empty() {
        println!("{} No versions recorded for {}", style("!").yellow(), key);
        return Ok(());
    }

    println!("\n{} {}", style("History").bold(), key);
    println!("{}", "-".repeat(60));
    for version in &history {
        println!(
            "{}  {}  {:>10}  {}",
            style(version.short_hash()).cyan(),
            format_kst(version.observed_at),
            format_bytes(version.byte_size),
            version.link_label.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

pub async fn cmd_cleanup(
    app: &App,
    key: Option<&str>,
    keep: usize,
    json: bool,
) -> anyhow::Result<()> {
    let report = app.monitor.cleanup(key, keep).await?;
    if json {
        return print_json(&report);
    }

    for pruned in &report.pruned {
        println!(
            "{} {}: deleted {}, kept {}",
            style("✓").green(),
            pruned.key,
            pruned.deleted.len(),
            pruned.kept.len()
        );
        for error in &pruned.errors {
            println!("    {} {}", style("error:").red(), error);
        }
    }
    if !report.staging_removed.is_empty() {
        println!(
            "{} removed {} stale staging file(s)",
            style("✓").green(),
            report.staging_removed.len()
        );
    }
    Ok(())
}

pub async fn cmd_scan(app: &App, key: Option<&str>, json: bool) -> anyhow::Result<()> {
    let entries = app.monitor.scan(key).await?;
    if json {
        return print_json(&entries);
    }

    for entry in &entries {
        println!("{} ({})", style(&entry.display_name).cyan(), entry.key);
        match &entry.link {
            Some(link) => {
                println!("  {:<12} {}", "Label:", link.label);
                println!("  {:<12} {}", "URL:", link.url);
                println!("  {:<12} {}", "Page:", link.source_url_used);
                let confidence = match link.confidence {
                    Confidence::High => style("high".to_string()).green(),
                    Confidence::Low => {
                        style(format!("low ({} matches)", link.match_count)).yellow()
                    }
                };
                println!("  {:<12} tier {} / {}", "Match:", link.matched_tier, confidence);
            }
            None => println!("  {}", style("no link found").red()),
        }
        for failure in &entry.failures {
            println!("  {} {}", style("-").dim(), style(failure).dim());
        }
        println!();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_implies_notify() {
        assert_eq!(NotifyMode::from_flags(false, true), NotifyMode::Always);
        assert_eq!(NotifyMode::from_flags(true, false), NotifyMode::OnChange);
        assert_eq!(NotifyMode::from_flags(false, false), NotifyMode::Off);
    }
}
