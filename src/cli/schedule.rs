//! schedule and daemon commands.

use console::style;

use super::helpers::{print_json, App};
use super::ScheduleCommands;
use crate::schedule::{parse_check_time, ScheduleCommand, ScheduleReply};

impl ScheduleCommands {
    fn into_command(self) -> anyhow::Result<ScheduleCommand> {
        Ok(match self {
            Self::Status => ScheduleCommand::Status,
            Self::Enable => ScheduleCommand::Enable,
            Self::Disable => ScheduleCommand::Disable,
            Self::SetTime { time } => {
                let (hour, minute) = parse_check_time(&time)?;
                ScheduleCommand::SetTime { hour, minute }
            }
            Self::RunNow => ScheduleCommand::RunNow,
        })
    }
}

pub async fn cmd_schedule(app: &App, command: ScheduleCommands, json: bool) -> anyhow::Result<()> {
    let reply = app.scheduler.apply(command.into_command()?).await?;
    if json {
        return print_json(&reply);
    }
    print_reply(&reply);
    Ok(())
}

fn print_reply(reply: &ScheduleReply) {
    let status = &reply.status;
    println!("\n{}", style("Schedule").bold());
    println!("{}", "-".repeat(40));
    println!(
        "{:<12} {}",
        "State:",
        if status.enabled {
            style("enabled").green()
        } else {
            style("disabled").dim()
        }
    );
    println!("{:<12} {} {}", "Time:", status.check_time, status.timezone);
    if let Some(next) = status.next_run {
        println!("{:<12} {}", "Next run:", next.format("%Y-%m-%d %H:%M"));
    }
    match status.last_run {
        Some(last) => println!("{:<12} {}", "Last run:", last.format("%Y-%m-%d %H:%M")),
        None => println!("{:<12} {}", "Last run:", style("never").dim()),
    }
    println!("{:<12} {}", "Notify:", if status.notify { "yes" } else { "no" });

    if let Some(report) = &reply.report {
        let updated = report.updated_keys();
        let failed = report
            .results
            .iter()
            .filter(|r| r.outcome.is_failure())
            .count();
        println!();
        println!(
            "Checked {} document(s): {} new, {} failed",
            report.results.len(),
            style(updated.len()).green(),
            if failed > 0 {
                style(failed).red()
            } else {
                style(failed).dim()
            }
        );
    }
}

/// Run the scheduler until Ctrl-C.
pub async fn cmd_daemon(app: &App) -> anyhow::Result<()> {
    let status = app.scheduler.status()?;
    if !status.enabled {
        eprintln!(
            "{} Schedule is disabled; run `hira schedule enable` to start daily checks",
            style("!").yellow()
        );
    }
    if app.notifier.is_none() {
        tracing::info!("Telegram credentials not set; scheduled checks will not notify");
    }

    println!(
        "{} Watching {} document(s), daily check at {} {}",
        style("→").cyan(),
        app.monitor.documents().len(),
        status.check_time,
        status.timezone
    );

    app.scheduler
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}
