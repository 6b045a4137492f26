//! Command-line interface.
//!
//! Parses arguments, loads settings, and dispatches to the command modules.
//! Every command that prints results also accepts `--json`.

mod check;
mod helpers;
mod read;
mod rpc;
mod schedule;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};

use helpers::App;

#[derive(Parser)]
#[command(name = "hira")]
#[command(about = "Track and read HIRA anticancer regimen publications")]
#[command(version)]
struct Cli {
    /// Config file (TOML, YAML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (default: ~/.hira-anticancer-data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch tracked documents and record new versions
    Check {
        /// Only check this document
        #[arg(short, long)]
        key: Option<String>,
        /// Send a Telegram notification when something changed
        #[arg(long)]
        notify: bool,
        /// Send the notification even when nothing changed
        #[arg(long)]
        force_notify: bool,
        #[arg(long)]
        json: bool,
    },

    /// Fetch tracked documents even when a version is already published
    Download {
        #[arg(short, long)]
        key: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Show the current version of each tracked document
    Status {
        #[arg(long)]
        json: bool,
    },

    /// List recorded versions of a document, newest first
    History {
        key: String,
        /// Show at most this many versions
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },

    /// Delete old materialized versions and stale staging files
    Cleanup {
        #[arg(short, long)]
        key: Option<String>,
        /// Versions to keep per document (at least 1)
        #[arg(long, default_value = "1")]
        keep: usize,
        #[arg(long)]
        json: bool,
    },

    /// Read rows from a published spreadsheet
    ReadTable {
        key: String,
        /// Sheet name (default: the document's configured sheet)
        #[arg(short, long)]
        sheet: Option<String>,
        /// Keep rows whose filter column contains this text
        #[arg(short, long)]
        filter: Option<String>,
        /// Column to filter on (default: the cancer-type column)
        #[arg(long)]
        column: Option<String>,
        #[arg(long, default_value = "200")]
        max_rows: usize,
        #[arg(long)]
        json: bool,
    },

    /// Read pages from a published PDF
    ReadPdf {
        key: String,
        /// Pages to read, e.g. "1-10" or "3,7-9"
        #[arg(short, long)]
        pages: Option<String>,
        /// Only return pages containing this text
        #[arg(short, long)]
        search: Option<String>,
        /// Named section of the document
        #[arg(long)]
        section: Option<String>,
        /// Return text for table pages instead of images
        #[arg(long)]
        text_only: bool,
        /// Write rendered table pages as PNG files into this directory
        #[arg(long)]
        image_dir: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },

    /// Resolve download links without downloading
    Scan {
        #[arg(short, long)]
        key: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Manage the daily check schedule
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommands,
        #[arg(long, global = true)]
        json: bool,
    },

    /// Run scheduled checks until interrupted
    Daemon,

    /// Answer JSON requests, one per line, on stdin
    Rpc,
}

#[derive(Subcommand)]
enum ScheduleCommands {
    /// Show the schedule
    Status,
    /// Turn the daily check on
    Enable,
    /// Turn the daily check off
    Disable,
    /// Set the daily check time (KST)
    SetTime {
        /// HH:MM
        time: String,
    },
    /// Run the scheduled check immediately
    RunNow,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        data_dir: cli.data_dir,
    };
    let (settings, _config) = load_settings_with_options(options)?;
    let app = App::build(settings)?;

    match cli.command {
        Commands::Check {
            key,
            notify,
            force_notify,
            json,
        } => {
            let notify = check::NotifyMode::from_flags(notify, force_notify);
            check::cmd_check(&app, key.as_deref(), notify, json).await
        }
        Commands::Download { key, json } => check::cmd_download(&app, key.as_deref(), json).await,
        Commands::Status { json } => check::cmd_status(&app, json),
        Commands::History { key, limit, json } => check::cmd_history(&app, &key, limit, json),
        Commands::Cleanup { key, keep, json } => {
            check::cmd_cleanup(&app, key.as_deref(), keep, json).await
        }
        Commands::ReadTable {
            key,
            sheet,
            filter,
            column,
            max_rows,
            json,
        } => {
            read::cmd_read_table(
                &app,
                &key,
                read::TableArgs {
                    sheet,
                    filter,
                    column,
                    max_rows,
                },
                json,
            )
            .await
        }
        Commands::ReadPdf {
            key,
            pages,
            search,
            section,
            text_only,
            image_dir,
            json,
        } => {
            read::cmd_read_pdf(
                &app,
                &key,
                read::PdfArgs {
                    pages,
                    search,
                    section,
                    text_only,
                    image_dir,
                },
                json,
            )
            .await
        }
        Commands::Scan { key, json } => check::cmd_scan(&app, key.as_deref(), json).await,
        Commands::Schedule { command, json } => schedule::cmd_schedule(&app, command, json).await,
        Commands::Daemon => schedule::cmd_daemon(&app).await,
        Commands::Rpc => rpc::cmd_rpc(&app).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_read_pdf_flags() {
        let cli = Cli::try_parse_from([
            "hira",
            "read-pdf",
            "announcement",
            "--pages",
            "1-5",
            "--text-only",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::ReadPdf {
                key,
                pages,
                text_only,
                json,
                ..
            } => {
                assert_eq!(key, "announcement");
                assert_eq!(pages.as_deref(), Some("1-5"));
                assert!(text_only);
                assert!(json);
            }
            _ => panic!("expected read-pdf"),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from(["hira", "status", "-d", "/tmp/hira", "-v"]).unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/hira")));
        assert!(cli.verbose);
    }

    #[test]
    fn schedule_set_time_takes_hh_mm() {
        let cli = Cli::try_parse_from(["hira", "schedule", "set-time", "07:30"]).unwrap();
        match cli.command {
            Commands::Schedule {
                command: ScheduleCommands::SetTime { time },
                ..
            } => assert_eq!(time, "07:30"),
            _ => panic!("expected schedule set-time"),
        }
    }
}
