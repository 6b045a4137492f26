//! Typed request/response surface over [`Monitor`] and [`Scheduler`].
//!
//! Requests arrive as JSON objects tagged by `"op"` (one per line in
//! `hira rpc`). They are validated here, so the monitor only ever sees
//! typed queries.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decode::{
    parse_page_range, DecodeError, DecodedPdf, DecodedTable, PdfQuery, RowFilter, TableQuery,
};
use crate::models::{CheckReport, FileVersion, StatusEntry};
use crate::monitor::{CleanupReport, Monitor, MonitorError, ScanEntry};
use crate::schedule::{
    parse_check_time, ScheduleCommand, ScheduleError, ScheduleReply, Scheduler,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleAction {
    Status,
    Enable,
    Disable,
    SetTime,
    RunNow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Check {
        #[serde(default)]
        key: Option<String>,
    },
    Download {
        #[serde(default)]
        key: Option<String>,
    },
    Status,
    History {
        key: String,
        #[serde(default)]
        limit: Option<usize>,
    },
    Cleanup {
        #[serde(default)]
        key: Option<String>,
        #[serde(default = "default_keep")]
        keep: usize,
    },
    ReadTable {
        key: String,
        #[serde(default)]
        sheet: Option<String>,
        #[serde(default)]
        filter: Option<String>,
        #[serde(default)]
        filter_column: Option<String>,
        #[serde(default = "crate::decode::table::default_max_rows")]
        max_rows: usize,
    },
    ReadPdf {
        key: String,
        #[serde(default)]
        page_range: Option<String>,
        #[serde(default)]
        search_term: Option<String>,
        #[serde(default)]
        section: Option<String>,
        #[serde(default)]
        text_only: bool,
    },
    Scan {
        #[serde(default)]
        key: Option<String>,
    },
    Schedule {
        action: ScheduleAction,
        /// `HH:MM`, required by `set_time`.
        #[serde(default)]
        time: Option<String>,
    },
}

fn default_keep() -> usize {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    UnknownDocument,
    NoPublishedVersion,
    Decode,
    Store,
    Schedule,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Response {
    Check {
        report: CheckReport,
    },
    Download {
        report: CheckReport,
    },
    Status {
        documents: Vec<StatusEntry>,
    },
    History {
        key: String,
        versions: Vec<FileVersion>,
    },
    Cleanup {
        report: CleanupReport,
    },
    ReadTable {
        summary: String,
        markdown: String,
        table: DecodedTable,
    },
    ReadPdf {
        pdf: DecodedPdf,
    },
    Scan {
        entries: Vec<ScanEntry>,
    },
    Schedule {
        reply: ScheduleReply,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl Response {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl From<MonitorError> for Response {
    fn from(e: MonitorError) -> Self {
        let kind = match &e {
            MonitorError::UnknownDocument { .. } => ErrorKind::UnknownDocument,
            MonitorError::NoPublishedVersion(_) | MonitorError::PublishedFileMissing { .. } => {
                ErrorKind::NoPublishedVersion
            }
            MonitorError::Decode(DecodeError::InvalidPageRange(_)) => ErrorKind::InvalidRequest,
            MonitorError::Decode(_) => ErrorKind::Decode,
            MonitorError::Store(_) | MonitorError::Io(_) => ErrorKind::Store,
            MonitorError::Task(_) => ErrorKind::Internal,
        };
        Self::error(kind, e.to_string())
    }
}

impl From<ScheduleError> for Response {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::Monitor(inner) => inner.into(),
            ScheduleError::InvalidTime { .. } | ScheduleError::InvalidTimeFormat(_) => {
                Self::error(ErrorKind::InvalidRequest, e.to_string())
            }
            other => Self::error(ErrorKind::Schedule, other.to_string()),
        }
    }
}

fn non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("'{}' must not be empty", field));
    }
    Ok(())
}

impl Request {
    /// Reject malformed parameters before anything runs.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Check { key: Some(key) }
            | Self::Download { key: Some(key) }
            | Self::Scan { key: Some(key) }
            | Self::Cleanup { key: Some(key), .. } => non_empty("key", key),
            Self::History { key, limit } => {
                non_empty("key", key)?;
                if *limit == Some(0) {
                    return Err("'limit' must be at least 1".to_string());
                }
                Ok(())
            }
            Self::ReadTable {
                key,
                filter,
                filter_column,
                max_rows,
                ..
            } => {
                non_empty("key", key)?;
                if *max_rows == 0 {
                    return Err("'max_rows' must be at least 1".to_string());
                }
                if filter_column.is_some() && filter.is_none() {
                    return Err("'filter_column' requires 'filter'".to_string());
                }
                Ok(())
            }
            Self::ReadPdf {
                key, page_range, ..
            } => {
                non_empty("key", key)?;
                if let Some(range) = page_range {
                    // Syntax only; nothing is selected against zero pages.
                    parse_page_range(range, 0).map_err(|e| e.to_string())?;
                }
                Ok(())
            }
            Self::Schedule { action, time } => match (action, time) {
                (ScheduleAction::SetTime, None) => {
                    Err("'set_time' requires 'time' (HH:MM)".to_string())
                }
                (ScheduleAction::SetTime, Some(time)) => {
                    parse_check_time(time).map(|_| ()).map_err(|e| e.to_string())
                }
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }

    fn schedule_command(
        action: ScheduleAction,
        time: Option<&str>,
    ) -> Result<ScheduleCommand, ScheduleError> {
        Ok(match action {
            ScheduleAction::Status => ScheduleCommand::Status,
            ScheduleAction::Enable => ScheduleCommand::Enable,
            ScheduleAction::Disable => ScheduleCommand::Disable,
            ScheduleAction::RunNow => ScheduleCommand::RunNow,
            ScheduleAction::SetTime => {
                let (hour, minute) = parse_check_time(time.unwrap_or_default())?;
                ScheduleCommand::SetTime { hour, minute }
            }
        })
    }
}

/// Execute one request.
pub async fn handle(
    monitor: &Monitor,
    scheduler: Option<&Scheduler>,
    request: Request,
) -> Response {
    if let Err(message) = request.validate() {
        return Response::error(ErrorKind::InvalidRequest, message);
    }
    debug!("Handling {:?}", request);

    match request {
        Request::Check { key } => match monitor.check(key.as_deref()).await {
            Ok(report) => Response::Check { report },
            Err(e) => e.into(),
        },
        Request::Download { key } => match monitor.download(key.as_deref()).await {
            Ok(report) => Response::Download { report },
            Err(e) => e.into(),
        },
        Request::Status => match monitor.status() {
            Ok(documents) => Response::Status { documents },
            Err(e) => e.into(),
        },
        Request::History { key, limit } => match monitor.list_history(&key) {
            Ok(mut versions) => {
                if let Some(limit) = limit {
                    versions.truncate(limit);
                }
                Response::History { key, versions }
            }
            Err(e) => e.into(),
        },
        Request::Cleanup { key, keep } => match monitor.cleanup(key.as_deref(), keep).await {
            Ok(report) => Response::Cleanup { report },
            Err(e) => e.into(),
        },
        Request::ReadTable {
            key,
            sheet,
            filter,
            filter_column,
            max_rows,
        } => {
            let row_filter = filter.map(|value| RowFilter {
                column: filter_column,
                value,
            });
            let query = TableQuery {
                sheet,
                filter: row_filter.clone(),
                max_rows,
            };
            match monitor.read_table(&key, query).await {
                Ok(table) => Response::ReadTable {
                    summary: table.summary(row_filter.as_ref()),
                    markdown: table.to_markdown(),
                    table,
                },
                Err(e) => e.into(),
            }
        }
        Request::ReadPdf {
            key,
            page_range,
            search_term,
            section,
            text_only,
        } => {
            let query = PdfQuery {
                page_range,
                search_term,
                section,
                text_only,
            };
            match monitor.read_pdf(&key, query).await {
                Ok(pdf) => Response::ReadPdf { pdf },
                Err(e) => e.into(),
            }
        }
        Request::Scan { key } => match monitor.scan(key.as_deref()).await {
            Ok(entries) => Response::Scan { entries },
            Err(e) => e.into(),
        },
        Request::Schedule { action, time } => {
            let Some(scheduler) = scheduler else {
                return Response::error(ErrorKind::Schedule, "scheduler not available");
            };
            let command = match Request::schedule_command(action, time.as_deref()) {
                Ok(command) => command,
                Err(e) => return e.into(),
            };
            match scheduler.apply(command).await {
                Ok(reply) => Response::Schedule { reply },
                Err(e) => e.into(),
            }
        }
    }
}

/// Parse one JSON request line, execute it and serialize the response.
pub async fn handle_line(monitor: &Monitor, scheduler: Option<&Scheduler>, line: &str) -> String {
    let response = match serde_json::from_str::<Request>(line) {
        Ok(request) => handle(monitor, scheduler, request).await,
        Err(e) => Response::error(ErrorKind::InvalidRequest, format!("bad request: {}", e)),
    };
    serde_json::to_string(&response).unwrap_or_else(|e| {
        format!(
            r#"{{"op":"error","kind":"internal","message":"{}"}}"#,
            e.to_string().replace('"', "'")
        )
    })
}
