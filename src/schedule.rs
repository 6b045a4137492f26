//! Daily scheduled checks.
//!
//! The schedule is a plain config object persisted to `schedule.json` with
//! the same atomic write as version metadata. The [`Scheduler`] re-reads it
//! on every tick, so `hira schedule disable` in another process takes effect
//! without restarting the daemon.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, FixedOffset, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::{kst, Clock};
use crate::models::CheckReport;
use crate::monitor::{Monitor, MonitorError};
use crate::notify::Notifier;
use crate::storage::write_atomic;

pub const SCHEDULE_FILE: &str = "schedule.json";

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Invalid check time {hour:02}:{minute:02} (expected HH:MM, 00:00-23:59)")]
    InvalidTime { hour: u32, minute: u32 },

    #[error("Invalid check time '{0}' (expected HH:MM)")]
    InvalidTimeFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid schedule file: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Monitor(#[from] MonitorError),
}

/// Persisted schedule settings. Times are KST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_hour")]
    pub check_hour: u32,
    #[serde(default)]
    pub check_minute: u32,
    /// Send a notification after scheduled runs that found updates.
    #[serde(default = "default_true")]
    pub notify: bool,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    /// When the schedule was last enabled or retimed. Runs are only due
    /// after this instant, so enabling late in the day does not fire at once.
    #[serde(default)]
    pub armed_at: Option<DateTime<Utc>>,
}

fn default_hour() -> u32 {
    9
}

fn default_true() -> bool {
    true
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_hour: default_hour(),
            check_minute: 0,
            notify: true,
            last_run: None,
            armed_at: None,
        }
    }
}

impl ScheduleConfig {
    pub fn check_time(&self) -> String {
        format!("{:02}:{:02}", self.check_hour, self.check_minute)
    }

    /// Next due run, or `None` when disabled.
    ///
    /// An enabled schedule that has never been armed or run is due at the
    /// most recent check time, so the first tick runs it.
    pub fn next_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.enabled {
            return None;
        }
        let base = match (self.last_run, self.armed_at) {
            (Some(a), Some(b)) => a.max(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => now - chrono::Duration::days(1),
        };
        next_occurrence(base, self.check_hour, self.check_minute)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run(now).is_some_and(|next| now >= next)
    }
}

/// Parse `"HH:MM"`.
pub fn parse_check_time(s: &str) -> Result<(u32, u32), ScheduleError> {
    let invalid = || ScheduleError::InvalidTimeFormat(s.to_string());
    let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
    let hour = h.parse().map_err(|_| invalid())?;
    let minute = m.parse().map_err(|_| invalid())?;
    validate_time(hour, minute)?;
    Ok((hour, minute))
}

pub fn validate_time(hour: u32, minute: u32) -> Result<(), ScheduleError> {
    if hour > 23 || minute > 59 {
        return Err(ScheduleError::InvalidTime { hour, minute });
    }
    Ok(())
}

/// First `hour:minute` KST strictly after `after`.
fn next_occurrence(after: DateTime<Utc>, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let tz: FixedOffset = kst();
    let local = after.with_timezone(&tz);
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    let today = tz.from_local_datetime(&local.date_naive().and_time(time)).single()?;
    let next = if today > local {
        today
    } else {
        let tomorrow = local.date_naive().checked_add_days(Days::new(1))?;
        tz.from_local_datetime(&tomorrow.and_time(time)).single()?
    };
    Some(next.with_timezone(&Utc))
}

/// Reads and writes `schedule.json`.
#[derive(Debug, Clone)]
pub struct ScheduleStore {
    path: PathBuf,
}

impl ScheduleStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(SCHEDULE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saved config, or defaults when none has been saved.
    pub fn load(&self) -> Result<ScheduleConfig, ScheduleError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ScheduleConfig::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, config: &ScheduleConfig) -> Result<(), ScheduleError> {
        write_atomic(&self.path, &serde_json::to_vec_pretty(config)?)?;
        Ok(())
    }

    fn update(
        &self,
        change: impl FnOnce(&mut ScheduleConfig),
    ) -> Result<ScheduleConfig, ScheduleError> {
        let mut config = self.load()?;
        change(&mut config);
        self.save(&config)?;
        Ok(config)
    }
}

/// Schedule controls exposed to the CLI and RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScheduleCommand {
    Status,
    Enable,
    Disable,
    SetTime { hour: u32, minute: u32 },
    RunNow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleStatus {
    pub enabled: bool,
    pub check_time: String,
    pub timezone: String,
    pub next_run: Option<DateTime<FixedOffset>>,
    pub last_run: Option<DateTime<FixedOffset>>,
    pub notify: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleReply {
    pub status: ScheduleStatus,
    /// Set by `run_now`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<CheckReport>,
}

/// Runs the daily check when due.
pub struct Scheduler {
    store: ScheduleStore,
    monitor: Arc<Monitor>,
    notifier: Option<Arc<dyn Notifier>>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(store: ScheduleStore, monitor: Arc<Monitor>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            monitor,
            notifier: None,
            clock,
            poll_interval: Duration::from_secs(30),
        }
    }

    pub fn with_notifier(mut self, notifier: Option<Arc<dyn Notifier>>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn status(&self) -> Result<ScheduleStatus, ScheduleError> {
        let config = self.store.load()?;
        Ok(self.describe(&config))
    }

    fn describe(&self, config: &ScheduleConfig) -> ScheduleStatus {
        let tz = kst();
        ScheduleStatus {
            enabled: config.enabled,
            check_time: config.check_time(),
            timezone: "KST (UTC+9)".to_string(),
            next_run: config
                .next_run(self.clock.now())
                .map(|t| t.with_timezone(&tz)),
            last_run: config.last_run.map(|t| t.with_timezone(&tz)),
            notify: config.notify,
        }
    }

    pub fn enable(&self) -> Result<ScheduleStatus, ScheduleError> {
        let now = self.clock.now();
        let config = self.store.update(|c| {
            c.enabled = true;
            c.armed_at = Some(now);
        })?;
        info!("Scheduled checks enabled at {} KST", config.check_time());
        Ok(self.describe(&config))
    }

    pub fn disable(&self) -> Result<ScheduleStatus, ScheduleError> {
        let config = self.store.update(|c| c.enabled = false)?;
        info!("Scheduled checks disabled");
        Ok(self.describe(&config))
    }

    pub fn set_time(&self, hour: u32, minute: u32) -> Result<ScheduleStatus, ScheduleError> {
        validate_time(hour, minute)?;
        let now = self.clock.now();
        let config = self.store.update(|c| {
            c.check_hour = hour;
            c.check_minute = minute;
            c.armed_at = Some(now);
        })?;
        info!("Scheduled check time set to {} KST", config.check_time());
        Ok(self.describe(&config))
    }

    /// Run a check immediately and record it as the last run.
    pub async fn run_now(&self) -> Result<CheckReport, ScheduleError> {
        let report = self.monitor.check(None).await?;
        let finished = self.clock.now();
        let config = self.store.update(|c| c.last_run = Some(finished))?;

        if config.notify {
            if let Some(notifier) = &self.notifier {
                if let Err(e) = notifier.notify(&report, false).await {
                    warn!("Notification failed: {}", e);
                }
            }
        }
        Ok(report)
    }

    pub async fn apply(&self, command: ScheduleCommand) -> Result<ScheduleReply, ScheduleError> {
        let (status, report) = match command {
            ScheduleCommand::Status => (self.status()?, None),
            ScheduleCommand::Enable => (self.enable()?, None),
            ScheduleCommand::Disable => (self.disable()?, None),
            ScheduleCommand::SetTime { hour, minute } => (self.set_time(hour, minute)?, None),
            ScheduleCommand::RunNow => {
                let report = self.run_now().await?;
                (self.status()?, Some(report))
            }
        };
        Ok(ScheduleReply { status, report })
    }

    /// Reload the config and run the check if it is due.
    pub async fn tick(&self) -> Result<Option<CheckReport>, ScheduleError> {
        let config = self.store.load()?;
        let now = self.clock.now();
        if !config.is_due(now) {
            debug!("Schedule tick: nothing due (next {:?})", config.next_run(now));
            return Ok(None);
        }
        info!("Scheduled check due ({} KST), running", config.check_time());
        self.run_now().await.map(Some)
    }

    /// Tick until `shutdown` resolves.
    pub async fn run_until<F: Future<Output = ()>>(&self, shutdown: F) {
        tokio::pin!(shutdown);
        loop {
            if let Err(e) = self.tick().await {
                warn!("Scheduled check failed: {}", e);
            }

            let wait = self
                .store
                .load()
                .ok()
                .and_then(|c| c.next_run(self.clock.now()))
                .and_then(|next| (next - self.clock.now()).to_std().ok())
                .map(|until| until.min(self.poll_interval))
                .unwrap_or(self.poll_interval);

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Scheduler stopping");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}
