//! Fixed-cadence job scheduler.
//!
//! Three tracks drive the periodic work of the control plane: daily
//! backup, weekly integrity, monthly DR test. The cadence grammar is
//! deliberately closed; anything a cron expression could say beyond these
//! three shapes is rejected at configuration time.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tradewind_core::{retry_with, ErrorKind, RetryError, RetryPolicy};
use tradewind_events::{ControlEvent, EventBus};
use tradewind_ports::Clock;

use crate::error::{BackupError, Result};

/// When a track fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cadence {
    /// Every day at the given UTC time.
    Daily {
        /// Hour, 0-23.
        hour: u32,
        /// Minute, 0-59.
        minute: u32,
    },
    /// Every week on the given weekday at the given UTC time.
    Weekly {
        /// Day of week.
        weekday: Weekday,
        /// Hour, 0-23.
        hour: u32,
        /// Minute, 0-59.
        minute: u32,
    },
    /// Every month on the given day at the given UTC time.
    Monthly {
        /// Day of month, 1-28 so every month has the occurrence.
        day: u32,
        /// Hour, 0-23.
        hour: u32,
        /// Minute, 0-59.
        minute: u32,
    },
}

fn check_time(hour: u32, minute: u32) -> Result<()> {
    if hour > 23 || minute > 59 {
        return Err(BackupError::InvalidArgument(format!(
            "invalid fire time {hour:02}:{minute:02}"
        )));
    }
    Ok(())
}

impl Cadence {
    /// Daily cadence.
    pub fn daily(hour: u32, minute: u32) -> Result<Self> {
        check_time(hour, minute)?;
        Ok(Cadence::Daily { hour, minute })
    }

    /// Weekly cadence.
    pub fn weekly(weekday: Weekday, hour: u32, minute: u32) -> Result<Self> {
        check_time(hour, minute)?;
        Ok(Cadence::Weekly {
            weekday,
            hour,
            minute,
        })
    }

    /// Monthly cadence. `day` is limited to 1-28 so the occurrence exists
    /// in every month.
    pub fn monthly(day: u32, hour: u32, minute: u32) -> Result<Self> {
        check_time(hour, minute)?;
        if !(1..=28).contains(&day) {
            return Err(BackupError::InvalidArgument(format!(
                "monthly fire day must be 1-28, got {day}"
            )));
        }
        Ok(Cadence::Monthly { day, hour, minute })
    }

    /// Parses `"HH:MM"`.
    pub fn parse_time(s: &str) -> Result<(u32, u32)> {
        let (h, m) = s
            .split_once(':')
            .ok_or_else(|| BackupError::InvalidArgument(format!("invalid time {s:?}")))?;
        let hour: u32 = h
            .parse()
            .map_err(|_| BackupError::InvalidArgument(format!("invalid hour in {s:?}")))?;
        let minute: u32 = m
            .parse()
            .map_err(|_| BackupError::InvalidArgument(format!("invalid minute in {s:?}")))?;
        check_time(hour, minute)?;
        Ok((hour, minute))
    }

    /// Parses a weekday name (`mon`..`sun`, full names accepted).
    pub fn parse_weekday(s: &str) -> Result<Weekday> {
        match s.to_ascii_lowercase().as_str() {
            "mon" | "monday" => Ok(Weekday::Mon),
            "tue" | "tuesday" => Ok(Weekday::Tue),
            "wed" | "wednesday" => Ok(Weekday::Wed),
            "thu" | "thursday" => Ok(Weekday::Thu),
            "fri" | "friday" => Ok(Weekday::Fri),
            "sat" | "saturday" => Ok(Weekday::Sat),
            "sun" | "sunday" => Ok(Weekday::Sun),
            other => Err(BackupError::InvalidArgument(format!(
                "unknown weekday {other:?}"
            ))),
        }
    }

    /// The first fire time strictly after `after`.
    pub fn next_fire(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Cadence::Daily { hour, minute } => {
                let mut candidate = at_time(after.date_naive(), hour, minute);
                if candidate <= after {
                    candidate += Duration::days(1);
                }
                candidate
            }
            Cadence::Weekly {
                weekday,
                hour,
                minute,
            } => {
                let mut candidate = at_time(after.date_naive(), hour, minute);
                while candidate.weekday() != weekday || candidate <= after {
                    candidate += Duration::days(1);
                }
                candidate
            }
            Cadence::Monthly { day, hour, minute } => {
                let mut year = after.year();
                let mut month = after.month();
                loop {
                    let date = NaiveDate::from_ymd_opt(year, month, day)
                        .expect("monthly day is validated to 1-28");
                    let candidate = at_time(date, hour, minute);
                    if candidate > after {
                        return candidate;
                    }
                    month += 1;
                    if month > 12 {
                        month = 1;
                        year += 1;
                    }
                }
            }
        }
    }
}

fn at_time(date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.from_utc_datetime(
        &date
            .and_hms_opt(hour, minute, 0)
            .expect("fire time is validated"),
    )
}

/// Why a scheduled job run failed.
#[derive(Debug, Clone)]
pub struct JobFailure {
    /// Taxonomy kind of the underlying error.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A job a scheduler track executes.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    /// Runs one occurrence. Cancellation is observed cooperatively.
    async fn run(&self, cancel: &CancellationToken) -> std::result::Result<(), JobFailure>;
}

/// Configuration of one scheduler track.
#[derive(Debug, Clone)]
pub struct TrackConfig {
    /// Track name, surfaced in events (`daily-backup`, ...).
    pub name: String,
    /// When the track fires.
    pub cadence: Cadence,
    /// Retry policy for recoverable job failures. Exhausted retries mark
    /// the occurrence failed without touching the next one.
    pub retry: RetryPolicy,
}

/// Outcome of one fired occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrackRunStatus {
    /// The job completed (possibly after retries).
    Completed,
    /// The job failed after exhausting its retries.
    Failed {
        /// Taxonomy kind of the final failure.
        kind: ErrorKind,
        /// Failure description.
        message: String,
    },
}

/// Record of one fired occurrence, kept in the bounded history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackExecution {
    /// Track that fired.
    pub track: String,
    /// The occurrence this firing covered.
    pub occurrence: DateTime<Utc>,
    /// When the job actually started.
    pub started_at: DateTime<Utc>,
    /// When the job finished.
    pub completed_at: DateTime<Utc>,
    /// Outcome.
    pub status: TrackRunStatus,
}

/// Aggregate counters over the retained execution history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStatistics {
    /// Occurrences retained in history.
    pub total_executions: usize,
    /// Occurrences that completed.
    pub completed: usize,
    /// Occurrences that failed after retries.
    pub failed: usize,
}

const EXECUTION_HISTORY_LIMIT: usize = 100;

/// Runs the configured tracks until shut down.
///
/// One loop per track keeps per-track concurrency at one: a long-running
/// occurrence delays, never overlaps, the next. An occurrence missed while
/// the host was suspended fires exactly once on wake because the next fire
/// time is always recomputed from the current clock reading.
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    bus: EventBus,
}

impl Scheduler {
    /// Creates a scheduler over the given clock and bus.
    pub fn new(clock: Arc<dyn Clock>, bus: EventBus) -> Self {
        Self { clock, bus }
    }

    /// Spawns one worker per track and returns the handle controlling
    /// their lifetime.
    pub fn start(&self, tracks: Vec<(TrackConfig, Arc<dyn ScheduledJob>)>) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let executions = Arc::new(tokio::sync::RwLock::new(Vec::new()));
        let mut tasks = Vec::with_capacity(tracks.len());

        for (config, job) in tracks {
            let clock = self.clock.clone();
            let bus = self.bus.clone();
            let cancel = cancel.clone();
            let executions = executions.clone();
            tasks.push(tokio::spawn(async move {
                run_track(config, job, clock, bus, executions, cancel).await;
            }));
        }

        SchedulerHandle {
            cancel,
            tasks,
            executions,
        }
    }
}

async fn run_track(
    config: TrackConfig,
    job: Arc<dyn ScheduledJob>,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    executions: Arc<tokio::sync::RwLock<Vec<TrackExecution>>>,
    cancel: CancellationToken,
) {
    info!(track = %config.name, "scheduler track started");
    loop {
        let now = clock.now();
        let occurrence = config.cadence.next_fire(now);
        if !clock.sleep_until(occurrence, &cancel).await {
            info!(track = %config.name, "scheduler track stopped");
            return;
        }

        bus.publish(ControlEvent::ScheduleFired {
            track: config.name.clone(),
            occurrence,
        });
        let started_at = clock.now();

        let outcome = retry_with(
            &config.retry,
            &cancel,
            |failure: &JobFailure| failure.kind.is_recoverable(),
            |attempt| {
                let job = job.clone();
                let cancel = cancel.clone();
                let track = config.name.clone();
                async move {
                    if attempt > 1 {
                        warn!(track = %track, attempt, "retrying scheduled job");
                    }
                    job.run(&cancel).await
                }
            },
        )
        .await;

        let status = match outcome {
            Ok(()) => {
                info!(track = %config.name, "scheduled job completed");
                TrackRunStatus::Completed
            }
            Err(RetryError::Cancelled) => {
                info!(track = %config.name, "scheduler track stopped mid-run");
                return;
            }
            Err(retry_err) => {
                let failure = retry_err.into_inner().unwrap_or(JobFailure {
                    kind: ErrorKind::Cancelled,
                    message: "cancelled".to_string(),
                });
                error!(
                    track = %config.name,
                    kind = %failure.kind,
                    error = %failure.message,
                    "scheduled job failed after retries"
                );
                bus.publish(ControlEvent::ScheduleFailed {
                    track: config.name.clone(),
                    kind: failure.kind,
                    message: failure.message.clone(),
                });
                // The next occurrence is unaffected by this failure.
                TrackRunStatus::Failed {
                    kind: failure.kind,
                    message: failure.message,
                }
            }
        };

        let mut history = executions.write().await;
        history.push(TrackExecution {
            track: config.name.clone(),
            occurrence,
            started_at,
            completed_at: clock.now(),
            status,
        });
        let overflow = history.len().saturating_sub(EXECUTION_HISTORY_LIMIT);
        if overflow > 0 {
            history.drain(..overflow);
        }
    }
}

/// Controls the lifetime of a started scheduler and exposes its
/// execution history.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    executions: Arc<tokio::sync::RwLock<Vec<TrackExecution>>>,
}

impl SchedulerHandle {
    /// Most recent executions across all tracks, oldest first.
    pub async fn recent_executions(&self, limit: usize) -> Vec<TrackExecution> {
        let history = self.executions.read().await;
        let skip = history.len().saturating_sub(limit);
        history[skip..].to_vec()
    }

    /// Aggregate counters over the retained history.
    pub async fn statistics(&self) -> SchedulerStatistics {
        let history = self.executions.read().await;
        SchedulerStatistics {
            total_executions: history.len(),
            completed: history
                .iter()
                .filter(|e| matches!(e.status, TrackRunStatus::Completed))
                .count(),
            failed: history
                .iter()
                .filter(|e| matches!(e.status, TrackRunStatus::Failed { .. }))
                .count(),
        }
    }

    /// Signals every track and waits for the loops to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[test]
    fn daily_next_fire() {
        let cadence = Cadence::daily(2, 30).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 8, 1, 1, 0, 0).unwrap();
        assert_eq!(
            cadence.next_fire(after),
            Utc.with_ymd_and_hms(2026, 8, 1, 2, 30, 0).unwrap()
        );

        // Already past today's time: tomorrow.
        let after = Utc.with_ymd_and_hms(2026, 8, 1, 3, 0, 0).unwrap();
        assert_eq!(
            cadence.next_fire(after),
            Utc.with_ymd_and_hms(2026, 8, 2, 2, 30, 0).unwrap()
        );

        // Exactly at the fire time: strictly after.
        let after = Utc.with_ymd_and_hms(2026, 8, 1, 2, 30, 0).unwrap();
        assert_eq!(
            cadence.next_fire(after),
            Utc.with_ymd_and_hms(2026, 8, 2, 2, 30, 0).unwrap()
        );
    }

    #[test]
    fn weekly_next_fire() {
        let cadence = Cadence::weekly(Weekday::Mon, 3, 0).unwrap();
        // 2026-08-01 is a Saturday.
        let after = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let next = cadence.next_fire(after);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 3, 3, 0, 0).unwrap());
        assert_eq!(next.weekday(), Weekday::Mon);
    }

    #[test]
    fn monthly_next_fire_wraps_year() {
        let cadence = Cadence::monthly(5, 4, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 12, 20, 0, 0, 0).unwrap();
        assert_eq!(
            cadence.next_fire(after),
            Utc.with_ymd_and_hms(2027, 1, 5, 4, 0, 0).unwrap()
        );
    }

    #[test]
    fn invalid_cadences_rejected() {
        assert!(Cadence::daily(24, 0).is_err());
        assert!(Cadence::daily(0, 60).is_err());
        assert!(Cadence::monthly(29, 0, 0).is_err());
        assert!(Cadence::monthly(0, 0, 0).is_err());
        assert!(Cadence::parse_time("0230").is_err());
        assert!(Cadence::parse_time("02:xx").is_err());
        assert!(Cadence::parse_weekday("someday").is_err());
    }

    /// Clock that jumps straight to every requested deadline.
    struct JumpClock {
        now: Mutex<DateTime<Utc>>,
    }

    #[async_trait]
    impl Clock for JumpClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }

        async fn sleep_until(&self, deadline: DateTime<Utc>, cancel: &CancellationToken) -> bool {
            if cancel.is_cancelled() {
                return false;
            }
            {
                let mut now = self.now.lock().unwrap();
                if deadline > *now {
                    *now = deadline;
                }
            }
            tokio::task::yield_now().await;
            !cancel.is_cancelled()
        }
    }

    struct CountingJob {
        runs: AtomicU32,
        fail_first: bool,
    }

    #[async_trait]
    impl ScheduledJob for CountingJob {
        async fn run(&self, _cancel: &CancellationToken) -> std::result::Result<(), JobFailure> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                Err(JobFailure {
                    kind: ErrorKind::Timeout,
                    message: "transient".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn track_fires_and_retries() {
        let clock = Arc::new(JumpClock {
            now: Mutex::new(Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap()),
        });
        let bus = EventBus::new(64);
        let mut events = bus.subscribe("test");

        let job = Arc::new(CountingJob {
            runs: AtomicU32::new(0),
            fail_first: true,
        });

        let scheduler = Scheduler::new(clock, bus.clone());
        let handle = scheduler.start(vec![(
            TrackConfig {
                name: "daily-backup".to_string(),
                cadence: Cadence::daily(2, 0).unwrap(),
                retry: RetryPolicy::fixed(3, std::time::Duration::from_millis(1)),
            },
            job.clone(),
        )]);

        // First firing: one failure plus the successful retry.
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while job.runs.load(Ordering::SeqCst) < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("job never retried");

        let stats = handle.statistics().await;
        let recent = handle.recent_executions(10).await;
        handle.shutdown().await;

        let mut fired = 0;
        while let Some(event) = events.try_next() {
            if matches!(event, ControlEvent::ScheduleFired { .. }) {
                fired += 1;
            }
        }
        assert!(fired >= 1);
        assert!(stats.total_executions >= stats.completed);
        assert!(recent.len() <= 10);
    }
}
