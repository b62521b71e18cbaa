//! Timer tasks that turn wall-clock schedules into [`Trigger`] messages.
//!
//! The daily and weekly triggers are cron jobs evaluated in the configured
//! timezone, so they follow daylight saving time. The poll tick is a plain
//! interval. The service owns the receiving end and handles one trigger at a
//! time, so the three schedules never run their pipelines concurrently.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};

use crate::config::SchedulerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Poll interval elapsed; sync only if a match is live-windowed.
    Tick,
    /// Refill the match cache with today's fixtures.
    DailyPrime,
    /// Publish the week's notifications and standings.
    WeeklyPublish,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tick => "tick",
            Self::DailyPrime => "daily_prime",
            Self::WeeklyPublish => "weekly_publish",
        })
    }
}

/// Cron expression (with seconds) and its parsed form.
#[derive(Debug, Clone)]
struct CalendarJob {
    expression: String,
    schedule: Schedule,
}

impl CalendarJob {
    fn parse(expression: String) -> Result<Self> {
        let schedule = Schedule::from_str(&expression)
            .with_context(|| format!("Invalid cron expression: {expression}"))?;
        Ok(Self {
            expression,
            schedule,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TriggerSchedule {
    timezone: Tz,
    daily: CalendarJob,
    weekly: CalendarJob,
    poll_interval: Duration,
}

impl TriggerSchedule {
    pub fn from_config(config: &SchedulerConfig) -> Result<Self> {
        let timezone: Tz = config
            .timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("Unknown scheduler.timezone {:?}: {e}", config.timezone))?;
        if config.daily_hour > 23 {
            anyhow::bail!("scheduler.daily_hour must be 0-23");
        }
        if config.weekly_hour > 23 {
            anyhow::bail!("scheduler.weekly_hour must be 0-23");
        }
        if config.poll_interval_seconds == 0 {
            anyhow::bail!("scheduler.poll_interval_seconds must be at least 1");
        }

        Ok(Self {
            timezone,
            daily: CalendarJob::parse(format!("0 0 {} * * *", config.daily_hour))?,
            weekly: CalendarJob::parse(format!(
                "0 0 {} * * {}",
                config.weekly_hour, config.weekly_weekday
            ))?,
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
        })
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    fn job(&self, trigger: Trigger) -> Option<&CalendarJob> {
        match trigger {
            Trigger::DailyPrime => Some(&self.daily),
            Trigger::WeeklyPublish => Some(&self.weekly),
            Trigger::Tick => None,
        }
    }

    /// First fire time of a calendar trigger strictly after `after`.
    pub fn next_fire(&self, trigger: Trigger, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.job(trigger)?
            .schedule
            .after(&after.with_timezone(&self.timezone))
            .next()
            .map(|at| at.with_timezone(&Utc))
    }
}

/// Running trigger sources. Dropping this does not stop them; call [`TriggerTimers::shutdown`].
pub struct TriggerTimers {
    scheduler: JobScheduler,
    tick: JoinHandle<()>,
}

impl TriggerTimers {
    pub async fn shutdown(mut self) -> Result<()> {
        self.tick.abort();
        self.scheduler
            .shutdown()
            .await
            .context("Failed to stop trigger scheduler")
    }
}

/// Send [`Trigger::Tick`] every `poll_interval` until the receiver is dropped.
pub fn spawn_tick(poll_interval: Duration, tx: mpsc::Sender<Trigger>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            if tx.send(Trigger::Tick).await.is_err() {
                break;
            }
        }
    })
}

/// Start the daily and weekly cron jobs and the poll tick.
pub async fn spawn_triggers(
    schedule: &TriggerSchedule,
    tx: mpsc::Sender<Trigger>,
) -> Result<TriggerTimers> {
    let scheduler = JobScheduler::new()
        .await
        .context("Failed to create trigger scheduler")?;

    for trigger in [Trigger::DailyPrime, Trigger::WeeklyPublish] {
        let Some(calendar) = schedule.job(trigger) else {
            continue;
        };
        let job_tx = tx.clone();
        let job = Job::new_async_tz(
            calendar.expression.as_str(),
            schedule.timezone,
            move |_id, _scheduler| {
                let tx = job_tx.clone();
                Box::pin(async move {
                    if tx.send(trigger).await.is_err() {
                        debug!(trigger = %trigger, "Trigger channel closed");
                    }
                })
            },
        )
        .with_context(|| format!("Failed to create {trigger} job for {}", calendar.expression))?;
        scheduler
            .add(job)
            .await
            .with_context(|| format!("Failed to add {trigger} job"))?;

        info!(
            trigger = %trigger,
            cron = %calendar.expression,
            timezone = %schedule.timezone,
            next = ?schedule.next_fire(trigger, Utc::now()),
            "Trigger scheduled"
        );
    }

    scheduler
        .start()
        .await
        .context("Failed to start trigger scheduler")?;
    let tick = spawn_tick(schedule.poll_interval, tx);

    Ok(TriggerTimers { scheduler, tick })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Weekday};

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            poll_interval_seconds: 60,
            daily_hour: 8,
            weekly_weekday: Weekday::Mon,
            weekly_hour: 8,
            timezone: "Europe/Paris".to_string(),
            live_window_seconds: 8460,
        }
    }

    fn schedule() -> TriggerSchedule {
        TriggerSchedule::from_config(&config()).unwrap()
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_daily_follows_paris_summer_and_winter_time() {
        let s = schedule();
        // 08:00 CEST is 06:00 UTC.
        assert_eq!(
            s.next_fire(Trigger::DailyPrime, utc(2024, 7, 15, 5, 0)),
            Some(utc(2024, 7, 15, 6, 0))
        );
        // 08:00 CET is 07:00 UTC.
        assert_eq!(
            s.next_fire(Trigger::DailyPrime, utc(2024, 1, 15, 5, 0)),
            Some(utc(2024, 1, 15, 7, 0))
        );
        // Past today's run, so tomorrow.
        assert_eq!(
            s.next_fire(Trigger::DailyPrime, utc(2024, 1, 15, 7, 30)),
            Some(utc(2024, 1, 16, 7, 0))
        );
    }

    #[test]
    fn test_daily_across_the_spring_transition() {
        // Clocks go forward on 2024-03-31.
        let s = schedule();
        assert_eq!(
            s.next_fire(Trigger::DailyPrime, utc(2024, 3, 30, 12, 0)),
            Some(utc(2024, 3, 31, 6, 0))
        );
    }

    #[test]
    fn test_weekly_runs_on_monday_local_time() {
        let s = schedule();
        // Wednesday, summer.
        assert_eq!(
            s.next_fire(Trigger::WeeklyPublish, utc(2024, 7, 17, 12, 0)),
            Some(utc(2024, 7, 22, 6, 0))
        );
        // Wednesday, winter.
        assert_eq!(
            s.next_fire(Trigger::WeeklyPublish, utc(2024, 1, 17, 12, 0)),
            Some(utc(2024, 1, 22, 7, 0))
        );
        // Monday after the hour -> a week later.
        assert_eq!(
            s.next_fire(Trigger::WeeklyPublish, utc(2024, 1, 22, 7, 30)),
            Some(utc(2024, 1, 29, 7, 0))
        );
        assert_eq!(s.next_fire(Trigger::Tick, utc(2024, 1, 22, 7, 30)), None);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut bad = config();
        bad.daily_hour = 24;
        assert!(TriggerSchedule::from_config(&bad).is_err());

        let mut bad = config();
        bad.poll_interval_seconds = 0;
        assert!(TriggerSchedule::from_config(&bad).is_err());

        let mut bad = config();
        bad.timezone = "Europe/Atlantis".to_string();
        assert!(TriggerSchedule::from_config(&bad).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_are_sent_every_interval() {
        let (tx, mut rx) = mpsc::channel(8);
        let handle = spawn_tick(Duration::from_secs(60), tx);

        for _ in 0..2 {
            let trigger = tokio::time::timeout(Duration::from_secs(61), rx.recv())
                .await
                .expect("no tick within the poll interval");
            assert_eq!(trigger, Some(Trigger::Tick));
        }
        handle.abort();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_calendar_jobs_start_and_stop() {
        let (tx, _rx) = mpsc::channel(8);
        let timers = spawn_triggers(&schedule(), tx).await.unwrap();
        timers.shutdown().await.unwrap();
    }

    #[test]
    fn test_trigger_names() {
        assert_eq!(Trigger::WeeklyPublish.to_string(), "weekly_publish");
    }
}
