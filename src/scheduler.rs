//! Cycle scheduler
//!
//! Triggers the improvement cycle on a cron expression or a fixed interval.

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{error, info, warn};

use crate::config::SchedulerConfig;
use crate::cycle::ImprovementCycle;
use crate::error::{EngineError, EngineResult};

/// When the cycle runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleSchedule {
    /// Cron expression with seconds (e.g. "0 0 2 * * *" for 02:00 daily)
    Cron(String),
    /// Fixed interval in seconds
    Interval(u64),
}

impl CycleSchedule {
    pub fn from_config(config: &SchedulerConfig) -> EngineResult<Self> {
        let schedule = match config.interval_secs {
            Some(secs) => CycleSchedule::Interval(secs),
            None => CycleSchedule::Cron(config.cron.clone()),
        };
        schedule.validate()?;
        Ok(schedule)
    }

    /// Parse and validate a cron expression
    pub fn parse_cron(expr: &str) -> EngineResult<Schedule> {
        Schedule::from_str(expr)
            .map_err(|e| EngineError::Config(format!("invalid cron expression '{}': {}", expr, e)))
    }

    pub fn validate(&self) -> EngineResult<()> {
        match self {
            CycleSchedule::Cron(expr) => Self::parse_cron(expr).map(|_| ()),
            CycleSchedule::Interval(0) => Err(EngineError::Config("schedule interval must be positive".into())),
            CycleSchedule::Interval(_) => Ok(()),
        }
    }

    /// Next run time after `now`
    pub fn next_after(&self, now: DateTime<Utc>) -> EngineResult<Option<DateTime<Utc>>> {
        match self {
            CycleSchedule::Cron(expr) => Ok(Self::parse_cron(expr)?.after(&now).next()),
            CycleSchedule::Interval(secs) => Ok(Some(now + chrono::Duration::seconds(*secs as i64))),
        }
    }

    pub fn next_run(&self) -> EngineResult<Option<DateTime<Utc>>> {
        self.next_after(Utc::now())
    }
}

/// Runs the improvement cycle on a schedule until stopped
pub struct CycleScheduler {
    cycle: Arc<ImprovementCycle>,
    schedule: CycleSchedule,
    running: Arc<Mutex<bool>>,
    wake: Arc<Notify>,
}

impl CycleScheduler {
    pub fn new(cycle: Arc<ImprovementCycle>, schedule: CycleSchedule) -> EngineResult<Self> {
        schedule.validate()?;
        Ok(Self {
            cycle,
            schedule,
            running: Arc::new(Mutex::new(false)),
            wake: Arc::new(Notify::new()),
        })
    }

    pub fn schedule(&self) -> &CycleSchedule {
        &self.schedule
    }

    /// Start the scheduler loop. Returns once `stop` is called.
    pub async fn start(&self) -> EngineResult<()> {
        {
            let mut running = self.running.lock().await;
            if *running {
                warn!("Scheduler already running");
                return Ok(());
            }
            *running = true;
        }

        info!("Scheduler started ({:?})", self.schedule);

        loop {
            if !*self.running.lock().await {
                break;
            }

            let Some(next) = self.schedule.next_run()? else {
                warn!("Schedule has no upcoming run; stopping");
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            info!("Next improvement cycle at {}", next);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.wake.notified() => continue,
            }

            if !*self.running.lock().await {
                break;
            }
            self.trigger().await;
        }

        *self.running.lock().await = false;
        info!("Scheduler stopped");
        Ok(())
    }

    /// Run one scheduled cycle, logging the outcome.
    async fn trigger(&self) {
        match self.cycle.run_daily_improvement_cycle().await {
            Ok(summary) if summary.is_clean() => {
                info!("Scheduled cycle completed ({}ms)", summary.duration_ms);
            }
            Ok(summary) => {
                for e in &summary.errors {
                    warn!("Scheduled cycle stage {} failed: {}", e.stage, e.message);
                }
            }
            Err(EngineError::CycleInProgress { started_at }) => {
                warn!("Skipping scheduled cycle; a run started at {} is still active", started_at);
            }
            Err(e) => error!("Scheduled cycle error: {}", e),
        }
    }

    /// Stop the scheduler
    pub async fn stop(&self) {
        *self.running.lock().await = false;
        self.wake.notify_one();
        info!("Stopping scheduler...");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.lock().await
    }
}
