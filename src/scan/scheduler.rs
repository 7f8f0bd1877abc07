//! Scan scheduling
//!
//! At most one scan runs at a time. A trigger while a scan is in flight is
//! rejected with [`SchedulerError::AlreadyRunning`] instead of queueing;
//! callers retry once the current scan finishes. A cron loop triggers
//! unattended scans and simply skips a tick that collides with a manual one.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::notify::{Notifier, OutdatedReport};
use crate::scan::engine::ScanRunner;
use crate::store::{DependencyStore, ScanJob, ScanJobStore, ScanStatus, StoreError};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("A scan is already running")]
    AlreadyRunning,

    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("Scan job not found: {0}")]
    JobNotFound(i64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

type CompletionCallback = Arc<dyn Fn(&ScanJob) + Send + Sync>;

#[derive(Default)]
struct SchedulerState {
    current_job: Option<i64>,
    callbacks: Vec<CompletionCallback>,
}

pub struct ScanScheduler {
    runner: Arc<dyn ScanRunner>,
    jobs: Arc<dyn ScanJobStore>,
    deps: Arc<dyn DependencyStore>,
    notifier: Option<Arc<dyn Notifier>>,
    state: Mutex<SchedulerState>,
    schedule: Mutex<Option<cron::Schedule>>,
    reload: Notify,
}

impl ScanScheduler {
    pub fn new(
        runner: Arc<dyn ScanRunner>,
        jobs: Arc<dyn ScanJobStore>,
        deps: Arc<dyn DependencyStore>,
    ) -> Self {
        Self {
            runner,
            jobs,
            deps,
            notifier: None,
            state: Mutex::new(SchedulerState::default()),
            schedule: Mutex::new(None),
            reload: Notify::new(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Sweeps jobs left behind by a previous process lifetime. Call once at
    /// startup, before the first trigger.
    pub fn recover(&self) -> Result<usize, SchedulerError> {
        Ok(self.jobs.cleanup_stale_scans()?)
    }

    /// Registers a callback invoked after every finished scan, whatever its
    /// terminal status.
    pub fn on_scan_complete(&self, callback: CompletionCallback) {
        if let Ok(mut state) = self.state.lock() {
            state.callbacks.push(callback);
        }
    }

    /// Starts a scan unless one is already in flight. Returns the pending
    /// job record; the scan itself runs on a background task.
    pub fn trigger_scan(
        self: &Arc<Self>,
        source_id: Option<i64>,
    ) -> Result<ScanJob, SchedulerError> {
        let job = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| StoreError::InvalidValue("scheduler lock poisoned".to_string()))?;
            if state.current_job.is_some() {
                return Err(SchedulerError::AlreadyRunning);
            }
            let job = self.jobs.create(source_id)?;
            state.current_job = Some(job.id);
            job
        };

        info!(job_id = job.id, source_id = ?source_id, "scan triggered");
        let scheduler = self.clone();
        let spawned = job.clone();
        tokio::spawn(async move {
            scheduler.run_scan(spawned).await;
        });

        Ok(job)
    }

    /// Cancels a scan job. Marks it failed; the in-flight work notices only
    /// through its completion write becoming a no-op. Cancelling an already
    /// finished job does nothing.
    pub fn cancel_scan(&self, job_id: i64) -> Result<(), SchedulerError> {
        let applied = self
            .jobs
            .update_status(job_id, ScanStatus::Failed, Some("cancelled by user"))?;
        if !applied && self.jobs.get(job_id)?.is_none() {
            return Err(SchedulerError::JobNotFound(job_id));
        }
        if applied {
            // Free the slot right away; the in-flight task's own clear is
            // guarded so it cannot evict a newer job.
            if let Ok(mut state) = self.state.lock() {
                if state.current_job == Some(job_id) {
                    state.current_job = None;
                }
            }
            info!(job_id, "scan cancelled");
        }
        Ok(())
    }

    /// Installs or replaces the cron schedule. Expressions use the familiar
    /// five-field form (minute hour day month weekday).
    pub fn set_schedule(&self, expression: &str) -> Result<(), SchedulerError> {
        let fields = expression.split_whitespace().count();
        if fields != 5 {
            return Err(SchedulerError::InvalidCron(format!(
                "expected 5 fields, got {fields}"
            )));
        }
        // The cron crate wants a seconds field; pin it to zero.
        let schedule = cron::Schedule::from_str(&format!("0 {expression}"))
            .map_err(|e| SchedulerError::InvalidCron(e.to_string()))?;

        if let Ok(mut slot) = self.schedule.lock() {
            *slot = Some(schedule);
        }
        info!(expression, "scan schedule installed");
        self.reload.notify_one();
        Ok(())
    }

    /// Drives scheduled scans forever. A tick that collides with a running
    /// scan is skipped, not queued.
    pub async fn run_cron(self: Arc<Self>) {
        loop {
            let next = self
                .schedule
                .lock()
                .ok()
                .and_then(|slot| slot.as_ref().and_then(|s| s.upcoming(Utc).next()));

            let Some(next) = next else {
                // No schedule installed; wait for set_schedule.
                self.reload.notified().await;
                continue;
            };

            let wait = (next - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            debug!(next = %next, "next scheduled scan");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    match self.trigger_scan(None) {
                        Ok(job) => info!(job_id = job.id, "scheduled scan started"),
                        Err(SchedulerError::AlreadyRunning) => {
                            debug!("scheduled scan skipped, one already running");
                        }
                        Err(e) => error!(error = %e, "scheduled scan failed to start"),
                    }
                }
                _ = self.reload.notified() => {}
            }
        }
    }

    async fn run_scan(self: Arc<Self>, job: ScanJob) {
        let result = self.execute(&job).await;
        if let Err(e) = &result {
            error!(job_id = job.id, error = %e, "scan failed");
            if let Err(e) = self
                .jobs
                .update_status(job.id, ScanStatus::Failed, Some(&e.to_string()))
            {
                error!(job_id = job.id, error = %e, "failed to record scan failure");
            }
        }

        let callbacks = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if state.current_job == Some(job.id) {
                state.current_job = None;
            }
            state.callbacks.clone()
        };

        if let Ok(Some(finished)) = self.jobs.get(job.id) {
            for callback in callbacks {
                callback(&finished);
            }
        }
    }

    async fn execute(&self, job: &ScanJob) -> Result<(), SchedulerError> {
        // Snapshot first so this scan's writes define the delta.
        self.deps.mark_previously_outdated()?;

        if !self.jobs.update_status(job.id, ScanStatus::Running, None)? {
            // Cancelled before it started.
            warn!(job_id = job.id, "scan cancelled before start");
            return Ok(());
        }

        let outcome = match self.runner.run(job.source_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.jobs
                    .update_status(job.id, ScanStatus::Failed, Some(&e.to_string()))?;
                return Ok(());
            }
        };

        self.jobs
            .update_stats(job.id, outcome.repos_scanned, outcome.deps_scanned)?;

        let completed = self.jobs.update_status(job.id, ScanStatus::Completed, None)?;
        if !completed {
            // Cancelled mid-run; results are stored but nobody is notified.
            warn!(job_id = job.id, "scan finished after cancellation");
            return Ok(());
        }

        if let Some(notifier) = &self.notifier {
            let report = OutdatedReport {
                scan_id: job.id,
                newly_outdated: self.deps.get_newly_outdated()?,
                total_scanned: outcome.deps_scanned,
            };
            notifier.send_new_outdated_report(&report).await;
        }

        Ok(())
    }
}
