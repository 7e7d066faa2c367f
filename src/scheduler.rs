use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::db::Database;
use crate::models::{RunTrigger, ScheduleType, ScrapingHistory, ScrapingSchedule};
use crate::runner::ScrapeRunner;
use crate::utils::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobInfo {
    pub job_id: Uuid,
    pub schedule_id: i64,
    pub schedule_type: ScheduleType,
    pub cron_expression: String,
    pub next_run: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub total_jobs: usize,
    pub running_schedules: Vec<i64>,
    pub completed_runs: u64,
    pub failed_runs: u64,
    pub uptime_seconds: u64,
    pub jobs: Vec<JobInfo>,
}

/// Registers one cron job per enabled [`ScrapingSchedule`] and runs the
/// matching scrape when it fires.
#[derive(Clone)]
pub struct ScrapeScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    scheduler: JobScheduler,
    db: Database,
    runner: Arc<dyn ScrapeRunner>,
    config: SchedulerConfig,
    jobs: RwLock<HashMap<i64, JobInfo>>, // schedule_id -> JobInfo
    running: Mutex<HashSet<i64>>,
    started: AtomicBool,
    completed_runs: AtomicU64,
    failed_runs: AtomicU64,
    start_time: DateTime<Utc>,
}

/// Marks a schedule as running until dropped.
struct RunGuard {
    inner: Arc<Inner>,
    schedule_id: i64,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Ok(mut running) = self.inner.running.lock() {
            running.remove(&self.schedule_id);
        }
    }
}

impl ScrapeScheduler {
    pub async fn new(
        db: Database,
        runner: Arc<dyn ScrapeRunner>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            inner: Arc::new(Inner {
                scheduler,
                db,
                runner,
                config,
                jobs: RwLock::new(HashMap::new()),
                running: Mutex::new(HashSet::new()),
                started: AtomicBool::new(false),
                completed_runs: AtomicU64::new(0),
                failed_runs: AtomicU64::new(0),
                start_time: Utc::now(),
            }),
        })
    }

    /// Register every enabled schedule, then start ticking.
    pub async fn start(&self) -> Result<()> {
        for schedule in self.inner.db.list_schedules().await? {
            if !schedule.enabled {
                continue;
            }
            if let Err(e) = self.schedule(&schedule).await {
                // One bad row shouldn't keep the others from running
                error!(schedule_id = schedule.id, error = %e, "could not register schedule");
            }
        }

        self.inner.scheduler.start().await?;
        self.inner.started.store(true, Ordering::SeqCst);
        info!(jobs = self.inner.jobs.read().await.len(), "scrape scheduler started");
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        let mut scheduler = self.inner.scheduler.clone();
        scheduler.shutdown().await?;
        self.inner.started.store(false, Ordering::SeqCst);
        info!("scrape scheduler shutdown");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Register (or replace) the cron job for `schedule`.
    pub async fn schedule(&self, schedule: &ScrapingSchedule) -> Result<JobInfo> {
        if !schedule.enabled {
            return Err(AppError::Validation(format!(
                "schedule {} is disabled",
                schedule.id
            )));
        }

        let cron_expression = schedule.cron_expression()?;
        self.unschedule(schedule.id).await?;

        let inner = Arc::clone(&self.inner);
        let schedule_id = schedule.id;
        let job = Job::new_async(cron_expression.as_str(), move |_uuid, _lock| {
            let inner = Arc::clone(&inner);
            Box::pin(async move {
                let guard = match Inner::claim(&inner, schedule_id) {
                    Ok(guard) => guard,
                    Err(_) => {
                        warn!(schedule_id, "previous run still in progress, skipping tick");
                        return;
                    }
                };
                if let Err(e) = Inner::execute(&inner, guard, RunTrigger::Scheduled).await {
                    error!(schedule_id, error = %e, "scheduled scrape could not be recorded");
                }
            })
        })?;

        let job_id = self.inner.scheduler.add(job).await?;

        let next_run = schedule.next_run_after(Utc::now()).ok();
        self.inner.db.set_next_run(schedule.id, next_run).await?;

        let info = JobInfo {
            job_id,
            schedule_id: schedule.id,
            schedule_type: schedule.schedule_type,
            cron_expression,
            next_run,
            registered_at: Utc::now(),
        };
        self.inner.jobs.write().await.insert(schedule.id, info.clone());

        info!(
            schedule_id = schedule.id,
            schedule_type = %schedule.schedule_type,
            cron = %info.cron_expression,
            "scheduled scrape"
        );
        Ok(info)
    }

    /// Remove the cron job for `schedule_id`. Returns whether one existed.
    pub async fn unschedule(&self, schedule_id: i64) -> Result<bool> {
        Inner::unschedule(&self.inner, schedule_id).await
    }

    /// Recompute after a schedule changed.
    pub async fn reschedule(&self, schedule: &ScrapingSchedule) -> Result<Option<JobInfo>> {
        if schedule.enabled {
            return self.schedule(schedule).await.map(Some);
        }

        self.unschedule(schedule.id).await?;
        self.inner.db.set_next_run(schedule.id, None).await?;
        Ok(None)
    }

    /// Run a schedule immediately and wait for it.
    pub async fn run_now(&self, schedule_id: i64) -> Result<ScrapingHistory> {
        let guard = Inner::claim(&self.inner, schedule_id)?;
        Inner::execute(&self.inner, guard, RunTrigger::Manual).await
    }

    /// Start a manual run in the background. Fails right away when the
    /// schedule is already running.
    pub async fn trigger(&self, schedule_id: i64) -> Result<()> {
        if self.inner.db.get_schedule(schedule_id).await?.is_none() {
            return Err(AppError::not_found(format!("schedule {}", schedule_id)));
        }

        let guard = Inner::claim(&self.inner, schedule_id)?;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(e) = Inner::execute(&inner, guard, RunTrigger::Manual).await {
                error!(schedule_id, error = %e, "manual scrape could not be recorded");
            }
        });
        Ok(())
    }

    pub fn is_running(&self, schedule_id: i64) -> bool {
        self.inner
            .running
            .lock()
            .map(|running| running.contains(&schedule_id))
            .unwrap_or(false)
    }

    pub async fn get_job_info(&self, schedule_id: i64) -> Option<JobInfo> {
        self.inner.jobs.read().await.get(&schedule_id).cloned()
    }

    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        let mut jobs: Vec<JobInfo> = self.inner.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|j| j.schedule_id);
        jobs
    }

    pub async fn status(&self) -> SchedulerStatus {
        let jobs = self.list_jobs().await;
        let mut running_schedules: Vec<i64> = self
            .inner
            .running
            .lock()
            .map(|running| running.iter().copied().collect())
            .unwrap_or_default();
        running_schedules.sort();

        let uptime = Utc::now().signed_duration_since(self.inner.start_time);

        SchedulerStatus {
            running: self.is_started(),
            total_jobs: jobs.len(),
            running_schedules,
            completed_runs: self.inner.completed_runs.load(Ordering::Relaxed),
            failed_runs: self.inner.failed_runs.load(Ordering::Relaxed),
            uptime_seconds: uptime.num_seconds().max(0) as u64,
            jobs,
        }
    }
}

impl Inner {
    fn claim(inner: &Arc<Self>, schedule_id: i64) -> Result<RunGuard> {
        let mut running = inner
            .running
            .lock()
            .map_err(|_| AppError::Internal("running set lock poisoned".into()))?;
        if !running.insert(schedule_id) {
            return Err(AppError::Conflict(format!(
                "schedule {} is already running",
                schedule_id
            )));
        }
        Ok(RunGuard {
            inner: Arc::clone(inner),
            schedule_id,
        })
    }

    async fn unschedule(inner: &Arc<Self>, schedule_id: i64) -> Result<bool> {
        let removed = inner.jobs.write().await.remove(&schedule_id);
        match removed {
            Some(info) => {
                inner.scheduler.remove(&info.job_id).await?;
                info!(schedule_id, job_id = %info.job_id, "unscheduled scrape");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn execute(
        inner: &Arc<Self>,
        guard: RunGuard,
        trigger: RunTrigger,
    ) -> Result<ScrapingHistory> {
        let schedule_id = guard.schedule_id;
        let schedule_type = inner
            .db
            .get_schedule(schedule_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("schedule {}", schedule_id)))?
            .schedule_type;

        let started_at = Utc::now();
        let history_id = inner
            .db
            .start_history(Some(schedule_id), schedule_type, trigger, started_at)
            .await?;
        debug!(schedule_id, schedule_type = %schedule_type, trigger = trigger.as_str(), "scrape started");

        let mut guard = Some(guard);
        let runner = Arc::clone(&inner.runner);
        let mut task = tokio::spawn(async move { runner.run(schedule_type).await });

        let timeout = inner.config.job_timeout();
        let outcome = match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(AppError::Internal(format!("scrape task failed: {}", e))),
            Err(_) => {
                // Browser calls on the blocking pool can't be cancelled, so the
                // schedule stays claimed until the abandoned run returns.
                let held = guard.take();
                tokio::spawn(async move {
                    let _ = task.await;
                    debug!(schedule_id, "timed out scrape returned, releasing schedule");
                    drop(held);
                });
                Err(AppError::Scheduler(format!(
                    "run exceeded job timeout of {}s",
                    timeout.as_secs()
                )))
            }
        };

        let completed_at = Utc::now();
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0);

        let outcome_label = if outcome.is_ok() { "success" } else { "failure" };
        counter!(
            "fossawork_scrape_runs_total",
            "schedule_type" => schedule_type.as_str(),
            "outcome" => outcome_label
        )
        .increment(1);
        histogram!("fossawork_scrape_duration_ms", "schedule_type" => schedule_type.as_str())
            .record(duration_ms as f64);

        let (items_processed, error_message) = match &outcome {
            Ok(summary) => {
                inner.completed_runs.fetch_add(1, Ordering::Relaxed);
                info!(
                    schedule_id,
                    schedule_type = %schedule_type,
                    trigger = trigger.as_str(),
                    duration_ms,
                    items = summary.items_processed,
                    "scrape succeeded"
                );
                (summary.items_processed, None)
            }
            Err(e) => {
                inner.failed_runs.fetch_add(1, Ordering::Relaxed);
                (0, Some(e.to_string()))
            }
        };

        // Settings may have been edited while the scrape ran
        let mut disabled = false;
        let mut next_run = None;
        match inner.db.get_schedule(schedule_id).await? {
            Some(mut schedule) => {
                match &error_message {
                    None => schedule.record_success(completed_at),
                    Some(message) => {
                        disabled = schedule.record_failure(
                            completed_at,
                            message.clone(),
                            inner.config.max_consecutive_failures,
                        );
                        warn!(
                            schedule_id,
                            schedule_type = %schedule_type,
                            trigger = trigger.as_str(),
                            duration_ms,
                            failures = schedule.consecutive_failures,
                            error = %message,
                            "scrape failed"
                        );
                    }
                }

                schedule.next_run = if schedule.enabled {
                    schedule.next_run_after(completed_at).ok()
                } else {
                    None
                };
                next_run = schedule.next_run;
                inner.db.record_run_outcome(&schedule, disabled).await?;
            }
            None => warn!(schedule_id, "schedule deleted while its scrape ran"),
        }

        let history = inner
            .db
            .complete_history(
                history_id,
                outcome.is_ok(),
                items_processed,
                error_message.as_deref(),
                completed_at,
            )
            .await?;

        let pruned = inner
            .db
            .prune_history(schedule_id, inner.config.history_retention)
            .await?;
        if pruned > 0 {
            debug!(schedule_id, pruned, "pruned scrape history");
        }

        if disabled {
            warn!(schedule_id, "too many consecutive failures, schedule disabled");
            Inner::unschedule(inner, schedule_id).await?;
        } else if let Some(job) = inner.jobs.write().await.get_mut(&schedule_id) {
            job.next_run = next_run;
        }

        drop(guard);
        Ok(history)
    }
}
