//! The scheduler: one timer per enabled job, reconciled against the store.
//!
//! The timer table is private to [`Scheduler`] and every mutation goes
//! through its lock. A replaced or cancelled entry has its task aborted
//! before the slot is reused, so a job id never has two live timers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use cronpulse_core::config::SchedulerConfig;
use cronpulse_core::cron::{self, Tz};
use cronpulse_core::{
    CronpulseError, ExecutionStore, Job, JobId, JobStore, Result, TriggerType,
};

use crate::runner::{ExecutionRunner, RunReport};

/// A timer this far past its fire time without having fired is treated as
/// missed by reconciliation.
const MISSED_FIRE_GRACE_SECS: i64 = 5;

const INTERRUPTED: &str = "interrupted: scheduler restarted while execution was running";

struct TimerEntry {
    handle: JoinHandle<()>,
    cron: String,
    next_at: DateTime<Utc>,
    generation: u64,
}

/// Read-only view of one live timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerInfo {
    pub job_id: JobId,
    pub cron_expression: String,
    pub next_at: DateTime<Utc>,
}

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scheduled: usize,
    pub rescheduled: usize,
    pub cancelled: usize,
    pub unschedulable: usize,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    jobs: Arc<dyn JobStore>,
    executions: Arc<dyn ExecutionStore>,
    runner: Arc<ExecutionRunner>,
    timers: Mutex<HashMap<JobId, TimerEntry>>,
    generation: AtomicU64,
    reconcile_every: Duration,
    timezone: Tz,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        executions: Arc<dyn ExecutionStore>,
        runner: Arc<ExecutionRunner>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs,
                executions,
                runner,
                timers: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                reconcile_every: Duration::from_secs(config.reconcile_interval_secs.max(1)),
                timezone: config.timezone,
                running: AtomicBool::new(false),
            }),
        }
    }

    pub fn runner(&self) -> &Arc<ExecutionRunner> {
        &self.inner.runner
    }

    /// Reconcile periodically until `shutdown` flips to true, then cancel
    /// every pending timer. In-flight executions are left to finish.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        self.inner.running.store(true, Ordering::SeqCst);
        info!(
            interval_secs = self.inner.reconcile_every.as_secs(),
            timezone = %self.inner.timezone,
            "scheduler started"
        );
        self.recover_orphans().await;

        // The first tick completes immediately, so jobs are armed on startup.
        let mut interval = tokio::time::interval(self.inner.reconcile_every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.reconcile().await {
                        Ok(report) if report != ReconcileReport::default() => {
                            info!(
                                scheduled = report.scheduled,
                                rescheduled = report.rescheduled,
                                cancelled = report.cancelled,
                                unschedulable = report.unschedulable,
                                "reconciled timers"
                            );
                        }
                        Ok(_) => debug!("timers already in sync"),
                        Err(e) => error!("reconcile failed, will retry next tick: {e}"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler shutting down");
                        break;
                    }
                }
            }
        }

        self.cancel_all().await;
        self.inner.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Arm (or re-arm) the timer for `job`. Returns the next fire time, or
    /// `None` if the cron expression has no next occurrence; in that case any
    /// existing timer for the job is cancelled.
    pub async fn schedule_one(&self, job: &Job) -> Option<DateTime<Utc>> {
        let mut timers = self.inner.timers.lock().await;
        if let Some(previous) = timers.remove(&job.id) {
            previous.handle.abort();
        }
        let next = self.arm(&mut timers, job, Utc::now());
        if next.is_none() {
            warn!(
                job_id = %job.id,
                cron = %job.cron_expression,
                "cron has no next occurrence, job left unscheduled"
            );
        }
        next
    }

    /// Drop the job's pending timer. Returns whether one existed.
    pub async fn cancel(&self, job_id: &JobId) -> bool {
        let mut timers = self.inner.timers.lock().await;
        match timers.remove(job_id) {
            Some(entry) => {
                entry.handle.abort();
                info!(job_id = %job_id, "timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Align the timer table with the store's enabled jobs.
    ///
    /// New jobs are armed; jobs whose cron changed, whose timer is overdue,
    /// or whose timer task ended are re-armed; timers for jobs no longer
    /// enabled are cancelled.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let jobs = self.inner.jobs.list_enabled_jobs().await?;
        let now = Utc::now();
        let mut report = ReconcileReport::default();
        let mut timers = self.inner.timers.lock().await;

        let enabled: HashSet<&JobId> = jobs.iter().map(|j| &j.id).collect();
        let stale: Vec<JobId> = timers
            .keys()
            .filter(|id| !enabled.contains(id))
            .cloned()
            .collect();
        for id in stale {
            if let Some(entry) = timers.remove(&id) {
                entry.handle.abort();
                report.cancelled += 1;
                info!(job_id = %id, "job disabled or deleted, timer cancelled");
            }
        }

        for job in &jobs {
            let replacing = match timers.get(&job.id) {
                None => false,
                Some(entry)
                    if entry.cron != job.cron_expression
                        || entry.next_at + chrono::Duration::seconds(MISSED_FIRE_GRACE_SECS) < now
                        || entry.handle.is_finished() =>
                {
                    true
                }
                Some(_) => continue,
            };

            if let Some(previous) = timers.remove(&job.id) {
                previous.handle.abort();
            }
            match self.arm(&mut timers, job, now) {
                Some(next_at) if replacing => {
                    report.rescheduled += 1;
                    info!(job_id = %job.id, next_at = %next_at, "job rescheduled");
                }
                Some(next_at) => {
                    report.scheduled += 1;
                    info!(job_id = %job.id, next_at = %next_at, "job scheduled");
                }
                None => {
                    report.unschedulable += 1;
                    warn!(
                        job_id = %job.id,
                        cron = %job.cron_expression,
                        "cron has no next occurrence, job left unscheduled"
                    );
                }
            }
        }

        Ok(report)
    }

    /// Run a job now, outside its schedule.
    ///
    /// The run happens on its own task, so dropping the returned future does
    /// not abandon a half-recorded execution.
    pub async fn trigger(&self, job_id: &JobId, trigger: TriggerType) -> Result<RunReport> {
        let job = self
            .inner
            .jobs
            .get_job(job_id)
            .await?
            .ok_or_else(|| CronpulseError::JobNotFound {
                id: job_id.to_string(),
            })?;
        if !job.enabled {
            return Err(CronpulseError::JobDisabled {
                id: job_id.to_string(),
            });
        }

        info!(job_id = %job_id, trigger = %trigger, "job triggered");
        let runner = Arc::clone(&self.inner.runner);
        tokio::spawn(async move { runner.run(&job, trigger).await })
            .await
            .map_err(|e| CronpulseError::Internal(format!("trigger task failed: {e}")))?
    }

    /// Live timers ordered by next fire time.
    pub async fn snapshot(&self) -> Vec<TimerInfo> {
        let timers = self.inner.timers.lock().await;
        let mut out: Vec<TimerInfo> = timers
            .iter()
            .map(|(id, entry)| TimerInfo {
                job_id: id.clone(),
                cron_expression: entry.cron.clone(),
                next_at: entry.next_at,
            })
            .collect();
        out.sort_by(|a, b| a.next_at.cmp(&b.next_at).then_with(|| a.job_id.cmp(&b.job_id)));
        out
    }

    // --- private helpers ---------------------------------------------------

    /// Spawn a timer for the first occurrence of `job`'s cron after `from`
    /// and record it. The caller must already have emptied the slot.
    fn arm(
        &self,
        timers: &mut HashMap<JobId, TimerEntry>,
        job: &Job,
        from: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let next_at = cron::next_after(&job.cron_expression, from, self.inner.timezone)?;
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(self.clone().fire(job.id.clone(), next_at, generation));
        timers.insert(
            job.id.clone(),
            TimerEntry {
                handle,
                cron: job.cron_expression.clone(),
                next_at,
                generation,
            },
        );
        debug!(job_id = %job.id, next_at = %next_at, generation, "timer armed");
        Some(next_at)
    }

    /// Timer task body: wait, re-arm the next occurrence, then run.
    async fn fire(self, job_id: JobId, due: DateTime<Utc>, generation: u64) {
        let wait = (due - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;

        let job = match self.inner.jobs.get_job(&job_id).await {
            Ok(job) => job,
            Err(e) => {
                // Entry stays; reconcile sees the finished task and re-arms.
                error!(job_id = %job_id, "timer could not load job: {e}");
                return;
            }
        };

        {
            let mut timers = self.inner.timers.lock().await;
            if timers.get(&job_id).map(|e| e.generation) != Some(generation) {
                debug!(job_id = %job_id, generation, "timer superseded before firing");
                return;
            }
            // Our own slot: remove without aborting, we are that task.
            timers.remove(&job_id);

            let Some(job) = job.as_ref().filter(|j| j.enabled) else {
                info!(job_id = %job_id, "job removed or disabled, timer dropped");
                return;
            };
            // Never re-arm at or before the instant that just fired.
            let from = Utc::now().max(due);
            if self.arm(&mut timers, job, from).is_none() {
                warn!(job_id = %job_id, "cron has no further occurrence, job left unscheduled");
            }
        }

        let Some(job) = job else { return };
        if let Err(e) = self.inner.runner.run(&job, TriggerType::Scheduled).await {
            error!(job_id = %job_id, "scheduled run failed: {e}");
        }
    }

    /// Close executions a previous process left `running`, so concurrency
    /// control does not skip those jobs forever.
    async fn recover_orphans(&self) {
        match self.inner.executions.fail_orphaned(Utc::now(), INTERRUPTED).await {
            Ok(0) => {}
            Ok(n) => warn!(count = n, "closed executions interrupted by restart"),
            Err(e) => error!("startup recovery failed: {e}"),
        }
    }

    async fn cancel_all(&self) {
        let mut timers = self.inner.timers.lock().await;
        let count = timers.len();
        for (_, entry) in timers.drain() {
            entry.handle.abort();
        }
        if count > 0 {
            info!(count, "pending timers cancelled");
        }
    }
}
