//! Named periodic jobs with a singleton guard per job.
//!
//! Every job has its own timer loop. A firing runs on its own task, so a slow
//! job never delays another job's timer; a firing that finds the previous
//! firing of the same job still running is skipped. Errors and panics of a
//! firing are logged and the job keeps its schedule. The guard belongs to the
//! job name, so a job removed and re-added while a firing is in flight still
//! waits for that firing.

pub mod error;
pub mod trigger;

pub use error::SchedulerError;
pub use trigger::Trigger;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub type JobError = Box<dyn std::error::Error + Send + Sync>;

/// The work a job does on every firing. The token is cancelled on shutdown
/// or when the job is removed.
pub type Task = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<(), JobError>> + Send + Sync>;

/// Wraps an async closure into a [`Task`].
pub fn task<F, Fut>(f: F) -> Task
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    Arc::new(move |cancel: CancellationToken| -> BoxFuture<'static, Result<(), JobError>> { Box::pin(f(cancel)) })
}

struct Job {
    trigger: Trigger,
    task: Task,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    /// Next interval firing, maintained by the job loop.
    next_tick: Arc<Mutex<Option<DateTime<Utc>>>>,
}

/// Everything a job loop needs, detached from the scheduler.
#[derive(Clone)]
struct JobHandle {
    name: String,
    task: Task,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    next_tick: Arc<Mutex<Option<DateTime<Utc>>>>,
    tracker: TaskTracker,
}

pub struct Scheduler {
    jobs: Mutex<HashMap<String, Job>>,
    /// Singleton guards by job name; outlive `remove_job`.
    guards: Mutex<HashMap<String, Arc<AtomicBool>>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    started: AtomicBool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            guards: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Registers a job fired on a cron schedule. Jobs added after `start` begin immediately.
    pub fn add_cron_job(&self, name: &str, expression: &str, task: Task) -> Result<(), SchedulerError> {
        let trigger = Trigger::cron(expression)?;
        self.add_job(name, trigger, task)
    }

    /// Registers a job fired every `period`, first one `period` after it starts.
    pub fn add_interval_job(&self, name: &str, period: Duration, task: Task) -> Result<(), SchedulerError> {
        let trigger = Trigger::interval(period)?;
        self.add_job(name, trigger, task)
    }

    fn add_job(&self, name: &str, trigger: Trigger, task: Task) -> Result<(), SchedulerError> {
        if self.shutdown.is_cancelled() {
            return Err(SchedulerError::Stopped);
        }
        let mut jobs = self.lock();
        if jobs.contains_key(name) {
            return Err(SchedulerError::DuplicateJob(name.to_string()));
        }

        let job = Job {
            trigger,
            task,
            running: self.guard(name),
            cancel: self.shutdown.child_token(),
            next_tick: Arc::new(Mutex::new(None)),
        };
        if self.started.load(Ordering::SeqCst) {
            self.spawn_loop(name, &job);
        }
        tracing::info!(job = name, trigger = ?job.trigger, "Registered job.");
        jobs.insert(name.to_string(), job);
        Ok(())
    }

    /// Starts the timers of every registered job.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self.shutdown.is_cancelled() {
            return Err(SchedulerError::Stopped);
        }
        let jobs = self.lock();
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyStarted);
        }
        for (name, job) in jobs.iter() {
            self.spawn_loop(name, job);
        }
        tracing::info!(jobs = jobs.len(), "Scheduler started.");
        Ok(())
    }

    /// Cancels all timers and waits for in-flight firings to return.
    ///
    /// A stopped scheduler cannot be started again.
    pub async fn stop(&self) {
        tracing::info!("Stopping scheduler...");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("Scheduler stopped.");
    }

    /// Unregisters a job and cancels its timer and any running firing.
    pub fn remove_job(&self, name: &str) -> bool {
        match self.lock().remove(name) {
            Some(job) => {
                job.cancel.cancel();
                tracing::info!(job = name, "Removed job.");
                true
            }
            None => false,
        }
    }

    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// When the job fires next. Interval jobs only know this once started.
    pub fn next_run(&self, name: &str) -> Option<DateTime<Utc>> {
        let jobs = self.lock();
        let job = jobs.get(name)?;
        match &job.trigger {
            Trigger::Cron(_) => job.trigger.upcoming(),
            Trigger::Interval(_) => *job.next_tick.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Whether a firing of the job is in flight.
    pub fn is_running(&self, name: &str) -> bool {
        self.lock().get(name).is_some_and(|job| job.running.load(Ordering::SeqCst))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn guard(&self, name: &str) -> Arc<AtomicBool> {
        let mut guards = self.guards.lock().unwrap_or_else(PoisonError::into_inner);
        guards.entry(name.to_string()).or_default().clone()
    }

    fn spawn_loop(&self, name: &str, job: &Job) {
        let handle = JobHandle {
            name: name.to_string(),
            task: job.task.clone(),
            running: job.running.clone(),
            cancel: job.cancel.clone(),
            next_tick: job.next_tick.clone(),
            tracker: self.tracker.clone(),
        };
        match job.trigger.clone() {
            Trigger::Cron(schedule) => {
                self.tracker.spawn(cron_loop(handle, *schedule));
            }
            Trigger::Interval(period) => {
                self.tracker.spawn(interval_loop(handle, period));
            }
        }
    }
}

/// The first firing strictly after both `now` and the last firing.
///
/// The sleep runs on the monotonic clock and can wake a little before the
/// wall clock reaches `at`; anchoring on the last firing keeps that instant
/// from being picked again.
fn next_fire(
    schedule: &cron::Schedule,
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let from = last.map_or(now, |last| last.max(now));
    schedule.after(&from).next()
}

async fn cron_loop(job: JobHandle, schedule: cron::Schedule) {
    let mut last = None;
    loop {
        let Some(at) = next_fire(&schedule, last, Utc::now()) else {
            tracing::info!(job = %job.name, "Cron schedule has no upcoming firings.");
            return;
        };
        let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tracing::debug!(job = %job.name, next_run = %at, "Waiting for next firing.");

        tokio::select! {
            _ = job.cancel.cancelled() => return,
            _ = tokio::time::sleep(wait) => {
                job.fire();
                last = Some(at);
            }
        }
    }
}

async fn interval_loop(job: JobHandle, period: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        job.set_next_tick(period);
        tokio::select! {
            _ = job.cancel.cancelled() => return,
            _ = ticker.tick() => job.fire(),
        }
    }
}

impl JobHandle {
    fn set_next_tick(&self, period: Duration) {
        let next = chrono::Duration::from_std(period).ok().map(|period| Utc::now() + period);
        *self.next_tick.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Runs one firing unless the previous one is still in flight.
    fn fire(&self) {
        if self.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            tracing::warn!(job = %self.name, "Previous run still in progress, skipping this firing.");
            return;
        }

        let name = self.name.clone();
        let running = self.running.clone();
        let future = (self.task)(self.cancel.child_token());

        self.tracker.spawn(async move {
            tracing::info!(job = %name, "Job started.");
            let started = Instant::now();
            // The inner task turns a panic into a JoinError instead of unwinding here.
            match tokio::spawn(future).await {
                Ok(Ok(())) => {
                    tracing::info!(job = %name, elapsed_ms = started.elapsed().as_millis() as u64, "Job finished.");
                }
                Ok(Err(e)) => {
                    tracing::error!(job = %name, error = %e, "Job failed.");
                }
                Err(e) if e.is_panic() => {
                    tracing::error!(job = %name, "Job panicked.");
                }
                Err(e) => {
                    tracing::warn!(job = %name, error = %e, "Job was aborted.");
                }
            }
            running.store(false, Ordering::SeqCst);
        });
    }
}
