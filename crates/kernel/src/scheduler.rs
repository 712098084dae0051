//! Scheduler / job runner: fixed-interval background jobs with a
//! non-overlap guarantee, pause/resume, and on-demand triggering.
//!
//! Non-overlap is enforced the same way the gateway's own schedule runner
//! enforces single-flight execution per schedule id: an `AtomicU32`
//! in-flight counter per job that `try_acquire`-style logic checks before
//! running the handler, incrementing `overlap_skip_count` instead of
//! queueing when a tick fires mid-run.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use sa_domain::error::Result;
use sa_domain::job::{JobDefinition, JobOutcome, JobRunEvent};
use tokio::task::JoinHandle;

pub type JobFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
pub type JobHandler = Arc<dyn Fn() -> JobFuture + Send + Sync>;
pub type RunListener = Arc<dyn Fn(&JobRunEvent) + Send + Sync>;

struct JobEntry {
    def: RwLock<JobDefinition>,
    handler: JobHandler,
    in_flight: AtomicU32,
    paused: AtomicBool,
}

pub struct Scheduler {
    jobs: Arc<RwLock<HashMap<String, Arc<JobEntry>>>>,
    listeners: Arc<RwLock<Vec<RunListener>>>,
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
    shutdown_grace_period_ms: u64,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(shutdown_grace_period_ms: u64) -> Self {
        Scheduler {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            listeners: Arc::new(RwLock::new(Vec::new())),
            handles: Mutex::new(HashMap::new()),
            shutdown_grace_period_ms,
            running: AtomicBool::new(false),
        }
    }

    pub fn add_listener(&self, listener: RunListener) {
        self.listeners.write().push(listener);
    }

    /// Register a job. Idempotent on `id`; calling again with the same id
    /// replaces the definition and, if the scheduler is running, re-arms
    /// its timer.
    pub fn register(&self, id: impl Into<String>, name: impl Into<String>, interval_ms: u64, handler: JobHandler) {
        let id = id.into();
        let entry = Arc::new(JobEntry {
            def: RwLock::new(JobDefinition::new(id.clone(), name, interval_ms)),
            handler,
            in_flight: AtomicU32::new(0),
            paused: AtomicBool::new(false),
        });

        self.jobs.write().insert(id.clone(), entry.clone());

        if self.running.load(Ordering::SeqCst) {
            if let Some(old) = self.handles.lock().remove(&id) {
                old.abort();
            }
            self.spawn_tick_loop(id, entry);
        }
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        let jobs: Vec<(String, Arc<JobEntry>)> = self
            .jobs
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();
        for (id, entry) in jobs {
            self.spawn_tick_loop(id, entry);
        }
    }

    fn spawn_tick_loop(&self, id: String, entry: Arc<JobEntry>) {
        let jobs = self.clone_jobs_handle();
        let listeners = self.clone_listeners_handle();
        let interval_ms = entry.def.read().interval_ms;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(interval_ms.max(1)));
            interval.tick().await; // first tick fires immediately; consume it
            loop {
                interval.tick().await;
                let current = jobs.read().get(&id).cloned();
                let Some(entry) = current else { break };
                if entry.paused.load(Ordering::SeqCst) {
                    continue;
                }
                let snapshot = listeners.read().clone();
                run_job(&id, &entry, &snapshot).await;
            }
        });

        self.handles.lock().insert(id, handle);
    }

    fn clone_jobs_handle(&self) -> Arc<RwLock<HashMap<String, Arc<JobEntry>>>> {
        self.jobs.clone()
    }

    fn clone_listeners_handle(&self) -> Arc<RwLock<Vec<RunListener>>> {
        self.listeners.clone()
    }

    /// Run a job immediately, bypassing the interval but still subject to
    /// the non-overlap rule.
    pub async fn trigger(&self, id: &str) -> Result<()> {
        let entry = self
            .jobs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| sa_domain::error::Error::NotFound(format!("job {id}")))?;
        let listeners = self.listeners.read().clone();
        run_job(id, &entry, &listeners).await;
        Ok(())
    }

    pub fn pause(&self, id: &str) -> Result<()> {
        let jobs = self.jobs.read();
        let entry = jobs
            .get(id)
            .ok_or_else(|| sa_domain::error::Error::NotFound(format!("job {id}")))?;
        entry.paused.store(true, Ordering::SeqCst);
        entry.def.write().paused = true;
        Ok(())
    }

    pub fn resume(&self, id: &str) -> Result<()> {
        let jobs = self.jobs.read();
        let entry = jobs
            .get(id)
            .ok_or_else(|| sa_domain::error::Error::NotFound(format!("job {id}")))?;
        entry.paused.store(false, Ordering::SeqCst);
        entry.def.write().paused = false;
        Ok(())
    }

    pub fn job(&self, id: &str) -> Option<JobDefinition> {
        self.jobs.read().get(id).map(|e| e.def.read().clone())
    }

    pub fn list_jobs(&self) -> Vec<JobDefinition> {
        self.jobs.read().values().map(|e| e.def.read().clone()).collect()
    }

    /// Stop all tick loops, waiting up to `shutdown_grace_period_ms` for
    /// in-flight handlers to return before proceeding regardless.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain().map(|(_, h)| h).collect();
        for handle in &handles {
            handle.abort();
        }

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(self.shutdown_grace_period_ms);
        loop {
            let any_in_flight = self
                .jobs
                .read()
                .values()
                .any(|e| e.in_flight.load(Ordering::SeqCst) > 0);
            if !any_in_flight {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!("scheduler shutdown grace period elapsed with jobs still in flight");
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

async fn run_job(id: &str, entry: &Arc<JobEntry>, listeners: &[RunListener]) {
    if entry
        .in_flight
        .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        let mut def = entry.def.write();
        def.overlap_skip_count += 1;
        let event = JobRunEvent {
            job_id: id.to_string(),
            started_at: Utc::now(),
            duration_ms: 0,
            outcome: JobOutcome::Skipped,
            error: None,
        };
        drop(def);
        for listener in listeners {
            listener(&event);
        }
        return;
    }

    let started_at = Utc::now();
    let result = (entry.handler)().await;
    let duration_ms = (Utc::now() - started_at).num_milliseconds().max(0) as u64;

    let outcome = if result.is_ok() {
        JobOutcome::Success
    } else {
        JobOutcome::Failure
    };
    let error = result.as_ref().err().map(|e| e.to_string());

    {
        let mut def = entry.def.write();
        def.run_count += 1;
        def.last_run_at = Some(started_at);
        def.last_result = Some(outcome);
    }
    entry.in_flight.store(0, Ordering::SeqCst);

    let event = JobRunEvent {
        job_id: id.to_string(),
        started_at,
        duration_ms,
        outcome,
        error,
    };
    for listener in listeners {
        listener(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32 as StdAtomicU32;

    fn noop_handler(counter: Arc<StdAtomicU32>) -> JobHandler {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn trigger_runs_immediately_and_increments_run_count() {
        let scheduler = Scheduler::new(1000);
        let counter = Arc::new(StdAtomicU32::new(0));
        scheduler.register("job-1", "test job", 60_000, noop_handler(counter.clone()));

        scheduler.trigger("job-1").await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.job("job-1").unwrap().run_count, 1);
    }

    #[tokio::test]
    async fn overlapping_trigger_is_skipped_not_queued() {
        let scheduler = Scheduler::new(1000);
        let started = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let started2 = started.clone();
        let release2 = release.clone();

        let handler: JobHandler = Arc::new(move || {
            let started = started2.clone();
            let release = release2.clone();
            Box::pin(async move {
                started.notify_one();
                release.notified().await;
                Ok(())
            })
        });
        scheduler.register("job-2", "slow job", 60_000, handler);

        let scheduler = Arc::new(scheduler);
        let s1 = scheduler.clone();
        let first = tokio::spawn(async move { s1.trigger("job-2").await });
        started.notified().await;

        scheduler.trigger("job-2").await.unwrap();
        release.notify_one();
        first.await.unwrap().unwrap();

        let def = scheduler.job("job-2").unwrap();
        assert_eq!(def.overlap_skip_count, 1);
        assert_eq!(def.run_count, 1);
    }

    #[tokio::test]
    async fn pause_prevents_automatic_ticks_but_not_explicit_trigger() {
        let scheduler = Scheduler::new(1000);
        let counter = Arc::new(StdAtomicU32::new(0));
        scheduler.register("job-3", "paused job", 60_000, noop_handler(counter.clone()));
        scheduler.pause("job-3").unwrap();

        scheduler.trigger("job-3").await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(scheduler.job("job-3").unwrap().paused);
    }

    #[tokio::test]
    async fn register_is_idempotent_on_id() {
        let scheduler = Scheduler::new(1000);
        let counter = Arc::new(StdAtomicU32::new(0));
        scheduler.register("job-4", "first", 60_000, noop_handler(counter.clone()));
        scheduler.register("job-4", "replaced", 30_000, noop_handler(counter.clone()));

        assert_eq!(scheduler.list_jobs().len(), 1);
        assert_eq!(scheduler.job("job-4").unwrap().interval_ms, 30_000);
    }
}
