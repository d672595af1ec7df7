//! Fixed-interval driver for independent jobs.
//!
//! ```text
//! Scheduler:  Stopped -> Initializing -> Running -> Stopping -> Stopped
//! Job:        Idle -> Running -> Idle            (error logged on failure)
//! ```
//!
//! Each job gets its own driver task ticking on a tokio interval whose first
//! tick fires immediately. A tick that finds the previous body still running
//! is dropped and counted, never queued. Bodies run on their own tasks so a
//! failure or panic in one job is contained at this boundary.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use watchpost_core::Clock;

use crate::error::SchedulerError;

/// Default upper bound on how long `stop` waits for in-flight bodies.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A named unit of polling work.
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self) -> BoxFuture<'_, anyhow::Result<()>>;
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Stopped,
    Initializing,
    Running,
    Stopping,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub name: String,
    pub interval_secs: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    /// When the interval next fires, counted from the latest start.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Error from the most recent run; cleared by a successful run.
    pub last_error: Option<String>,
    pub runs: u64,
    pub failures: u64,
    pub skipped_triggers: u64,
    pub running: bool,
}

struct Slot {
    job: Arc<dyn Job>,
    interval: Duration,
    running: AtomicBool,
    status: Mutex<JobStatus>,
    current: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Slot {
    /// Overlap guard: true if the caller now owns the running flag.
    fn try_begin(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn record_skip(&self) {
        let skipped = {
            let mut status = lock(&self.status);
            status.skipped_triggers += 1;
            status.skipped_triggers
        };
        warn!(
            job = %self.job.name(),
            skipped_total = skipped,
            "previous run still in progress; skipping trigger"
        );
    }
}

/// Releases the overlap guard however `execute` exits.
struct RunningGuard<'a>(&'a Slot);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        lock(&self.0.status).running = false;
        self.0.running.store(false, Ordering::Release);
    }
}

/// Run one body of `slot`; the caller must hold the running flag.
async fn execute(slot: Arc<Slot>, clock: Arc<dyn Clock>) {
    let _guard = RunningGuard(&slot);
    let name = slot.job.name().to_string();
    {
        let started = clock.now();
        let mut status = lock(&slot.status);
        status.last_run_at = Some(started);
        status.next_run_at = chrono::Duration::from_std(slot.interval)
            .ok()
            .and_then(|d| started.checked_add_signed(d));
        status.running = true;
    }
    debug!(job = %name, "run started");

    // `run()` itself is called inside the guarded future so a panic before
    // the body's first await is caught too.
    let outcome = AssertUnwindSafe(async { slot.job.run().await })
        .catch_unwind()
        .await;
    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{e:#}")),
        Err(panic) => Some(format!("panicked: {}", panic_message(panic.as_ref()))),
    };
    if let Some(detail) = &failure {
        error!(job = %name, error = %detail, "job run failed");
    }

    let mut status = lock(&slot.status);
    status.runs += 1;
    if failure.is_some() {
        status.failures += 1;
    }
    status.last_error = failure;
    status.last_finished_at = Some(clock.now());
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler {
    slots: Vec<Arc<Slot>>,
    state: SchedulerState,
    started: bool,
    clock: Arc<dyn Clock>,
    stop_timeout: Duration,
    shutdown: watch::Sender<bool>,
    drivers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            slots: Vec::new(),
            state: SchedulerState::Stopped,
            started: false,
            clock,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            shutdown,
            drivers: Vec::new(),
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn register(&mut self, job: Arc<dyn Job>, interval: Duration) -> Result<(), SchedulerError> {
        let name = job.name().to_string();
        if self.started {
            return Err(SchedulerError::AlreadyStarted);
        }
        if interval.is_zero() {
            return Err(SchedulerError::ZeroInterval(name));
        }
        if self.slots.iter().any(|s| s.job.name() == name) {
            return Err(SchedulerError::DuplicateJob(name));
        }
        self.slots.push(Arc::new(Slot {
            status: Mutex::new(JobStatus {
                name,
                interval_secs: interval.as_secs(),
                last_run_at: None,
                last_finished_at: None,
                next_run_at: None,
                last_error: None,
                runs: 0,
                failures: 0,
                skipped_triggers: 0,
                running: false,
            }),
            job,
            interval,
            running: AtomicBool::new(false),
            current: Mutex::new(None),
        }));
        Ok(())
    }

    /// Spawn one driver per job. Every job runs once right away, then on its
    /// interval. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.started {
            return Err(SchedulerError::AlreadyStarted);
        }
        self.started = true;
        self.state = SchedulerState::Initializing;
        for slot in &self.slots {
            let handle = tokio::spawn(drive(
                Arc::clone(slot),
                Arc::clone(&self.clock),
                self.shutdown.subscribe(),
            ));
            self.drivers.push(handle);
        }
        self.state = SchedulerState::Running;
        info!(jobs = self.slots.len(), "scheduler started");
        Ok(())
    }

    /// Stop accepting triggers and wait for in-flight bodies, up to the stop
    /// timeout. Bodies still running after that are abandoned and logged.
    pub async fn stop(&mut self) {
        if self.state != SchedulerState::Running {
            return;
        }
        self.state = SchedulerState::Stopping;
        let deadline = tokio::time::Instant::now() + self.stop_timeout;
        let _ = self.shutdown.send(true);

        for driver in self.drivers.drain(..) {
            let _ = driver.await;
        }
        for slot in &self.slots {
            let handle = lock(&slot.current).take();
            let Some(handle) = handle else { continue };
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                warn!(
                    job = %slot.job.name(),
                    timeout_secs = self.stop_timeout.as_secs(),
                    "job still running at shutdown; not waiting further"
                );
            }
        }
        self.state = SchedulerState::Stopped;
        info!("scheduler stopped");
    }

    /// Run one job body now, through the same overlap guard and failure
    /// isolation as scheduled runs. Returns `false` if the job was already
    /// running and the trigger was skipped.
    pub async fn trigger(&self, name: &str) -> Result<bool, SchedulerError> {
        let slot = self
            .slots
            .iter()
            .find(|s| s.job.name() == name)
            .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))?;
        if !slot.try_begin() {
            slot.record_skip();
            return Ok(false);
        }
        execute(Arc::clone(slot), Arc::clone(&self.clock)).await;
        Ok(true)
    }

    pub fn status(&self) -> Vec<JobStatus> {
        self.slots.iter().map(|s| lock(&s.status).clone()).collect()
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn job_names(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.job.name().to_string()).collect()
    }
}

async fn drive(slot: Arc<Slot>, clock: Arc<dyn Clock>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(slot.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if *shutdown.borrow() {
                    break;
                }
                if slot.try_begin() {
                    let handle = tokio::spawn(execute(Arc::clone(&slot), Arc::clone(&clock)));
                    *lock(&slot.current) = Some(handle);
                } else {
                    slot.record_skip();
                }
            }
        }
    }
    debug!(job = %slot.job.name(), "driver stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
