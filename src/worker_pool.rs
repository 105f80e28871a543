//! # Worker Pool Module
//!
//! A bounded pool of worker coroutines that runs submitted jobs. The pool is
//! the only thing that bounds request concurrency: the acceptor hands every
//! accepted connection to [`WorkerPool::submit`] and moves on.
//!
//! ## Features
//!
//! - **Bounded concurrency**: exactly `num_workers` coroutines pull jobs, so at
//!   most that many jobs run at once
//! - **FIFO queueing**: submissions beyond capacity wait in an unbounded `may`
//!   MPSC channel and start in submission order as slots free up
//! - **Panic containment**: each job runs under `catch_unwind`; a panicking job
//!   is counted and reported, and its worker keeps serving
//! - **Metrics**: dispatched, completed, active, panicked counters
//!
//! ## Configuration
//!
//! The pool takes its capacity from [`ServerConfig::workers`] and its
//! coroutine stack size from [`RuntimeConfig`]; it reads no environment of
//! its own.
//!
//! [`ServerConfig::workers`]: crate::config::ServerConfig::workers
//! [`RuntimeConfig`]: crate::runtime_config::RuntimeConfig

use crate::diagnostics::{DiagnosticLevel, Diagnostics};
use crate::runtime_config::DEFAULT_STACK_SIZE;
use may::coroutine::JoinHandle;
use may::sync::mpsc;
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A unit of work run by one pooled worker
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Configuration for a worker pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of worker coroutines
    pub num_workers: usize,
    /// Stack size for worker coroutines
    pub stack_size: usize,
}

impl WorkerPoolConfig {
    /// Create a custom configuration
    pub fn new(num_workers: usize, stack_size: usize) -> Self {
        Self {
            num_workers,
            stack_size,
        }
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: crate::config::DEFAULT_WORKERS,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

/// Metrics for a worker pool
#[derive(Debug, Default)]
pub struct WorkerPoolMetrics {
    /// Total jobs submitted
    pub dispatched_count: AtomicU64,
    /// Total jobs finished (including panicked ones)
    pub completed_count: AtomicU64,
    /// Jobs that panicked
    pub panicked_count: AtomicU64,
    /// Jobs currently running
    pub active: AtomicUsize,
    /// Highest number of jobs ever running at once
    pub peak_active: AtomicUsize,
}

impl WorkerPoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_dispatch(&self) {
        self.dispatched_count.fetch_add(1, Ordering::Relaxed);
    }

    fn record_start(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);
    }

    fn record_completion(&self, panicked: bool) {
        if panicked {
            self.panicked_count.fetch_add(1, Ordering::Relaxed);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.completed_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get_dispatched_count(&self) -> u64 {
        self.dispatched_count.load(Ordering::Relaxed)
    }

    pub fn get_completed_count(&self) -> u64 {
        self.completed_count.load(Ordering::SeqCst)
    }

    pub fn get_panicked_count(&self) -> u64 {
        self.panicked_count.load(Ordering::Relaxed)
    }

    pub fn get_active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn get_peak_active(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    /// Jobs submitted but not yet started (approximate)
    pub fn get_queue_depth(&self) -> usize {
        let pending = self
            .get_dispatched_count()
            .saturating_sub(self.get_completed_count()) as usize;
        pending.saturating_sub(self.get_active())
    }
}

#[derive(Debug, Default)]
struct JobState {
    finished: AtomicBool,
    panicked: AtomicBool,
}

/// Handle to a submitted job
///
/// The acceptor never waits on it; it exists so callers can observe
/// completion without blocking.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: u64,
    state: Arc<JobState>,
}

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::Acquire)
    }

    pub fn panicked(&self) -> bool {
        self.state.panicked.load(Ordering::Acquire)
    }

    /// Poll until the job finishes or the timeout elapses. Test helper; the
    /// control thread never calls this.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

/// Returned when submitting to a pool whose workers are gone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolClosed;

impl fmt::Display for PoolClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker pool is shut down")
    }
}

impl std::error::Error for PoolClosed {}

struct Envelope {
    job: Job,
    state: Arc<JobState>,
    id: u64,
}

/// A bounded pool of worker coroutines
pub struct WorkerPool {
    config: WorkerPoolConfig,
    sender: Mutex<Option<mpsc::Sender<Envelope>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    metrics: Arc<WorkerPoolMetrics>,
    next_id: AtomicU64,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .finish()
    }
}

impl WorkerPool {
    /// Spawn `config.num_workers` worker coroutines.
    ///
    /// Worker lifecycle and panics are reported through `diagnostics`, never
    /// written directly from the worker.
    ///
    /// # Errors
    ///
    /// Returns an error if no worker coroutine could be spawned.
    #[allow(unsafe_code)]
    pub fn new(config: WorkerPoolConfig, diagnostics: Diagnostics) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Envelope>();
        let metrics = Arc::new(WorkerPoolMetrics::new());

        // All workers share the one receiver, so they load balance in FIFO order
        let rx = Arc::new(rx);

        info!(
            num_workers = config.num_workers,
            stack_size = config.stack_size,
            "Creating worker pool"
        );

        let mut workers = Vec::with_capacity(config.num_workers);
        for worker_id in 0..config.num_workers {
            let rx = Arc::clone(&rx);
            let metrics = Arc::clone(&metrics);
            let diagnostics = diagnostics.clone();
            let source = format!("worker-{worker_id}");

            // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may runtime.
            // The closure is Send + 'static and owns everything it touches; job
            // panics are caught below so they never unwind through the scheduler.
            let spawn_result = unsafe {
                may::coroutine::Builder::new()
                    .name(source.clone())
                    .stack_size(config.stack_size)
                    .spawn(move || {
                        diagnostics.publish(
                            DiagnosticLevel::Debug,
                            source.as_str(),
                            "worker started",
                        );

                        while let Ok(envelope) = rx.recv() {
                            metrics.record_start();
                            let Envelope { job, state, id } = envelope;

                            let outcome =
                                std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
                            let panicked = outcome.is_err();
                            if let Err(panic) = outcome {
                                diagnostics.publish(
                                    DiagnosticLevel::Error,
                                    source.as_str(),
                                    format!("job {id} panicked: {}", panic_message(&panic)),
                                );
                            }

                            state.panicked.store(panicked, Ordering::Release);
                            state.finished.store(true, Ordering::Release);
                            metrics.record_completion(panicked);
                        }

                        diagnostics.publish(
                            DiagnosticLevel::Debug,
                            source.as_str(),
                            "worker exiting",
                        );
                    })
            };

            match spawn_result {
                Ok(handle) => workers.push(handle),
                Err(e) => warn!(
                    worker_id = worker_id,
                    error = %e,
                    "Failed to spawn worker coroutine"
                ),
            }
        }

        if workers.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "no worker coroutine could be spawned",
            ));
        }

        Ok(Self {
            config,
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            metrics,
            next_id: AtomicU64::new(1),
        })
    }

    /// Queue a job without waiting for it.
    ///
    /// The job starts as soon as a worker is free; submissions beyond capacity
    /// wait in FIFO order. Never blocks on running jobs.
    pub fn submit<F>(&self, job: F) -> Result<JobHandle, PoolClosed>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(JobState::default());
        let envelope = Envelope {
            job: Box::new(job),
            state: Arc::clone(&state),
            id,
        };

        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(PoolClosed)?;
        self.metrics.record_dispatch();
        if sender.send(envelope).is_err() {
            return Err(PoolClosed);
        }
        debug!(job_id = id, "Job submitted to worker pool");
        Ok(JobHandle { id, state })
    }

    /// Close the queue and wait for every worker to finish its backlog.
    ///
    /// In-flight and already-queued jobs run to completion.
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                warn!("Worker coroutine terminated abnormally");
            }
        }
        info!(
            completed = self.metrics.get_completed_count(),
            panicked = self.metrics.get_panicked_count(),
            "Worker pool shut down"
        );
    }

    /// Poll until every submitted job has finished or the timeout elapses.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.metrics.get_completed_count() >= self.metrics.get_dispatched_count() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn capacity(&self) -> usize {
        self.config.num_workers
    }

    /// Whether [`WorkerPool::shutdown`] has closed the queue
    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    pub fn metrics(&self) -> &Arc<WorkerPoolMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets idle workers fall out of recv()
        drop(self.sender.lock().take());
    }
}

/// Best-effort text of a panic payload
pub fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.stack_size, DEFAULT_STACK_SIZE);
    }

    #[test]
    fn test_worker_pool_metrics() {
        let metrics = WorkerPoolMetrics::new();
        assert_eq!(metrics.get_dispatched_count(), 0);
        assert_eq!(metrics.get_queue_depth(), 0);

        metrics.record_dispatch();
        metrics.record_dispatch();
        assert_eq!(metrics.get_queue_depth(), 2);

        metrics.record_start();
        assert_eq!(metrics.get_active(), 1);
        assert_eq!(metrics.get_queue_depth(), 1);

        metrics.record_completion(true);
        assert_eq!(metrics.get_completed_count(), 1);
        assert_eq!(metrics.get_panicked_count(), 1);
        assert_eq!(metrics.get_active(), 0);
        assert_eq!(metrics.get_peak_active(), 1);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static str");
        assert_eq!(panic_message(&payload), "static str");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&payload), "owned");
        let payload: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(&payload), "non-string panic payload");
    }
}
