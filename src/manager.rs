//! The scheduler: pending-job pool, dispatch, assist and suspend primitives.
//!
//! The manager owns the set of ready-to-run jobs and the worker threads that
//! execute them, and provides the two primitives the job protocol needs from
//! a scheduler: "suspend me until my count reaches zero" and "start this job
//! and let me help until it completes". A waiting thread never idles while
//! ready jobs exist; it assists by draining the shared queues.
//!
//! With the `synchronous` cargo feature the worker pool disappears entirely
//! and a job is executed inline the moment it becomes ready, on the thread
//! that performed the final decrement. Dependency resolution order is
//! identical to the concurrent build; only the parallelism differs.

use std::cell::RefCell;
use std::sync::Arc;
#[cfg(not(feature = "synchronous"))]
use std::thread;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::Job;
#[cfg(all(feature = "metrics", feature = "synchronous"))]
use crate::metrics::Metrics;
#[cfg(feature = "metrics")]
use crate::metrics::MetricsSnapshot;
#[cfg(not(feature = "synchronous"))]
use crate::worker::WorkerPool;
use crate::PinningStrategy;

/// Errors surfaced by [`JobManager`].
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{count} worker thread(s) panicked")]
    WorkerPanicked { count: usize },
}

/// Configuration for a [`JobManager`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobManagerDesc {
    /// Number of worker threads; 0 means one per available core.
    pub worker_threads: usize,
    /// How worker threads are pinned to cores.
    pub pinning: PinningStrategy,
}

impl Default for JobManagerDesc {
    fn default() -> Self {
        JobManagerDesc {
            worker_threads: 0,
            pinning: PinningStrategy::default(),
        }
    }
}

thread_local! {
    static CURRENT_JOB: RefCell<Option<Job>> = const { RefCell::new(None) };
}

/// Runs `job` with the thread's current-job slot pointing at it, restoring
/// the previous occupant afterwards so assist loops nest correctly.
pub(crate) fn run_job(job: Job) {
    let previous = CURRENT_JOB.with(|slot| slot.borrow_mut().replace(job.clone()));
    #[cfg(feature = "metrics")]
    let manager = job.context().job_manager().clone();
    job.execute();
    #[cfg(feature = "metrics")]
    manager
        .metrics_counters()
        .jobs_completed
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    CURRENT_JOB.with(|slot| *slot.borrow_mut() = previous);
}

/// The job currently executing on the calling thread, regardless of which
/// manager it belongs to.
pub(crate) fn current_thread_job() -> Option<Job> {
    CURRENT_JOB.with(|slot| slot.borrow().clone())
}

/// The scheduler behind every [`crate::JobContext`].
pub struct JobManager {
    #[cfg(not(feature = "synchronous"))]
    pool: WorkerPool,
    #[cfg(all(feature = "metrics", feature = "synchronous"))]
    metrics: Arc<Metrics>,
}

impl JobManager {
    /// Creates a manager and spawns its worker pool (none under the
    /// `synchronous` feature, where `desc` only exists for API parity).
    pub fn new(desc: JobManagerDesc) -> Self {
        #[cfg(not(feature = "synchronous"))]
        {
            let threads = if desc.worker_threads == 0 {
                thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
            } else {
                desc.worker_threads
            };
            tracing::info!(workers = threads, pinning = ?desc.pinning, "job manager starting");
            JobManager {
                pool: WorkerPool::new(threads, desc.pinning),
            }
        }
        #[cfg(feature = "synchronous")]
        {
            let _ = desc;
            tracing::info!("job manager starting (synchronous)");
            JobManager {
                #[cfg(feature = "metrics")]
                metrics: Arc::new(Metrics::new()),
            }
        }
    }

    /// Enqueues a job whose dependent count just reached zero.
    ///
    /// Safe to call from any thread, including from inside another job's
    /// completion path. Under `synchronous` the job executes inline before
    /// this returns.
    pub fn add_pending_job(&self, job: Job) {
        debug_assert_eq!(job.dependent_count(), 0, "job enqueued with outstanding prerequisites");
        #[cfg(not(feature = "synchronous"))]
        self.pool.push(job);
        #[cfg(feature = "synchronous")]
        run_job(job);
    }

    /// Blocks the calling thread until `job`'s dependent count reaches zero,
    /// executing other pending jobs instead of idling.
    pub fn suspend_job_until_ready(&self, job: &Job) {
        #[cfg(not(feature = "synchronous"))]
        self.pool.assist_until(|| job.dependent_count() == 0);
        #[cfg(feature = "synchronous")]
        debug_assert_eq!(
            job.dependent_count(),
            0,
            "synchronous execution completes children inline"
        );
    }

    /// Starts `job` and has the calling thread assist the pool until it has
    /// completed.
    pub fn start_job_and_assist_until_complete(&self, job: &Job) {
        let latch = Job::empty(job.context());
        job.set_dependent(&latch);
        job.start();
        latch.start();
        #[cfg(not(feature = "synchronous"))]
        self.pool.assist_until(|| latch.dependent_count() == 0);
        #[cfg(feature = "synchronous")]
        debug_assert_eq!(latch.dependent_count(), 0);
    }

    /// The job the calling thread is currently executing for this manager,
    /// or `None` if the thread is not a worker (or is running a job of a
    /// different manager).
    pub fn current_job(&self) -> Option<Job> {
        current_thread_job()
            .filter(|job| Arc::as_ptr(job.context().job_manager()) == self as *const JobManager)
    }

    /// Number of worker threads (0 under `synchronous`).
    pub fn num_workers(&self) -> usize {
        #[cfg(not(feature = "synchronous"))]
        {
            self.pool.size()
        }
        #[cfg(feature = "synchronous")]
        {
            0
        }
    }

    /// Stops and joins the worker threads. Callers are expected to have
    /// waited for their graphs first; ready jobs still queued are drained
    /// before the stop signal. Idempotent.
    pub fn shutdown(&self) -> Result<(), JobError> {
        #[cfg(not(feature = "synchronous"))]
        match self.pool.shutdown() {
            None => {}
            Some(0) => tracing::info!("job manager stopped"),
            Some(count) => {
                tracing::error!(panicked = count, "job manager stopped with worker panics");
                return Err(JobError::WorkerPanicked { count });
            }
        }
        Ok(())
    }

    /// Scheduler throughput counters since the manager started.
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics_counters().snapshot()
    }

    #[cfg(feature = "metrics")]
    pub(crate) fn metrics_counters(&self) -> &crate::metrics::Metrics {
        #[cfg(not(feature = "synchronous"))]
        {
            self.pool.metrics().as_ref()
        }
        #[cfg(feature = "synchronous")]
        {
            self.metrics.as_ref()
        }
    }
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("workers", &self.num_workers())
            .finish()
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
