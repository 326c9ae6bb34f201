//! Worker thread pool: work-stealing ready queues and the assist loop.
//!
//! Worker threads continuously pull ready jobs and execute them: local deque
//! first, then the shared injectors (high priority before normal), then steal
//! from other workers. Non-worker threads participate through
//! [`WorkerPool::assist_until`], draining the shared queues instead of
//! blocking idle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::deque::{Injector, Steal, Stealer, Worker as Deque};

use crate::job::Job;
use crate::manager::run_job;
#[cfg(feature = "metrics")]
use crate::metrics::Metrics;
use crate::PinningStrategy;

struct Shared {
    high: Injector<Job>,
    normal: Injector<Job>,
    stealers: Vec<Stealer<Job>>,
    shutdown: AtomicBool,
    #[cfg(feature = "metrics")]
    metrics: Arc<Metrics>,
}

impl Shared {
    /// Takes one ready job from the shared queues, high priority first.
    fn find_shared_job(&self) -> Option<Job> {
        for injector in [&self.high, &self.normal] {
            loop {
                match injector.steal() {
                    Steal::Success(job) => {
                        #[cfg(feature = "metrics")]
                        self.metrics.queue_pops.fetch_add(1, Ordering::Relaxed);
                        return Some(job);
                    }
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }
        let stolen = self
            .stealers
            .iter()
            .map(|stealer| stealer.steal())
            .find_map(|steal| match steal {
                Steal::Success(job) => Some(job),
                _ => None,
            });
        #[cfg(feature = "metrics")]
        if stolen.is_some() {
            self.metrics.worker_steals.fetch_add(1, Ordering::Relaxed);
        }
        stolen
    }
}

/// A pool of worker threads sharing a pair of prioritized injectors and
/// per-worker steal targets.
pub(crate) struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub(crate) fn new(num_threads: usize, pinning: PinningStrategy) -> WorkerPool {
        let mut locals = Vec::with_capacity(num_threads);
        let mut stealers = Vec::with_capacity(num_threads);
        for _ in 0..num_threads {
            let deque = Deque::new_fifo();
            stealers.push(deque.stealer());
            locals.push(deque);
        }

        let shared = Arc::new(Shared {
            high: Injector::new(),
            normal: Injector::new(),
            stealers,
            shutdown: AtomicBool::new(false),
            #[cfg(feature = "metrics")]
            metrics: Arc::new(Metrics::new()),
        });

        let workers = locals
            .into_iter()
            .enumerate()
            .map(|(id, local)| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("jobgraph-worker-{id}"))
                    .spawn(move || {
                        pin_worker(id, pinning);
                        worker_loop(id, local, shared);
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        WorkerPool {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Enqueues a ready job. Safe from any thread, including a job's own
    /// completion path.
    pub(crate) fn push(&self, job: Job) {
        if job.priority() > 0 {
            #[cfg(feature = "metrics")]
            self.shared
                .metrics
                .high_queue_pushes
                .fetch_add(1, Ordering::Relaxed);
            self.shared.high.push(job);
        } else {
            #[cfg(feature = "metrics")]
            self.shared
                .metrics
                .normal_queue_pushes
                .fetch_add(1, Ordering::Relaxed);
            self.shared.normal.push(job);
        }
    }

    /// Executes pending jobs on the calling thread until `done` holds.
    ///
    /// Works from worker threads (their local deques are reachable through
    /// their stealers) and from plain threads alike.
    pub(crate) fn assist_until(&self, done: impl Fn() -> bool) {
        let mut idle_spins = 0u32;
        while !done() {
            match self.shared.find_shared_job() {
                Some(job) => {
                    run_job(job);
                    idle_spins = 0;
                }
                None if idle_spins < 64 => {
                    std::hint::spin_loop();
                    idle_spins += 1;
                }
                None => thread::yield_now(),
            }
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.shared.stealers.len()
    }

    #[cfg(feature = "metrics")]
    pub(crate) fn metrics(&self) -> &Arc<Metrics> {
        &self.shared.metrics
    }

    /// Drains the ready queues, stops the workers, and joins them.
    /// Returns the number of worker threads that panicked, or `None` when
    /// the pool was already stopped.
    pub(crate) fn shutdown(&self) -> Option<usize> {
        let handles: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        if handles.is_empty() {
            return None;
        }

        while !(self.shared.high.is_empty() && self.shared.normal.is_empty()) {
            thread::sleep(Duration::from_millis(1));
        }
        // Jobs already popped from a queue are still in flight.
        thread::sleep(Duration::from_millis(10));

        self.shared.shutdown.store(true, Ordering::Relaxed);

        let mut panicked = 0;
        for handle in handles {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        Some(panicked)
    }
}

fn worker_loop(id: usize, local: Deque<Job>, shared: Arc<Shared>) {
    tracing::debug!(worker = id, "worker thread starting");
    loop {
        if shared.shutdown.load(Ordering::Relaxed) {
            break;
        }

        let job = local
            .pop()
            .or_else(|| find_job_for_worker(&local, &shared));
        match job {
            Some(job) => run_job(job),
            None => thread::yield_now(),
        }
    }
    tracing::debug!(worker = id, "worker thread stopping");
}

/// Refills the local deque from the injectors in batches, falling back to
/// stealing from other workers.
fn find_job_for_worker(local: &Deque<Job>, shared: &Shared) -> Option<Job> {
    for injector in [&shared.high, &shared.normal] {
        loop {
            match injector.steal_batch_and_pop(local) {
                Steal::Success(job) => {
                    #[cfg(feature = "metrics")]
                    shared.metrics.queue_pops.fetch_add(1, Ordering::Relaxed);
                    return Some(job);
                }
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }
    }

    let stolen = shared
        .stealers
        .iter()
        .map(|stealer| stealer.steal())
        .find_map(|steal| match steal {
            Steal::Success(job) => Some(job),
            _ => None,
        });
    #[cfg(feature = "metrics")]
    if stolen.is_some() {
        shared.metrics.worker_steals.fetch_add(1, Ordering::Relaxed);
    }
    stolen
}

fn pin_worker(id: usize, pinning: PinningStrategy) {
    let target = match pinning {
        PinningStrategy::None => return,
        PinningStrategy::Linear => id,
        // Even logical processors only, skipping SMT siblings.
        PinningStrategy::AvoidSmt => id * 2,
    };
    if let Some(core_ids) = core_affinity::get_core_ids() {
        if let Some(core) = core_ids.get(target) {
            core_affinity::set_for_current(*core);
        }
    }
}
