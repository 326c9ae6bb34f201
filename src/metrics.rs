#[cfg(feature = "metrics")]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "metrics")]
use std::time::Instant;

/// Optional scheduler throughput counters.
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct Metrics {
    /// Total number of jobs executed.
    pub jobs_completed: AtomicU64,
    /// Pushes to the high-priority ready queue.
    pub high_queue_pushes: AtomicU64,
    /// Pushes to the normal-priority ready queue.
    pub normal_queue_pushes: AtomicU64,
    /// Jobs taken from the shared ready queues.
    pub queue_pops: AtomicU64,
    /// Jobs stolen from another worker's local deque.
    pub worker_steals: AtomicU64,
    /// Time when metrics collection started.
    pub start_time: Instant,
}

#[cfg(feature = "metrics")]
impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            high_queue_pushes: AtomicU64::new(0),
            normal_queue_pushes: AtomicU64::new(0),
            queue_pops: AtomicU64::new(0),
            worker_steals: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Returns a snapshot of current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            high_queue_pushes: self.high_queue_pushes.load(Ordering::Relaxed),
            normal_queue_pushes: self.normal_queue_pushes.load(Ordering::Relaxed),
            queue_pops: self.queue_pops.load(Ordering::Relaxed),
            worker_steals: self.worker_steals.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(feature = "metrics")]
impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}

/// Counter values at a point in time.
#[cfg(feature = "metrics")]
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_completed: u64,
    pub high_queue_pushes: u64,
    pub normal_queue_pushes: u64,
    pub queue_pops: u64,
    pub worker_steals: u64,
    pub elapsed_seconds: f64,
}

#[cfg(feature = "metrics")]
impl MetricsSnapshot {
    /// Jobs per second since the manager started.
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.jobs_completed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Approximate ready-queue depth (pushes minus pops).
    pub fn queue_depth(&self) -> i64 {
        (self.high_queue_pushes + self.normal_queue_pushes) as i64 - self.queue_pops as i64
    }
}
