//! # jobgraph - Fine-Grained Job Scheduling
//!
//! A cooperative work-stealing task scheduler built around dependency
//! counting: jobs are wired into fan-in trees, and a job becomes ready the
//! instant its last prerequisite completes. Waiting threads assist the pool
//! by executing other pending jobs instead of idling.
//!
//! ## Architecture
//!
//! - **[`Job`]**: the unit of work; a closure plus a packed atomic word
//!   holding the dependent count, flag bits, and priority
//! - **[`JobContext`]**: binds jobs to a manager and an optional cancel group
//! - **[`JobManager`]**: the scheduler; work-stealing worker threads plus the
//!   assist and suspend primitives
//! - **[`JobCancelGroup`]**: shared pollable cancellation flag, chainable
//! - **[`JobCompletion`]**, **[`TaskGroup`]**, [`algorithms`]: conveniences
//!   composed from the primitives
//!
//! ## Example
//!
//! ```no_run
//! use jobgraph::{Job, JobContext, JobManager, JobManagerDesc};
//! use std::sync::Arc;
//!
//! let manager = Arc::new(JobManager::new(JobManagerDesc::default()));
//! let context = Arc::new(JobContext::new(manager.clone()));
//!
//! let job = Job::new(|_| println!("hello from a job"), &context);
//! job.start_and_assist_until_complete();
//!
//! manager.shutdown().expect("worker panicked");
//! ```
//!
//! The `synchronous` cargo feature swaps the worker pool for inline
//! execution with identical dependency-resolution order, for single-threaded
//! builds and deterministic debugging.

pub mod algorithms;
pub mod cancel_group;
pub mod completion;
pub mod context;
pub mod job;
pub mod manager;
pub mod metrics;
pub mod task_group;
#[cfg(not(feature = "synchronous"))]
mod worker;

use serde::{Deserialize, Serialize};

/// Strategy for pinning worker threads to CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PinningStrategy {
    /// No pinning (standard OS scheduling).
    #[default]
    None,
    /// Linear pinning (worker i -> logical processor i).
    Linear,
    /// Pin to even-numbered logical processors only, avoiding SMT contention.
    AvoidSmt,
}

pub use cancel_group::JobCancelGroup;
pub use completion::JobCompletion;
pub use context::JobContext;
pub use job::Job;
pub use manager::{JobError, JobManager, JobManagerDesc};
pub use task_group::TaskGroup;

#[cfg(feature = "metrics")]
pub use metrics::{Metrics, MetricsSnapshot};
