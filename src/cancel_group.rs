//! Cooperative cancellation groups.
//!
//! A cancel group is a shared, pollable flag scoped to a logical set of jobs.
//! Cancellation is never preemptive: a running job keeps running and is
//! expected to observe [`crate::Job::is_cancelled`] at its own checkpoints.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shared cancellation flag for a cooperative group of jobs.
///
/// Groups may be chained: a group constructed with a parent reports cancelled
/// whenever the parent (or any further ancestor) is cancelled, so cancelling
/// an outer group sweeps every nested scope under it.
#[derive(Debug, Default)]
pub struct JobCancelGroup {
    cancelled: AtomicBool,
    parent: Option<Arc<JobCancelGroup>>,
}

impl JobCancelGroup {
    /// Creates a root cancel group.
    pub fn new() -> Self {
        JobCancelGroup {
            cancelled: AtomicBool::new(false),
            parent: None,
        }
    }

    /// Creates a group nested under `parent`.
    pub fn with_parent(parent: Arc<JobCancelGroup>) -> Self {
        JobCancelGroup {
            cancelled: AtomicBool::new(false),
            parent: Some(parent),
        }
    }

    /// Marks this group (and therefore every group nested under it) cancelled.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Clears this group's own flag. An ancestor's flag is untouched.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
    }

    /// True if this group or any ancestor has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return true;
        }
        match &self.parent {
            Some(parent) => parent.is_cancelled(),
            None => false,
        }
    }
}
