//! Execution context binding jobs to a manager and an optional cancel group.

use std::sync::Arc;

use crate::cancel_group::JobCancelGroup;
use crate::manager::{self, JobManager};

/// The environment a [`crate::Job`] executes under.
///
/// A context is created by the application before any jobs run, shared by
/// reference (`Arc`) by every job bound to it, and outlives all of them.
/// Contexts are cheap: applications typically create one per cancellation
/// scope over a single manager.
#[derive(Debug)]
pub struct JobContext {
    manager: Arc<JobManager>,
    cancel_group: Option<Arc<JobCancelGroup>>,
}

impl JobContext {
    /// Creates a context with no cancel group.
    pub fn new(manager: Arc<JobManager>) -> Self {
        JobContext {
            manager,
            cancel_group: None,
        }
    }

    /// Creates a context whose jobs observe `cancel_group`.
    pub fn with_cancel_group(manager: Arc<JobManager>, cancel_group: Arc<JobCancelGroup>) -> Self {
        JobContext {
            manager,
            cancel_group: Some(cancel_group),
        }
    }

    /// The manager this context schedules onto.
    pub fn job_manager(&self) -> &Arc<JobManager> {
        &self.manager
    }

    /// The cancel group jobs under this context poll, if any.
    pub fn cancel_group(&self) -> Option<&Arc<JobCancelGroup>> {
        self.cancel_group.as_ref()
    }

    /// The context of the job currently executing on the calling thread.
    ///
    /// Returns `None` on a thread that is not running a job. This is the only
    /// ambient lookup in the crate: constructors always take an explicit
    /// context, and convenience layers (e.g. [`crate::TaskGroup::current`])
    /// use this to default to the enclosing job's context.
    pub fn parent_context() -> Option<Arc<JobContext>> {
        manager::current_thread_job().map(|job| job.context().clone())
    }
}
