//! Structured fork/join convenience over the dependent protocol.

use std::sync::Arc;

use crate::context::JobContext;
use crate::job::Job;

/// Runs a set of closures and joins on all of them.
///
/// Each [`TaskGroup::run`] spawns a job wired to an internal join point;
/// [`TaskGroup::wait`] completes when every spawned closure has. Waiting
/// from inside a running job assists the scheduler rather than blocking, so
/// groups nest arbitrarily deep without starving the worker pool. A group is
/// reusable after `wait` returns.
#[derive(Debug)]
pub struct TaskGroup {
    context: Arc<JobContext>,
    join: Job,
}

impl TaskGroup {
    pub fn new(context: &Arc<JobContext>) -> Self {
        TaskGroup {
            context: context.clone(),
            join: Job::empty(context),
        }
    }

    /// A group bound to the context of the job currently executing on this
    /// thread. `None` outside a job.
    pub fn current() -> Option<TaskGroup> {
        JobContext::parent_context().map(|context| TaskGroup::new(&context))
    }

    /// Spawns `work` into the group.
    pub fn run<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let job = Job::new(move |_| work(), &self.context);
        job.set_dependent(&self.join);
        job.start();
    }

    /// Waits until every closure spawned since the last `wait` has
    /// completed, then re-arms the group.
    pub fn wait(&self) {
        self.join.start_and_wait_for_completion();
        self.join.reset(true);
    }
}
