//! Blocking completion job for non-worker threads.

use std::sync::{Arc, Condvar, Mutex};

use crate::context::JobContext;
use crate::job::Job;

#[derive(Debug, Default)]
struct Signal {
    done: Mutex<bool>,
    ready: Condvar,
}

/// A reusable job that signals a condition variable when it runs, letting a
/// plain thread park until a graph finishes instead of assisting.
///
/// Wire it as the dependent of the graph's final job, then call
/// [`JobCompletion::start_and_wait_for_completion`]. The underlying job
/// carries the completion flag, so a cancellation sweep still releases
/// threads parked here.
///
/// Intended for non-worker threads; from inside a running job prefer
/// [`Job::start_and_wait_for_completion`], which assists instead of parking
/// a worker.
#[derive(Debug)]
pub struct JobCompletion {
    job: Job,
    signal: Arc<Signal>,
}

impl JobCompletion {
    pub fn new(context: &Arc<JobContext>) -> Self {
        let signal = Arc::new(Signal::default());
        let notifier = Arc::clone(&signal);
        let job = Job::reusable(
            move |_| {
                *notifier.done.lock().unwrap() = true;
                notifier.ready.notify_all();
            },
            context,
        )
        .as_completion();
        JobCompletion { job, signal }
    }

    /// The underlying job, for wiring as a dependent.
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Starts the completion job and parks the calling thread until every
    /// prerequisite has completed and the job itself has run.
    pub fn start_and_wait_for_completion(&self) {
        self.job.start();
        let mut done = self.signal.done.lock().unwrap();
        while !*done {
            done = self.signal.ready.wait(done).unwrap();
        }
    }

    /// Re-arms for another run. See [`Job::reset`] for the
    /// `clear_dependent` semantics.
    pub fn reset(&self, clear_dependent: bool) {
        *self.signal.done.lock().unwrap() = false;
        self.job.reset(clear_dependent);
    }
}
