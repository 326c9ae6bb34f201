//! Parallel building blocks composed from the job primitives.
//!
//! Every helper here is plain composition: spawn jobs wired to a shared join
//! point, then either wait on it (`parallel_invoke`, `parallel_for`) or hand
//! the caller's dependent to each job instead (`*_start` variants, which
//! return immediately and let the caller observe completion through its own
//! wiring, typically a [`crate::JobCompletion`]).

use std::ops::Range;
use std::sync::Arc;

use crate::context::JobContext;
use crate::job::Job;

/// Runs a batch of closures and waits for all of them.
///
/// From inside a running job the wait assists the scheduler, so recursive
/// invocations are safe.
pub fn parallel_invoke<I>(jobs: I, context: &Arc<JobContext>)
where
    I: IntoIterator<Item = Box<dyn FnOnce() + Send + 'static>>,
{
    let join = Job::empty(context);
    spawn_batch(jobs, context, &join);
    join.start_and_wait_for_completion();
}

/// Starts a batch of closures, each wired to `dependent`, and returns
/// immediately. `dependent` must not have been started yet.
pub fn parallel_invoke_start<I>(jobs: I, context: &Arc<JobContext>, dependent: &Job)
where
    I: IntoIterator<Item = Box<dyn FnOnce() + Send + 'static>>,
{
    spawn_batch(jobs, context, dependent);
}

fn spawn_batch<I>(jobs: I, context: &Arc<JobContext>, dependent: &Job)
where
    I: IntoIterator<Item = Box<dyn FnOnce() + Send + 'static>>,
{
    for work in jobs {
        let job = Job::new(move |_| work(), context);
        job.set_dependent(dependent);
        job.start();
    }
}

/// Applies `body` to every index in `range`, `chunk_size` indices per job,
/// and waits for all of them.
pub fn parallel_for<F>(range: Range<usize>, chunk_size: usize, body: F, context: &Arc<JobContext>)
where
    F: Fn(usize) + Send + Sync + 'static,
{
    let join = Job::empty(context);
    spawn_chunks(range, chunk_size, body, context, &join);
    join.start_and_wait_for_completion();
}

/// Non-blocking [`parallel_for`]: every chunk job is wired to `dependent`.
pub fn parallel_for_start<F>(
    range: Range<usize>,
    chunk_size: usize,
    body: F,
    context: &Arc<JobContext>,
    dependent: &Job,
) where
    F: Fn(usize) + Send + Sync + 'static,
{
    spawn_chunks(range, chunk_size, body, context, dependent);
}

fn spawn_chunks<F>(
    range: Range<usize>,
    chunk_size: usize,
    body: F,
    context: &Arc<JobContext>,
    dependent: &Job,
) where
    F: Fn(usize) + Send + Sync + 'static,
{
    let chunk_size = chunk_size.max(1);
    let body = Arc::new(body);
    let mut chunk_start = range.start;
    while chunk_start < range.end {
        let chunk_end = chunk_start.saturating_add(chunk_size).min(range.end);
        let body = Arc::clone(&body);
        let job = Job::new(
            move |_| {
                for index in chunk_start..chunk_end {
                    body(index);
                }
            },
            context,
        );
        job.set_dependent(dependent);
        job.start();
        chunk_start = chunk_end;
    }
}
