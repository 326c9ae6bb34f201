//! A panicking work function must not wedge the graph or kill the worker.

use jobgraph::{Job, JobCompletion, JobContext, JobManager, JobManagerDesc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn fixture(workers: usize) -> (Arc<JobManager>, Arc<JobContext>) {
    let manager = Arc::new(JobManager::new(JobManagerDesc {
        worker_threads: workers,
        ..Default::default()
    }));
    let context = Arc::new(JobContext::new(manager.clone()));
    (manager, context)
}

#[test]
fn test_panicking_job_still_releases_dependent() {
    let (manager, context) = fixture(1);

    let done = JobCompletion::new(&context);
    let job = Job::new(|_| panic!("intentional panic for testing"), &context);
    job.set_dependent(done.job());
    job.start();
    // Would hang forever if the panic swallowed the completion decrement.
    done.start_and_wait_for_completion();

    manager.shutdown().expect("shutdown failed");
}

#[test]
fn test_worker_survives_a_panicking_job() {
    let (manager, context) = fixture(1);

    let done = JobCompletion::new(&context);
    let boom = Job::new(|_| panic!("boom"), &context);
    boom.set_dependent(done.job());
    boom.start();
    done.start_and_wait_for_completion();

    // The same worker must still process subsequent jobs.
    let ran = Arc::new(AtomicU64::new(0));
    done.reset(true);
    let ran_clone = ran.clone();
    let job = Job::new(
        move |_| {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        },
        &context,
    );
    job.set_dependent(done.job());
    job.start();
    done.start_and_wait_for_completion();

    assert_eq!(ran.load(Ordering::SeqCst), 1);
    manager.shutdown().expect("shutdown failed");
}

#[test]
fn test_panicking_child_unblocks_parent() {
    let (manager, context) = fixture(2);
    let reached = Arc::new(AtomicU64::new(0));

    let done = JobCompletion::new(&context);
    let reached_clone = reached.clone();
    let parent = Job::new(
        move |job| {
            let child = Job::new(|_| panic!("child panic"), job.context());
            job.start_as_child(&child);
            job.wait_for_children();
            reached_clone.fetch_add(1, Ordering::SeqCst);
        },
        &context,
    );
    parent.set_dependent(done.job());
    parent.start();
    done.start_and_wait_for_completion();

    assert_eq!(reached.load(Ordering::SeqCst), 1);
    manager.shutdown().expect("shutdown failed");
}
