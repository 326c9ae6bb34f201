//! Cooperative cancellation sweeps across nested cancel groups.
//!
//! Three contexts under a chain of cancel groups run jobs adding 100, 10,
//! and 1; cancelling a group suppresses its own scope and every scope nested
//! under it, while the completion job that releases the waiting thread still
//! runs.

use jobgraph::{Job, JobCancelGroup, JobCompletion, JobContext, JobManager, JobManagerDesc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct CancellationFixture {
    manager: Arc<JobManager>,
    groups: [Arc<JobCancelGroup>; 3],
    contexts: [Arc<JobContext>; 3],
    value: Arc<AtomicU64>,
}

impl CancellationFixture {
    fn new() -> Self {
        let manager = Arc::new(JobManager::new(JobManagerDesc {
            worker_threads: 2,
            ..Default::default()
        }));
        let g1 = Arc::new(JobCancelGroup::new());
        let g2 = Arc::new(JobCancelGroup::with_parent(g1.clone()));
        let g3 = Arc::new(JobCancelGroup::with_parent(g2.clone()));
        let contexts = [
            Arc::new(JobContext::with_cancel_group(manager.clone(), g1.clone())),
            Arc::new(JobContext::with_cancel_group(manager.clone(), g2.clone())),
            Arc::new(JobContext::with_cancel_group(manager.clone(), g3.clone())),
        ];
        CancellationFixture {
            manager,
            groups: [g1, g2, g3],
            contexts,
            value: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Starts one adder per context, all feeding `done`, and waits.
    fn run_sweep(&self, done: &JobCompletion) -> u64 {
        self.value.store(0, Ordering::SeqCst);
        for (context, amount) in self.contexts.iter().zip([100u64, 10, 1]) {
            let value = self.value.clone();
            let job = Job::new(
                move |_| {
                    value.fetch_add(amount, Ordering::SeqCst);
                },
                context,
            );
            job.set_dependent(done.job());
            job.start();
        }
        done.start_and_wait_for_completion();
        self.value.load(Ordering::SeqCst)
    }
}

#[test]
fn test_cancellation_sweeps_nested_groups() {
    let fixture = CancellationFixture::new();
    let done = JobCompletion::new(&fixture.contexts[0]);

    assert_eq!(fixture.run_sweep(&done), 111);

    // Cancel before starting jobs, so the sweep is deterministic.
    done.reset(true);
    fixture.groups[2].cancel();
    assert_eq!(fixture.run_sweep(&done), 110);
    fixture.groups[2].reset();

    done.reset(true);
    fixture.groups[1].cancel();
    assert_eq!(fixture.run_sweep(&done), 100);
    fixture.groups[1].reset();

    done.reset(true);
    fixture.groups[0].cancel();
    assert_eq!(fixture.run_sweep(&done), 0);
    fixture.groups[0].reset();

    // Everything runs again once the flags are cleared.
    done.reset(true);
    assert_eq!(fixture.run_sweep(&done), 111);

    fixture.manager.shutdown().expect("shutdown failed");
}

#[test]
fn test_completion_job_survives_cancelled_context() {
    let manager = Arc::new(JobManager::new(JobManagerDesc {
        worker_threads: 1,
        ..Default::default()
    }));
    let group = Arc::new(JobCancelGroup::new());
    let context = Arc::new(JobContext::with_cancel_group(manager.clone(), group.clone()));
    group.cancel();

    // The waiting thread is released even though the whole context is
    // cancelled: the completion job is exempt.
    let skipped = Arc::new(AtomicU64::new(0));
    let done = JobCompletion::new(&context);
    let skipped_clone = skipped.clone();
    let job = Job::new(
        move |_| {
            skipped_clone.fetch_add(1, Ordering::SeqCst);
        },
        &context,
    );
    job.set_dependent(done.job());
    job.start();
    done.start_and_wait_for_completion();

    assert_eq!(skipped.load(Ordering::SeqCst), 0);
    manager.shutdown().expect("shutdown failed");
}

#[test]
fn test_cancelled_job_still_propagates_completion() {
    let manager = Arc::new(JobManager::new(JobManagerDesc {
        worker_threads: 1,
        ..Default::default()
    }));
    let group = Arc::new(JobCancelGroup::new());
    let context = Arc::new(JobContext::with_cancel_group(manager.clone(), group.clone()));

    let ran = Arc::new(AtomicU64::new(0));
    let done = JobCompletion::new(&context);

    // Chain: cancelled -> follower -> done. The follower is also cancelled,
    // but both decrements still flow so the chain drains.
    let cancelled = Job::new(|_| {}, &context);
    let ran_clone = ran.clone();
    let follower = Job::new(
        move |_| {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        },
        &context,
    );
    cancelled.set_dependent(&follower);
    follower.set_dependent(done.job());

    group.cancel();
    follower.start();
    cancelled.start();
    done.start_and_wait_for_completion();

    assert_eq!(ran.load(Ordering::SeqCst), 0);
    manager.shutdown().expect("shutdown failed");
}
