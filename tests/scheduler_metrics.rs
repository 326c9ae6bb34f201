#![cfg(feature = "metrics")]

use jobgraph::{Job, JobContext, JobManager, JobManagerDesc};
use std::sync::Arc;

#[test]
fn test_counters_track_completed_jobs() {
    let manager = Arc::new(JobManager::new(JobManagerDesc {
        worker_threads: 2,
        ..Default::default()
    }));
    let context = Arc::new(JobContext::new(manager.clone()));

    for _ in 0..20 {
        let job = Job::new(|_| {}, &context);
        job.start_and_assist_until_complete();
    }

    let snapshot = manager.metrics();
    // Every user job plus its assist latch ran through the scheduler.
    assert!(snapshot.jobs_completed >= 20);
    assert!(snapshot.jobs_per_second() > 0.0);
    manager.shutdown().expect("shutdown failed");
}
