//! The job dependency-count state machine.
//!
//! A [`Job`] is the atomic unit of schedulable work: a closure plus a single
//! packed atomic word that combines the dependent count with the job's flag
//! bits and priority. Jobs are wired into fan-in trees through a single
//! `dependent` back-reference; a job's completion decrements its dependent's
//! count, and the decrement that reaches zero is what hands the dependent to
//! the scheduler.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

#[cfg(debug_assertions)]
use std::sync::atomic::AtomicU8;

use crate::context::JobContext;

// Packed layout of `Inner::state`, low to high:
//   bits 0..16   dependent count
//   bit  16      AUTO_DELETE  - one-shot job, work payload dropped after the run
//   bit  17      COMPLETION   - runs even when the context's cancel group fires
//   bit  18      CHILD_JOBS   - outstanding children; count reaching zero must
//                               not enqueue (the job is already processing)
//   bits 24..32  signed priority
const COUNT_BITS: u32 = 16;
const COUNT_MASK: u32 = (1 << COUNT_BITS) - 1;
const FLAG_AUTO_DELETE: u32 = 1 << 16;
const FLAG_COMPLETION: u32 = 1 << 17;
const FLAG_CHILD_JOBS: u32 = 1 << 18;
const PRIORITY_SHIFT: u32 = 24;
const PRIORITY_MASK: u32 = 0xFF << PRIORITY_SHIFT;

/// Assertion-only lifecycle tag. The packed count/flags word is the real
/// state; this exists purely to catch protocol misuse in debug builds.
#[cfg(debug_assertions)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DebugState {
    Setup,
    Started,
    Pending,
    Processing,
    Suspended,
}

#[cfg(debug_assertions)]
impl DebugState {
    fn from_u8(value: u8) -> DebugState {
        match value {
            0 => DebugState::Setup,
            1 => DebugState::Started,
            2 => DebugState::Pending,
            3 => DebugState::Processing,
            _ => DebugState::Suspended,
        }
    }
}

type WorkFn = Box<dyn FnMut(&Job) + Send>;

struct Inner {
    /// Packed dependent count + flags + priority. The only hot shared state.
    state: AtomicU32,
    /// The single job notified when this one completes. Written during
    /// wiring (single-threaded by contract), read on the completion path.
    dependent: Mutex<Option<Job>>,
    /// The work payload. Taken out for the duration of each run; one-shot
    /// jobs never put it back.
    work: Mutex<Option<WorkFn>>,
    context: Arc<JobContext>,
    #[cfg(debug_assertions)]
    debug_state: AtomicU8,
}

/// A schedulable unit of work. Cheap to clone; clones share the same job.
///
/// The dependent count starts at 1 at construction so a job can never be
/// dispatched before [`Job::start`] consumes that bootstrap count. Wiring
/// ([`Job::set_dependent`] and friends) must happen before `start`; the
/// scheduler runs the work function exactly once per count cycle, then
/// decrements the dependent, propagating completion one level up the tree.
#[derive(Clone)]
pub struct Job {
    inner: Arc<Inner>,
}

impl Job {
    /// Creates a one-shot job from `work`. The payload (and its captures) is
    /// dropped after the run; the job cannot be [`Job::reset`].
    pub fn new<F>(work: F, context: &Arc<JobContext>) -> Job
    where
        F: FnOnce(&Job) + Send + 'static,
    {
        let mut work = Some(work);
        Job::build(
            Box::new(move |job| {
                if let Some(work) = work.take() {
                    work(job);
                }
            }),
            context.clone(),
            FLAG_AUTO_DELETE,
        )
    }

    /// Creates a job that keeps its payload and may be reused via
    /// [`Job::reset`] once the current run has completed.
    pub fn reusable<F>(work: F, context: &Arc<JobContext>) -> Job
    where
        F: FnMut(&Job) + Send + 'static,
    {
        Job::build(Box::new(work), context.clone(), 0)
    }

    /// A reusable no-op job, useful as a join point or fence.
    pub fn empty(context: &Arc<JobContext>) -> Job {
        Job::reusable(|_| {}, context)
    }

    fn build(work: WorkFn, context: Arc<JobContext>, flags: u32) -> Job {
        Job {
            inner: Arc::new(Inner {
                state: AtomicU32::new(1 | flags),
                dependent: Mutex::new(None),
                work: Mutex::new(Some(work)),
                context,
                #[cfg(debug_assertions)]
                debug_state: AtomicU8::new(DebugState::Setup as u8),
            }),
        }
    }

    /// Sets the priority sub-field. Jobs with priority above zero are drained
    /// from the scheduler's ready queue ahead of normal jobs. Setup only.
    pub fn with_priority(self, priority: i8) -> Job {
        #[cfg(debug_assertions)]
        self.debug_expect(&[DebugState::Setup], "priority can only change before start");
        let state = self.inner.state.load(Ordering::Acquire);
        let state = (state & !PRIORITY_MASK) | ((priority as u8 as u32) << PRIORITY_SHIFT);
        self.inner.state.store(state, Ordering::Release);
        self
    }

    /// Marks this job as a completion job: it runs even when its context's
    /// cancel group fires, so jobs that release synchronization primitives
    /// still execute during a cancellation sweep. Setup only.
    pub fn as_completion(self) -> Job {
        #[cfg(debug_assertions)]
        self.debug_expect(&[DebugState::Setup], "completion flag can only change before start");
        self.inner.state.fetch_or(FLAG_COMPLETION, Ordering::AcqRel);
        self
    }

    // ---------------------------------------------------------------------
    // Dependency wiring

    /// Establishes "when `self` completes, decrement `dependent`'s count".
    ///
    /// Both jobs must still be in setup, and `self` must not already have a
    /// dependent. Fan-in is expressed by many jobs naming the same dependent;
    /// fan-out is not supported by this structure.
    pub fn set_dependent(&self, dependent: &Job) {
        #[cfg(debug_assertions)]
        {
            self.debug_expect(&[DebugState::Setup], "set_dependent on a started job");
            dependent.debug_expect(&[DebugState::Setup], "set_dependent to a started job");
        }
        self.store_dependent(dependent, false);
    }

    /// Like [`Job::set_dependent`], but the dependent may already be started
    /// or suspended.
    ///
    /// Experts only: the caller must independently guarantee the dependent
    /// has not yet begun the portion of work gated by this prerequisite. If
    /// that guarantee is wrong the dependent can run before `self` finishes,
    /// and debug assertions will not reliably catch the race.
    pub fn set_dependent_started(&self, dependent: &Job) {
        #[cfg(debug_assertions)]
        {
            self.debug_expect(&[DebugState::Setup], "set_dependent_started on a started job");
            dependent.debug_expect(
                &[DebugState::Setup, DebugState::Started, DebugState::Suspended],
                "set_dependent_started to a pending or processing job",
            );
        }
        self.store_dependent(dependent, false);
    }

    /// Registers `self` as a child of the currently-processing `dependent`.
    ///
    /// Increments the dependent's count and sets its `CHILD_JOBS` flag as one
    /// atomic operation: a child's completion must only unblock the parent's
    /// [`Job::wait_for_children`], never enqueue the already-running parent.
    pub fn set_dependent_child(&self, dependent: &Job) {
        #[cfg(debug_assertions)]
        {
            self.debug_expect(&[DebugState::Setup], "set_dependent_child on a started job");
            dependent.debug_expect(
                &[DebugState::Processing],
                "set_dependent_child requires a processing parent",
            );
        }
        self.store_dependent(dependent, true);
    }

    fn store_dependent(&self, dependent: &Job, child: bool) {
        let mut slot = self.inner.dependent.lock().unwrap();
        debug_assert!(slot.is_none(), "job already has a dependent");
        if child {
            dependent.increment_dependent_count_and_set_child_flag();
        } else {
            dependent.increment_dependent_count();
        }
        *slot = Some(dependent.clone());
    }

    /// Splices `continuation` in front of this job's dependent: the dependent
    /// additionally waits for the continuation before becoming ready.
    ///
    /// Callable only while `self` is processing. No-op when `self` has no
    /// dependent, which legitimately happens under synchronous or assist
    /// execution.
    pub fn set_continuation(&self, continuation: &Job) {
        #[cfg(debug_assertions)]
        self.debug_expect(
            &[DebugState::Processing],
            "set_continuation outside the work function",
        );
        let dependent = self.inner.dependent.lock().unwrap().clone();
        if let Some(dependent) = dependent {
            continuation.set_dependent_started(&dependent);
        }
    }

    /// Wires `child` as a child of this processing job and starts it.
    pub fn start_as_child(&self, child: &Job) {
        child.set_dependent_child(self);
        child.start();
    }

    // ---------------------------------------------------------------------
    // Lifecycle

    /// Consumes the bootstrap count. Once every prerequisite has completed
    /// the job becomes ready and is handed to the scheduler.
    pub fn start(&self) {
        #[cfg(debug_assertions)]
        self.debug_transition(&[DebugState::Setup], DebugState::Started);
        self.decrement_dependent_count();
    }

    /// Restores a completed (or never-started) job for reuse: clears the
    /// `CHILD_JOBS` flag and re-arms the bootstrap count, preserving the
    /// priority and flag bits. One-shot jobs cannot be reset.
    ///
    /// With `clear_dependent` false a previously-set dependent is kept and
    /// its count re-incremented, since it must again wait for this job.
    pub fn reset(&self, clear_dependent: bool) {
        debug_assert!(!self.is_auto_delete(), "one-shot jobs cannot be reset");
        // Processing is tolerated: a thread released by a completion job's
        // work function may reset it while the worker is still unwinding
        // execute(), which only touches the payload slot afterwards.
        #[cfg(debug_assertions)]
        self.debug_transition(
            &[DebugState::Setup, DebugState::Processing],
            DebugState::Setup,
        );
        let flags = self.inner.state.load(Ordering::Acquire)
            & (FLAG_AUTO_DELETE | FLAG_COMPLETION | PRIORITY_MASK);
        self.inner.state.store(flags | 1, Ordering::Release);

        let mut slot = self.inner.dependent.lock().unwrap();
        if clear_dependent {
            *slot = None;
        } else if let Some(dependent) = slot.as_ref() {
            dependent.increment_dependent_count();
        }
    }

    /// Blocks (assisting the scheduler) until every child started via
    /// [`Job::start_as_child`] has completed. Callable only from the job's
    /// own work function.
    pub fn wait_for_children(&self) {
        if self.dependent_count() != 0 {
            #[cfg(debug_assertions)]
            self.debug_transition(&[DebugState::Processing], DebugState::Suspended);
            self.context().job_manager().suspend_job_until_ready(self);
            #[cfg(debug_assertions)]
            self.debug_transition(&[DebugState::Suspended], DebugState::Processing);
        }
        debug_assert!(
            self.dependent_count() == 0,
            "suspend returned with outstanding children"
        );
    }

    /// Starts this job and assists the scheduler on the calling thread until
    /// it has completed.
    pub fn start_and_assist_until_complete(&self) {
        let manager = self.context().job_manager().clone();
        manager.start_job_and_assist_until_complete(self);
    }

    /// Starts this job and waits for it to complete.
    ///
    /// From inside a running job this composes the child protocol
    /// (`start_as_child` + `wait_for_children`, which also waits for any
    /// sibling children); from a plain thread it falls back to
    /// [`Job::start_and_assist_until_complete`].
    pub fn start_and_wait_for_completion(&self) {
        let manager = self.context().job_manager().clone();
        match manager.current_job() {
            Some(current) => {
                current.start_as_child(self);
                current.wait_for_children();
            }
            None => self.start_and_assist_until_complete(),
        }
    }

    // ---------------------------------------------------------------------
    // Introspection

    /// True when the context's cancel group has fired. Completion jobs always
    /// report `false`.
    pub fn is_cancelled(&self) -> bool {
        if self.is_completion() {
            return false;
        }
        self.context()
            .cancel_group()
            .is_some_and(|group| group.is_cancelled())
    }

    pub fn is_auto_delete(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) & FLAG_AUTO_DELETE != 0
    }

    pub fn is_completion(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) & FLAG_COMPLETION != 0
    }

    pub fn priority(&self) -> i8 {
        ((self.inner.state.load(Ordering::Acquire) & PRIORITY_MASK) >> PRIORITY_SHIFT) as u8 as i8
    }

    /// Outstanding prerequisite completions, including a not-yet-consumed
    /// bootstrap count.
    pub fn dependent_count(&self) -> u32 {
        self.inner.state.load(Ordering::Acquire) & COUNT_MASK
    }

    /// The job notified when this one completes, if wired.
    pub fn dependent(&self) -> Option<Job> {
        self.inner.dependent.lock().unwrap().clone()
    }

    pub fn context(&self) -> &Arc<JobContext> {
        &self.inner.context
    }

    /// True if both handles refer to the same job.
    pub fn same_job(&self, other: &Job) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ---------------------------------------------------------------------
    // Counter algorithms

    pub(crate) fn increment_dependent_count(&self) {
        let prev = self.inner.state.fetch_add(1, Ordering::AcqRel);
        debug_assert!(prev & COUNT_MASK < COUNT_MASK, "dependent count overflow");
    }

    /// Increments the count and sets `CHILD_JOBS` as one logical operation.
    /// A compare-and-swap loop so no interleaving can observe the flag
    /// without the matching count (or the reverse).
    pub(crate) fn increment_dependent_count_and_set_child_flag(&self) {
        let mut current = self.inner.state.load(Ordering::Acquire);
        loop {
            debug_assert!(current & COUNT_MASK < COUNT_MASK, "dependent count overflow");
            let next = (current + 1) | FLAG_CHILD_JOBS;
            match self.inner.state.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    /// Removes one prerequisite. The 1 -> 0 transition is the unique event
    /// that enqueues the job, unless `CHILD_JOBS` is set, in which case the
    /// decrement only records "one fewer outstanding child" for a parent that
    /// is already processing.
    pub(crate) fn decrement_dependent_count(&self) {
        let prev = self.inner.state.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev & COUNT_MASK != 0, "dependent count underflow");
        if prev & COUNT_MASK == 1 && prev & FLAG_CHILD_JOBS == 0 {
            #[cfg(debug_assertions)]
            self.debug_transition(&[DebugState::Started], DebugState::Pending);
            let manager = self.context().job_manager().clone();
            manager.add_pending_job(self.clone());
        }
    }

    // ---------------------------------------------------------------------
    // Execution (scheduler-side)

    /// Runs the work function and propagates completion to the dependent.
    /// Called by the scheduler exactly once per count cycle.
    ///
    /// A panicking payload is contained: the panic is logged, the worker
    /// survives, and completion still propagates so the graph cannot wedge.
    ///
    /// The payload runs in place under the work lock, and the dependent is
    /// read before the payload runs: a completion-style payload releases a
    /// waiter that may reset and restart this job immediately, so nothing
    /// after the payload may assume the job is still quiescent. A restarted
    /// job's next run serializes on the work lock.
    pub(crate) fn execute(&self) {
        let auto_delete = self.is_auto_delete();
        // Clone, never take: set_continuation reads this slot from inside
        // the work function.
        let dependent = self.inner.dependent.lock().unwrap().clone();

        let mut guard = self.inner.work.lock().unwrap();
        #[cfg(debug_assertions)]
        self.debug_transition(&[DebugState::Pending], DebugState::Processing);

        if !self.is_cancelled() {
            if let Some(work) = guard.as_mut() {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| work(self))) {
                    tracing::error!(panic = panic_message(&payload), "job work function panicked");
                }
            }
        }
        if auto_delete {
            // Drop the payload and its captures; one-shot jobs never rerun.
            *guard = None;
        }
        #[cfg(debug_assertions)]
        self.debug_settle_after_run();
        drop(guard);

        if let Some(dependent) = dependent {
            dependent.decrement_dependent_count();
        }
    }

    // ---------------------------------------------------------------------
    // Debug state tracking

    #[cfg(debug_assertions)]
    fn debug_transition(&self, allowed: &[DebugState], next: DebugState) {
        let current = DebugState::from_u8(self.inner.debug_state.load(Ordering::Relaxed));
        debug_assert!(
            allowed.contains(&current),
            "invalid job state transition {:?} -> {:?}",
            current,
            next
        );
        self.inner.debug_state.store(next as u8, Ordering::Relaxed);
    }

    #[cfg(debug_assertions)]
    fn debug_expect(&self, allowed: &[DebugState], message: &str) {
        let current = DebugState::from_u8(self.inner.debug_state.load(Ordering::Relaxed));
        debug_assert!(allowed.contains(&current), "{message} (job is {current:?})");
    }

    /// Settles Processing/Suspended back to Setup after a run, without
    /// clobbering the state of a cycle a released waiter already began.
    #[cfg(debug_assertions)]
    fn debug_settle_after_run(&self) {
        for from in [DebugState::Processing, DebugState::Suspended] {
            if self
                .inner
                .debug_state
                .compare_exchange(
                    from as u8,
                    DebugState::Setup as u8,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                break;
            }
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("dependent_count", &self.dependent_count())
            .field("auto_delete", &self.is_auto_delete())
            .field("completion", &self.is_completion())
            .field("priority", &self.priority())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel_group::JobCancelGroup;
    use crate::manager::{JobManager, JobManagerDesc};

    fn fixture() -> (Arc<JobManager>, Arc<JobContext>) {
        let manager = Arc::new(JobManager::new(JobManagerDesc {
            worker_threads: 1,
            ..Default::default()
        }));
        let context = Arc::new(JobContext::new(manager.clone()));
        (manager, context)
    }

    #[test]
    fn test_bootstrap_count() {
        let (manager, context) = fixture();
        let job = Job::empty(&context);
        assert_eq!(job.dependent_count(), 1);
        manager.shutdown().expect("shutdown failed");
    }

    #[test]
    fn test_flags_survive_count_cycles() {
        let (manager, context) = fixture();
        let job = Job::empty(&context).with_priority(-3).as_completion();

        for _ in 0..1000 {
            job.increment_dependent_count();
        }
        for _ in 0..1000 {
            job.decrement_dependent_count();
        }

        assert_eq!(job.dependent_count(), 1);
        assert_eq!(job.priority(), -3);
        assert!(job.is_completion());
        assert!(!job.is_auto_delete());
        manager.shutdown().expect("shutdown failed");
    }

    #[test]
    fn test_child_flag_increment_is_compound() {
        let (manager, context) = fixture();
        let job = Job::empty(&context);
        job.increment_dependent_count_and_set_child_flag();
        assert_eq!(job.dependent_count(), 2);
        // The flag absorbs the 1 -> 0 transition instead of enqueuing.
        job.decrement_dependent_count();
        job.decrement_dependent_count();
        assert_eq!(job.dependent_count(), 0);
        manager.shutdown().expect("shutdown failed");
    }

    #[test]
    fn test_set_dependent_counts_fan_in() {
        let (manager, context) = fixture();
        let join = Job::empty(&context);
        let jobs: Vec<Job> = (0..4).map(|_| Job::empty(&context)).collect();
        for job in &jobs {
            job.set_dependent(&join);
        }
        // Bootstrap 1 plus one contribution per prerequisite.
        assert_eq!(join.dependent_count(), 5);
        assert!(jobs[0].dependent().is_some_and(|d| d.same_job(&join)));
        manager.shutdown().expect("shutdown failed");
    }

    #[test]
    fn test_reset_restores_bootstrap_and_reincrements_dependent() {
        let (manager, context) = fixture();
        let join = Job::empty(&context);
        let job = Job::empty(&context).with_priority(5);
        job.set_dependent(&join);
        assert_eq!(join.dependent_count(), 2);

        // Keeping the dependent re-arms its count for the next run.
        job.reset(false);
        assert_eq!(job.dependent_count(), 1);
        assert_eq!(join.dependent_count(), 3);
        assert_eq!(job.priority(), 5);

        job.reset(true);
        assert!(job.dependent().is_none());
        manager.shutdown().expect("shutdown failed");
    }

    #[test]
    fn test_completion_job_ignores_cancellation() {
        let (manager, _context) = fixture();
        let group = Arc::new(JobCancelGroup::new());
        group.cancel();
        let context = Arc::new(JobContext::with_cancel_group(manager.clone(), group.clone()));

        let normal = Job::empty(&context);
        let completion = Job::empty(&context).as_completion();
        assert!(normal.is_cancelled());
        assert!(!completion.is_cancelled());

        group.reset();
        assert!(!normal.is_cancelled());
        manager.shutdown().expect("shutdown failed");
    }

    #[test]
    fn test_no_cancel_group_is_never_cancelled() {
        let (manager, context) = fixture();
        let job = Job::empty(&context);
        assert!(!job.is_cancelled());
        manager.shutdown().expect("shutdown failed");
    }

    #[test]
    fn test_priority_round_trip() {
        let (manager, context) = fixture();
        for priority in [-128i8, -1, 0, 1, 127] {
            let job = Job::empty(&context).with_priority(priority);
            assert_eq!(job.priority(), priority);
        }
        manager.shutdown().expect("shutdown failed");
    }
}
