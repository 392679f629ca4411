//! Deferred load scheduling.
//!
//! The [`LoadScheduler`] turns a tile's deferred children request into a
//! unit of background work: a closure that builds the 4 child tiles through
//! the [`ContentFactory`], checks its [`LoadToken`] between children, and
//! posts an immutable [`BuildResult`] onto the single-consumer completion
//! queue the paging engine drains once per frame.
//!
//! The thread pool itself is not part of this crate's core: work is handed
//! to a consumed [`Executor`]. Two implementations ship with the crate:
//! [`TokioExecutor`] dispatches onto a tokio runtime's blocking pool, and
//! [`InlineExecutor`] runs the job on the calling thread (tests, demos).
//!
//! # Cancellation
//!
//! Cancellation is cooperative. The job polls its token between child
//! builds and a factory may poll it mid-build, but the scheduler cannot
//! preempt a running factory call: a slow build may run to completion in
//! the background, and its result is discarded on delivery instead. The
//! orchestration thread never waits on a worker.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::bounds::{estimate_bounds, BoundingSphere};
use crate::content::{BuildError, ContentFactory, ContentHandle};
use crate::progress::{LoadToken, ProgressTracker};
use crate::tile::{TileKey, TilingProfile};

/// Default priority scale applied to a submission's tree level.
pub const DEFAULT_PRIORITY_SCALE: f32 = 1.0;

/// Default priority offset added to every submission.
pub const DEFAULT_PRIORITY_OFFSET: f32 = 0.0;

/// One child tile produced by a discovery job.
///
/// Bounds are computed inside the job (pure, deterministic math) so the
/// graft step on the orchestration thread stays cheap.
pub struct ChildBuild {
    /// The child's tile key.
    pub key: TileKey,
    /// Conservative bounding sphere for the child's extent.
    pub bounds: BoundingSphere,
    /// Factory outcome: content, no content at this key, or a tile-local
    /// failure.
    pub outcome: Result<Option<ContentHandle>, BuildError>,
}

/// Completed children-discovery job, posted to the completion queue.
///
/// Children appear in quadrant order 0-3. A job that observed cancellation
/// mid-build posts fewer than 4 children; such results only ever reach the
/// discard path on drain.
pub struct BuildResult {
    /// The parent tile whose children were built.
    pub parent: TileKey,
    /// The token the job was submitted under.
    pub token: LoadToken,
    /// Per-quadrant child builds, in quadrant order.
    pub children: Vec<ChildBuild>,
}

/// A unit of background work with a scheduling priority hint.
pub struct LoadJob {
    priority: f32,
    work: Box<dyn FnOnce() + Send + 'static>,
}

impl LoadJob {
    /// Priority hint: higher values are more urgent. Derived from the
    /// submission's tree level; executors backed by a priority queue may
    /// order work by it, the built-in executors ignore it.
    pub fn priority(&self) -> f32 {
        self.priority
    }

    /// Runs the job to completion on the current thread.
    pub fn run(self) {
        (self.work)();
    }
}

impl std::fmt::Debug for LoadJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadJob")
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Executes load jobs on behalf of the scheduler.
///
/// The engine only *offers* work; how many workers exist and where they run
/// is the executor's business.
pub trait Executor: Send + Sync + 'static {
    /// Takes ownership of a job and arranges for it to run.
    fn execute(&self, job: LoadJob);
}

/// Runs each job immediately on the calling thread.
///
/// Useful in tests and single-threaded demos where deterministic, inline
/// completion is wanted.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, job: LoadJob) {
        job.run();
    }
}

/// Dispatches jobs onto a tokio runtime's blocking pool.
///
/// Content factories are synchronous by contract, so `spawn_blocking` is
/// the right pool: jobs never starve the async reactor.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: tokio::runtime::Handle,
}

impl TokioExecutor {
    /// Creates an executor dispatching onto the given runtime.
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates an executor dispatching onto the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime context.
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, job: LoadJob) {
        self.handle.spawn_blocking(move || job.run());
    }
}

/// Handle to one submitted job.
///
/// Supports best-effort advisory cancellation: `cancel` sets the job's
/// token flag, which the job honors at its next cooperative check.
#[derive(Debug, Clone)]
pub struct JobHandle {
    token: LoadToken,
}

impl JobHandle {
    /// Requests cancellation. Advisory only; the job stops at its next
    /// token check.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns true once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The token this job was submitted under.
    pub fn token(&self) -> &LoadToken {
        &self.token
    }
}

/// Submits children-discovery jobs and owns the completion queue's sender.
pub struct LoadScheduler {
    factory: Arc<dyn ContentFactory>,
    executor: Arc<dyn Executor>,
    tracker: Arc<ProgressTracker>,
    profile: TilingProfile,
    bounds_samples: u32,
    priority_scale: f32,
    priority_offset: f32,
    completion_tx: mpsc::UnboundedSender<BuildResult>,
}

impl LoadScheduler {
    /// Creates a scheduler and the completion queue it feeds.
    ///
    /// The returned receiver is the single-consumer end drained by the
    /// orchestration thread.
    pub fn new(
        factory: Arc<dyn ContentFactory>,
        executor: Arc<dyn Executor>,
        tracker: Arc<ProgressTracker>,
        profile: TilingProfile,
        bounds_samples: u32,
        priority_scale: f32,
        priority_offset: f32,
    ) -> (Self, mpsc::UnboundedReceiver<BuildResult>) {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        (
            Self {
                factory,
                executor,
                tracker,
                profile,
                bounds_samples,
                priority_scale,
                priority_offset,
                completion_tx,
            },
            completion_rx,
        )
    }

    /// Submits a children-discovery job for `parent` under `token`.
    ///
    /// After tracker shutdown this is a no-op: the job is not executed and
    /// the returned handle is already cancelled.
    pub fn submit(&self, parent: TileKey, token: LoadToken) -> JobHandle {
        if self.tracker.is_shut_down() {
            warn!(key = %parent, "submission after shutdown ignored");
            token.cancel();
            return JobHandle { token };
        }

        debug!(
            key = %parent,
            frame = token.request_frame(),
            "submitting children discovery"
        );

        let handle = JobHandle {
            token: token.clone(),
        };

        let factory = Arc::clone(&self.factory);
        let tracker = Arc::clone(&self.tracker);
        let profile = self.profile.clone();
        let samples = self.bounds_samples;
        let completion_tx = self.completion_tx.clone();

        let work = Box::new(move || {
            let mut children = Vec::with_capacity(4);
            for child_key in parent.children() {
                // Cooperative cancellation point between child builds
                if token.is_cancelled() || tracker.is_stale(&token) {
                    break;
                }
                let bounds = estimate_bounds(profile.extent_of(child_key), samples);
                let outcome = factory.build(child_key);
                children.push(ChildBuild {
                    key: child_key,
                    bounds,
                    outcome,
                });
            }
            // Receiver gone means the engine was dropped; nothing to do.
            let _ = completion_tx.send(BuildResult {
                parent,
                token,
                children,
            });
        });

        self.executor.execute(LoadJob {
            priority: self.priority_offset + self.priority_scale * parent.level() as f32,
            work,
        });

        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Factory producing a byte payload per key.
    struct StubFactory;

    impl ContentFactory for StubFactory {
        fn build(&self, key: TileKey) -> Result<Option<ContentHandle>, BuildError> {
            Ok(Some(ContentHandle::new(key.to_string())))
        }
    }

    fn scheduler_with(
        executor: Arc<dyn Executor>,
        tracker: Arc<ProgressTracker>,
    ) -> (LoadScheduler, mpsc::UnboundedReceiver<BuildResult>) {
        LoadScheduler::new(
            Arc::new(StubFactory),
            executor,
            tracker,
            TilingProfile::global_geodetic(),
            2,
            DEFAULT_PRIORITY_SCALE,
            DEFAULT_PRIORITY_OFFSET,
        )
    }

    #[test]
    fn test_inline_submit_builds_four_children_in_order() {
        let tracker = Arc::new(ProgressTracker::new(1, true));
        let (scheduler, mut rx) = scheduler_with(Arc::new(InlineExecutor), tracker);

        let parent = TilingProfile::global_geodetic().key(0, 0, 0).unwrap();
        scheduler.submit(parent, LoadToken::new(0));

        let result = rx.try_recv().expect("inline job completes during submit");
        assert_eq!(result.parent, parent);
        assert_eq!(result.children.len(), 4);
        for (q, child) in result.children.iter().enumerate() {
            assert_eq!(child.key, parent.child(q as u32));
            assert!(child.outcome.as_ref().unwrap().is_some());
            assert!(child.bounds.is_valid());
        }
    }

    #[test]
    fn test_cancelled_token_stops_job_early() {
        let tracker = Arc::new(ProgressTracker::new(1, true));
        let (scheduler, mut rx) = scheduler_with(Arc::new(InlineExecutor), tracker);

        let parent = TilingProfile::global_geodetic().key(0, 0, 0).unwrap();
        let token = LoadToken::new(0);
        token.cancel();
        scheduler.submit(parent, token);

        let result = rx.try_recv().expect("job still posts its result");
        assert!(result.token.is_cancelled());
        assert!(result.children.is_empty());
    }

    #[test]
    fn test_submit_after_shutdown_is_noop() {
        let tracker = Arc::new(ProgressTracker::new(1, true));
        tracker.shutdown();
        let (scheduler, mut rx) = scheduler_with(Arc::new(InlineExecutor), tracker);

        let parent = TilingProfile::global_geodetic().key(0, 0, 0).unwrap();
        let handle = scheduler.submit(parent, LoadToken::new(0));

        assert!(handle.is_cancelled());
        assert!(rx.try_recv().is_err(), "no job ran, no result posted");
    }

    #[test]
    fn test_handle_cancel_sets_token() {
        let tracker = Arc::new(ProgressTracker::new(1, true));
        tracker.shutdown();
        let (scheduler, _rx) = scheduler_with(Arc::new(InlineExecutor), tracker);

        let parent = TilingProfile::global_geodetic().key(0, 0, 0).unwrap();
        let token = LoadToken::new(0);
        let handle = scheduler.submit(parent, token.clone());
        handle.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_priority_hint_scales_with_level() {
        let job_shallow = LoadJob {
            priority: DEFAULT_PRIORITY_OFFSET + DEFAULT_PRIORITY_SCALE * 1.0,
            work: Box::new(|| {}),
        };
        let job_deep = LoadJob {
            priority: DEFAULT_PRIORITY_OFFSET + DEFAULT_PRIORITY_SCALE * 8.0,
            work: Box::new(|| {}),
        };
        assert!(job_deep.priority() > job_shallow.priority());
    }

    #[tokio::test]
    async fn test_tokio_executor_runs_job_off_thread() {
        let tracker = Arc::new(ProgressTracker::new(1, true));
        let (scheduler, mut rx) =
            scheduler_with(Arc::new(TokioExecutor::current()), tracker);

        let parent = TilingProfile::global_geodetic().key(0, 1, 0).unwrap();
        scheduler.submit(parent, LoadToken::new(0));

        let result = rx.recv().await.expect("job completes on blocking pool");
        assert_eq!(result.parent, parent);
        assert_eq!(result.children.len(), 4);
    }
}
