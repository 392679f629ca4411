//! Frame-based load progress tracking.
//!
//! The engine measures the age of an in-flight load in render frames, not
//! wall-clock time: a request that was issued (or last re-requested) more
//! than [`stale threshold`](ProgressTracker::stale_threshold) frames ago is
//! stale and eligible for cancellation. The [`ProgressTracker`] holds the
//! process-wide frame clock and the shutdown/cancellation switches; each
//! submitted job carries a [`LoadToken`] recording its own frame history and
//! the shared one-way cancellation flag.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Default staleness threshold in frames.
///
/// A request older than this relative to the current frame clock is
/// considered abandoned by the traversal that wanted it.
pub const DEFAULT_STALE_THRESHOLD: u64 = 1;

/// Cancellation token attached to one submitted load.
///
/// Records the frame at which the request was issued and the frame at which
/// a traversal last re-requested the owning node. The embedded flag is
/// one-way: once cancelled a token never becomes live again; a retried
/// load gets a fresh token.
#[derive(Clone)]
pub struct LoadToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    request_frame: u64,
    /// Monotonic; advanced by `touch`, never moved backwards.
    last_touched: AtomicU64,
    flag: CancellationToken,
}

impl LoadToken {
    /// Creates a live token stamped with the submitting frame.
    pub fn new(request_frame: u64) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                request_frame,
                last_touched: AtomicU64::new(request_frame),
                flag: CancellationToken::new(),
            }),
        }
    }

    /// Frame at which the load was submitted.
    pub fn request_frame(&self) -> u64 {
        self.inner.request_frame
    }

    /// Frame at which a traversal last re-requested the owning node.
    pub fn last_touched(&self) -> u64 {
        self.inner.last_touched.load(Ordering::Relaxed)
    }

    /// Records that a traversal still wants this load at `frame`.
    pub fn touch(&self, frame: u64) {
        self.inner.last_touched.fetch_max(frame, Ordering::Relaxed);
    }

    /// Sets the one-way cancellation flag.
    pub fn cancel(&self) {
        self.inner.flag.cancel();
    }

    /// Returns true once the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.is_cancelled()
    }

    /// Returns true if `other` is the same token (not merely an equal one).
    pub fn same_as(&self, other: &LoadToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for LoadToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadToken")
            .field("request_frame", &self.request_frame())
            .field("last_touched", &self.last_touched())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Process-wide frame clock and staleness predicate.
///
/// Shared between the orchestration side (which advances the clock once per
/// render traversal) and cooperative workers (which may poll staleness
/// mid-build). All state is atomic; the clock is monotonic and the shutdown
/// flag one-way.
pub struct ProgressTracker {
    frame: AtomicU64,
    stale_threshold: u64,
    can_cancel: AtomicBool,
    done: AtomicBool,
}

impl ProgressTracker {
    /// Creates a tracker with the given staleness threshold.
    pub fn new(stale_threshold: u64, can_cancel: bool) -> Self {
        Self {
            frame: AtomicU64::new(0),
            stale_threshold,
            can_cancel: AtomicBool::new(can_cancel),
            done: AtomicBool::new(false),
        }
    }

    /// Staleness threshold in frames.
    pub fn stale_threshold(&self) -> u64 {
        self.stale_threshold
    }

    /// Advances the frame clock to `frame`.
    ///
    /// Must be invoked exactly once per render traversal. Monotonic: an
    /// older frame number never moves the clock backwards.
    pub fn touch(&self, frame: u64) {
        self.frame.fetch_max(frame, Ordering::Relaxed);
    }

    /// The current frame number.
    pub fn current_frame(&self) -> u64 {
        self.frame.load(Ordering::Relaxed)
    }

    /// Enables or disables staleness-based cancellation at runtime.
    ///
    /// With cancellation disabled every issued load runs to completion;
    /// only shutdown still reports staleness.
    pub fn set_can_cancel(&self, value: bool) {
        self.can_cancel.store(value, Ordering::Relaxed);
    }

    /// Returns true if staleness-based cancellation is enabled.
    pub fn can_cancel(&self) -> bool {
        self.can_cancel.load(Ordering::Relaxed)
    }

    /// Marks the tracker shut down. Idempotent and one-way: every
    /// outstanding and future staleness check reports stale afterwards.
    pub fn shutdown(&self) {
        self.done.store(true, Ordering::Relaxed);
    }

    /// Returns true once `shutdown` has been called.
    pub fn is_shut_down(&self) -> bool {
        self.done.load(Ordering::Relaxed)
    }

    /// Reports whether an in-flight load has gone stale.
    ///
    /// A load is stale when the tracker is shut down, or when cancellation
    /// is enabled and the token was last touched more than the threshold
    /// number of frames ago.
    pub fn is_stale(&self, token: &LoadToken) -> bool {
        if self.is_shut_down() {
            return true;
        }
        if !self.can_cancel() {
            return false;
        }
        let current = self.current_frame();
        current.saturating_sub(token.last_touched()) > self.stale_threshold
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("frame", &self.current_frame())
            .field("stale_threshold", &self.stale_threshold)
            .field("can_cancel", &self.can_cancel())
            .field("done", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let tracker = ProgressTracker::new(1, true);
        tracker.touch(5);
        tracker.touch(3);
        assert_eq!(tracker.current_frame(), 5);
        tracker.touch(9);
        assert_eq!(tracker.current_frame(), 9);
    }

    #[test]
    fn test_token_starts_fresh() {
        let token = LoadToken::new(7);
        assert_eq!(token.request_frame(), 7);
        assert_eq!(token.last_touched(), 7);
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_token_touch_is_monotonic() {
        let token = LoadToken::new(4);
        token.touch(10);
        token.touch(6);
        assert_eq!(token.last_touched(), 10);
    }

    #[test]
    fn test_token_cancel_is_one_way() {
        let token = LoadToken::new(0);
        token.cancel();
        assert!(token.is_cancelled());
        // A clone shares the flag
        let clone = token.clone();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_token_identity() {
        let token = LoadToken::new(0);
        let clone = token.clone();
        let other = LoadToken::new(0);
        assert!(token.same_as(&clone));
        assert!(!token.same_as(&other));
    }

    #[test]
    fn test_staleness_boundary() {
        let tracker = ProgressTracker::new(1, true);
        let token = LoadToken::new(0);

        // Exactly at the threshold: still fresh
        tracker.touch(1);
        assert!(!tracker.is_stale(&token));

        // One frame past it: stale
        tracker.touch(2);
        assert!(tracker.is_stale(&token));
    }

    #[test]
    fn test_touching_token_keeps_it_fresh() {
        let tracker = ProgressTracker::new(1, true);
        let token = LoadToken::new(0);

        tracker.touch(5);
        assert!(tracker.is_stale(&token));

        token.touch(5);
        assert!(!tracker.is_stale(&token));
    }

    #[test]
    fn test_cancellation_disabled_never_stale() {
        let tracker = ProgressTracker::new(1, false);
        let token = LoadToken::new(0);
        tracker.touch(100);
        assert!(!tracker.is_stale(&token));
    }

    #[test]
    fn test_can_cancel_toggle() {
        let tracker = ProgressTracker::new(1, true);
        let token = LoadToken::new(0);
        tracker.touch(10);
        assert!(tracker.is_stale(&token));

        tracker.set_can_cancel(false);
        assert!(!tracker.is_stale(&token));

        tracker.set_can_cancel(true);
        assert!(tracker.is_stale(&token));
    }

    #[test]
    fn test_shutdown_overrides_everything() {
        let tracker = ProgressTracker::new(1, false);
        let token = LoadToken::new(0);
        assert!(!tracker.is_stale(&token));

        tracker.shutdown();
        assert!(tracker.is_stale(&token));
        assert!(tracker.is_shut_down());

        // Idempotent
        tracker.shutdown();
        assert!(tracker.is_shut_down());
    }

    #[test]
    fn test_fresh_token_after_shutdown_is_stale() {
        let tracker = ProgressTracker::new(1, true);
        tracker.shutdown();
        let token = LoadToken::new(tracker.current_frame());
        assert!(tracker.is_stale(&token));
    }
}
