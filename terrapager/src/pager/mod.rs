//! Paging engine orchestration.
//!
//! The [`PagingEngine`] ties the pieces together: it owns the root tile
//! nodes, decides synchronous vs. deferred work when the renderer activates
//! a node, submits children discovery through the [`LoadScheduler`], and,
//! once per render frame, sweeps stale requests and grafts a bounded number
//! of completed results into the live hierarchy.
//!
//! All engine methods must be called from one logical orchestration thread
//! (the render loop). Workers never touch the tree; they only post
//! immutable [`BuildResult`] values onto the completion queue.
//!
//! # Frame protocol
//!
//! ```ignore
//! engine.touch(frame);                 // advance the staleness clock
//! engine.traverse(viewer_ecef);        // activate in-range nodes
//! engine.drain();                      // sweep stale + graft completed
//! engine.prune(viewer_ecef);           // collapse subtrees left behind
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bounds::estimate_bounds;
use crate::callbacks::{CallbackRegistry, PagerCallback};
use crate::config::{ConfigError, PagerConfig};
use crate::content::ContentFactory;
use crate::coord;
use crate::node::{RefinePolicy, TileNode};
use crate::progress::{LoadToken, ProgressTracker};
use crate::scheduler::{BuildResult, Executor, LoadScheduler};
use crate::tile::{TileKey, TilingProfile};

/// Counters describing engine activity since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PagerStats {
    /// Children-discovery jobs submitted.
    pub submitted: u64,
    /// Results grafted into the tree.
    pub grafted: u64,
    /// Results discarded on drain (stale, superseded, or after shutdown).
    pub discarded: u64,
    /// In-flight requests abandoned before their result arrived.
    pub cancelled: u64,
    /// Tiles whose content factory reported a failure.
    pub failed_tiles: u64,
}

/// Demand-driven quadtree paging engine.
///
/// Built from a [`TilingProfile`] (where tiles are), a [`ContentFactory`]
/// (what tiles contain), and an [`Executor`] (where deferred work runs).
pub struct PagingEngine {
    config: PagerConfig,
    profile: TilingProfile,
    factory: Arc<dyn ContentFactory>,
    tracker: Arc<ProgressTracker>,
    scheduler: LoadScheduler,
    completion_rx: mpsc::UnboundedReceiver<BuildResult>,
    roots: Vec<TileNode>,
    callbacks: CallbackRegistry,
    /// Token of the in-flight request per parent key. A result whose token
    /// is not the entry here was superseded and is discarded on drain.
    pending: HashMap<TileKey, LoadToken>,
    stats: PagerStats,
}

impl PagingEngine {
    /// Creates an engine with unloaded root nodes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for invalid configuration; nothing is
    /// submitted or materialized on the error path.
    pub fn new(
        config: PagerConfig,
        profile: TilingProfile,
        factory: Arc<dyn ContentFactory>,
        executor: Arc<dyn Executor>,
    ) -> Result<Self, ConfigError> {
        config.validate(profile.max_level())?;

        let tracker = Arc::new(ProgressTracker::new(
            config.stale_threshold,
            config.can_cancel,
        ));
        let (scheduler, completion_rx) = LoadScheduler::new(
            Arc::clone(&factory),
            executor,
            Arc::clone(&tracker),
            profile.clone(),
            config.bounds_samples,
            config.priority_scale,
            config.priority_offset,
        );

        let roots = profile
            .root_keys()
            .into_iter()
            .map(|key| {
                let bounds = estimate_bounds(profile.extent_of(key), config.bounds_samples);
                let mut node = TileNode::new(key, bounds, config.refine_policy);
                node.set_visibility_range(bounds.radius() * config.range_factor);
                node
            })
            .collect::<Vec<_>>();

        info!(
            roots = roots.len(),
            max_level = config.max_level,
            refine = ?config.refine_policy,
            "paging engine created"
        );

        Ok(Self {
            config,
            profile,
            factory,
            tracker,
            scheduler,
            completion_rx,
            roots,
            callbacks: CallbackRegistry::new(),
            pending: HashMap::new(),
            stats: PagerStats::default(),
        })
    }

    /// The engine configuration.
    pub fn config(&self) -> &PagerConfig {
        &self.config
    }

    /// The tiling profile the tree is built over.
    pub fn profile(&self) -> &TilingProfile {
        &self.profile
    }

    /// The root tile nodes.
    pub fn roots(&self) -> &[TileNode] {
        &self.roots
    }

    /// Looks a node up by key anywhere in the live tree.
    pub fn find(&self, key: TileKey) -> Option<&TileNode> {
        self.roots.iter().find_map(|root| root.find(key))
    }

    /// Activity counters.
    pub fn stats(&self) -> PagerStats {
        self.stats
    }

    /// Number of requests currently in flight.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// The observer registry. Observers fire in insertion order.
    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    /// Convenience for [`CallbackRegistry::add`].
    pub fn add_callback(&self, callback: Arc<dyn PagerCallback>) {
        self.callbacks.add(callback);
    }

    /// Convenience for [`CallbackRegistry::remove`].
    pub fn remove_callback(&self, callback: &Arc<dyn PagerCallback>) -> bool {
        self.callbacks.remove(callback)
    }

    /// Enables or disables staleness cancellation at runtime.
    pub fn set_cancellation_enabled(&self, value: bool) {
        self.tracker.set_can_cancel(value);
    }

    /// Returns true if staleness cancellation is enabled.
    pub fn cancellation_enabled(&self) -> bool {
        self.tracker.can_cancel()
    }

    /// The current frame number.
    pub fn current_frame(&self) -> u64 {
        self.tracker.current_frame()
    }

    /// Advances the staleness clock. Must be called exactly once per render
    /// traversal.
    pub fn touch(&self, frame: u64) {
        self.tracker.touch(frame);
    }

    /// Materializes content for the root set.
    ///
    /// Optional bootstrap: roots are also materialized lazily by their
    /// first activation; calling this up front makes the whole-globe view
    /// renderable before any traversal runs.
    pub fn build(&mut self) {
        for node in &mut self.roots {
            if !node.content_resolved() {
                Self::materialize_content(
                    node,
                    self.factory.as_ref(),
                    &self.callbacks,
                    self.config.min_level,
                    &mut self.stats,
                );
            }
        }
    }

    /// Activates a node: the renderer determined it is within range and not
    /// yet expanded.
    ///
    /// Synchronously materializes the node's own content if it never was,
    /// then defers children discovery to the executor. Returns true if a
    /// new request was submitted. Re-activating a node with a request in
    /// flight only refreshes the request's token; re-activating an expanded
    /// or terminal node is a no-op.
    pub fn activate(&mut self, key: TileKey) -> bool {
        if self.tracker.is_shut_down() {
            return false;
        }
        let current = self.tracker.current_frame();

        let Some(node) = self.roots.iter_mut().find_map(|root| root.find_mut(key)) else {
            warn!(key = %key, "activate on a key outside the live tree");
            return false;
        };

        if node.is_terminal() {
            return false;
        }
        if let Some(token) = node.token() {
            // Still in flight: the traversal re-requesting the node is the
            // keep-alive that defers staleness.
            token.touch(current);
            return false;
        }
        if node.is_expanded() {
            return false;
        }

        if !node.content_resolved() {
            Self::materialize_content(
                node,
                self.factory.as_ref(),
                &self.callbacks,
                self.config.min_level,
                &mut self.stats,
            );
        }

        if key.level() >= self.config.max_level {
            node.make_terminal();
            debug!(key = %key, "node terminal at max level");
            return false;
        }
        node.set_visibility_range(node.bounds().radius() * self.config.range_factor);

        let token = LoadToken::new(current);
        node.begin_request(token.clone());
        self.pending.insert(key, token.clone());
        self.scheduler.submit(key, token);
        self.stats.submitted += 1;
        true
    }

    /// Walks the live tree once, activating every node the viewer is within
    /// range of. Returns the number of new submissions.
    ///
    /// This is the decision the renderer's cull pass would otherwise make;
    /// front-ends that run their own culling can call
    /// [`activate`](Self::activate) directly instead.
    pub fn traverse(&mut self, viewer: [f64; 3]) -> usize {
        let mut wanted = Vec::new();
        for root in &self.roots {
            Self::collect_wanted(root, viewer, &mut wanted);
        }
        let mut submitted = 0;
        for key in wanted {
            if self.activate(key) {
                submitted += 1;
            }
        }
        submitted
    }

    /// Collects, in traversal order, the content the viewer should see.
    ///
    /// Resolves the refine policy: with [`RefinePolicy::Replace`] an
    /// expanded parent's content is hidden once its children took over;
    /// with [`RefinePolicy::Additive`] it stays visible alongside them.
    pub fn visible_content(&self, viewer: [f64; 3]) -> Vec<TileKey> {
        let mut visible = Vec::new();
        for root in &self.roots {
            Self::collect_visible(root, viewer, &mut visible);
        }
        visible
    }

    /// Sweeps stale requests and grafts completed results, at most
    /// [`graft_budget`](PagerConfig::graft_budget) per call. Returns the
    /// number of results grafted.
    ///
    /// Never blocks: only results already sitting in the completion queue
    /// are considered.
    pub fn drain(&mut self) -> usize {
        self.sweep_stale();

        let mut grafted = 0;
        while grafted < self.config.graft_budget {
            let result = match self.completion_rx.try_recv() {
                Ok(result) => result,
                Err(_) => break,
            };
            if self.graft(result) {
                grafted += 1;
            }
        }
        grafted
    }

    /// Collapses every expanded subtree the viewer has left: children of a
    /// node whose visibility range no longer covers the viewer are dropped,
    /// and any request in flight inside the dropped subtree is cancelled.
    /// Returns the number of subtrees collapsed.
    ///
    /// The collapsed node keeps its own content and can expand again the
    /// next time the viewer approaches.
    pub fn prune(&mut self, viewer: [f64; 3]) -> usize {
        let mut prunable = Vec::new();
        for root in &self.roots {
            Self::collect_prunable(root, viewer, &mut prunable);
        }

        let mut pruned = 0;
        for key in prunable {
            let Some(node) = self.roots.iter_mut().find_map(|root| root.find_mut(key)) else {
                continue;
            };
            let mut cancelled = Vec::new();
            node.collapse(&mut cancelled);
            for dropped in cancelled {
                self.pending.remove(&dropped);
                self.stats.cancelled += 1;
            }
            debug!(key = %self.node_name(key), "subtree pruned");
            pruned += 1;
        }
        pruned
    }

    /// Shuts the engine down: cancels every in-flight request and discards
    /// every queued result. Further submissions are no-ops. Idempotent.
    pub fn shutdown(&mut self) {
        if !self.tracker.is_shut_down() {
            info!(pending = self.pending.len(), "paging engine shutting down");
        }
        self.tracker.shutdown();

        let keys: Vec<_> = self.pending.keys().copied().collect();
        for key in keys {
            if let Some(node) = self.roots.iter_mut().find_map(|root| root.find_mut(key)) {
                node.abandon_request();
            }
            self.pending.remove(&key);
            self.stats.cancelled += 1;
        }

        while let Ok(result) = self.completion_rx.try_recv() {
            debug!(key = %result.parent, "result discarded on shutdown");
            self.stats.discarded += 1;
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Runs the factory for a node's own content, on the calling thread.
    fn materialize_content(
        node: &mut TileNode,
        factory: &dyn ContentFactory,
        callbacks: &CallbackRegistry,
        min_level: u32,
        stats: &mut PagerStats,
    ) {
        let key = node.key();
        if key.level() < min_level {
            // Placeholder below the content floor; still expandable.
            node.resolve_content(None);
            return;
        }
        match factory.build(key) {
            Ok(content) => {
                node.resolve_content(content);
                if let Some(content) = node.content() {
                    callbacks.fire_on_create_node(key, content);
                }
            }
            Err(error) => {
                warn!(key = %key, %error, "content build failed");
                node.fail_content();
                stats.failed_tiles += 1;
            }
        }
    }

    fn collect_wanted(node: &TileNode, viewer: [f64; 3], out: &mut Vec<TileKey>) {
        if node.is_terminal() {
            return;
        }
        let dist = coord::distance(viewer, node.bounds().center());
        if dist >= node.visibility_range() {
            return;
        }
        if !node.is_expanded() {
            out.push(node.key());
            return;
        }
        for quadrant in 0..4 {
            if let Some(child) = node.child(quadrant) {
                Self::collect_wanted(child, viewer, out);
            }
        }
    }

    /// Finds the shallowest expanded nodes the viewer is out of range of;
    /// their whole subtrees are no longer needed.
    fn collect_prunable(node: &TileNode, viewer: [f64; 3], out: &mut Vec<TileKey>) {
        if !node.is_expanded() {
            return;
        }
        let dist = coord::distance(viewer, node.bounds().center());
        if dist >= node.visibility_range() {
            out.push(node.key());
            return;
        }
        for quadrant in 0..4 {
            if let Some(child) = node.child(quadrant) {
                Self::collect_prunable(child, viewer, out);
            }
        }
    }

    fn collect_visible(node: &TileNode, viewer: [f64; 3], out: &mut Vec<TileKey>) {
        let dist = coord::distance(viewer, node.bounds().center());
        let refined = node.is_expanded() && dist < node.visibility_range();
        if !refined {
            if node.content().is_some() {
                out.push(node.key());
            }
            return;
        }
        if node.refine_policy() == RefinePolicy::Additive && node.content().is_some() {
            out.push(node.key());
        }
        for quadrant in 0..4 {
            if let Some(child) = node.child(quadrant) {
                Self::collect_visible(child, viewer, out);
            }
        }
    }

    /// Cancels and reverts every pending request whose token went stale.
    fn sweep_stale(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let stale: Vec<_> = self
            .pending
            .iter()
            .filter(|(_, token)| token.is_cancelled() || self.tracker.is_stale(token))
            .map(|(key, _)| *key)
            .collect();
        for key in stale {
            debug!(key = %self.node_name(key), "request stale, abandoning");
            if let Some(node) = self.roots.iter_mut().find_map(|root| root.find_mut(key)) {
                node.abandon_request();
            }
            self.pending.remove(&key);
            self.stats.cancelled += 1;
        }
    }

    /// Grafts one completed result, or discards it if its token was
    /// cancelled, superseded, or went stale. Returns true on graft.
    fn graft(&mut self, result: BuildResult) -> bool {
        let parent_key = result.parent;

        let valid = match self.pending.get(&parent_key) {
            // A token that is not the current entry for its key belongs to
            // an abandoned request that was since resubmitted.
            Some(current) => current.same_as(&result.token),
            None => false,
        };
        if !valid {
            debug!(key = %parent_key, "result for superseded request discarded");
            self.stats.discarded += 1;
            return false;
        }
        if result.token.is_cancelled()
            || self.tracker.is_stale(&result.token)
            || result.children.len() != 4
        {
            // Stale at delivery: revert the owner so it can resubmit.
            if let Some(node) = self
                .roots
                .iter_mut()
                .find_map(|root| root.find_mut(parent_key))
            {
                node.abandon_request();
            }
            self.pending.remove(&parent_key);
            self.stats.discarded += 1;
            self.stats.cancelled += 1;
            debug!(key = %parent_key, "stale result discarded");
            return false;
        }

        let Some(parent) = self
            .roots
            .iter_mut()
            .find_map(|root| root.find_mut(parent_key))
        else {
            self.pending.remove(&parent_key);
            self.stats.discarded += 1;
            return false;
        };

        // Quadrant order is fixed here, at graft time, regardless of how
        // the job's sub-steps completed.
        for (quadrant, built) in result.children.into_iter().enumerate() {
            let mut child = TileNode::new(built.key, built.bounds, self.config.refine_policy);
            child.set_visibility_range(built.bounds.radius() * self.config.range_factor);
            match built.outcome {
                Ok(content) => {
                    child.resolve_content(content);
                    if let Some(content) = child.content() {
                        self.callbacks.fire_on_create_node(built.key, content);
                    }
                }
                Err(error) => {
                    warn!(key = %built.key, %error, "child content build failed");
                    child.fail_content();
                    self.stats.failed_tiles += 1;
                }
            }
            if built.key.level() >= self.config.max_level {
                child.make_terminal();
            }
            parent.attach_child(quadrant, child);
        }
        parent.finish_request();
        self.pending.remove(&parent_key);
        self.stats.grafted += 1;
        debug!(key = %parent_key, "children grafted");
        true
    }

    fn node_name(&self, key: TileKey) -> String {
        match &self.config.name {
            Some(name) => format!("{} {}", name, key),
            None => key.to_string(),
        }
    }
}

impl std::fmt::Debug for PagingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagingEngine")
            .field("roots", &self.roots.len())
            .field("pending", &self.pending.len())
            .field("frame", &self.current_frame())
            .field("stats", &self.stats)
            .finish()
    }
}
