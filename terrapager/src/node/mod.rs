//! In-hierarchy tile nodes.
//!
//! A [`TileNode`] is the placeholder for one tile in the live quadtree: it
//! owns at most one materialized content handle, a visibility range, the
//! engine's refine policy, up to 4 child nodes, and, while children
//! discovery is in flight, the request's [`LoadToken`]. Nodes are owned
//! exclusively down the tree (the engine owns the roots) and are only ever
//! mutated from the orchestration thread.
//!
//! # State machine
//!
//! ```text
//!   Unloaded ──activate──▶ Pending ──graft──▶ Loaded
//!      ▲                      │
//!      └──────cancel──────────┘        (Failed: own content build failed;
//!                                       still eligible for expansion, so
//!                                       Failed ──activate──▶ Pending too)
//! ```
//!
//! A node enters `Pending` at most once per request: re-activating a
//! `Pending` node only refreshes its token. Cancellation reverts the node
//! immediately, without waiting for the worker, so a new request can be
//! issued; the abandoned job's result is discarded on delivery. Content is
//! never cleared while a request is in flight.

use serde::{Deserialize, Serialize};

use crate::bounds::BoundingSphere;
use crate::content::ContentHandle;
use crate::progress::LoadToken;
use crate::tile::TileKey;

/// Load lifecycle of one tile node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Placeholder only; no children request in flight.
    Unloaded,
    /// Children discovery submitted and not yet resolved.
    Pending,
    /// Children grafted, or the node is terminal.
    Loaded,
    /// The node's own content build failed. Non-fatal: the node can still
    /// expand, and siblings are unaffected.
    Failed,
}

impl LoadState {
    /// Returns true if the node is a bare placeholder.
    pub fn is_unloaded(&self) -> bool {
        matches!(self, Self::Unloaded)
    }

    /// Returns true if a children request is in flight.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Returns true if the node resolved successfully.
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded)
    }

    /// Returns true if the node's content build failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// Whether children visually supersede their parent or add to it.
///
/// This is an engine-wide configuration, not a per-tile decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefinePolicy {
    /// Children replace the parent's content once the viewer is within
    /// range.
    #[default]
    Replace,
    /// The parent's content stays visible alongside its children.
    Additive,
}

/// One tile's placeholder in the live hierarchy.
pub struct TileNode {
    key: TileKey,
    bounds: BoundingSphere,
    refine_policy: RefinePolicy,
    visibility_range: f64,
    content: Option<ContentHandle>,
    /// Own factory call already attempted; a cancelled expansion must not
    /// re-build content the node already resolved.
    content_resolved: bool,
    content_failed: bool,
    state: LoadState,
    token: Option<LoadToken>,
    children: [Option<Box<TileNode>>; 4],
    terminal: bool,
}

impl TileNode {
    /// Creates an unloaded placeholder node.
    pub fn new(key: TileKey, bounds: BoundingSphere, refine_policy: RefinePolicy) -> Self {
        Self {
            key,
            bounds,
            refine_policy,
            visibility_range: f64::INFINITY,
            content: None,
            content_resolved: false,
            content_failed: false,
            state: LoadState::Unloaded,
            token: None,
            children: [None, None, None, None],
            terminal: false,
        }
    }

    /// The node's tile key.
    pub fn key(&self) -> TileKey {
        self.key
    }

    /// The node's conservative bounding sphere.
    pub fn bounds(&self) -> &BoundingSphere {
        &self.bounds
    }

    /// The engine-wide refine policy stamped on this node.
    pub fn refine_policy(&self) -> RefinePolicy {
        self.refine_policy
    }

    /// Distance threshold at which this node's children take over.
    /// Infinite until activation, and permanently infinite for terminal
    /// nodes.
    pub fn visibility_range(&self) -> f64 {
        self.visibility_range
    }

    pub(crate) fn set_visibility_range(&mut self, range: f64) {
        self.visibility_range = range;
    }

    /// Current load state.
    pub fn state(&self) -> LoadState {
        self.state
    }

    /// The node's content, if the factory produced any.
    pub fn content(&self) -> Option<&ContentHandle> {
        self.content.as_ref()
    }

    /// True once the node's own factory call has been attempted.
    pub fn content_resolved(&self) -> bool {
        self.content_resolved
    }

    /// Marks the node terminal: deepest level, never expands.
    pub(crate) fn make_terminal(&mut self) {
        self.terminal = true;
        self.visibility_range = f64::INFINITY;
        if !self.state.is_failed() {
            self.state = LoadState::Loaded;
        }
    }

    /// True if the node can never have children.
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Records the outcome of the node's own content build.
    pub(crate) fn resolve_content(&mut self, content: Option<ContentHandle>) {
        debug_assert!(!self.content_resolved, "content resolved twice");
        self.content = content;
        self.content_resolved = true;
        self.content_failed = false;
    }

    /// Records a failed content build. The node stays expandable.
    pub(crate) fn fail_content(&mut self) {
        debug_assert!(!self.content_resolved, "content resolved twice");
        self.content = None;
        self.content_resolved = true;
        self.content_failed = true;
        self.state = LoadState::Failed;
    }

    /// Enters `Pending` under a fresh token.
    ///
    /// Valid from `Unloaded` and from `Failed` (a content failure does not
    /// stop recursion).
    pub(crate) fn begin_request(&mut self, token: LoadToken) {
        debug_assert!(
            matches!(self.state, LoadState::Unloaded | LoadState::Failed),
            "request begun from {:?}",
            self.state
        );
        self.token = Some(token);
        self.state = LoadState::Pending;
    }

    /// The in-flight request's token, if any.
    pub fn token(&self) -> Option<&LoadToken> {
        self.token.as_ref()
    }

    /// Abandons the in-flight request: cancels its token and reverts the
    /// node so a new request can be issued immediately. Content already
    /// materialized on the node is kept.
    pub(crate) fn abandon_request(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        if self.state.is_pending() {
            self.state = if self.content_failed {
                LoadState::Failed
            } else {
                LoadState::Unloaded
            };
        }
    }

    /// Resolves the in-flight request after a successful graft.
    pub(crate) fn finish_request(&mut self) {
        debug_assert!(self.state.is_pending(), "graft without pending request");
        self.token = None;
        self.state = LoadState::Loaded;
    }

    /// Attaches a grafted child in its quadrant slot.
    pub(crate) fn attach_child(&mut self, quadrant: usize, child: TileNode) {
        debug_assert!(self.children[quadrant].is_none(), "child grafted twice");
        self.children[quadrant] = Some(Box::new(child));
    }

    /// Borrows the child in a quadrant slot.
    pub fn child(&self, quadrant: usize) -> Option<&TileNode> {
        self.children[quadrant].as_deref()
    }

    /// Mutably borrows the child in a quadrant slot.
    pub(crate) fn child_mut(&mut self, quadrant: usize) -> Option<&mut TileNode> {
        self.children[quadrant].as_deref_mut()
    }

    /// True once all 4 children are grafted.
    pub fn is_expanded(&self) -> bool {
        self.children.iter().all(|c| c.is_some())
    }

    /// Drops the node's entire subtree and reverts it to an expandable
    /// state, keeping its own content.
    ///
    /// Any descendant with a request in flight is cancelled first (content
    /// is never dropped out from under a pending request) and its key is
    /// appended to `cancelled` so the engine can forget the request.
    pub(crate) fn collapse(&mut self, cancelled: &mut Vec<TileKey>) {
        for slot in &mut self.children {
            if let Some(mut child) = slot.take() {
                child.collapse(cancelled);
                if child.token().is_some() {
                    child.abandon_request();
                    cancelled.push(child.key());
                }
            }
        }
        if self.state.is_loaded() && !self.terminal {
            self.state = if self.content_failed {
                LoadState::Failed
            } else {
                LoadState::Unloaded
            };
        }
    }

    /// Walks down to the descendant with the given key.
    ///
    /// Returns `None` if `key` is not under this node or the path is not
    /// yet grafted. The path is derived from the key bits alone, one
    /// quadrant per level.
    pub fn find(&self, key: TileKey) -> Option<&TileNode> {
        let quadrant = self.step_toward(key)?;
        match quadrant {
            None => Some(self),
            Some(q) => self.child(q)?.find(key),
        }
    }

    /// Mutable variant of [`find`](Self::find).
    pub(crate) fn find_mut(&mut self, key: TileKey) -> Option<&mut TileNode> {
        let quadrant = self.step_toward(key)?;
        match quadrant {
            None => Some(self),
            Some(q) => self.child_mut(q)?.find_mut(key),
        }
    }

    /// Next quadrant on the path from this node to `key`.
    ///
    /// `Some(None)` means `key` is this node; `None` means `key` is not in
    /// this subtree.
    fn step_toward(&self, key: TileKey) -> Option<Option<usize>> {
        if key == self.key {
            return Some(None);
        }
        if key.level() <= self.key.level() {
            return None;
        }
        // Ancestor of `key` one level below this node
        let shift = key.level() - self.key.level() - 1;
        let ax = key.x() >> shift;
        let ay = key.y() >> shift;
        if ax >> 1 != self.key.x() || ay >> 1 != self.key.y() {
            return None;
        }
        Some(Some(((ax & 1) | ((ay & 1) << 1)) as usize))
    }
}

impl std::fmt::Debug for TileNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileNode")
            .field("key", &self.key.to_string())
            .field("state", &self.state)
            .field("has_content", &self.content.is_some())
            .field("expanded", &self.is_expanded())
            .field("terminal", &self.terminal)
            .finish()
    }
}
