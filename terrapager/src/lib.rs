//! TerraPager - Demand-driven quadtree tile paging
//!
//! This library provides the core of a streaming engine for globe and
//! terrain viewers: it organizes the world into a quadtree of tiles,
//! materializes tile content on demand as the viewer approaches, and
//! abandons in-flight loads cheaply when they go stale, all without ever
//! blocking the render loop.
//!
//! # Architecture
//!
//! ```text
//! render loop (orchestration thread)          worker pool (Executor)
//! ───────────────────────────────────         ──────────────────────
//! touch(frame)      advance staleness clock
//! traverse(viewer)  activate in-range tiles ──▶ children discovery job
//!                                                 ContentFactory × 4
//! drain()           sweep stale requests    ◀── BuildResult (queue)
//!                   graft completed results
//! ```
//!
//! Tile addresses are [`TileKey`]s minted by a [`TilingProfile`]; the
//! [`PagingEngine`] owns the live [`TileNode`] hierarchy and consumes a
//! caller-supplied [`ContentFactory`] (what tiles contain) and [`Executor`]
//! (where deferred work runs). Cancellation is cooperative and measured in
//! render frames, not wall-clock time: see [`ProgressTracker`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use terrapager::{PagerConfig, PagingEngine, TilingProfile, TokioExecutor};
//!
//! let mut engine = PagingEngine::new(
//!     PagerConfig { max_level: 12, ..Default::default() },
//!     TilingProfile::global_geodetic(),
//!     Arc::new(my_factory),
//!     Arc::new(TokioExecutor::current()),
//! )?;
//!
//! // Once per render frame:
//! engine.touch(frame);
//! engine.traverse(viewer_ecef);
//! engine.drain();
//! ```

pub mod bounds;
pub mod callbacks;
pub mod config;
pub mod content;
pub mod coord;
pub mod node;
pub mod pager;
pub mod progress;
pub mod scheduler;
pub mod tile;

pub use bounds::{estimate_bounds, BoundingSphere, DEFAULT_BOUNDS_SAMPLES};
pub use callbacks::{CallbackRegistry, PagerCallback};
pub use config::{ConfigError, PagerConfig, DEFAULT_GRAFT_BUDGET, DEFAULT_RANGE_FACTOR};
pub use content::{BuildError, ContentFactory, ContentHandle};
pub use coord::GeoExtent;
pub use node::{LoadState, RefinePolicy, TileNode};
pub use pager::{PagerStats, PagingEngine};
pub use progress::{LoadToken, ProgressTracker, DEFAULT_STALE_THRESHOLD};
pub use scheduler::{
    BuildResult, ChildBuild, Executor, InlineExecutor, JobHandle, LoadJob, LoadScheduler,
    TokioExecutor,
};
pub use tile::{KeyError, TileKey, TilingProfile};

/// Library version, from the crate metadata.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
