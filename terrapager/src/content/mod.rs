//! Tile content production.
//!
//! The engine never knows what tile content actually is: a mesh, a point
//! cloud, a feature batch. It consumes a [`ContentFactory`] supplied by the
//! caller and stores whatever the factory produces behind the type-erased
//! [`ContentHandle`]. Factories are called synchronously on whichever thread
//! requests the build: the orchestration thread for an activated node, a
//! worker thread for deferred child discovery.

use std::any::Any;
use std::error::Error;
use std::fmt;

use crate::tile::TileKey;

/// Opaque owned tile content.
///
/// Wraps the payload a [`ContentFactory`] produced for one tile. The engine
/// moves and drops handles but never inspects them; callers downcast in
/// their render-side callbacks.
pub struct ContentHandle {
    payload: Box<dyn Any + Send + Sync>,
}

impl ContentHandle {
    /// Wraps a payload value.
    pub fn new<T: Any + Send + Sync>(payload: T) -> Self {
        Self {
            payload: Box::new(payload),
        }
    }

    /// Borrows the payload if it has the expected type.
    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }

    /// Recovers the payload if it has the expected type, consuming the
    /// handle on success.
    pub fn downcast<T: Any + Send + Sync>(self) -> Result<Box<T>, ContentHandle> {
        match self.payload.downcast() {
            Ok(payload) => Ok(payload),
            Err(payload) => Err(ContentHandle { payload }),
        }
    }
}

impl fmt::Debug for ContentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentHandle").finish_non_exhaustive()
    }
}

/// Error type for content factory failures.
///
/// A build error is tile-local: the owning node is marked failed and the
/// rest of the tree proceeds normally.
#[derive(Debug)]
pub struct BuildError {
    /// Human-readable error message.
    message: String,
    /// Optional source error.
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl BuildError {
    /// Creates a new build error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Attaches a source error.
    pub fn with_source(mut self, source: impl Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for BuildError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &_)
    }
}

/// Produces tile content on demand.
///
/// Implementations must be safe to call concurrently for *different* keys;
/// the engine calls `build` for the same key again only after the previous
/// call for that key has resolved.
///
/// # Returns
///
/// * `Ok(Some(content))` - the tile has content at this key
/// * `Ok(None)` - no content at this key; subdivision continues regardless
/// * `Err(_)` - the build failed; the tile is marked failed, siblings and
///   descendants are unaffected
pub trait ContentFactory: Send + Sync + 'static {
    /// Builds the content for one tile.
    fn build(&self, key: TileKey) -> Result<Option<ContentHandle>, BuildError>;
}
