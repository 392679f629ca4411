//! Observer callbacks for tile creation.
//!
//! Cross-cutting concerns owned by the caller (metrics, post-processing,
//! cache warming) observe the engine through a [`CallbackRegistry`].
//! Observers fire in insertion order. The registry copies its observer list
//! before invoking handlers, so a handler may itself add or remove
//! callbacks without deadlocking.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::content::ContentHandle;
use crate::tile::TileKey;

/// Observer notified when tile content is materialized.
pub trait PagerCallback: Send + Sync + 'static {
    /// Fired once per successfully materialized tile.
    fn on_create_node(&self, key: TileKey, content: &ContentHandle);
}

/// Insertion-ordered list of observers.
///
/// Mutation and list access share one exclusive lock; the lock is held only
/// for the list walk or copy, never across handler bodies.
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: Mutex<Vec<Arc<dyn PagerCallback>>>,
}

impl CallbackRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an observer. Observers fire in insertion order.
    pub fn add(&self, callback: Arc<dyn PagerCallback>) {
        self.callbacks.lock().push(callback);
    }

    /// Removes a previously added observer, matching by identity.
    ///
    /// Returns true if the observer was present.
    pub fn remove(&self, callback: &Arc<dyn PagerCallback>) -> bool {
        let mut callbacks = self.callbacks.lock();
        if let Some(pos) = callbacks.iter().position(|c| Arc::ptr_eq(c, callback)) {
            callbacks.remove(pos);
            return true;
        }
        false
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Returns true if no observers are registered.
    pub fn is_empty(&self) -> bool {
        self.callbacks.lock().is_empty()
    }

    /// Fires `on_create_node` on every observer, in insertion order.
    ///
    /// The observer list is snapshotted under the lock; handlers run
    /// outside it.
    pub fn fire_on_create_node(&self, key: TileKey, content: &ContentHandle) {
        let snapshot: Vec<_> = self.callbacks.lock().clone();
        for callback in snapshot {
            callback.on_create_node(key, content);
        }
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    struct Recorder {
        name: &'static str,
        log: Arc<PlMutex<Vec<&'static str>>>,
    }

    impl PagerCallback for Recorder {
        fn on_create_node(&self, _key: TileKey, _content: &ContentHandle) {
            self.log.lock().push(self.name);
        }
    }

    fn test_key() -> TileKey {
        crate::tile::TilingProfile::global_geodetic()
            .key(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_fire_in_insertion_order() {
        let log = Arc::new(PlMutex::new(Vec::new()));
        let registry = CallbackRegistry::new();
        registry.add(Arc::new(Recorder {
            name: "first",
            log: Arc::clone(&log),
        }));
        registry.add(Arc::new(Recorder {
            name: "second",
            log: Arc::clone(&log),
        }));

        registry.fire_on_create_node(test_key(), &ContentHandle::new(()));
        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_remove_by_identity() {
        let log = Arc::new(PlMutex::new(Vec::new()));
        let registry = CallbackRegistry::new();
        let kept: Arc<dyn PagerCallback> = Arc::new(Recorder {
            name: "kept",
            log: Arc::clone(&log),
        });
        let removed: Arc<dyn PagerCallback> = Arc::new(Recorder {
            name: "removed",
            log: Arc::clone(&log),
        });
        registry.add(Arc::clone(&kept));
        registry.add(Arc::clone(&removed));

        assert!(registry.remove(&removed));
        assert!(!registry.remove(&removed));
        assert_eq!(registry.len(), 1);

        registry.fire_on_create_node(test_key(), &ContentHandle::new(()));
        assert_eq!(*log.lock(), vec!["kept"]);
    }

    #[test]
    fn test_handler_may_reenter_registry() {
        struct Reentrant {
            registry: Arc<CallbackRegistry>,
            log: Arc<PlMutex<Vec<&'static str>>>,
        }

        impl PagerCallback for Reentrant {
            fn on_create_node(&self, _key: TileKey, _content: &ContentHandle) {
                self.log.lock().push("reentrant");
                // Adding from inside a handler must not deadlock
                self.registry.add(Arc::new(Recorder {
                    name: "added-late",
                    log: Arc::clone(&self.log),
                }));
            }
        }

        let log = Arc::new(PlMutex::new(Vec::new()));
        let registry = Arc::new(CallbackRegistry::new());
        registry.add(Arc::new(Reentrant {
            registry: Arc::clone(&registry),
            log: Arc::clone(&log),
        }));

        registry.fire_on_create_node(test_key(), &ContentHandle::new(()));
        // The late addition fires on the next notification, not this one
        assert_eq!(*log.lock(), vec!["reentrant"]);

        registry.fire_on_create_node(test_key(), &ContentHandle::new(()));
        assert_eq!(*log.lock(), vec!["reentrant", "reentrant", "added-late"]);
    }
}
