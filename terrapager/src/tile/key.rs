//! Quadtree tile key.
//!
//! A [`TileKey`] addresses one tile by depth level and grid column/row.
//! Keys are immutable `Copy` values with structural equality and ordering,
//! suitable as map keys and log fields.

use std::fmt;

use thiserror::Error;

/// Error raised when constructing a tile key from raw coordinates.
///
/// Malformed addresses are a caller bug, rejected at construction so they
/// never reach the paging engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// Level exceeds the profile's maximum subdivision level.
    #[error("level {level} exceeds maximum level {max_level}")]
    LevelOutOfRange {
        /// Requested level.
        level: u32,
        /// Maximum level the profile supports.
        max_level: u32,
    },

    /// Column is outside the grid at the requested level.
    #[error("column {x} out of range at level {level} ({cols} columns)")]
    ColumnOutOfRange {
        /// Requested column.
        x: u32,
        /// Requested level.
        level: u32,
        /// Number of columns at that level.
        cols: u32,
    },

    /// Row is outside the grid at the requested level.
    #[error("row {y} out of range at level {level} ({rows} rows)")]
    RowOutOfRange {
        /// Requested row.
        y: u32,
        /// Requested level.
        level: u32,
        /// Number of rows at that level.
        rows: u32,
    },
}

/// Immutable quadtree tile address.
///
/// `x` is the column (increasing eastward), `y` the row (increasing
/// southward from the profile's northern edge), `level` the subdivision
/// depth (0 = root grid).
///
/// # Quadrant order
///
/// The 4 children of a key are numbered 0-3 in row-major order from the
/// tile's origin (north-west) corner:
///
/// ```text
///   +---+---+
///   | 0 | 1 |      quadrant q -> (2x + (q & 1), 2y + (q >> 1))
///   +---+---+
///   | 2 | 3 |
///   +---+---+
/// ```
///
/// This order is stable and determines child iteration order everywhere in
/// the engine, including graft order and callback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    level: u32,
    x: u32,
    y: u32,
}

impl TileKey {
    /// Creates a key without range validation.
    ///
    /// Only the [`TilingProfile`](super::TilingProfile) factory and the
    /// child/parent derivations below may call this; both preserve validity
    /// by construction.
    pub(crate) fn new_unchecked(level: u32, x: u32, y: u32) -> Self {
        Self { level, x, y }
    }

    /// Subdivision depth, 0 for root tiles.
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Grid column at this level.
    pub fn x(&self) -> u32 {
        self.x
    }

    /// Grid row at this level.
    pub fn y(&self) -> u32 {
        self.y
    }

    /// Derives the child key for one quadrant.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `quadrant >= 4`; quadrants are an engine
    /// internal and always come from a `0..4` loop.
    pub fn child(&self, quadrant: u32) -> TileKey {
        debug_assert!(quadrant < 4, "quadrant must be 0-3");
        TileKey {
            level: self.level + 1,
            x: self.x * 2 + (quadrant & 1),
            y: self.y * 2 + (quadrant >> 1),
        }
    }

    /// Derives all 4 children in quadrant order.
    pub fn children(&self) -> [TileKey; 4] {
        [self.child(0), self.child(1), self.child(2), self.child(3)]
    }

    /// Derives the parent key, or `None` for a root tile.
    pub fn parent(&self) -> Option<TileKey> {
        if self.level == 0 {
            return None;
        }
        Some(TileKey {
            level: self.level - 1,
            x: self.x / 2,
            y: self.y / 2,
        })
    }

    /// Which quadrant of its parent this key occupies.
    pub fn quadrant(&self) -> u32 {
        (self.x & 1) | ((self.y & 1) << 1)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.level, self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let key = TileKey::new_unchecked(3, 5, 2);
        assert_eq!(key.level(), 3);
        assert_eq!(key.x(), 5);
        assert_eq!(key.y(), 2);
    }

    #[test]
    fn test_children_are_one_level_deeper() {
        let key = TileKey::new_unchecked(2, 1, 3);
        for child in key.children() {
            assert_eq!(child.level(), 3);
        }
    }

    #[test]
    fn test_children_are_distinct() {
        let key = TileKey::new_unchecked(0, 0, 0);
        let children = key.children();
        for i in 0..4 {
            for j in (i + 1)..4 {
                assert_ne!(children[i], children[j]);
            }
        }
    }

    #[test]
    fn test_quadrant_order_is_row_major() {
        let key = TileKey::new_unchecked(1, 2, 3);
        let children = key.children();
        assert_eq!(children[0], TileKey::new_unchecked(2, 4, 6)); // NW
        assert_eq!(children[1], TileKey::new_unchecked(2, 5, 6)); // NE
        assert_eq!(children[2], TileKey::new_unchecked(2, 4, 7)); // SW
        assert_eq!(children[3], TileKey::new_unchecked(2, 5, 7)); // SE
    }

    #[test]
    fn test_parent_roundtrip() {
        let key = TileKey::new_unchecked(4, 7, 11);
        for (q, child) in key.children().iter().enumerate() {
            assert_eq!(child.parent(), Some(key));
            assert_eq!(child.quadrant(), q as u32);
        }
    }

    #[test]
    fn test_root_has_no_parent() {
        assert_eq!(TileKey::new_unchecked(0, 1, 0).parent(), None);
    }

    #[test]
    fn test_display() {
        let key = TileKey::new_unchecked(12, 2048, 1365);
        assert_eq!(key.to_string(), "12/2048/1365");
    }

    #[test]
    fn test_ordering_is_structural() {
        let a = TileKey::new_unchecked(1, 0, 0);
        let b = TileKey::new_unchecked(2, 0, 0);
        assert!(a < b);

        let mut keys = vec![
            TileKey::new_unchecked(1, 1, 0),
            TileKey::new_unchecked(0, 0, 0),
            TileKey::new_unchecked(1, 0, 0),
        ];
        keys.sort();
        assert_eq!(keys[0].level(), 0);
        assert_eq!(keys[1], TileKey::new_unchecked(1, 0, 0));
    }

    #[test]
    fn test_hash_distinguishes_keys() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(TileKey::new_unchecked(1, 0, 0));
        set.insert(TileKey::new_unchecked(1, 0, 0));
        set.insert(TileKey::new_unchecked(1, 1, 0));
        assert_eq!(set.len(), 2);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn children_parent_roundtrip(level in 0u32..20, x in 0u32..1000, y in 0u32..1000) {
                let key = TileKey::new_unchecked(level, x, y);
                let children = key.children();
                for (q, child) in children.iter().enumerate() {
                    prop_assert_eq!(child.level(), level + 1);
                    prop_assert_eq!(child.parent(), Some(key));
                    prop_assert_eq!(child.quadrant(), q as u32);
                }
                // All four children are distinct
                for i in 0..4 {
                    for j in (i + 1)..4 {
                        prop_assert_ne!(children[i], children[j]);
                    }
                }
            }
        }
    }
}
