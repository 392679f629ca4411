//! Tiling profile: the root grid and key factory.
//!
//! A profile fixes the geographic extent of the quadtree, the number of root
//! tiles it is split into, and the deepest level the engine may subdivide
//! to. It is the only way to build a [`TileKey`] from raw coordinates; the
//! factory rejects out-of-range addresses so malformed keys never enter the
//! engine.

use serde::{Deserialize, Serialize};

use super::key::{KeyError, TileKey};
use crate::coord::GeoExtent;

/// Root columns of the default global geodetic profile (two 90°×180° halves).
pub const DEFAULT_ROOT_COLS: u32 = 2;

/// Root rows of the default global geodetic profile.
pub const DEFAULT_ROOT_ROWS: u32 = 1;

/// Quadtree tiling profile.
///
/// The default profile covers the whole globe with a 2×1 root grid, the
/// usual arrangement for a geodetic tile pyramid. Custom profiles can
/// restrict the extent (regional datasets) or change the root grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TilingProfile {
    extent: GeoExtent,
    root_cols: u32,
    root_rows: u32,
    max_level: u32,
}

/// Deepest subdivision level any profile supports.
///
/// Beyond this the grid dimensions would overflow `u32`.
pub(crate) const HARD_MAX_LEVEL: u32 = 30;

impl Default for TilingProfile {
    fn default() -> Self {
        Self::global_geodetic()
    }
}

impl TilingProfile {
    /// The standard whole-globe profile: 2×1 roots over ±180°/±90°.
    pub fn global_geodetic() -> Self {
        Self {
            extent: GeoExtent::GLOBE,
            root_cols: DEFAULT_ROOT_COLS,
            root_rows: DEFAULT_ROOT_ROWS,
            max_level: HARD_MAX_LEVEL,
        }
    }

    /// Creates a custom profile.
    ///
    /// Returns `None` if the extent is invalid, the root grid is empty, or
    /// `max_level` exceeds the hard limit of 30.
    pub fn new(extent: GeoExtent, root_cols: u32, root_rows: u32, max_level: u32) -> Option<Self> {
        if !extent.is_valid() || root_cols == 0 || root_rows == 0 || max_level > HARD_MAX_LEVEL {
            return None;
        }
        Some(Self {
            extent,
            root_cols,
            root_rows,
            max_level,
        })
    }

    /// The profile's full geographic extent.
    pub fn extent(&self) -> GeoExtent {
        self.extent
    }

    /// Deepest level keys may be constructed at.
    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    /// Number of columns at a level.
    pub fn cols_at_level(&self, level: u32) -> u32 {
        self.root_cols << level
    }

    /// Number of rows at a level.
    pub fn rows_at_level(&self, level: u32) -> u32 {
        self.root_rows << level
    }

    /// Enumerates the level-0 keys in row-major order.
    pub fn root_keys(&self) -> Vec<TileKey> {
        let mut keys = Vec::with_capacity((self.root_cols * self.root_rows) as usize);
        for y in 0..self.root_rows {
            for x in 0..self.root_cols {
                keys.push(TileKey::new_unchecked(0, x, y));
            }
        }
        keys
    }

    /// Builds a validated key from raw coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] if the level exceeds the profile maximum or the
    /// column/row is outside the grid at that level.
    pub fn key(&self, level: u32, x: u32, y: u32) -> Result<TileKey, KeyError> {
        if level > self.max_level {
            return Err(KeyError::LevelOutOfRange {
                level,
                max_level: self.max_level,
            });
        }
        let cols = self.cols_at_level(level);
        if x >= cols {
            return Err(KeyError::ColumnOutOfRange { x, level, cols });
        }
        let rows = self.rows_at_level(level);
        if y >= rows {
            return Err(KeyError::RowOutOfRange { y, level, rows });
        }
        Ok(TileKey::new_unchecked(level, x, y))
    }

    /// Computes the geographic extent of a key.
    ///
    /// Pure for a fixed profile: the extent follows from the key's grid cell
    /// alone. Row 0 is the profile's northern edge.
    pub fn extent_of(&self, key: TileKey) -> GeoExtent {
        let cols = self.cols_at_level(key.level()) as f64;
        let rows = self.rows_at_level(key.level()) as f64;

        let tile_width = self.extent.width() / cols;
        let tile_height = self.extent.height() / rows;

        let west = self.extent.west + key.x() as f64 * tile_width;
        let north = self.extent.north - key.y() as f64 * tile_height;

        GeoExtent::new(west, north - tile_height, west + tile_width, north)
    }
}
