//! Tile bounds estimation.
//!
//! Produces a conservative bounding sphere for a tile's geographic extent by
//! sampling a fixed grid of surface points and growing a sphere around them.
//! The result over-includes rather than under-includes, so visibility
//! decisions based on it never cull a tile that should be considered. The
//! estimate is deterministic for a given extent and sample count.

use crate::coord::{self, GeoExtent};

/// Default grid subdivisions per axis for bounds sampling.
///
/// `N` subdivisions sample an (N+1)×(N+1) point grid including both edges.
pub const DEFAULT_BOUNDS_SAMPLES: u32 = 6;

/// A bounding sphere in ECEF coordinates (meters).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    center: [f64; 3],
    radius: f64,
}

impl BoundingSphere {
    /// An empty sphere containing nothing.
    pub fn empty() -> Self {
        Self {
            center: [0.0; 3],
            radius: -1.0,
        }
    }

    /// Sphere center in ECEF meters.
    pub fn center(&self) -> [f64; 3] {
        self.center
    }

    /// Sphere radius in meters; 0 for a single point, negative only while
    /// empty.
    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Returns true if the sphere contains at least one point.
    pub fn is_valid(&self) -> bool {
        self.radius >= 0.0
    }

    /// Grows the sphere to include a point.
    ///
    /// The first point becomes the center; later points outside the sphere
    /// shift the center along the connecting line and grow the radius just
    /// enough to keep every previously included point inside.
    pub fn expand_by(&mut self, point: [f64; 3]) {
        if !self.is_valid() {
            self.center = point;
            self.radius = 0.0;
            return;
        }

        let dist = coord::distance(self.center, point);
        if dist <= self.radius {
            return;
        }

        let new_radius = (self.radius + dist) * 0.5;
        let shift = (new_radius - self.radius) / dist;
        for i in 0..3 {
            self.center[i] += (point[i] - self.center[i]) * shift;
        }
        self.radius = new_radius;
    }

    /// Returns true if a point lies inside or on the sphere.
    pub fn contains(&self, point: [f64; 3]) -> bool {
        self.is_valid() && coord::distance(self.center, point) <= self.radius + 1e-6
    }

    /// Distance from a point to the sphere surface, 0 inside the sphere.
    pub fn distance_to(&self, point: [f64; 3]) -> f64 {
        (coord::distance(self.center, point) - self.radius).max(0.0)
    }
}

/// Estimates a conservative bounding sphere for a geographic extent.
///
/// Samples an `(samples + 1)²` grid of surface points (both edges included),
/// converts each to ECEF on the WGS84 ellipsoid at height 0, and accumulates
/// the enclosing sphere. Terrain relief is not sampled; the sphere bounds
/// the ellipsoid surface patch, which is what the range test needs.
///
/// # Arguments
///
/// * `extent` - The tile's geographic extent
/// * `samples` - Grid subdivisions per axis (see [`DEFAULT_BOUNDS_SAMPLES`])
pub fn estimate_bounds(extent: GeoExtent, samples: u32) -> BoundingSphere {
    let samples = samples.max(1);
    let lon_step = extent.width() / samples as f64;
    let lat_step = extent.height() / samples as f64;

    let mut sphere = BoundingSphere::empty();
    for c in 0..=samples {
        let lon = extent.west + c as f64 * lon_step;
        for r in 0..=samples {
            let lat = extent.south + r as f64 * lat_step;
            sphere.expand_by(coord::geodetic_to_ecef(lat, lon));
        }
    }
    sphere
}
