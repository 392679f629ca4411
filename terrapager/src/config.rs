//! Paging engine configuration.
//!
//! Plain data with serde support so front-ends can load it from a file.
//! Invalid combinations are programmer errors and are rejected once, at
//! engine construction, never at runtime inside the paging loop.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bounds::DEFAULT_BOUNDS_SAMPLES;
use crate::node::RefinePolicy;
use crate::progress::DEFAULT_STALE_THRESHOLD;
use crate::scheduler::{DEFAULT_PRIORITY_OFFSET, DEFAULT_PRIORITY_SCALE};

/// Default multiplier from tile radius to child visibility range.
pub const DEFAULT_RANGE_FACTOR: f64 = 6.0;

/// Default shallowest level with renderable content.
pub const DEFAULT_MIN_LEVEL: u32 = 0;

/// Default deepest subdivision level.
pub const DEFAULT_MAX_LEVEL: u32 = 30;

/// Default maximum number of completed results grafted per frame.
pub const DEFAULT_GRAFT_BUDGET: usize = 16;

/// Configuration rejected at engine construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// `min_level` exceeds `max_level`.
    #[error("min_level {min_level} exceeds max_level {max_level}")]
    LevelRangeInverted {
        /// Configured minimum level.
        min_level: u32,
        /// Configured maximum level.
        max_level: u32,
    },

    /// `range_factor` must be positive for ranges to be meaningful.
    #[error("range_factor must be positive")]
    NonPositiveRangeFactor,

    /// A zero graft budget would never graft anything.
    #[error("graft_budget must be at least 1")]
    ZeroGraftBudget,

    /// `max_level` exceeds what the tiling profile supports.
    #[error("max_level {max_level} exceeds profile maximum {profile_max}")]
    MaxLevelBeyondProfile {
        /// Configured maximum level.
        max_level: u32,
        /// The profile's deepest level.
        profile_max: u32,
    },
}

/// Paging engine configuration.
///
/// All fields have usable defaults; `..Default::default()` struct update is
/// the expected way to override a few of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagerConfig {
    /// Optional engine name, prefixed to node names in log output.
    pub name: Option<String>,

    /// Shallowest level at which tiles get renderable content. Nodes above
    /// it are placeholders that still expand.
    pub min_level: u32,

    /// Deepest subdivision level; nodes there are terminal.
    pub max_level: u32,

    /// Multiplier from tile bounding radius to the distance at which the
    /// tile's children take over.
    pub range_factor: f64,

    /// Whether children replace or augment their parent visually.
    pub refine_policy: RefinePolicy,

    /// Frames an in-flight load may lag the clock before it is stale.
    pub stale_threshold: u64,

    /// Whether stale loads are cancelled. Disabling trades responsiveness
    /// for guaranteed completion of every issued load.
    pub can_cancel: bool,

    /// Maximum completed results grafted per frame, bounding per-frame
    /// graft cost.
    pub graft_budget: usize,

    /// Grid subdivisions per axis for bounds estimation.
    pub bounds_samples: u32,

    /// Priority hint scale applied to a submission's tree level.
    pub priority_scale: f32,

    /// Priority hint offset added to every submission.
    pub priority_offset: f32,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            name: None,
            min_level: DEFAULT_MIN_LEVEL,
            max_level: DEFAULT_MAX_LEVEL,
            range_factor: DEFAULT_RANGE_FACTOR,
            refine_policy: RefinePolicy::default(),
            stale_threshold: DEFAULT_STALE_THRESHOLD,
            can_cancel: true,
            graft_budget: DEFAULT_GRAFT_BUDGET,
            bounds_samples: DEFAULT_BOUNDS_SAMPLES,
            priority_scale: DEFAULT_PRIORITY_SCALE,
            priority_offset: DEFAULT_PRIORITY_OFFSET,
        }
    }
}

impl PagerConfig {
    /// Validates the configuration against a tiling profile.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found; engine construction
    /// forwards it.
    pub fn validate(&self, profile_max_level: u32) -> Result<(), ConfigError> {
        if self.min_level > self.max_level {
            return Err(ConfigError::LevelRangeInverted {
                min_level: self.min_level,
                max_level: self.max_level,
            });
        }
        if !(self.range_factor > 0.0) {
            return Err(ConfigError::NonPositiveRangeFactor);
        }
        if self.graft_budget == 0 {
            return Err(ConfigError::ZeroGraftBudget);
        }
        if self.max_level > profile_max_level {
            return Err(ConfigError::MaxLevelBeyondProfile {
                max_level: self.max_level,
                profile_max: profile_max_level,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PagerConfig::default();
        assert_eq!(config.range_factor, DEFAULT_RANGE_FACTOR);
        assert_eq!(config.max_level, DEFAULT_MAX_LEVEL);
        assert_eq!(config.stale_threshold, DEFAULT_STALE_THRESHOLD);
        assert!(config.can_cancel);
        assert_eq!(config.refine_policy, RefinePolicy::Replace);
        assert!(config.validate(30).is_ok());
    }

    #[test]
    fn test_inverted_levels_rejected() {
        let config = PagerConfig {
            min_level: 5,
            max_level: 3,
            ..Default::default()
        };
        assert_eq!(
            config.validate(30),
            Err(ConfigError::LevelRangeInverted {
                min_level: 5,
                max_level: 3
            })
        );
    }

    #[test]
    fn test_non_positive_range_factor_rejected() {
        for bad in [0.0, -1.0, f64::NAN] {
            let config = PagerConfig {
                range_factor: bad,
                ..Default::default()
            };
            assert_eq!(config.validate(30), Err(ConfigError::NonPositiveRangeFactor));
        }
    }

    #[test]
    fn test_zero_graft_budget_rejected() {
        let config = PagerConfig {
            graft_budget: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(30), Err(ConfigError::ZeroGraftBudget));
    }

    #[test]
    fn test_max_level_beyond_profile_rejected() {
        let config = PagerConfig {
            max_level: 12,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(10),
            Err(ConfigError::MaxLevelBeyondProfile { .. })
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let config = PagerConfig {
            name: Some("demo".into()),
            max_level: 4,
            refine_policy: RefinePolicy::Additive,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: PagerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let parsed: PagerConfig =
            serde_json::from_str(r#"{"max_level": 6, "refine_policy": "additive"}"#).unwrap();
        assert_eq!(parsed.max_level, 6);
        assert_eq!(parsed.refine_policy, RefinePolicy::Additive);
        assert_eq!(parsed.range_factor, DEFAULT_RANGE_FACTOR);
    }
}
