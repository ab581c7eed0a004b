//! Spatial index configuration and presets.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::graph::Dimensions;

/// When the index rebuilds after positions change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RebuildStrategy {
    /// Rebuild as soon as new positions arrive.
    #[default]
    Automatic,
    /// Hold new positions until [`SpatialIndex::rebuild`](super::SpatialIndex::rebuild).
    Manual,
}

/// Configuration for [`SpatialIndex`](super::SpatialIndex).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpatialIndexConfig {
    /// Quadtree (2D) or octree (3D).
    pub dimensions: Dimensions,
    /// Maximum partition depth; the root is depth 0.
    pub max_depth: usize,
    /// A leaf subdivides once it holds more entries than this.
    pub max_nodes_per_leaf: usize,
    /// Cache nearest/region/radius query results.
    pub enable_caching: bool,
    /// Maximum number of cached query results.
    pub cache_size: usize,
    /// Radius of the disc/sphere each node presents to a ray.
    pub ray_intersection_tolerance: f64,
    /// Hit radius for point (pointer) queries.
    pub point_query_tolerance: f64,
    pub rebuild: RebuildStrategy,
}

impl Default for SpatialIndexConfig {
    fn default() -> Self {
        Self::balanced()
    }
}

impl SpatialIndexConfig {
    /// Shallow, coarse partitions: cheap builds, looser hit tests.
    pub fn fast() -> Self {
        Self {
            dimensions: Dimensions::Two,
            max_depth: 5,
            max_nodes_per_leaf: 16,
            enable_caching: true,
            cache_size: 256,
            ray_intersection_tolerance: 4.0,
            point_query_tolerance: 8.0,
            rebuild: RebuildStrategy::Automatic,
        }
    }

    /// Deep, fine partitions with tight tolerances.
    pub fn precise() -> Self {
        Self {
            dimensions: Dimensions::Two,
            max_depth: 12,
            max_nodes_per_leaf: 4,
            enable_caching: true,
            cache_size: 1024,
            ray_intersection_tolerance: 0.5,
            point_query_tolerance: 1.0,
            rebuild: RebuildStrategy::Automatic,
        }
    }

    pub fn balanced() -> Self {
        Self {
            dimensions: Dimensions::Two,
            max_depth: 8,
            max_nodes_per_leaf: 8,
            enable_caching: true,
            cache_size: 512,
            ray_intersection_tolerance: 2.0,
            point_query_tolerance: 5.0,
            rebuild: RebuildStrategy::Automatic,
        }
    }

    /// Small cache and manual rebuilds.
    pub fn memory_efficient() -> Self {
        Self {
            dimensions: Dimensions::Two,
            max_depth: 6,
            max_nodes_per_leaf: 32,
            enable_caching: true,
            cache_size: 32,
            ray_intersection_tolerance: 2.0,
            point_query_tolerance: 5.0,
            rebuild: RebuildStrategy::Manual,
        }
    }

    pub fn with_dimensions(mut self, dimensions: Dimensions) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_nodes_per_leaf == 0 {
            return Err(Error::InvalidConfig(
                "maxNodesPerLeaf must be at least 1".into(),
            ));
        }
        if self.max_depth > 32 {
            return Err(Error::InvalidConfig(format!(
                "maxDepth {} exceeds the supported limit of 32",
                self.max_depth
            )));
        }
        if self.enable_caching && self.cache_size == 0 {
            return Err(Error::InvalidConfig(
                "cacheSize must be positive when caching is enabled".into(),
            ));
        }
        for (name, value) in [
            ("rayIntersectionTolerance", self.ray_intersection_tolerance),
            ("pointQueryTolerance", self.point_query_tolerance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be a finite non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for config in [
            SpatialIndexConfig::fast(),
            SpatialIndexConfig::precise(),
            SpatialIndexConfig::balanced(),
            SpatialIndexConfig::memory_efficient(),
        ] {
            config.validate().unwrap();
        }
        assert!(SpatialIndexConfig::fast().max_depth < SpatialIndexConfig::precise().max_depth);
        assert_eq!(
            SpatialIndexConfig::memory_efficient().rebuild,
            RebuildStrategy::Manual
        );
    }

    #[test]
    fn test_rejects_zero_leaf_capacity() {
        let config = SpatialIndexConfig {
            max_nodes_per_leaf: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_negative_tolerance() {
        let config = SpatialIndexConfig {
            ray_intersection_tolerance: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SpatialIndexConfig =
            serde_json::from_str(r#"{"maxDepth": 6, "maxNodesPerLeaf": 4, "dimensions": "3d"}"#)
                .unwrap();
        assert_eq!(config.max_depth, 6);
        assert_eq!(config.max_nodes_per_leaf, 4);
        assert_eq!(config.dimensions, Dimensions::Three);
        assert_eq!(config.cache_size, SpatialIndexConfig::balanced().cache_size);
    }
}
