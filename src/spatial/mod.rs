//! Spatial indexing for sub-linear hit testing.
//!
//! This module provides a quadtree (2D) / octree (3D) index over positioned
//! graph nodes, with nearest, region, radius and ray queries for pointer
//! interaction.

mod bounds;
mod cache;
mod config;
mod index;
mod raycast;

pub use bounds::Bounds;
pub use config::{RebuildStrategy, SpatialIndexConfig};
pub use index::{IndexStatistics, SpatialIndex};
pub use raycast::{Ray, RayIntersection, RaycastingSystem};
