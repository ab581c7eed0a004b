//! Ray-versus-node intersection on top of the spatial index.
//!
//! The descent prunes partitions with a slab test against their bounds grown
//! by the hit tolerance, then tests each leaf entry as a disc (2D) or sphere
//! (3D) of radius = tolerance. The system holds no state between calls.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::graph::{Dimensions, NodeId, Point};

use super::bounds::Bounds;
use super::index::{Partition, PartitionKind, SpatialIndex};

/// Directions shorter than this are rejected.
const MIN_DIRECTION_LENGTH: f64 = 1e-12;

/// A half-line query. `direction` is normalized on construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ray {
    pub origin: Point,
    pub direction: Point,
}

impl Ray {
    /// Create a ray, normalizing the direction.
    pub fn new(origin: Point, direction: Point) -> Result<Self> {
        if !origin.is_finite() {
            return Err(Error::InvalidRay(format!("origin {origin:?} is not finite")));
        }
        if !direction.is_finite() {
            return Err(Error::InvalidRay(format!("direction {direction:?} is not finite")));
        }
        let length = direction.length();
        if length < MIN_DIRECTION_LENGTH {
            return Err(Error::InvalidRay("direction has zero length".into()));
        }
        Ok(Self {
            origin,
            direction: direction * (1.0 / length),
        })
    }

    pub fn new_2d(origin_x: f64, origin_y: f64, dir_x: f64, dir_y: f64) -> Result<Self> {
        Self::new(Point::new_2d(origin_x, origin_y), Point::new_2d(dir_x, dir_y))
    }

    pub fn new_3d(origin: [f64; 3], direction: [f64; 3]) -> Result<Self> {
        Self::new(
            Point::new(origin[0], origin[1], origin[2]),
            Point::new(direction[0], direction[1], direction[2]),
        )
    }

    /// Point at parameter `t` along the ray.
    pub fn at(&self, t: f64) -> Point {
        self.origin + self.direction * t
    }

    /// Re-validate and project onto the active axes. Rays built through struct
    /// literals skip [`Ray::new`], so every query goes through here.
    fn prepared(&self, dimensions: Dimensions) -> Result<Ray> {
        Ray::new(self.origin.project(dimensions), self.direction.project(dimensions))
    }
}

/// A node hit by a ray.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RayIntersection {
    pub node_id: NodeId,
    /// Signed distance from the ray origin to the point of closest approach.
    /// Slightly negative for nodes straddling the origin.
    pub ray_distance: f64,
    /// Perpendicular distance between the node centre and the ray.
    pub offset: f64,
    /// Point of closest approach on the ray.
    pub point: Point,
}

/// Stateless raycaster over a [`SpatialIndex`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RaycastingSystem {
    tolerance: Option<f64>,
}

impl RaycastingSystem {
    /// Use the index's `ray_intersection_tolerance`.
    pub fn new() -> Self {
        Self { tolerance: None }
    }

    /// Override the hit tolerance.
    pub fn with_tolerance(tolerance: f64) -> Self {
        Self {
            tolerance: Some(tolerance.max(0.0)),
        }
    }

    /// Intersect using the index's own dimensionality.
    pub fn raycast(&self, ray: &Ray, index: &SpatialIndex) -> Result<Vec<RayIntersection>> {
        self.cast(ray, index, index.dimensions())
    }

    /// Intersect in the xy plane, ignoring z.
    pub fn raycast_2d(&self, ray: &Ray, index: &SpatialIndex) -> Result<Vec<RayIntersection>> {
        self.cast(ray, index, Dimensions::Two)
    }

    pub fn raycast_3d(&self, ray: &Ray, index: &SpatialIndex) -> Result<Vec<RayIntersection>> {
        self.cast(ray, index, Dimensions::Three)
    }

    /// The closest intersection, if any.
    pub fn raycast_first(&self, ray: &Ray, index: &SpatialIndex) -> Result<Option<RayIntersection>> {
        Ok(self.raycast(ray, index)?.into_iter().next())
    }

    fn cast(
        &self,
        ray: &Ray,
        index: &SpatialIndex,
        dimensions: Dimensions,
    ) -> Result<Vec<RayIntersection>> {
        let ray = ray.prepared(dimensions)?;
        let tolerance = self
            .tolerance
            .unwrap_or(index.config().ray_intersection_tolerance);

        let mut hits = Vec::new();
        if index.is_empty() {
            return Ok(hits);
        }

        let axes = match dimensions {
            Dimensions::Two => 2,
            Dimensions::Three => 3,
        };

        let mut stack: Vec<&Partition> = vec![index.root()];
        while let Some(partition) = stack.pop() {
            if !slab_hit(&ray, &partition.bounds.expanded(tolerance), axes, tolerance) {
                continue;
            }
            match &partition.kind {
                PartitionKind::Leaf(entries) => {
                    for entry in entries {
                        if let Some(hit) = test_entry(&ray, entry.id, entry.point.project(dimensions), tolerance) {
                            hits.push(hit);
                        }
                    }
                }
                PartitionKind::Branch(children) => stack.extend(children.iter()),
            }
        }

        hits.sort_by(|a, b| {
            a.ray_distance
                .total_cmp(&b.ray_distance)
                .then(a.node_id.cmp(&b.node_id))
        });
        Ok(hits)
    }
}

/// Slab test of the ray against closed bounds.
fn slab_hit(ray: &Ray, bounds: &Bounds, axes: usize, tolerance: f64) -> bool {
    let mut t_min = f64::NEG_INFINITY;
    let mut t_max = f64::INFINITY;

    for axis in 0..axes {
        let origin = ray.origin.axis(axis);
        let dir = ray.direction.axis(axis);
        let lo = bounds.min.axis(axis);
        let hi = bounds.max.axis(axis);

        if dir.abs() < MIN_DIRECTION_LENGTH {
            // Parallel to this slab: inside it or never.
            if origin < lo || origin > hi {
                return false;
            }
            continue;
        }

        let inv = 1.0 / dir;
        let mut t0 = (lo - origin) * inv;
        let mut t1 = (hi - origin) * inv;
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
        }
        t_min = t_min.max(t0);
        t_max = t_max.min(t1);
        if t_min > t_max {
            return false;
        }
    }

    t_max >= -tolerance
}

fn test_entry(ray: &Ray, id: NodeId, center: Point, tolerance: f64) -> Option<RayIntersection> {
    let to_center = center - ray.origin;
    let t = to_center.dot(ray.direction);
    if t < -tolerance {
        return None;
    }
    let closest = ray.at(t);
    let offset = closest.distance(center);
    (offset <= tolerance).then_some(RayIntersection {
        node_id: id,
        ray_distance: t,
        offset,
        point: closest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::SpatialIndexConfig;

    fn index(points: &[(u32, f64, f64)]) -> SpatialIndex {
        let mut index = SpatialIndex::new(SpatialIndexConfig {
            max_depth: 6,
            max_nodes_per_leaf: 4,
            ..SpatialIndexConfig::default()
        })
        .unwrap();
        index.build_from_points(points.iter().map(|&(id, x, y)| (NodeId(id), Point::new_2d(x, y))));
        index
    }

    #[test]
    fn test_zero_direction_rejected() {
        assert!(matches!(Ray::new_2d(0.0, 0.0, 0.0, 0.0), Err(Error::InvalidRay(_))));
        assert!(matches!(
            Ray::new_2d(0.0, 0.0, f64::NAN, 1.0),
            Err(Error::InvalidRay(_))
        ));
    }

    #[test]
    fn test_literal_zero_ray_rejected_at_query() {
        let idx = index(&[(0, 1.0, 1.0)]);
        let ray = Ray {
            origin: Point::ORIGIN,
            direction: Point::ORIGIN,
        };
        assert!(RaycastingSystem::new().raycast(&ray, &idx).is_err());
    }

    #[test]
    fn test_direction_normalized() {
        let ray = Ray::new_2d(0.0, 0.0, 3.0, 4.0).unwrap();
        assert!((ray.direction.length() - 1.0).abs() < 1e-12);
        assert_eq!(ray.at(5.0), Point::new_2d(3.0, 4.0));
    }

    #[test]
    fn test_hits_sorted_by_distance() {
        let idx = index(&[(0, 30.0, 0.0), (1, 10.0, 0.5), (2, 20.0, -1.0), (3, 20.0, 40.0)]);
        let ray = Ray::new_2d(0.0, 0.0, 1.0, 0.0).unwrap();
        let hits = RaycastingSystem::new().raycast_2d(&ray, &idx).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.node_id).collect();
        assert_eq!(ids, vec![NodeId(1), NodeId(2), NodeId(0)]);
        assert!((hits[0].ray_distance - 10.0).abs() < 1e-9);
        assert!((hits[0].offset - 0.5).abs() < 1e-9);
        assert_eq!(hits[2].offset, 0.0);
    }

    #[test]
    fn test_nodes_behind_origin_ignored() {
        let idx = index(&[(0, -10.0, 0.0), (1, 10.0, 0.0)]);
        let ray = Ray::new_2d(0.0, 0.0, 1.0, 0.0).unwrap();
        let hits = RaycastingSystem::new().raycast(&ray, &idx).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node_id, NodeId(1));
    }

    #[test]
    fn test_axis_aligned_ray_on_partition_boundary() {
        // x = 50 is the split line of the root partition.
        let idx = index(&[
            (0, 10.0, 10.0),
            (1, 90.0, 10.0),
            (2, 10.0, 90.0),
            (3, 90.0, 90.0),
            (4, 50.0, 30.0),
            (5, 50.0, 70.0),
        ]);
        let ray = Ray::new_2d(50.0, 0.0, 0.0, 1.0).unwrap();
        let hits = RaycastingSystem::with_tolerance(0.0).raycast(&ray, &idx).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.node_id).collect();
        assert_eq!(ids, vec![NodeId(4), NodeId(5)]);
    }

    #[test]
    fn test_raycast_3d() {
        let mut idx = SpatialIndex::new(
            SpatialIndexConfig {
                max_nodes_per_leaf: 1,
                ..SpatialIndexConfig::default()
            }
            .with_dimensions(Dimensions::Three),
        )
        .unwrap();
        idx.build_from_points([
            (NodeId(0), Point::new(0.0, 0.0, 10.0)),
            (NodeId(1), Point::new(0.0, 0.0, 20.0)),
            (NodeId(2), Point::new(5.0, 5.0, 5.0)),
        ]);
        let ray = Ray::new_3d([0.0, 0.0, 0.0], [0.0, 0.0, 1.0]).unwrap();
        let hits = RaycastingSystem::new().raycast_3d(&ray, &idx).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.node_id).collect();
        assert_eq!(ids, vec![NodeId(0), NodeId(1)]);

        let first = RaycastingSystem::new().raycast_first(&ray, &idx).unwrap().unwrap();
        assert_eq!(first.node_id, NodeId(0));
    }

    #[test]
    fn test_empty_index() {
        let idx = index(&[]);
        let ray = Ray::new_2d(0.0, 0.0, 1.0, 1.0).unwrap();
        assert!(RaycastingSystem::new().raycast(&ray, &idx).unwrap().is_empty());
    }
}
