//! Axis-aligned bounds used by the spatial index.
//!
//! Bounds are closed on both edges for containment and intersection tests.
//! Child ownership during subdivision is half-open: a point lands in the upper
//! child along an axis when its coordinate is `>=` the split centre, so every
//! point has exactly one owner and still lies inside that owner's closed
//! bounds.

use serde::{Deserialize, Serialize};

use crate::graph::{Dimensions, Point};

/// Axis-aligned bounding box (rectangle in 2D, box in 3D).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Point,
    pub max: Point,
}

impl Bounds {
    pub fn new(min: Point, max: Point) -> Self {
        Self { min, max }
    }

    /// 2D rectangle from corner coordinates.
    pub fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min: Point::new_2d(min_x.min(max_x), min_y.min(max_y)),
            max: Point::new_2d(min_x.max(max_x), min_y.max(max_y)),
        }
    }

    /// Degenerate bounds covering a single point.
    pub fn point(p: Point) -> Self {
        Self { min: p, max: p }
    }

    /// Smallest bounds containing all points, or `None` when empty.
    pub fn enclosing(points: impl IntoIterator<Item = Point>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bounds = Self::point(first);
        for p in iter {
            bounds.min.x = bounds.min.x.min(p.x);
            bounds.min.y = bounds.min.y.min(p.y);
            bounds.min.z = bounds.min.z.min(p.z);
            bounds.max.x = bounds.max.x.max(p.x);
            bounds.max.y = bounds.max.y.max(p.y);
            bounds.max.z = bounds.max.z.max(p.z);
        }
        Some(bounds)
    }

    pub fn center(&self) -> Point {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Point {
        self.max - self.min
    }

    /// Grow every side by `margin`.
    pub fn expanded(&self, margin: f64) -> Self {
        let m = Point::new(margin, margin, margin);
        Self {
            min: self.min - m,
            max: self.max + m,
        }
    }

    /// Inclusive containment on every edge.
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Inclusive overlap test.
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Squared distance from `p` to the closest point of these bounds
    /// (zero when inside).
    pub fn distance_squared_to(&self, p: Point) -> f64 {
        let clamped = Point::new(
            p.x.clamp(self.min.x, self.max.x),
            p.y.clamp(self.min.y, self.max.y),
            p.z.clamp(self.min.z, self.max.z),
        );
        clamped.distance_squared(p)
    }

    /// Index of the child partition that owns `p`.
    ///
    /// Bit 0 selects the upper x half, bit 1 the upper y half, bit 2 the upper
    /// z half (3D only).
    pub fn child_index(&self, p: Point, dimensions: Dimensions) -> usize {
        let c = self.center();
        let mut index = 0;
        if p.x >= c.x {
            index |= 1;
        }
        if p.y >= c.y {
            index |= 2;
        }
        if dimensions == Dimensions::Three && p.z >= c.z {
            index |= 4;
        }
        index
    }

    /// Bounds of the child partition at `index` (see [`Bounds::child_index`]).
    pub fn child(&self, index: usize, dimensions: Dimensions) -> Bounds {
        let c = self.center();
        let pick = |bit: usize, lo: f64, mid: f64, hi: f64| {
            if index & bit != 0 { (mid, hi) } else { (lo, mid) }
        };
        let (min_x, max_x) = pick(1, self.min.x, c.x, self.max.x);
        let (min_y, max_y) = pick(2, self.min.y, c.y, self.max.y);
        let (min_z, max_z) = match dimensions {
            Dimensions::Two => (self.min.z, self.max.z),
            Dimensions::Three => pick(4, self.min.z, c.z, self.max.z),
        };
        Bounds::new(Point::new(min_x, min_y, min_z), Point::new(max_x, max_y, max_z))
    }

    /// All child partitions (4 in 2D, 8 in 3D).
    pub fn children(&self, dimensions: Dimensions) -> Vec<Bounds> {
        (0..dimensions.branching())
            .map(|i| self.child(i, dimensions))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enclosing() {
        let b = Bounds::enclosing([
            Point::new_2d(10.0, 50.0),
            Point::new_2d(90.0, 10.0),
            Point::new_2d(50.0, 90.0),
        ])
        .unwrap();
        assert_eq!(b, Bounds::rect(10.0, 10.0, 90.0, 90.0));
        assert!(Bounds::enclosing(std::iter::empty()).is_none());
    }

    #[test]
    fn test_contains_is_inclusive() {
        let b = Bounds::rect(0.0, 0.0, 10.0, 10.0);
        assert!(b.contains(Point::new_2d(0.0, 0.0)));
        assert!(b.contains(Point::new_2d(10.0, 10.0)));
        assert!(!b.contains(Point::new_2d(10.0001, 5.0)));
    }

    #[test]
    fn test_child_ownership_is_half_open() {
        let b = Bounds::rect(0.0, 0.0, 100.0, 100.0);
        let center = Point::new_2d(50.0, 50.0);
        let idx = b.child_index(center, Dimensions::Two);
        assert_eq!(idx, 3);
        assert!(b.child(idx, Dimensions::Two).contains(center));
        assert_eq!(b.child_index(Point::new_2d(49.9, 50.0), Dimensions::Two), 2);
        assert_eq!(b.child_index(Point::new_2d(100.0, 0.0), Dimensions::Two), 1);
    }

    #[test]
    fn test_children_cover_parent() {
        let b = Bounds::new(Point::new(0.0, 0.0, 0.0), Point::new(8.0, 8.0, 8.0));
        let children = b.children(Dimensions::Three);
        assert_eq!(children.len(), 8);
        let volume: f64 = children
            .iter()
            .map(|c| {
                let s = c.size();
                s.x * s.y * s.z
            })
            .sum();
        assert_eq!(volume, 512.0);
        assert_eq!(b.children(Dimensions::Two).len(), 4);
    }

    #[test]
    fn test_distance_to_bounds() {
        let b = Bounds::rect(0.0, 0.0, 10.0, 10.0);
        assert_eq!(b.distance_squared_to(Point::new_2d(5.0, 5.0)), 0.0);
        assert_eq!(b.distance_squared_to(Point::new_2d(13.0, 14.0)), 25.0);
    }
}
