//! Node type and related structures.
//!
//! Nodes are supplied by the caller for each layout run. Each node has:
//! - A stable unique identifier
//! - Optional coordinates (2D or 3D); missing coordinates get a deterministic
//!   initial placement
//! - Optional cluster assignment
//! - Pinned state (excluded from simulation when true)
//! - Opaque caller metadata

use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub};

use serde::{Deserialize, Serialize};

/// Caller-owned metadata attached to nodes and edges.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Stable node identifier.
///
/// It wraps a u32 for efficient storage and WebAssembly interop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Create a new NodeId from a raw u32.
    #[inline]
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw u32 value.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

impl From<u32> for NodeId {
    #[inline]
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<NodeId> for u32 {
    #[inline]
    fn from(id: NodeId) -> Self {
        id.0
    }
}

/// Cluster identifier assigned by the caller or by similarity clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub u32);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cluster({})", self.0)
    }
}

/// Number of spatial axes in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Dimensions {
    #[default]
    #[serde(rename = "2d")]
    Two,
    #[serde(rename = "3d")]
    Three,
}

impl Dimensions {
    /// Number of child partitions produced by one subdivision.
    #[inline]
    pub fn branching(self) -> usize {
        match self {
            Dimensions::Two => 4,
            Dimensions::Three => 8,
        }
    }
}

/// A position in graph space. 2D positions keep `z == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub z: f64,
}

fn is_zero(value: &f64) -> bool {
    *value == 0.0
}

impl Point {
    pub const ORIGIN: Point = Point {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    #[inline]
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn new_2d(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }

    #[inline]
    pub fn dot(self, other: Point) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    #[inline]
    pub fn length_squared(self) -> f64 {
        self.dot(self)
    }

    #[inline]
    pub fn length(self) -> f64 {
        self.length_squared().sqrt()
    }

    #[inline]
    pub fn distance_squared(self, other: Point) -> f64 {
        (self - other).length_squared()
    }

    #[inline]
    pub fn distance(self, other: Point) -> f64 {
        self.distance_squared(other).sqrt()
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Drop the z component when working in 2D.
    #[inline]
    pub fn project(self, dimensions: Dimensions) -> Point {
        match dimensions {
            Dimensions::Two => Point::new_2d(self.x, self.y),
            Dimensions::Three => self,
        }
    }

    /// Coordinate by axis index (0 = x, 1 = y, 2 = z).
    #[inline]
    pub fn axis(self, axis: usize) -> f64 {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }
}

impl Add for Point {
    type Output = Point;

    #[inline]
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Point {
    #[inline]
    fn add_assign(&mut self, rhs: Point) {
        self.x += rhs.x;
        self.y += rhs.y;
        self.z += rhs.z;
    }
}

impl Sub for Point {
    type Output = Point;

    #[inline]
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Point {
    type Output = Point;

    #[inline]
    fn mul(self, rhs: f64) -> Point {
        Point::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// A graph node as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    #[serde(default)]
    pub position: Option<Point>,
    #[serde(default)]
    pub cluster: Option<ClusterId>,
    /// Pinned nodes keep their supplied position during simulation.
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Node {
    /// Create a node without coordinates.
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            position: None,
            cluster: None,
            pinned: false,
            metadata: Metadata::new(),
        }
    }

    /// Create a node at a 2D position.
    pub fn at(id: impl Into<NodeId>, x: f64, y: f64) -> Self {
        Self::new(id).with_position(Point::new_2d(x, y))
    }

    pub fn with_position(mut self, position: Point) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_cluster(mut self, cluster: ClusterId) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id() {
        let id = NodeId::new(42);
        assert_eq!(id.raw(), 42);
        assert_eq!(id.0, 42);
        assert_eq!(format!("{}", id), "Node(42)");
    }

    #[test]
    fn test_node_id_conversion() {
        let id: NodeId = 123.into();
        let raw: u32 = id.into();
        assert_eq!(raw, 123);
    }

    #[test]
    fn test_point_math() {
        let a = Point::new_2d(3.0, 4.0);
        assert_eq!(a.length(), 5.0);
        assert_eq!(a.distance(Point::ORIGIN), 5.0);
        assert_eq!((a - Point::new_2d(1.0, 1.0)) * 2.0, Point::new_2d(4.0, 6.0));
        assert!(!Point::new_2d(f64::NAN, 0.0).is_finite());
        assert_eq!(Point::new(1.0, 2.0, 3.0).project(Dimensions::Two).z, 0.0);
    }

    #[test]
    fn test_node_deserializes_with_defaults() {
        let node: Node = serde_json::from_str(r#"{"id": 7, "position": {"x": 1.5, "y": 2.0}}"#).unwrap();
        assert_eq!(node.id, NodeId(7));
        assert_eq!(node.position, Some(Point::new_2d(1.5, 2.0)));
        assert!(!node.pinned);
        assert!(node.metadata.is_empty());
    }

    #[test]
    fn test_node_builders() {
        let node = Node::at(1, 10.0, 20.0)
            .with_cluster(ClusterId(3))
            .with_metadata("kind", "service")
            .pinned();
        assert!(node.pinned);
        assert_eq!(node.cluster, Some(ClusterId(3)));
        assert_eq!(node.metadata["kind"], "service");
    }
}
