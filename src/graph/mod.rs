//! Graph data structures.
//!
//! Node and edge sets are supplied per layout run. [`GraphTopology`] indexes
//! one such set with petgraph's StableGraph and hands the force simulation
//! dense slot indices for its flat position and velocity buffers.

mod edge;
mod node;
mod topology;

pub use edge::Edge;
pub use node::{ClusterId, Dimensions, Metadata, Node, NodeId, Point};
pub use topology::{GraphTopology, Link};
