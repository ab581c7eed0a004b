//! Force simulation state and a single iteration step.
//!
//! Positions and velocities live in flat buffers indexed by topology slot.
//! One [`Simulation::tick`] applies, in order:
//! 1. Link force (springs along edges, degree-biased)
//! 2. Charge force (pairwise repulsion with a `distance_min` guard)
//! 3. Collision force (pairs closer than twice the node radius)
//! 4. Cluster force (centroid attraction and centroid separation)
//! 5. Velocity integration with decay
//! 6. Centre force (shifts the mean position onto the configured centre)
//!
//! Non-finite values are clamped back to the last finite position and
//! counted; they never abort the run.

use std::collections::HashMap;
use std::f64::consts::PI;

use crate::graph::{Dimensions, GraphTopology, NodeId, Point};

use super::config::{ClusteringConfig, ForceConfig};

/// Radius of the first node on the placement spiral.
const INITIAL_RADIUS: f64 = 10.0;

/// Deterministic position for the `index`-th unplaced node.
///
/// 2D uses a phyllotaxis spiral; 3D places nodes on Fibonacci-sphere
/// directions with a radius growing with the cube root of the index, so the
/// volume density stays roughly uniform.
pub fn initial_position(index: usize, dimensions: Dimensions) -> Point {
    let i = index as f64;
    let golden_angle = PI * (3.0 - 5f64.sqrt());
    match dimensions {
        Dimensions::Two => {
            let radius = INITIAL_RADIUS * (0.5 + i).sqrt();
            let angle = i * golden_angle;
            Point::new_2d(radius * angle.cos(), radius * angle.sin())
        }
        Dimensions::Three => {
            let radius = INITIAL_RADIUS * (0.5 + i).cbrt();
            // Cycle through a fixed number of directions per shell.
            let shell = 32.0;
            let k = i % shell;
            let y = 1.0 - 2.0 * (k + 0.5) / shell;
            let ring = (1.0 - y * y).sqrt();
            let theta = i * golden_angle;
            Point::new(radius * ring * theta.cos(), radius * y, radius * ring * theta.sin())
        }
    }
}

/// Linear congruential generator used for jiggle, so runs are reproducible.
#[derive(Debug, Clone)]
struct Lcg(u64);

impl Lcg {
    const A: u64 = 1_664_525;
    const C: u64 = 1_013_904_223;
    const M: u64 = 1 << 32;

    fn next(&mut self) -> f64 {
        self.0 = (Self::A * self.0 + Self::C) % Self::M;
        self.0 as f64 / Self::M as f64
    }

    fn jiggle(&mut self) -> f64 {
        (self.next() - 0.5) * 1e-6
    }
}

#[derive(Debug, Clone, Copy)]
struct PreparedLink {
    source: usize,
    target: usize,
    strength: f64,
    /// Share of the correction applied to the target.
    bias: f64,
}

/// Groups of slots pulled together by the cluster force.
pub(crate) struct ClusterForce<'a> {
    /// Group index per slot; only groups with two or more members.
    pub groups: &'a [Option<usize>],
    pub group_count: usize,
    pub attraction: f64,
    pub separation: f64,
}

impl<'a> ClusterForce<'a> {
    pub fn new(groups: &'a [Option<usize>], config: &ClusteringConfig) -> Self {
        let group_count = groups.iter().flatten().map(|g| g + 1).max().unwrap_or(0);
        Self {
            groups,
            group_count,
            attraction: config.cluster_attraction,
            separation: config.cluster_separation,
        }
    }
}

/// Result of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub(crate) struct TickStats {
    /// Mean displacement of the movable nodes.
    pub mean_delta: f64,
    /// Nodes whose position or velocity had to be clamped.
    pub clamped: usize,
}

pub(crate) struct Simulation {
    dimensions: Dimensions,
    ids: Vec<NodeId>,
    positions: Vec<Point>,
    velocities: Vec<Point>,
    pinned: Vec<bool>,
    links: Vec<PreparedLink>,
    lcg: Lcg,
    calculations: u64,
}

impl Simulation {
    /// Seed positions from the topology. Nodes without coordinates use
    /// `previous` when it knows them, then the placement spiral.
    pub fn new(
        topology: &GraphTopology,
        forces: &ForceConfig,
        dimensions: Dimensions,
        previous: &HashMap<NodeId, Point>,
    ) -> Self {
        let n = topology.node_count();
        let mut positions = Vec::with_capacity(n);
        let mut pinned = Vec::with_capacity(n);
        let mut ids = Vec::with_capacity(n);

        for (slot, node) in topology.nodes().iter().enumerate() {
            let supplied = node
                .position
                .filter(|p| p.is_finite())
                .or_else(|| previous.get(&node.id).copied());
            let position = supplied.unwrap_or_else(|| initial_position(slot, dimensions));
            positions.push(position.project(dimensions));
            // A pinned node without a position is placed once and then held.
            pinned.push(node.pinned);
            ids.push(node.id);
        }

        let degrees: Vec<usize> = (0..n).map(|slot| topology.degree(slot)).collect();
        let links = topology
            .links()
            .iter()
            .filter(|link| link.source != link.target)
            .map(|link| {
                let (ds, dt) = (degrees[link.source] as f64, degrees[link.target] as f64);
                let base = forces.link_strength.unwrap_or_else(|| 1.0 / ds.min(dt).max(1.0));
                PreparedLink {
                    source: link.source,
                    target: link.target,
                    strength: base * link.weight,
                    bias: ds / (ds + dt),
                }
            })
            .collect();

        Self {
            dimensions,
            ids,
            positions,
            velocities: vec![Point::ORIGIN; n],
            pinned,
            links,
            lcg: Lcg(1),
            calculations: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &[Point] {
        &self.positions
    }

    pub fn position_map(&self) -> HashMap<NodeId, Point> {
        self.ids.iter().copied().zip(self.positions.iter().copied()).collect()
    }

    /// Pairwise and per-link force evaluations so far.
    pub fn calculations(&self) -> u64 {
        self.calculations
    }

    /// Approximate heap footprint of the buffers.
    pub fn memory_estimate(&self) -> usize {
        self.len() * (2 * size_of::<Point>() + size_of::<bool>() + size_of::<NodeId>())
            + self.links.len() * size_of::<PreparedLink>()
    }

    fn jiggle_vector(&mut self) -> Point {
        let z = match self.dimensions {
            Dimensions::Two => 0.0,
            Dimensions::Three => self.lcg.jiggle(),
        };
        Point::new(self.lcg.jiggle(), self.lcg.jiggle(), z)
    }

    /// Advance the simulation by one iteration at energy `alpha`.
    pub fn tick(
        &mut self,
        forces: &ForceConfig,
        alpha: f64,
        velocity_decay: f64,
        clusters: Option<&ClusterForce<'_>>,
    ) -> TickStats {
        self.apply_links(forces, alpha);
        self.apply_charge(forces, alpha);
        self.apply_collision(forces);
        if let Some(clusters) = clusters {
            self.apply_clusters(clusters, alpha);
        }

        let before = self.positions.clone();
        let mut clamped = 0;
        for i in 0..self.len() {
            if self.pinned[i] {
                self.velocities[i] = Point::ORIGIN;
                continue;
            }
            let v = (self.velocities[i] * (1.0 - velocity_decay)).project(self.dimensions);
            if !v.is_finite() {
                self.velocities[i] = Point::ORIGIN;
                clamped += 1;
                continue;
            }
            self.velocities[i] = v;
            self.positions[i] += v;
        }

        self.apply_center(forces);

        let mut total_delta = 0.0;
        let mut movable = 0usize;
        for i in 0..self.len() {
            if self.pinned[i] {
                continue;
            }
            movable += 1;
            if !self.positions[i].is_finite() {
                self.positions[i] = if before[i].is_finite() { before[i] } else { forces.center };
                self.velocities[i] = Point::ORIGIN;
                clamped += 1;
                continue;
            }
            total_delta += self.positions[i].distance(before[i]);
        }

        TickStats {
            mean_delta: if movable == 0 { 0.0 } else { total_delta / movable as f64 },
            clamped,
        }
    }

    fn apply_links(&mut self, forces: &ForceConfig, alpha: f64) {
        for k in 0..self.links.len() {
            let link = self.links[k];
            let s = self.positions[link.source] + self.velocities[link.source];
            let t = self.positions[link.target] + self.velocities[link.target];
            let mut d = t - s;
            if d.length_squared() == 0.0 {
                d = self.jiggle_vector();
            }
            let l = d.length();
            let correction = d * ((l - forces.link_distance) / l * alpha * link.strength);
            self.velocities[link.target] = self.velocities[link.target] - correction * link.bias;
            self.velocities[link.source] += correction * (1.0 - link.bias);
        }
        self.calculations += self.links.len() as u64;
    }

    fn apply_charge(&mut self, forces: &ForceConfig, alpha: f64) {
        if forces.charge_strength == 0.0 {
            return;
        }
        let n = self.len();
        let min2 = forces.distance_min * forces.distance_min;
        let max2 = forces.charge_distance_max.map(|m| m * m);

        for i in 0..n {
            for j in (i + 1)..n {
                let mut d = self.positions[j] - self.positions[i];
                let mut l2 = d.length_squared();
                if l2 == 0.0 {
                    d = self.jiggle_vector();
                    l2 = d.length_squared();
                }
                if max2.is_some_and(|max2| l2 >= max2) {
                    continue;
                }
                if l2 < min2 {
                    l2 = (min2 * l2).sqrt();
                }
                let push = d * (forces.charge_strength * alpha / l2);
                self.velocities[i] += push;
                self.velocities[j] = self.velocities[j] - push;
            }
        }
        self.calculations += (n * n.saturating_sub(1) / 2) as u64;
    }

    fn apply_collision(&mut self, forces: &ForceConfig) {
        if forces.collision_radius <= 0.0 || forces.collision_strength <= 0.0 {
            return;
        }
        let n = self.len();
        let reach = 2.0 * forces.collision_radius;

        for i in 0..n {
            for j in (i + 1)..n {
                let mut d = (self.positions[i] + self.velocities[i]) - (self.positions[j] + self.velocities[j]);
                let mut l2 = d.length_squared();
                if l2 >= reach * reach {
                    continue;
                }
                if l2 == 0.0 {
                    d = self.jiggle_vector();
                    l2 = d.length_squared();
                }
                let l = l2.sqrt();
                let push = d * ((reach - l) / l * forces.collision_strength * 0.5);
                self.velocities[i] += push;
                self.velocities[j] = self.velocities[j] - push;
            }
        }
        self.calculations += (n * n.saturating_sub(1) / 2) as u64;
    }

    fn apply_clusters(&mut self, clusters: &ClusterForce<'_>, alpha: f64) {
        if clusters.group_count == 0 {
            return;
        }
        let mut sums = vec![Point::ORIGIN; clusters.group_count];
        let mut counts = vec![0usize; clusters.group_count];
        for (slot, group) in clusters.groups.iter().enumerate() {
            if let Some(g) = *group {
                sums[g] += self.positions[slot];
                counts[g] += 1;
            }
        }
        let centroids: Vec<Point> = sums
            .iter()
            .zip(&counts)
            .map(|(&sum, &count)| if count == 0 { Point::ORIGIN } else { sum * (1.0 / count as f64) })
            .collect();

        for (slot, group) in clusters.groups.iter().enumerate() {
            if let Some(g) = *group {
                let pull = (centroids[g] - self.positions[slot]) * (clusters.attraction * alpha);
                self.velocities[slot] += pull;
            }
        }

        if clusters.separation <= 0.0 {
            return;
        }
        let mut shifts = vec![Point::ORIGIN; clusters.group_count];
        for a in 0..clusters.group_count {
            for b in (a + 1)..clusters.group_count {
                if counts[a] == 0 || counts[b] == 0 {
                    continue;
                }
                let mut d = centroids[a] - centroids[b];
                let mut l = d.length();
                if l >= clusters.separation {
                    continue;
                }
                if l == 0.0 {
                    d = self.jiggle_vector();
                    l = d.length();
                }
                let push = d * ((clusters.separation - l) / l * alpha * 0.5);
                shifts[a] += push;
                shifts[b] = shifts[b] - push;
            }
        }
        for (slot, group) in clusters.groups.iter().enumerate() {
            if let Some(g) = *group {
                self.velocities[slot] += shifts[g];
            }
        }
    }

    fn apply_center(&mut self, forces: &ForceConfig) {
        if forces.center_strength == 0.0 {
            return;
        }
        let movable = self.pinned.iter().filter(|p| !**p).count();
        if movable == 0 {
            return;
        }
        // Pinned nodes are anchors; only the free nodes are recentred.
        let mut sum = Point::ORIGIN;
        for (p, pinned) in self.positions.iter().zip(&self.pinned) {
            if !pinned {
                sum += *p;
            }
        }
        let mean = sum * (1.0 / movable as f64);
        let shift = ((forces.center.project(self.dimensions) - mean) * forces.center_strength).project(self.dimensions);
        if !shift.is_finite() {
            return;
        }
        for i in 0..self.len() {
            if !self.pinned[i] {
                self.positions[i] += shift;
            }
        }
    }

    /// Overwrite a position, e.g. to inject a non-finite value in tests.
    #[cfg(test)]
    pub fn set_position(&mut self, slot: usize, position: Point) {
        self.positions[slot] = position;
    }
}
