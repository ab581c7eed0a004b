//! LayoutEngine - iterative force-directed layout.
//!
//! One engine drives one run at a time and owns nothing shared, so several
//! engines can run side by side without a renderer. A run:
//! 1. Validates the configuration and input size
//! 2. Builds the [`GraphTopology`] and seeds positions
//! 3. Ticks the simulation until the mean displacement drops below the
//!    stability threshold, the energy is spent, or `max_iterations` is hit
//! 4. Optionally clusters by similarity at checkpoints and on stabilization
//!
//! Between iterations the run consults its [`RunControl`] (pause/cancel) and
//! yields every `yield_interval` iterations.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::clock::Stopwatch;
use crate::error::{Error, Result, Severity, Warning, WarningKind};
use crate::graph::{ClusterId, Dimensions, Edge, GraphTopology, Node, NodeId, Point};
use crate::runtime::{Checkpoint, RunControl, yield_now};
use crate::similarity::SimilarityFunctionRegistry;

use super::clustering::{ClusterSummary, Clusterer, summarize};
use super::config::{LayoutConfig, MAX_SUPPORTED_NODES};
use super::simulation::{ClusterForce, Simulation};

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LayoutState {
    Idle,
    Running,
    Stable,
    Cancelled,
    Failed,
}

/// Progress report handed to the callback.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutProgress {
    pub iteration: usize,
    pub max_iterations: usize,
    /// 0 to 100.
    pub percent: f64,
    pub alpha: f64,
    /// Mean displacement in the last iteration.
    pub delta: f64,
}

/// Cost of one run, or running totals across runs.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub runs: u64,
    pub processing_time_ms: f64,
    pub memory_estimate_bytes: usize,
    pub iterations: u64,
    /// Force evaluations plus similarity calculations.
    pub calculation_count: u64,
    pub similarity_calculations: u64,
    pub node_count: usize,
    pub edge_count: usize,
}

impl PerformanceMetrics {
    fn accumulate(&mut self, run: &PerformanceMetrics) {
        self.runs += run.runs;
        self.processing_time_ms += run.processing_time_ms;
        self.memory_estimate_bytes = run.memory_estimate_bytes;
        self.iterations += run.iterations;
        self.calculation_count += run.calculation_count;
        self.similarity_calculations += run.similarity_calculations;
        self.node_count = run.node_count;
        self.edge_count = run.edge_count;
    }
}

/// What the engine supports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub max_nodes: usize,
    pub dimensions: Vec<Dimensions>,
    pub force_types: Vec<String>,
    pub supports_realtime_updates: bool,
    pub supports_clustering: bool,
}

/// Output of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutResult {
    pub positions: HashMap<NodeId, Point>,
    pub clusters: HashMap<NodeId, ClusterId>,
    pub cluster_summaries: Vec<ClusterSummary>,
    pub iterations: usize,
    /// True when the run settled before `max_iterations`.
    pub converged: bool,
    pub final_delta: f64,
    pub warnings: Vec<Warning>,
    pub metrics: PerformanceMetrics,
}

/// One node in a serialized layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub z: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterId>,
}

fn is_zero(value: &f64) -> bool {
    *value == 0.0
}

/// Rough memory needed to lay out a graph of the given size.
pub fn estimate_memory_bytes(node_count: usize, edge_count: usize) -> usize {
    node_count * (size_of::<Node>() + 3 * size_of::<Point>() + size_of::<NodeId>() + 16)
        + edge_count * (size_of::<Edge>() + 32)
}

/// Force-directed layout engine.
pub struct LayoutEngine {
    registry: Option<Arc<SimilarityFunctionRegistry>>,
    control: RunControl,
    /// False when the control belongs to an outer run that begins and
    /// finishes it.
    owns_control: bool,
    state: LayoutState,
    positions: HashMap<NodeId, Point>,
    clusters: HashMap<NodeId, ClusterId>,
    totals: PerformanceMetrics,
    last_metrics: Option<PerformanceMetrics>,
}

impl LayoutEngine {
    /// Create an engine without similarity clustering support.
    pub fn new() -> Self {
        Self {
            registry: None,
            control: RunControl::new(),
            owns_control: true,
            state: LayoutState::Idle,
            positions: HashMap::new(),
            clusters: HashMap::new(),
            totals: PerformanceMetrics::default(),
            last_metrics: None,
        }
    }

    /// Create an engine that clusters through `registry`.
    pub fn with_registry(registry: Arc<SimilarityFunctionRegistry>) -> Self {
        Self {
            registry: Some(registry),
            ..Self::new()
        }
    }

    /// Drive runs through an externally owned control handle. The owner is
    /// responsible for `begin` and `finish`.
    pub fn with_control(mut self, control: RunControl) -> Self {
        self.control = control;
        self.owns_control = false;
        self
    }

    /// Handle for pausing, resuming or cancelling the current run.
    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    pub fn state(&self) -> LayoutState {
        self.state
    }

    /// Positions of the last run or loaded snapshot.
    pub fn positions(&self) -> &HashMap<NodeId, Point> {
        &self.positions
    }

    pub fn clusters(&self) -> &HashMap<NodeId, ClusterId> {
        &self.clusters
    }

    // =========================================================================
    // Running
    // =========================================================================

    /// Run the simulation to stability.
    ///
    /// Nodes without coordinates start from the previous run's position when
    /// the engine has one, otherwise from a deterministic spiral. Progress is
    /// reported every `progress_interval` iterations and once at the end.
    pub async fn calculate_async<F>(
        &mut self,
        nodes: &[Node],
        edges: &[Edge],
        config: &LayoutConfig,
        on_progress: F,
    ) -> Result<LayoutResult>
    where
        F: FnMut(&LayoutProgress),
    {
        let span = tracing::info_span!("layout.calculate", nodes = nodes.len(), edges = edges.len());
        self.run(nodes, edges, config, on_progress).instrument(span).await
    }

    /// Blocking wrapper around [`LayoutEngine::calculate_async`].
    pub fn calculate(&mut self, nodes: &[Node], edges: &[Edge], config: &LayoutConfig) -> Result<LayoutResult> {
        futures::executor::block_on(self.calculate_async(nodes, edges, config, |_| {}))
    }

    async fn run<F>(&mut self, nodes: &[Node], edges: &[Edge], config: &LayoutConfig, mut on_progress: F) -> Result<LayoutResult>
    where
        F: FnMut(&LayoutProgress),
    {
        if let Err(err) = config.validate() {
            self.state = LayoutState::Failed;
            return Err(err);
        }
        if nodes.len() > config.performance.max_nodes {
            self.state = LayoutState::Failed;
            return Err(Error::CapacityExceeded {
                requested: nodes.len(),
                max: config.performance.max_nodes,
            });
        }

        self.state = LayoutState::Running;
        if self.owns_control {
            self.control.begin();
        }
        let watch = Stopwatch::start();

        let (topology, mut warnings) = GraphTopology::build(nodes, edges);
        for warning in &warnings {
            tracing::warn!(%warning, "layout input");
        }

        let mut sim = Simulation::new(&topology, &config.forces, config.dimensions, &self.positions);
        let mut clusterer = match (&self.registry, config.clustering.enabled) {
            (Some(registry), true) => Some(Clusterer::new(registry.clone(), &config.clustering, &topology)),
            (None, true) => {
                let warning = Warning::new(
                    WarningKind::Configuration,
                    Severity::Medium,
                    "clustering enabled without a similarity registry, skipped",
                );
                tracing::warn!(%warning, "layout clustering");
                warnings.push(warning);
                None
            }
            (_, false) => None,
        };
        let mut groups = clusterer.as_mut().map(Clusterer::groups).unwrap_or_default();

        let max_iterations = config.max_iterations;
        let mut alpha = config.alpha;
        let mut iteration = 0;
        let mut final_delta = 0.0;
        let mut converged = topology.is_empty();
        let mut cooled = false;
        let mut last_checkpoint = 0;
        let mut last_progress = 0;

        // Cooling below alpha_min ends the run like the iteration cap does,
        // without marking it converged.
        while !converged && !cooled && iteration < max_iterations {
            if self.control.checkpoint().await == Checkpoint::Cancelled {
                return Err(self.cancelled(&sim, &topology, iteration, &watch));
            }

            alpha -= alpha * config.alpha_decay;
            iteration += 1;

            let force = groups
                .iter()
                .any(Option::is_some)
                .then(|| ClusterForce::new(&groups, &config.clustering));
            let stats = sim.tick(&config.forces, alpha, config.velocity_decay, force.as_ref());
            final_delta = stats.mean_delta;
            if stats.clamped > 0 {
                let warning = Warning::numeric(format!(
                    "clamped {} non-finite node value(s) at iteration {iteration}",
                    stats.clamped
                ));
                tracing::warn!(iteration, clamped = stats.clamped, "non-finite simulation values clamped");
                warnings.push(warning);
            }

            converged = final_delta < config.stability_threshold;
            cooled = alpha < config.alpha_min;

            if let Some(clusterer) = clusterer.as_mut() {
                if iteration % config.clustering.checkpoint_interval == 0 || converged {
                    let outcome = clusterer.checkpoint(iteration, &topology, sim.positions(), config.dimensions);
                    for warning in outcome.warnings {
                        if !warnings.contains(&warning) {
                            warnings.push(warning);
                        }
                    }
                    if outcome.merges > 0 {
                        groups = clusterer.groups();
                    }
                    last_checkpoint = iteration;
                }
            }

            if iteration % config.performance.progress_interval == 0 {
                on_progress(&progress(iteration, max_iterations, alpha, final_delta));
                last_progress = iteration;
            }
            if !converged && !cooled && iteration % config.performance.yield_interval == 0 {
                yield_now().await;
            }
        }

        // Runs that cool down or hit the iteration cap still get a final clustering pass.
        if let Some(clusterer) = clusterer.as_mut() {
            if last_checkpoint != iteration && !topology.is_empty() {
                let outcome = clusterer.checkpoint(iteration, &topology, sim.positions(), config.dimensions);
                warnings.extend(outcome.warnings.into_iter());
            }
        }
        if last_progress != iteration || iteration == 0 {
            let mut done = progress(iteration, max_iterations, alpha, final_delta);
            done.percent = 100.0;
            on_progress(&done);
        }

        let assignments: Vec<Option<ClusterId>> = match clusterer.as_mut() {
            Some(clusterer) => clusterer.assignments(&topology),
            None => topology.nodes().iter().map(|node| node.cluster).collect(),
        };
        let similarity_calculations = clusterer
            .as_ref()
            .map(|c| c.context().counters.similarity_calculations)
            .unwrap_or(0);
        let cluster_summaries = summarize(&topology, sim.positions(), &assignments);

        let positions = sim.position_map();
        let clusters: HashMap<NodeId, ClusterId> = assignments
            .iter()
            .enumerate()
            .filter_map(|(slot, c)| c.map(|c| (topology.id(slot), c)))
            .collect();

        let metrics = PerformanceMetrics {
            runs: 1,
            processing_time_ms: watch.elapsed_ms(),
            memory_estimate_bytes: sim.memory_estimate()
                + clusterer.as_ref().map_or(0, |c| c.context().cached_pairs() * 3 * size_of::<f64>()),
            iterations: iteration as u64,
            calculation_count: sim.calculations() + similarity_calculations,
            similarity_calculations,
            node_count: topology.node_count(),
            edge_count: topology.edge_count(),
        };
        self.record(metrics);

        self.positions = positions.clone();
        self.clusters = clusters.clone();
        self.state = LayoutState::Stable;
        if self.owns_control {
            self.control.finish();
        }

        tracing::info!(
            iterations = iteration,
            converged,
            final_delta,
            elapsed_ms = metrics.processing_time_ms,
            "layout finished"
        );

        Ok(LayoutResult {
            positions,
            clusters,
            cluster_summaries,
            iterations: iteration,
            converged,
            final_delta,
            warnings,
            metrics,
        })
    }

    /// Keep the partial layout of a cancelled run and build its error.
    fn cancelled(&mut self, sim: &Simulation, topology: &GraphTopology, iteration: usize, watch: &Stopwatch) -> Error {
        self.positions = sim.position_map();
        self.clusters = topology
            .nodes()
            .iter()
            .filter_map(|node| node.cluster.map(|c| (node.id, c)))
            .collect();
        self.record(PerformanceMetrics {
            runs: 1,
            processing_time_ms: watch.elapsed_ms(),
            memory_estimate_bytes: sim.memory_estimate(),
            iterations: iteration as u64,
            calculation_count: sim.calculations(),
            similarity_calculations: 0,
            node_count: topology.node_count(),
            edge_count: topology.edge_count(),
        });
        self.state = LayoutState::Cancelled;
        if self.owns_control {
            self.control.finish();
        }
        tracing::info!(iteration, "layout cancelled");
        Error::Cancelled { stage: None }
    }

    fn record(&mut self, metrics: PerformanceMetrics) {
        self.totals.accumulate(&metrics);
        self.last_metrics = Some(metrics);
    }

    // =========================================================================
    // Snapshot
    // =========================================================================

    /// Serialize the current layout as a flat JSON object keyed by node id.
    pub fn serialize_layout(&self) -> Result<String> {
        if self.state == LayoutState::Idle {
            return Err(Error::NotReady("no layout has been computed or loaded".into()));
        }
        let snapshot: BTreeMap<NodeId, SnapshotEntry> = self
            .positions
            .iter()
            .map(|(&id, &p)| {
                (
                    id,
                    SnapshotEntry {
                        x: p.x,
                        y: p.y,
                        z: p.z,
                        cluster: self.clusters.get(&id).copied(),
                    },
                )
            })
            .collect();
        Ok(serde_json::to_string(&snapshot)?)
    }

    /// Replace the current layout with a serialized one. Returns the number
    /// of nodes loaded.
    pub fn load_serialized_layout(&mut self, blob: &str) -> Result<usize> {
        if self.state == LayoutState::Running {
            return Err(Error::NotReady("a layout run is in progress".into()));
        }
        let snapshot: HashMap<NodeId, SnapshotEntry> = serde_json::from_str(blob)?;
        self.positions = snapshot
            .iter()
            .map(|(&id, entry)| (id, Point::new(entry.x, entry.y, entry.z)))
            .collect();
        self.clusters = snapshot
            .iter()
            .filter_map(|(&id, entry)| entry.cluster.map(|c| (id, c)))
            .collect();
        self.state = LayoutState::Stable;
        tracing::debug!(nodes = snapshot.len(), "layout snapshot loaded");
        Ok(snapshot.len())
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn get_capabilities(&self) -> Capabilities {
        Capabilities {
            max_nodes: MAX_SUPPORTED_NODES,
            dimensions: vec![Dimensions::Two, Dimensions::Three],
            force_types: ["center", "charge", "link", "collision", "cluster"]
                .into_iter()
                .map(String::from)
                .collect(),
            supports_realtime_updates: true,
            supports_clustering: self.registry.is_some(),
        }
    }

    /// Totals across every run of this engine.
    pub fn get_performance_metrics(&self) -> PerformanceMetrics {
        self.totals
    }

    /// Metrics of the most recent run.
    pub fn get_last_performance_metrics(&self) -> Option<PerformanceMetrics> {
        self.last_metrics
    }

    /// Release buffers. Snapshots fail until the next run or load.
    pub fn cleanup(&mut self) {
        self.positions = HashMap::new();
        self.clusters = HashMap::new();
        self.state = LayoutState::Idle;
        tracing::debug!("layout engine cleaned up");
    }
}

impl Default for LayoutEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn progress(iteration: usize, max_iterations: usize, alpha: f64, delta: f64) -> LayoutProgress {
    LayoutProgress {
        iteration,
        max_iterations,
        percent: (iteration as f64 / max_iterations as f64 * 100.0).min(100.0),
        alpha,
        delta,
    }
}
