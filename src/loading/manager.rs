//! ProgressiveLoadingManager - staged pipeline supervision.
//!
//! A run executes the stages in dependency order:
//! 1. `node-positioning`: sanitizes the input in batches, then drives the
//!    [`LayoutEngine`]; positions are published the moment it finishes
//! 2. `clustering`: packages the cluster assignments of the layout
//! 3. `edge-calculation`: resolves edge geometry from the positions
//! 4. `rendering-ready`: builds the [`SpatialIndex`] for pointer queries
//!
//! Batch loops check the shared [`RunControl`] between batches, compare the
//! memory estimate with the configured ceiling and yield. Pause, resume and
//! cancel are therefore observed at batch (or layout iteration) boundaries.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::channel::mpsc::UnboundedReceiver;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::clock::now_ms;
use crate::error::{Error, Result, Severity, Warning, WarningKind};
use crate::graph::{ClusterId, Edge, Node, NodeId, Point};
use crate::layout::{LayoutEngine, LayoutResult, estimate_memory_bytes};
use crate::runtime::{Checkpoint, RunControl, RunState, yield_now};
use crate::similarity::SimilarityFunctionRegistry;
use crate::spatial::SpatialIndex;

use super::config::{LoadingConfig, StageWeights};
use super::events::{Listeners, LoadingEvent, ProgressUpdate};
use super::stage::{EdgeGeometry, LoadingStage, RenderSnapshot, StageName, StageOutput, StageStatus};

/// Share of the node-positioning stage spent sanitizing input.
const INGEST_SHARE: f64 = 10.0;

/// Cloneable pause/resume/cancel handle for a running load.
#[derive(Debug, Clone)]
pub struct LoadingHandle {
    control: RunControl,
}

impl LoadingHandle {
    pub fn pause(&self) -> bool {
        self.control.pause()
    }

    pub fn resume(&self) -> bool {
        self.control.resume()
    }

    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    pub fn state(&self) -> RunState {
        self.control.state()
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingReport {
    pub statuses: BTreeMap<StageName, StageStatus>,
    pub warnings: Vec<Warning>,
    pub elapsed_ms: f64,
}

/// Memory accounting for one run.
#[derive(Debug, Clone, Copy, Default)]
struct MemoryBudget {
    /// Working set of the input and layout buffers.
    base: usize,
    /// Published stage outputs.
    outputs: usize,
    /// Intermediate results of the running stage.
    in_flight: usize,
    warned: bool,
}

impl MemoryBudget {
    fn estimate(&self) -> usize {
        self.base + self.outputs + self.in_flight
    }
}

/// Stage table plus the listeners notified about it.
struct Board {
    stages: [LoadingStage; 4],
    listeners: Listeners,
    weights: StageWeights,
    default_estimate_ms: f64,
    started_at: Option<f64>,
}

impl Board {
    fn new(config: &LoadingConfig) -> Self {
        Self {
            stages: StageName::ALL.map(LoadingStage::new),
            listeners: Listeners::default(),
            weights: config.stage_weights,
            default_estimate_ms: config.default_estimate_ms,
            started_at: None,
        }
    }

    fn reset(&mut self, config: &LoadingConfig) {
        for stage in &mut self.stages {
            stage.reset();
        }
        self.weights = config.stage_weights;
        self.default_estimate_ms = config.default_estimate_ms;
        self.started_at = Some(now_ms());
    }

    fn stage(&self, name: StageName) -> &LoadingStage {
        &self.stages[name as usize]
    }

    fn stage_mut(&mut self, name: StageName) -> &mut LoadingStage {
        &mut self.stages[name as usize]
    }

    fn overall_progress(&self) -> f64 {
        let total = self.weights.total();
        if total <= 0.0 {
            return 0.0;
        }
        let done: f64 = self
            .stages
            .iter()
            .map(|s| self.weights.weight(s.name) * s.progress)
            .sum();
        done / total
    }

    fn estimated_remaining_ms(&self, now: f64) -> f64 {
        let Some(started_at) = self.started_at else {
            return self.default_estimate_ms;
        };
        if self.stages.iter().all(|s| s.status.is_terminal()) {
            return 0.0;
        }
        let done = self.overall_progress() / 100.0;
        if done <= 0.0 {
            return self.default_estimate_ms;
        }
        let elapsed = (now - started_at).max(0.0);
        elapsed / done * (1.0 - done)
    }

    /// Record stage progress and notify listeners, unless the run has been
    /// cancelled.
    fn report_progress(&mut self, stage: StageName, progress: f64, control: &RunControl) {
        if control.is_cancelled() {
            return;
        }
        self.stage_mut(stage).set_progress(progress);
        let update = ProgressUpdate {
            stage,
            stage_progress: self.stage(stage).progress,
            overall_progress: self.overall_progress(),
            estimated_remaining_ms: self.estimated_remaining_ms(now_ms()),
        };
        self.listeners.progress(update);
    }
}

/// Orchestrates a staged load and publishes each stage's output as soon as it
/// is ready.
pub struct ProgressiveLoadingManager {
    config: LoadingConfig,
    engine: LayoutEngine,
    control: RunControl,
    board: Board,
    index: SpatialIndex,
    warnings: Vec<Warning>,
    memory: MemoryBudget,
}

impl ProgressiveLoadingManager {
    pub fn new() -> Self {
        Self::build(LayoutEngine::new())
    }

    /// A manager whose layout stage clusters through `registry`.
    pub fn with_registry(registry: Arc<SimilarityFunctionRegistry>) -> Self {
        Self::build(LayoutEngine::with_registry(registry))
    }

    fn build(engine: LayoutEngine) -> Self {
        let control = RunControl::new();
        let config = LoadingConfig::default();
        Self {
            board: Board::new(&config),
            config,
            engine: engine.with_control(control.clone()),
            control,
            index: SpatialIndex::default(),
            warnings: Vec::new(),
            memory: MemoryBudget::default(),
        }
    }

    pub fn config(&self) -> &LoadingConfig {
        &self.config
    }

    /// Handle usable while a run holds the manager.
    pub fn handle(&self) -> LoadingHandle {
        LoadingHandle {
            control: self.control.clone(),
        }
    }

    pub fn stage(&self, name: StageName) -> &LoadingStage {
        self.board.stage(name)
    }

    pub fn stages(&self) -> impl Iterator<Item = &LoadingStage> {
        self.board.stages.iter()
    }

    /// Warnings of the current or last run.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Engine used by the node-positioning stage, e.g. to serialize its
    /// layout.
    pub fn layout_engine(&self) -> &LayoutEngine {
        &self.engine
    }

    /// Index built by the rendering-ready stage.
    pub fn spatial_index(&self) -> &SpatialIndex {
        &self.index
    }

    // =========================================================================
    // Polling and notification
    // =========================================================================

    pub fn is_stage_data_available(&self, name: StageName) -> bool {
        let stage = self.board.stage(name);
        stage.is_complete() && stage.output.is_some()
    }

    pub fn get_stage_data(&self, name: StageName) -> Option<Arc<StageOutput>> {
        let stage = self.board.stage(name);
        if stage.is_complete() { stage.output.clone() } else { None }
    }

    /// Call `observer` whenever `name` publishes data. If the data is already
    /// available the observer is called immediately as well.
    pub fn on_stage_data_available<F>(&mut self, name: StageName, mut observer: F)
    where
        F: FnMut(StageName, &Arc<StageOutput>) + 'static,
    {
        if let Some(output) = self.get_stage_data(name) {
            observer(name, &output);
        }
        self.board.listeners.add_stage_observer(name, Box::new(observer));
    }

    pub fn on_progress_update<F>(&mut self, observer: F)
    where
        F: FnMut(&ProgressUpdate) + 'static,
    {
        self.board.listeners.add_progress_observer(Box::new(observer));
    }

    /// Receive every event of every future run on a channel.
    pub fn subscribe(&mut self) -> UnboundedReceiver<LoadingEvent> {
        self.board.listeners.subscribe()
    }

    // =========================================================================
    // Control
    // =========================================================================

    pub fn pause_loading(&self) -> bool {
        self.control.pause()
    }

    pub fn resume_loading(&self) -> bool {
        self.control.resume()
    }

    pub fn cancel_loading(&self) -> bool {
        self.control.cancel()
    }

    /// Weighted progress over all stages, 0 to 100.
    pub fn overall_progress(&self) -> f64 {
        self.board.overall_progress()
    }

    /// Milliseconds until the run is expected to finish.
    ///
    /// Extrapolates the time per completed unit of stage weight; before any
    /// progress is observed this is the configured default estimate.
    pub fn get_estimated_completion_time(&self) -> f64 {
        self.board.estimated_remaining_ms(now_ms())
    }

    // =========================================================================
    // Running
    // =========================================================================

    /// Run every stage over `nodes` and `edges`.
    ///
    /// Cancellation returns [`Error::Cancelled`] naming the stage in flight;
    /// every incomplete stage ends `Cancelled`. Any other failure leaves the
    /// failing stage `Errored` and its dependents `Pending`.
    pub async fn start_progressive_loading(
        &mut self,
        nodes: &[Node],
        edges: &[Edge],
        config: LoadingConfig,
    ) -> Result<LoadingReport> {
        config.validate()?;
        let span = tracing::info_span!("loading.run", nodes = nodes.len(), edges = edges.len());
        self.run(nodes, edges, config).instrument(span).await
    }

    /// Blocking wrapper around [`ProgressiveLoadingManager::start_progressive_loading`].
    pub fn load(&mut self, nodes: &[Node], edges: &[Edge], config: LoadingConfig) -> Result<LoadingReport> {
        futures::executor::block_on(self.start_progressive_loading(nodes, edges, config))
    }

    async fn run(&mut self, nodes: &[Node], edges: &[Edge], config: LoadingConfig) -> Result<LoadingReport> {
        self.board.reset(&config);
        self.config = config;
        self.warnings.clear();
        self.index.clear();
        self.memory = MemoryBudget {
            base: estimate_memory_bytes(nodes.len(), edges.len()),
            ..MemoryBudget::default()
        };
        self.control.begin();

        let outcome = self.run_stages(nodes, edges).await;
        if let Err(err) = &outcome {
            if err.is_cancelled() {
                self.cancel_incomplete();
            }
        }
        self.control.finish();

        outcome?;
        let elapsed_ms = self.board.started_at.map_or(0.0, |start| now_ms() - start);
        self.board.listeners.send(LoadingEvent::Finished { elapsed_ms });
        tracing::info!(elapsed_ms, warnings = self.warnings.len(), "progressive loading finished");
        Ok(LoadingReport {
            statuses: self.stages().map(|s| (s.name, s.status)).collect(),
            warnings: self.warnings.clone(),
            elapsed_ms,
        })
    }

    async fn run_stages(&mut self, nodes: &[Node], edges: &[Edge]) -> Result<()> {
        let outcome = self.position_nodes(nodes, edges).await;
        let layout = self.settle(StageName::NodePositioning, outcome)?;

        let outcome = self.package_clusters(&layout).await;
        self.settle(StageName::Clustering, outcome)?;

        let outcome = self.calculate_edges(edges, &layout.positions).await;
        let edge_count = self.settle(StageName::EdgeCalculation, outcome)?;

        let outcome = self.prepare_rendering(&layout, edge_count).await;
        self.settle(StageName::RenderingReady, outcome)
    }

    /// Mark the stage `Errored` for failures other than cancellation.
    fn settle<T>(&mut self, stage: StageName, outcome: Result<T>) -> Result<T> {
        if let Err(err) = &outcome {
            if !err.is_cancelled() {
                tracing::error!(stage = %stage, error = %err, "stage failed");
                let status = self.board.stage(stage).status;
                if matches!(status, StageStatus::Running | StageStatus::Paused) {
                    if let Err(transition) = self.board.stage_mut(stage).fail(err, now_ms()) {
                        tracing::warn!(error = %transition, "stage failure not recorded");
                    }
                }
                self.board.listeners.send(LoadingEvent::StageFailed {
                    stage,
                    error: err.to_string(),
                });
            }
        }
        outcome
    }

    // =========================================================================
    // Stage plumbing
    // =========================================================================

    fn begin_stage(&mut self, name: StageName) -> Result<()> {
        for &dependency in name.dependencies() {
            let status = self.board.stage(dependency).status;
            if status != StageStatus::Complete {
                return Err(Error::DependencyNotMet {
                    stage: name,
                    dependency,
                    status,
                });
            }
        }
        if self.control.is_cancelled() {
            return Err(Error::Cancelled { stage: Some(name) });
        }
        self.board.stage_mut(name).start(now_ms())?;
        self.board.listeners.send(LoadingEvent::StageStarted { stage: name });
        tracing::info!(stage = %name, "stage started");
        Ok(())
    }

    fn complete_stage(&mut self, name: StageName, output: StageOutput) -> Result<()> {
        self.board.report_progress(name, 100.0, &self.control);
        self.memory.in_flight = 0;
        self.memory.outputs += output.memory_estimate();
        let output = self.board.stage_mut(name).complete(output, now_ms())?;
        tracing::info!(stage = %name, "stage data available");
        self.board.listeners.stage_data(name, &output);
        Ok(())
    }

    fn warn(&mut self, stage: StageName, warning: Warning) {
        tracing::warn!(stage = %stage, %warning, "loading warning");
        self.board.stage_mut(stage).warnings.push(warning.clone());
        self.board.listeners.send(LoadingEvent::Warning {
            stage,
            warning: warning.clone(),
        });
        self.warnings.push(warning);
    }

    fn check_memory(&mut self, stage: StageName) {
        if self.memory.warned {
            return;
        }
        let estimate = self.memory.estimate();
        let limit = self.config.max_memory_usage as f64 * self.config.memory_warning_ratio;
        if estimate as f64 >= limit {
            self.memory.warned = true;
            let warning = Warning::new(
                WarningKind::Resource,
                Severity::High,
                format!(
                    "memory estimate of {estimate} bytes reached {:.0}% of the {} byte ceiling",
                    self.config.memory_warning_ratio * 100.0,
                    self.config.max_memory_usage
                ),
            );
            self.warn(stage, warning);
        }
    }

    /// Wait out a pause and surface cancellation as a stage-scoped error.
    async fn pause_point(&mut self, stage: StageName) -> Result<()> {
        let paused = self.control.is_paused() && self.board.stage_mut(stage).pause().is_ok();
        if paused {
            self.board.listeners.send(LoadingEvent::StagePaused { stage });
            tracing::info!(stage = %stage, "loading paused");
        }

        let checkpoint = self.control.checkpoint().await;
        if checkpoint == Checkpoint::Cancelled {
            return Err(Error::Cancelled { stage: Some(stage) });
        }

        if paused {
            self.board.stage_mut(stage).resume()?;
            self.board.listeners.send(LoadingEvent::StageResumed { stage });
            tracing::info!(stage = %stage, "loading resumed");
        }
        Ok(())
    }

    /// Feed `items` to `work` in batches, reporting progress within
    /// `from..to` of the stage. `work` returns the bytes it retained.
    async fn process_batches<T, F>(
        &mut self,
        stage: StageName,
        items: &[T],
        (from, to): (f64, f64),
        mut work: F,
    ) -> Result<()>
    where
        F: FnMut(&[T]) -> usize,
    {
        let batch_size = self.config.batch_size;
        let batches = items.len().div_ceil(batch_size).max(1);
        for (i, chunk) in items.chunks(batch_size).enumerate() {
            self.pause_point(stage).await?;
            self.memory.in_flight += work(chunk);
            self.check_memory(stage);
            let progress = from + (to - from) * (i + 1) as f64 / batches as f64;
            self.board.report_progress(stage, progress, &self.control);
            yield_now().await;
        }
        self.pause_point(stage).await
    }

    // =========================================================================
    // Stages
    // =========================================================================

    async fn position_nodes(&mut self, nodes: &[Node], edges: &[Edge]) -> Result<LayoutResult> {
        const STAGE: StageName = StageName::NodePositioning;
        self.begin_stage(STAGE)?;

        let mut sanitized: Vec<Node> = Vec::with_capacity(nodes.len());
        let mut replaced: Vec<NodeId> = Vec::new();
        self.process_batches(STAGE, nodes, (0.0, INGEST_SHARE), |chunk| {
            for node in chunk {
                let mut node = node.clone();
                if node.position.is_some_and(|p| !p.is_finite()) {
                    node.position = None;
                    replaced.push(node.id);
                }
                sanitized.push(node);
            }
            chunk.len() * size_of::<Node>()
        })
        .await?;
        for id in replaced {
            self.warn(STAGE, Warning::input(format!("{id} has non-finite coordinates and was re-placed")));
        }

        let control = self.control.clone();
        let board = &mut self.board;
        let result = self
            .engine
            .calculate_async(&sanitized, edges, &self.config.layout, |progress| {
                let share = INGEST_SHARE + (100.0 - INGEST_SHARE) * progress.percent / 100.0;
                board.report_progress(STAGE, share, &control);
            })
            .await;
        let result = match result {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => return Err(Error::Cancelled { stage: Some(STAGE) }),
            Err(err) => return Err(err),
        };

        for warning in &result.warnings {
            self.warn(STAGE, warning.clone());
        }
        self.complete_stage(STAGE, StageOutput::Positions(result.positions.clone()))?;
        Ok(result)
    }

    async fn package_clusters(&mut self, layout: &LayoutResult) -> Result<()> {
        const STAGE: StageName = StageName::Clustering;
        self.begin_stage(STAGE)?;

        let mut ids: Vec<NodeId> = layout.positions.keys().copied().collect();
        ids.sort_unstable();
        let mut assignments: HashMap<NodeId, ClusterId> = HashMap::new();
        self.process_batches(STAGE, &ids, (0.0, 100.0), |chunk| {
            let before = assignments.len();
            for id in chunk {
                if let Some(cluster) = layout.clusters.get(id) {
                    assignments.insert(*id, *cluster);
                }
            }
            (assignments.len() - before) * (size_of::<NodeId>() + size_of::<ClusterId>())
        })
        .await?;

        self.complete_stage(
            STAGE,
            StageOutput::Clusters {
                assignments,
                summaries: layout.cluster_summaries.clone(),
            },
        )
    }

    async fn calculate_edges(&mut self, edges: &[Edge], positions: &HashMap<NodeId, Point>) -> Result<usize> {
        const STAGE: StageName = StageName::EdgeCalculation;
        self.begin_stage(STAGE)?;

        let mut geometry: Vec<EdgeGeometry> = Vec::with_capacity(edges.len());
        let mut skipped = 0usize;
        self.process_batches(STAGE, edges, (0.0, 100.0), |chunk| {
            let before = geometry.len();
            for edge in chunk {
                match (positions.get(&edge.source), positions.get(&edge.target)) {
                    (Some(&from), Some(&to)) => geometry.push(EdgeGeometry {
                        source: edge.source,
                        target: edge.target,
                        from,
                        to,
                        length: from.distance(to),
                        weight: edge.effective_weight(),
                    }),
                    _ => skipped += 1,
                }
            }
            (geometry.len() - before) * size_of::<EdgeGeometry>()
        })
        .await?;

        if skipped > 0 {
            self.warn(
                STAGE,
                Warning::input(format!("{skipped} edge(s) reference unpositioned nodes and were skipped")),
            );
        }
        let count = geometry.len();
        self.complete_stage(STAGE, StageOutput::Edges(geometry))?;
        Ok(count)
    }

    async fn prepare_rendering(&mut self, layout: &LayoutResult, edge_count: usize) -> Result<()> {
        const STAGE: StageName = StageName::RenderingReady;
        self.begin_stage(STAGE)?;
        self.pause_point(STAGE).await?;

        let config = self.config.index.clone().with_dimensions(self.config.layout.dimensions);
        let mut index = SpatialIndex::new(config)?;
        let warnings = index.build_from_points(layout.positions.iter().map(|(&id, &p)| (id, p)));
        for warning in warnings {
            self.warn(STAGE, warning);
        }
        self.index = index;
        self.board.report_progress(STAGE, 50.0, &self.control);
        self.pause_point(STAGE).await?;

        let snapshot = RenderSnapshot {
            positions: layout.positions.clone(),
            clusters: layout.clusters.clone(),
            edge_count,
            index_statistics: self.index.get_statistics(),
        };
        self.complete_stage(STAGE, StageOutput::RenderingReady(snapshot))
    }

    fn cancel_incomplete(&mut self) {
        let now = now_ms();
        for name in StageName::ALL {
            let stage = self.board.stage_mut(name);
            if stage.status.is_terminal() {
                continue;
            }
            if stage.cancel(now).is_ok() {
                self.board.listeners.send(LoadingEvent::StageCancelled { stage: name });
            }
        }
        tracing::info!("progressive loading cancelled");
    }
}

impl Default for ProgressiveLoadingManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn graph(n: u32) -> (Vec<Node>, Vec<Edge>) {
        let nodes = (0..n).map(Node::new).collect();
        let edges = (1..n).map(|i| Edge::new(i - 1, i)).collect();
        (nodes, edges)
    }

    fn quick() -> LoadingConfig {
        let mut config = LoadingConfig {
            batch_size: 4,
            ..LoadingConfig::default()
        };
        config.layout.max_iterations = 30;
        config
    }

    fn drain(rx: &mut UnboundedReceiver<LoadingEvent>) -> Vec<LoadingEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = rx.try_next() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_full_run_completes_every_stage() {
        let (nodes, edges) = graph(10);
        let mut manager = ProgressiveLoadingManager::new();
        let report = manager.load(&nodes, &edges, quick()).unwrap();

        assert!(report.statuses.values().all(|s| *s == StageStatus::Complete));
        for name in StageName::ALL {
            assert!(manager.is_stage_data_available(name));
        }
        assert!((manager.overall_progress() - 100.0).abs() < 1e-9);
        assert_eq!(manager.get_estimated_completion_time(), 0.0);
        assert_eq!(manager.spatial_index().len(), 10);

        let Some(output) = manager.get_stage_data(StageName::EdgeCalculation) else {
            panic!("edge data missing");
        };
        match &*output {
            StageOutput::Edges(edges) => assert_eq!(edges.len(), 9),
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[test]
    fn test_estimate_before_any_run() {
        let manager = ProgressiveLoadingManager::new();
        assert_eq!(manager.get_estimated_completion_time(), 5000.0);
        assert_eq!(manager.overall_progress(), 0.0);
        assert!(!manager.is_stage_data_available(StageName::NodePositioning));
        assert!(manager.get_stage_data(StageName::NodePositioning).is_none());
    }

    #[test]
    fn test_dependency_not_met() {
        let mut manager = ProgressiveLoadingManager::new();
        let err = manager.begin_stage(StageName::RenderingReady).unwrap_err();
        assert!(matches!(
            err,
            Error::DependencyNotMet {
                stage: StageName::RenderingReady,
                dependency: StageName::Clustering,
                status: StageStatus::Pending,
            }
        ));
        assert_eq!(manager.stage(StageName::RenderingReady).status, StageStatus::Pending);
    }

    #[test]
    fn test_positions_published_before_edges() {
        let (nodes, edges) = graph(12);
        let mut manager = ProgressiveLoadingManager::new();
        let mut rx = manager.subscribe();
        manager.load(&nodes, &edges, quick()).unwrap();

        let events = drain(&mut rx);
        let position = |wanted: &LoadingEvent| events.iter().position(|e| e == wanted).unwrap();
        let positions_ready = position(&LoadingEvent::StageDataAvailable {
            stage: StageName::NodePositioning,
        });
        let edges_started = position(&LoadingEvent::StageStarted {
            stage: StageName::EdgeCalculation,
        });
        assert!(positions_ready < edges_started);
        assert!(matches!(events.last(), Some(LoadingEvent::Finished { .. })));
    }

    #[test]
    fn test_observer_called_for_available_data() {
        let (nodes, edges) = graph(5);
        let mut manager = ProgressiveLoadingManager::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        manager.on_stage_data_available(StageName::NodePositioning, move |_, output| {
            assert!(matches!(**output, StageOutput::Positions(ref p) if p.len() == 5));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        manager.load(&nodes, &edges, quick()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let late = Arc::new(AtomicUsize::new(0));
        let counter = late.clone();
        manager.on_stage_data_available(StageName::RenderingReady, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_marks_incomplete_stages() {
        let (nodes, edges) = graph(20);
        let mut manager = ProgressiveLoadingManager::new();
        let handle = manager.handle();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let after_cancel = Arc::new(AtomicUsize::new(0));
        let late = after_cancel.clone();
        manager.on_progress_update(move |update| {
            if flag.load(Ordering::SeqCst) {
                late.fetch_add(1, Ordering::SeqCst);
            }
            if update.stage == StageName::Clustering {
                flag.store(true, Ordering::SeqCst);
                handle.cancel();
            }
        });

        let err = manager.load(&nodes, &edges, quick()).unwrap_err();
        assert!(matches!(err, Error::Cancelled { stage: Some(StageName::Clustering) }));
        assert_eq!(after_cancel.load(Ordering::SeqCst), 0);
        assert_eq!(manager.stage(StageName::NodePositioning).status, StageStatus::Complete);
        for name in [StageName::Clustering, StageName::EdgeCalculation, StageName::RenderingReady] {
            assert_eq!(manager.stage(name).status, StageStatus::Cancelled);
        }
        assert!(manager.is_stage_data_available(StageName::NodePositioning));
    }

    #[test]
    fn test_pause_and_resume_between_batches() {
        let (nodes, edges) = graph(10);
        let mut manager = ProgressiveLoadingManager::new();
        let handle = manager.handle();
        let mut rx = manager.subscribe();

        let pauser = handle.clone();
        let paused_once = Arc::new(AtomicBool::new(false));
        manager.on_progress_update(move |update| {
            if update.stage == StageName::EdgeCalculation && !paused_once.swap(true, Ordering::SeqCst) {
                pauser.pause();
            }
        });

        let resumer = std::thread::spawn(move || {
            let mut events = Vec::new();
            while let Some(event) = futures::executor::block_on(rx.next()) {
                if matches!(event, LoadingEvent::StagePaused { .. }) {
                    handle.resume();
                }
                events.push(event);
            }
            events
        });

        let report = manager.load(&nodes, &edges, quick()).unwrap();
        assert!(report.statuses.values().all(|s| *s == StageStatus::Complete));
        drop(manager);

        let events = resumer.join().unwrap();
        assert!(events.contains(&LoadingEvent::StagePaused {
            stage: StageName::EdgeCalculation
        }));
        assert!(events.contains(&LoadingEvent::StageResumed {
            stage: StageName::EdgeCalculation
        }));
    }

    #[test]
    fn test_memory_warning_is_recorded_once() {
        let (nodes, edges) = graph(10);
        let mut manager = ProgressiveLoadingManager::new();
        let config = LoadingConfig {
            max_memory_usage: 64,
            ..quick()
        };
        let report = manager.load(&nodes, &edges, config).unwrap();
        let resource: Vec<_> = report
            .warnings
            .iter()
            .filter(|w| w.kind == WarningKind::Resource)
            .collect();
        assert_eq!(resource.len(), 1);
        assert_eq!(resource[0].severity, Severity::High);
        assert!(report.statuses.values().all(|s| *s == StageStatus::Complete));
    }

    #[test]
    fn test_failed_layout_leaves_dependents_pending() {
        let (nodes, edges) = graph(6);
        let mut manager = ProgressiveLoadingManager::new();
        let mut config = quick();
        config.layout.performance.max_nodes = 3;
        // Fails inside the layout, after validation passed.
        let err = manager.load(&nodes, &edges, config).unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded { .. }));
        assert_eq!(manager.stage(StageName::NodePositioning).status, StageStatus::Errored);
        assert_eq!(manager.stage(StageName::Clustering).status, StageStatus::Pending);
        assert_eq!(manager.stage(StageName::RenderingReady).status, StageStatus::Pending);
    }

    #[test]
    fn test_invalid_config_rejected_up_front() {
        let mut manager = ProgressiveLoadingManager::new();
        let config = LoadingConfig {
            batch_size: 0,
            ..LoadingConfig::default()
        };
        assert!(matches!(manager.load(&[], &[], config), Err(Error::InvalidConfig(_))));
        assert_eq!(manager.stage(StageName::NodePositioning).status, StageStatus::Pending);
    }

    #[test]
    fn test_non_finite_input_is_replaced() {
        let nodes = vec![Node::at(1, f64::NAN, 0.0), Node::at(2, 10.0, 0.0)];
        let mut manager = ProgressiveLoadingManager::new();
        let report = manager.load(&nodes, &[Edge::new(1, 2)], quick()).unwrap();
        assert!(report.warnings.iter().any(|w| w.kind == WarningKind::Input));
        assert_eq!(manager.spatial_index().len(), 2);
    }
}
