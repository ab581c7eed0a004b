//! Heroine Graph Layout - WASM Module
//!
//! Spatial indexing, raycasting, force-directed layout and progressive
//! loading for the Heroine Graph visualization library. It is compiled to
//! WebAssembly and exposes a JavaScript-friendly API via wasm-bindgen; the
//! same modules are usable natively as a plain Rust library.
//!
//! # Architecture
//!
//! - `graph`: Node/edge model and petgraph-backed topology
//! - `spatial`: Quadtree/octree index and ray intersection for hit testing
//! - `layout`: Force simulation with similarity-driven clustering
//! - `similarity`: Runtime registry of similarity measures and conflict resolution
//! - `loading`: Staged pipeline publishing results as they become ready
//! - `runtime`: Cooperative pause/resume/cancel and yield points

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use wasm_bindgen::prelude::*;

pub mod clock;
pub mod error;
pub mod graph;
pub mod layout;
pub mod loading;
pub mod runtime;
pub mod similarity;
pub mod spatial;

pub use error::{Error, MeasureError, Result, Severity, Warning, WarningKind};
pub use graph::{ClusterId, Dimensions, Edge, Node, NodeId, Point};
pub use layout::{LayoutConfig, LayoutEngine, LayoutResult};
pub use loading::{LoadingConfig, ProgressiveLoadingManager, StageName};
pub use runtime::RunControl;
pub use similarity::{ConflictResolver, ConflictStrategy, SimilarityFunctionRegistry};
pub use spatial::{Bounds, Ray, RaycastingSystem, SpatialIndex, SpatialIndexConfig};

/// Initialize the WASM module.
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
}

/// Decode `value`, treating `undefined` and `null` as the default.
fn from_js<T: DeserializeOwned + Default>(value: JsValue) -> std::result::Result<T, JsError> {
    if value.is_undefined() || value.is_null() {
        return Ok(T::default());
    }
    Ok(serde_wasm_bindgen::from_value(value)?)
}

fn to_js<T: Serialize + ?Sized>(value: &T) -> std::result::Result<JsValue, JsError> {
    Ok(serde_wasm_bindgen::to_value(value)?)
}

fn point(x: f64, y: f64, z: Option<f64>) -> Point {
    Point::new(x, y, z.unwrap_or(0.0))
}

fn raw_ids(ids: Vec<NodeId>) -> Vec<u32> {
    ids.into_iter().map(NodeId::raw).collect()
}

/// Hand `update` to a JS callback. Returns false when the callback asks to
/// stop, by returning `false` or by throwing.
fn notify<T: Serialize>(callback: &js_sys::Function, update: &T) -> bool {
    let Ok(value) = to_js(update) else {
        return true;
    };
    match callback.call1(&JsValue::NULL, &value) {
        Ok(answer) => answer.as_bool() != Some(false),
        Err(_) => false,
    }
}

/// Main entry point for layout and hit testing.
///
/// Holds one layout engine, the spatial index over its latest positions and
/// a similarity registry shared with clustering.
#[wasm_bindgen]
pub struct HeroineLayoutWasm {
    registry: Arc<SimilarityFunctionRegistry>,
    engine: LayoutEngine,
    index: SpatialIndex,
    index_config: SpatialIndexConfig,
    resolver: ConflictResolver,
}

#[wasm_bindgen]
impl HeroineLayoutWasm {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        let registry = Arc::new(SimilarityFunctionRegistry::new());
        Self {
            engine: LayoutEngine::with_registry(registry.clone()),
            registry,
            index: SpatialIndex::default(),
            index_config: SpatialIndexConfig::default(),
            resolver: ConflictResolver::new(),
        }
    }

    // =========================================================================
    // Layout
    // =========================================================================

    /// Run the force layout and rebuild the spatial index from its result.
    ///
    /// `nodes` and `edges` are arrays of plain objects; `config` may be
    /// partial or omitted. `on_progress` receives each progress report while
    /// the run blocks; returning `false` or throwing cancels it. A cancelled
    /// run still indexes its partial positions before the error is returned.
    #[wasm_bindgen(js_name = computeLayout)]
    pub fn compute_layout(
        &mut self,
        nodes: JsValue,
        edges: JsValue,
        config: JsValue,
        on_progress: Option<js_sys::Function>,
    ) -> std::result::Result<JsValue, JsError> {
        let nodes: Vec<Node> = from_js(nodes)?;
        let edges: Vec<Edge> = from_js(edges)?;
        let config: LayoutConfig = from_js(config)?;

        let control = self.engine.control();
        let outcome = futures::executor::block_on(self.engine.calculate_async(&nodes, &edges, &config, |update| {
            if let Some(callback) = &on_progress {
                if !notify(callback, update) {
                    control.cancel();
                }
            }
        }));
        self.index_config = self.index_config.clone().with_dimensions(config.dimensions);
        self.reindex()?;
        to_js(&outcome?)
    }

    /// JSON snapshot of the current positions.
    #[wasm_bindgen(js_name = serializeLayout)]
    pub fn serialize_layout(&self) -> std::result::Result<String, JsError> {
        Ok(self.engine.serialize_layout()?)
    }

    /// Restore positions from a snapshot and re-index them.
    ///
    /// Returns the number of restored nodes.
    #[wasm_bindgen(js_name = loadSerializedLayout)]
    pub fn load_serialized_layout(&mut self, blob: &str) -> std::result::Result<usize, JsError> {
        let count = self.engine.load_serialized_layout(blob)?;
        self.reindex()?;
        Ok(count)
    }

    /// Run every loading stage and adopt the resulting layout.
    ///
    /// `on_progress` receives each progress update and `on_stage_data` is
    /// called with the stage name and its output as each stage publishes.
    /// Returning `false` from `on_progress`, or throwing, cancels the load;
    /// a cancelled or failed load leaves the current layout untouched.
    /// Returns the loading report.
    #[wasm_bindgen(js_name = loadProgressively)]
    pub fn load_progressively(
        &mut self,
        nodes: JsValue,
        edges: JsValue,
        config: JsValue,
        on_progress: Option<js_sys::Function>,
        on_stage_data: Option<js_sys::Function>,
    ) -> std::result::Result<JsValue, JsError> {
        let nodes: Vec<Node> = from_js(nodes)?;
        let edges: Vec<Edge> = from_js(edges)?;
        let config: LoadingConfig = from_js(config)?;

        let mut manager = ProgressiveLoadingManager::with_registry(self.registry.clone());
        if let Some(callback) = on_progress {
            let handle = manager.handle();
            manager.on_progress_update(move |update| {
                if !notify(&callback, update) {
                    handle.cancel();
                }
            });
        }
        if let Some(callback) = on_stage_data {
            for stage in StageName::ALL {
                let callback = callback.clone();
                manager.on_stage_data_available(stage, move |name, output| {
                    if let (Ok(name), Ok(output)) = (to_js(&name), to_js(&**output)) {
                        // Stage data is informational; a throwing listener is ignored.
                        let _ = callback.call2(&JsValue::NULL, &name, &output);
                    }
                });
            }
        }

        let dimensions = config.layout.dimensions;
        let index_config = config.index.clone();
        let report = manager.load(&nodes, &edges, config)?;
        let snapshot = manager.layout_engine().serialize_layout()?;
        self.engine.load_serialized_layout(&snapshot)?;
        self.index_config = index_config.with_dimensions(dimensions);
        self.reindex()?;
        to_js(&report)
    }

    #[wasm_bindgen(js_name = getCapabilities)]
    pub fn get_capabilities(&self) -> std::result::Result<JsValue, JsError> {
        to_js(&self.engine.get_capabilities())
    }

    /// Totals over every run of this engine.
    #[wasm_bindgen(js_name = getPerformanceMetrics)]
    pub fn get_performance_metrics(&self) -> std::result::Result<JsValue, JsError> {
        to_js(&self.engine.get_performance_metrics())
    }

    /// Release layout and index state.
    pub fn cleanup(&mut self) {
        self.engine.cleanup();
        self.index.clear();
    }

    // =========================================================================
    // Spatial Queries
    // =========================================================================

    /// Rebuild the index over the current layout with a new configuration.
    #[wasm_bindgen(js_name = buildIndex)]
    pub fn build_index(&mut self, config: JsValue) -> std::result::Result<JsValue, JsError> {
        let config: SpatialIndexConfig = from_js(config)?;
        config.validate()?;
        self.index_config = config;
        let warnings = self.reindex()?;
        to_js(&warnings)
    }

    /// Find the nearest node to a point.
    ///
    /// Returns the node ID, or None if no node is within `max_distance`.
    #[wasm_bindgen(js_name = findNearest)]
    pub fn find_nearest(&self, x: f64, y: f64, z: Option<f64>, max_distance: Option<f64>) -> Option<u32> {
        self.index.find_nearest(point(x, y, z), max_distance).map(NodeId::raw)
    }

    /// Nearest node within the configured pointer tolerance.
    #[wasm_bindgen(js_name = hitTest)]
    pub fn hit_test(&self, x: f64, y: f64, z: Option<f64>) -> Option<u32> {
        self.index.hit_test(point(x, y, z)).map(NodeId::raw)
    }

    /// Find all nodes within a rectangular region.
    ///
    /// Returns a Uint32Array of node IDs.
    #[wasm_bindgen(js_name = queryRegion)]
    pub fn query_region(&self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Vec<u32> {
        raw_ids(self.index.query_region(&Bounds::rect(min_x, min_y, max_x, max_y)))
    }

    /// Find all nodes within `distance` of a point.
    #[wasm_bindgen(js_name = getNodesWithinDistance)]
    pub fn get_nodes_within_distance(&self, x: f64, y: f64, z: Option<f64>, distance: f64) -> Vec<u32> {
        raw_ids(self.index.get_nodes_within_distance(point(x, y, z), distance))
    }

    /// Intersections of a 2D ray with the indexed nodes, nearest first.
    #[wasm_bindgen(js_name = raycast2d)]
    pub fn raycast_2d(
        &self,
        origin_x: f64,
        origin_y: f64,
        dir_x: f64,
        dir_y: f64,
    ) -> std::result::Result<JsValue, JsError> {
        let ray = Ray::new_2d(origin_x, origin_y, dir_x, dir_y)?;
        to_js(&RaycastingSystem::new().raycast_2d(&ray, &self.index)?)
    }

    /// Intersections of a 3D ray; `origin` and `direction` are `[x, y, z]`.
    #[wasm_bindgen(js_name = raycast3d)]
    pub fn raycast_3d(&self, origin: &[f64], direction: &[f64]) -> std::result::Result<JsValue, JsError> {
        let (&[ox, oy, oz], &[dx, dy, dz]) = (origin, direction) else {
            return Err(JsError::new("origin and direction must have three components"));
        };
        let ray = Ray::new_3d([ox, oy, oz], [dx, dy, dz])?;
        to_js(&RaycastingSystem::new().raycast_3d(&ray, &self.index)?)
    }

    #[wasm_bindgen(js_name = getStatistics)]
    pub fn get_statistics(&self) -> std::result::Result<JsValue, JsError> {
        to_js(&self.index.get_statistics())
    }

    // =========================================================================
    // Similarity
    // =========================================================================

    /// Register the built-in similarity measures that are not yet present.
    #[wasm_bindgen(js_name = registerBuiltinMeasures)]
    pub fn register_builtin_measures(&self) -> std::result::Result<JsValue, JsError> {
        let reports = similarity::register_builtin_measures(&self.registry)?;
        to_js(&reports)
    }

    #[wasm_bindgen(js_name = listMeasures)]
    pub fn list_measures(&self) -> std::result::Result<JsValue, JsError> {
        to_js(&self.registry.list())
    }

    /// Score two nodes with several measures and resolve the results.
    ///
    /// `clustering` supplies weights, strategy and measure parameters.
    #[wasm_bindgen(js_name = calculateSimilarity)]
    pub fn calculate_similarity(
        &self,
        measure_ids: Vec<String>,
        a: JsValue,
        b: JsValue,
        clustering: JsValue,
    ) -> std::result::Result<JsValue, JsError> {
        let a: Node = serde_wasm_bindgen::from_value(a)?;
        let b: Node = serde_wasm_bindgen::from_value(b)?;
        let clustering: layout::ClusteringConfig = from_js(clustering)?;
        let ctx = similarity::ClusteringContext::new(
            clustering.similarity_threshold,
            clustering.max_cluster_size,
            clustering.strategy,
        )
        .with_nodes([&a, &b])
        .with_weights(clustering.weights)
        .with_parameters(clustering.parameters);
        to_js(&self.registry.calculate_multi_similarity(measure_ids.as_slice(), &a, &b, &ctx))
    }

    /// Combine scores with `strategy` (`average`, `weighted-average`, `max`
    /// or `min`).
    #[wasm_bindgen(js_name = resolveConflicts)]
    pub fn resolve_conflicts(
        &self,
        scores: &[f64],
        weights: &[f64],
        strategy: &str,
    ) -> std::result::Result<f64, JsError> {
        let strategy: ConflictStrategy = strategy.parse().map_err(|e: String| JsError::new(&e))?;
        Ok(self.resolver.resolve_conflicts(scores, weights, strategy))
    }

    #[wasm_bindgen(js_name = getConflictStatistics)]
    pub fn get_conflict_statistics(&self, scores: &[f64]) -> std::result::Result<JsValue, JsError> {
        to_js(&self.resolver.get_conflict_statistics(scores))
    }
}

impl HeroineLayoutWasm {
    /// Rebuild the spatial index from the engine's positions.
    fn reindex(&mut self) -> Result<Vec<Warning>> {
        let mut index = SpatialIndex::new(self.index_config.clone())?;
        let warnings = index.build_from_points(self.engine.positions().iter().map(|(&id, &p)| (id, p)));
        self.index = index;
        Ok(warnings)
    }
}

impl Default for HeroineLayoutWasm {
    fn default() -> Self {
        Self::new()
    }
}
