//! Stage ordering and cancellation of progressive loads.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use futures::executor::block_on;
use heroine_graph_layout::loading::{LoadingEvent, StageOutput, StageStatus};
use heroine_graph_layout::{Edge, Error, LoadingConfig, Node, ProgressiveLoadingManager, StageName};
use proptest::prelude::*;

fn star(n: u32) -> (Vec<Node>, Vec<Edge>) {
    let nodes = (0..n).map(Node::new).collect();
    let edges = (1..n).map(|i| Edge::new(0, i)).collect();
    (nodes, edges)
}

fn config(batch_size: usize) -> LoadingConfig {
    let mut config = LoadingConfig {
        batch_size,
        ..LoadingConfig::default()
    };
    config.layout.max_iterations = 25;
    config
}

/// Collects every event of the manager's runs once it has been dropped.
fn collect(mut rx: futures::channel::mpsc::UnboundedReceiver<LoadingEvent>) -> Vec<LoadingEvent> {
    let mut events = Vec::new();
    while let Some(event) = block_on(rx.next()) {
        events.push(event);
    }
    events
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn dependents_start_after_dependencies(n in 1u32..50, batch_size in 1usize..20) {
        let (nodes, edges) = star(n);
        let mut manager = ProgressiveLoadingManager::new();
        let rx = manager.subscribe();
        manager.load(&nodes, &edges, config(batch_size)).unwrap();
        drop(manager);

        let mut complete = HashSet::new();
        for event in collect(rx) {
            match event {
                LoadingEvent::StageStarted { stage } => {
                    for dependency in stage.dependencies() {
                        prop_assert!(complete.contains(dependency), "{stage} started before {dependency}");
                    }
                }
                LoadingEvent::StageDataAvailable { stage } => {
                    complete.insert(stage);
                }
                _ => {}
            }
        }
        prop_assert_eq!(complete.len(), StageName::ALL.len());
    }

    #[test]
    fn cancel_stops_progress(n in 2u32..40, cancel_after in 1usize..30) {
        let (nodes, edges) = star(n);
        let mut manager = ProgressiveLoadingManager::new();
        let handle = manager.handle();
        let rx = manager.subscribe();

        let seen = Arc::new(Mutex::new(0usize));
        let counter = seen.clone();
        manager.on_progress_update(move |_| {
            let mut seen = counter.lock().unwrap();
            *seen += 1;
            if *seen == cancel_after {
                handle.cancel();
            }
        });

        let outcome = manager.load(&nodes, &edges, config(4));
        let statuses: Vec<StageStatus> = manager.stages().map(|s| s.status).collect();
        drop(manager);
        let events = collect(rx);

        match outcome {
            Err(Error::Cancelled { stage }) => {
                prop_assert!(stage.is_some());
                prop_assert!(statuses.iter().all(|s| matches!(s, StageStatus::Complete | StageStatus::Cancelled)));
                prop_assert!(statuses.contains(&StageStatus::Cancelled));

                let first_cancelled = events
                    .iter()
                    .position(|e| matches!(e, LoadingEvent::StageCancelled { .. }))
                    .unwrap();
                prop_assert!(!events[first_cancelled..].iter().any(|e| matches!(e, LoadingEvent::Progress(_))));
                prop_assert_eq!(*seen.lock().unwrap(), cancel_after);
            }
            // Short runs can finish before, or exactly at, the requested cancellation point.
            Ok(report) => {
                prop_assert!(report.statuses.values().all(|s| *s == StageStatus::Complete));
                prop_assert!(*seen.lock().unwrap() <= cancel_after);
            }
            Err(other) => prop_assert!(false, "unexpected error {other}"),
        }
    }
}

#[test]
fn test_rendering_snapshot_matches_index() {
    let (nodes, edges) = star(25);
    let mut manager = ProgressiveLoadingManager::new();
    manager.load(&nodes, &edges, config(8)).unwrap();

    let output = manager.get_stage_data(StageName::RenderingReady).unwrap();
    let StageOutput::RenderingReady(snapshot) = &*output else {
        panic!("unexpected output {output:?}");
    };
    assert_eq!(snapshot.positions.len(), 25);
    assert_eq!(snapshot.edge_count, 24);
    assert_eq!(snapshot.index_statistics.node_count, 25);

    let (&id, &p) = snapshot.positions.iter().next().unwrap();
    assert_eq!(manager.spatial_index().find_nearest(p, Some(0.5)), Some(id));
}

#[test]
fn test_edges_to_missing_nodes_are_skipped() {
    let (nodes, mut edges) = star(5);
    edges.push(Edge::new(0, 99));
    let mut manager = ProgressiveLoadingManager::new();
    let report = manager.load(&nodes, &edges, config(2)).unwrap();

    let output = manager.get_stage_data(StageName::EdgeCalculation).unwrap();
    let StageOutput::Edges(geometry) = &*output else {
        panic!("unexpected output {output:?}");
    };
    assert_eq!(geometry.len(), 4);
    assert!(!report.warnings.is_empty());
}

#[test]
fn test_manager_can_run_again() {
    let (nodes, edges) = star(6);
    let mut manager = ProgressiveLoadingManager::new();
    manager.load(&nodes, &edges, config(3)).unwrap();
    let (more_nodes, more_edges) = star(9);
    let report = manager.load(&more_nodes, &more_edges, config(3)).unwrap();
    assert!(report.statuses.values().all(|s| *s == StageStatus::Complete));
    assert_eq!(manager.spatial_index().len(), 9);
}
