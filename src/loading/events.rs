//! Loading notifications.
//!
//! Each manager owns its listener set. Events reach two kinds of consumer:
//! callback observers registered on the manager, and channel subscribers that
//! drain an unbounded `futures` receiver in their own dispatch loop.

use std::sync::Arc;

use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use serde::{Deserialize, Serialize};

use crate::error::Warning;

use super::stage::{StageName, StageOutput};

/// Progress of the run, emitted after every unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub stage: StageName,
    /// 0 to 100.
    pub stage_progress: f64,
    /// Weighted over all stages, 0 to 100.
    pub overall_progress: f64,
    pub estimated_remaining_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LoadingEvent {
    StageStarted { stage: StageName },
    Progress(ProgressUpdate),
    StageDataAvailable { stage: StageName },
    StagePaused { stage: StageName },
    StageResumed { stage: StageName },
    StageCancelled { stage: StageName },
    StageFailed { stage: StageName, error: String },
    Warning { stage: StageName, warning: Warning },
    Finished { elapsed_ms: f64 },
}

pub(crate) type StageObserver = Box<dyn FnMut(StageName, &Arc<StageOutput>)>;
pub(crate) type ProgressObserver = Box<dyn FnMut(&ProgressUpdate)>;

#[derive(Default)]
pub(crate) struct Listeners {
    stage_data: Vec<(StageName, StageObserver)>,
    progress: Vec<ProgressObserver>,
    subscribers: Vec<UnboundedSender<LoadingEvent>>,
}

impl Listeners {
    pub fn add_stage_observer(&mut self, stage: StageName, observer: StageObserver) {
        self.stage_data.push((stage, observer));
    }

    pub fn add_progress_observer(&mut self, observer: ProgressObserver) {
        self.progress.push(observer);
    }

    pub fn subscribe(&mut self) -> UnboundedReceiver<LoadingEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Send to every live subscriber, dropping the closed ones.
    pub fn send(&mut self, event: LoadingEvent) {
        self.subscribers
            .retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }

    pub fn progress(&mut self, update: ProgressUpdate) {
        self.send(LoadingEvent::Progress(update));
        for observer in &mut self.progress {
            observer(&update);
        }
    }

    pub fn stage_data(&mut self, stage: StageName, output: &Arc<StageOutput>) {
        self.send(LoadingEvent::StageDataAvailable { stage });
        for (wanted, observer) in &mut self.stage_data {
            if *wanted == stage {
                observer(stage, output);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use futures::executor::block_on;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[test]
    fn test_closed_subscribers_are_dropped() {
        let mut listeners = Listeners::default();
        let rx = listeners.subscribe();
        let mut live = listeners.subscribe();
        drop(rx);
        listeners.send(LoadingEvent::StageStarted {
            stage: StageName::Clustering,
        });
        assert_eq!(listeners.subscribers.len(), 1);
        assert_eq!(
            block_on(live.next()),
            Some(LoadingEvent::StageStarted {
                stage: StageName::Clustering
            })
        );
    }

    #[test]
    fn test_stage_observers_filter_by_stage() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut listeners = Listeners::default();
        let sink = seen.clone();
        listeners.add_stage_observer(
            StageName::EdgeCalculation,
            Box::new(move |stage, _| sink.lock().unwrap().push(stage)),
        );
        let output = Arc::new(StageOutput::Positions(HashMap::new()));
        listeners.stage_data(StageName::NodePositioning, &output);
        listeners.stage_data(StageName::EdgeCalculation, &output);
        assert_eq!(*seen.lock().unwrap(), vec![StageName::EdgeCalculation]);
    }
}
