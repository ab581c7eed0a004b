//! Cooperative scheduling primitives.
//!
//! Long-running work (simulation iterations, stage batches) awaits
//! [`yield_now`] between units of work and consults a [`RunControl`] at the
//! same boundaries. Nothing here is preemptive: a pause or cancel request is
//! observed the next time the running loop checks in.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::task::AtomicWaker;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Yield control back to the executor once.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Future returned by [`yield_now`].
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Lifecycle of a controlled run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Cancelled,
}

/// Outcome of a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Continue,
    Cancelled,
}

struct ControlInner {
    state: Mutex<RunState>,
    waker: AtomicWaker,
}

/// Shared pause/resume/cancel state for one run.
///
/// Cloning yields another handle to the same state. Transitions are explicit:
/// `Running -> Paused -> Running`, and `Running | Paused -> Cancelled`.
#[derive(Clone)]
pub struct RunControl {
    inner: Arc<ControlInner>,
}

impl RunControl {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ControlInner {
                state: Mutex::new(RunState::Idle),
                waker: AtomicWaker::new(),
            }),
        }
    }

    pub fn state(&self) -> RunState {
        *self.inner.state.lock()
    }

    /// Enter `Running` at the start of a run. A cancellation issued before
    /// the run starts is discarded.
    pub fn begin(&self) {
        *self.inner.state.lock() = RunState::Running;
    }

    /// Return to `Idle` once a run has finished.
    pub fn finish(&self) {
        let mut state = self.inner.state.lock();
        if *state != RunState::Cancelled {
            *state = RunState::Idle;
        }
    }

    /// Request a pause. Returns false when the run is not `Running`.
    pub fn pause(&self) -> bool {
        let mut state = self.inner.state.lock();
        if *state == RunState::Running {
            *state = RunState::Paused;
            true
        } else {
            false
        }
    }

    /// Resume a paused run. Returns false when the run is not `Paused`.
    pub fn resume(&self) -> bool {
        let resumed = {
            let mut state = self.inner.state.lock();
            if *state == RunState::Paused {
                *state = RunState::Running;
                true
            } else {
                false
            }
        };
        if resumed {
            self.inner.waker.wake();
        }
        resumed
    }

    /// Request cancellation. Returns false when nothing was running.
    pub fn cancel(&self) -> bool {
        let cancelled = {
            let mut state = self.inner.state.lock();
            match *state {
                RunState::Running | RunState::Paused => {
                    *state = RunState::Cancelled;
                    true
                }
                RunState::Idle | RunState::Cancelled => false,
            }
        };
        if cancelled {
            self.inner.waker.wake();
        }
        cancelled
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == RunState::Cancelled
    }

    pub fn is_paused(&self) -> bool {
        self.state() == RunState::Paused
    }

    /// Checkpoint between units of work: waits while paused, then reports
    /// whether the loop may continue.
    pub async fn checkpoint(&self) -> Checkpoint {
        WaitWhilePaused { control: self }.await
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RunControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunControl")
            .field("state", &self.state())
            .finish()
    }
}

struct WaitWhilePaused<'a> {
    control: &'a RunControl,
}

impl Future for WaitWhilePaused<'_> {
    type Output = Checkpoint;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Checkpoint> {
        let inner = &self.control.inner;
        inner.waker.register(cx.waker());
        match *inner.state.lock() {
            RunState::Paused => Poll::Pending,
            RunState::Cancelled => Poll::Ready(Checkpoint::Cancelled),
            RunState::Running | RunState::Idle => Poll::Ready(Checkpoint::Continue),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn test_transitions() {
        let control = RunControl::new();
        assert_eq!(control.state(), RunState::Idle);
        assert!(!control.pause());
        assert!(!control.cancel());

        control.begin();
        assert!(control.pause());
        assert!(control.is_paused());
        assert!(!control.pause());
        assert!(control.resume());
        assert_eq!(control.state(), RunState::Running);

        assert!(control.cancel());
        assert!(control.is_cancelled());
        assert!(!control.resume());

        control.finish();
        assert!(control.is_cancelled());
        control.begin();
        assert_eq!(control.state(), RunState::Running);
    }

    #[test]
    fn test_checkpoint_reports_cancel() {
        let control = RunControl::new();
        control.begin();
        assert_eq!(block_on(control.checkpoint()), Checkpoint::Continue);
        control.cancel();
        assert_eq!(block_on(control.checkpoint()), Checkpoint::Cancelled);
    }

    #[test]
    fn test_paused_checkpoint_wakes_on_resume() {
        let control = RunControl::new();
        control.begin();
        control.pause();

        let remote = control.clone();
        let resumer = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            remote.resume();
        });

        assert_eq!(block_on(control.checkpoint()), Checkpoint::Continue);
        resumer.join().unwrap();
    }

    #[test]
    fn test_yield_now_completes() {
        block_on(async {
            yield_now().await;
            yield_now().await;
        });
    }
}
