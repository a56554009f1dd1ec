//! Hierarchical progress reporting with cooperative cancellation.
//!
//! A [`ProgressMonitor`] tracks work for one task. Sub-monitors created with
//! [`ProgressMonitor::sub_monitor`] own a slice of their parent's work and
//! see the parent's cancellation flag. Only a root monitor can raise the
//! flag; sub-monitors handed to partitions read it. Cancellation is polled:
//! drivers check
//! [`ProgressMonitor::is_canceled`] at their own checkpoints, or await
//! [`ProgressMonitor::cancelled`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

/// A progress notification observed at the root of a monitor tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressUpdate {
    TaskStarted { task_name: String, total_work: f64 },
    Worked { work: f64 },
    Status { status: String },
    Done,
}

/// Observes updates from a root monitor.
pub trait ProgressReporter: Send + Sync {
    fn on_progress(&self, update: &ProgressUpdate);
}

#[derive(Debug, Default)]
struct MonitorState {
    task_name: String,
    total_work: f64,
    completed_work: f64,
    status: String,
    done: bool,
}

struct MonitorInner {
    cancel: Arc<watch::Sender<bool>>,
    state: Mutex<MonitorState>,
    parent: Option<(ProgressMonitor, f64)>,
    reporter: Option<Arc<dyn ProgressReporter>>,
}

#[derive(Clone)]
pub struct ProgressMonitor {
    inner: Arc<MonitorInner>,
}

impl Default for ProgressMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProgressMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("ProgressMonitor")
            .field("task_name", &state.task_name)
            .field("total_work", &state.total_work)
            .field("completed_work", &state.completed_work)
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

impl ProgressMonitor {
    /// A root monitor with no observer.
    pub fn new() -> Self {
        Self::build(None, None)
    }

    /// A root monitor whose updates are reported to `reporter`.
    pub fn with_reporter(reporter: Arc<dyn ProgressReporter>) -> Self {
        Self::build(Some(reporter), None)
    }

    fn build(
        reporter: Option<Arc<dyn ProgressReporter>>,
        parent: Option<(ProgressMonitor, f64)>,
    ) -> Self {
        let cancel = match &parent {
            Some((p, _)) => p.inner.cancel.clone(),
            None => Arc::new(watch::channel(false).0),
        };
        Self {
            inner: Arc::new(MonitorInner {
                cancel,
                state: Mutex::new(MonitorState::default()),
                parent,
                reporter,
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn report(&self, update: ProgressUpdate) {
        if let Some(reporter) = &self.inner.reporter {
            reporter.on_progress(&update);
        }
    }

    pub fn begin_task(&self, task_name: impl Into<String>, total_work: f64) {
        let task_name = task_name.into();
        {
            let mut state = self.state();
            state.task_name = task_name.clone();
            state.total_work = total_work.max(0.0);
            state.completed_work = 0.0;
            state.done = false;
        }
        self.report(ProgressUpdate::TaskStarted {
            task_name,
            total_work,
        });
    }

    /// Record `work` units as completed, clamped to the task's total.
    pub fn worked(&self, work: f64) {
        if work <= 0.0 {
            return;
        }
        let (delta, total) = {
            let mut state = self.state();
            if state.done {
                return;
            }
            let remaining = if state.total_work > 0.0 {
                (state.total_work - state.completed_work).max(0.0)
            } else {
                work
            };
            let delta = work.min(remaining);
            state.completed_work += delta;
            (delta, state.total_work)
        };
        if delta <= 0.0 {
            return;
        }
        self.report(ProgressUpdate::Worked { work: delta });
        if let Some((parent, parent_work)) = &self.inner.parent {
            if total > 0.0 {
                parent.worked(delta / total * parent_work);
            }
        }
    }

    pub fn set_status(&self, status: impl Into<String>) {
        let status = status.into();
        self.state().status = status.clone();
        self.report(ProgressUpdate::Status {
            status: status.clone(),
        });
        if let Some((parent, _)) = &self.inner.parent {
            parent.set_status(status);
        }
    }

    /// Complete the task, consuming any remaining work.
    pub fn done(&self) {
        let remaining = {
            let state = self.state();
            if state.done {
                return;
            }
            (state.total_work - state.completed_work).max(0.0)
        };
        self.worked(remaining);
        self.state().done = true;
        self.report(ProgressUpdate::Done);
    }

    /// A child monitor owning `parent_work` units of this monitor's task.
    pub fn sub_monitor(&self, parent_work: f64) -> ProgressMonitor {
        Self::build(None, Some((self.clone(), parent_work)))
    }

    /// Cancel the whole monitor tree. Has no effect on a sub-monitor.
    pub fn cancel(&self) {
        if self.inner.parent.is_some() {
            tracing::debug!(task = %self.task_name(), "ignoring cancel from a sub-monitor");
            return;
        }
        self.inner.cancel.send_replace(true);
    }

    /// Whether [`cancel`](Self::cancel) takes effect on this monitor.
    pub fn can_cancel(&self) -> bool {
        self.inner.parent.is_none()
    }

    pub fn is_canceled(&self) -> bool {
        *self.inner.cancel.borrow()
    }

    /// Resolves once the monitor tree is canceled.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.cancel.subscribe();
        loop {
            let canceled = *rx.borrow_and_update();
            if canceled {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn task_name(&self) -> String {
        self.state().task_name.clone()
    }

    pub fn status(&self) -> String {
        self.state().status.clone()
    }

    pub fn total_work(&self) -> f64 {
        self.state().total_work
    }

    pub fn completed_work(&self) -> f64 {
        self.state().completed_work
    }

    pub fn is_done(&self) -> bool {
        self.state().done
    }
}
