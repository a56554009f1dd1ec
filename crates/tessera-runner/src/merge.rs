//! Merges the result trees of several partitions into one logical tree.
//!
//! Every partition reports its own root step. The [`MergingListener`] starts a
//! single synthetic root the first time any partition root starts, redirects
//! every later partition root onto it, and folds the partition roots' results
//! into one merged result reported exactly once by [`MergingListener::finish`].

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use tessera_model::{ExecutionEvent, ExecutionListener, TestResult};
use tracing::debug;

#[derive(Debug)]
struct MergedRoot {
    step_id: String,
    result: TestResult,
    started: Instant,
}

#[derive(Debug, Default)]
struct MergeState {
    /// Partition root step id → synthetic root step id.
    redirects: HashMap<String, String>,
    root: Option<MergedRoot>,
    finished: bool,
}

impl MergeState {
    fn redirect(&self, step_id: &str) -> Option<&String> {
        self.redirects.get(step_id)
    }
}

/// Execution listener shared by all partitions of one orchestrated run.
pub struct MergingListener<'a> {
    inner: &'a dyn ExecutionListener,
    state: Mutex<MergeState>,
}

impl<'a> MergingListener<'a> {
    pub fn new(inner: &'a dyn ExecutionListener) -> Self {
        Self {
            inner,
            state: Mutex::new(MergeState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MergeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Id of the synthetic root, once any partition root has started.
    pub fn root_step_id(&self) -> Option<String> {
        self.state().root.as_ref().map(|r| r.step_id.clone())
    }

    /// The merged root result accumulated so far.
    pub fn merged_result(&self) -> Option<TestResult> {
        self.state().root.as_ref().map(|r| r.result.clone())
    }

    /// Report the synthetic root as finished. Does nothing if no root ever
    /// started or if it was already reported.
    pub fn finish(&self) {
        let mut state = self.state();
        if state.finished {
            return;
        }
        state.finished = true;
        let Some(root) = &state.root else {
            return;
        };

        let mut result = root.result.clone();
        result.duration_ms = root.started.elapsed().as_millis() as u64;
        debug!(
            step_id = %root.step_id,
            outcome = %result.outcome,
            assert_count = result.assert_count,
            partitions = state.redirects.len(),
            "merged root finished"
        );
        self.inner.on_execution_event(ExecutionEvent::StepFinished {
            step_id: root.step_id.clone(),
            result,
        });
    }
}

impl Drop for MergingListener<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

impl ExecutionListener for MergingListener<'_> {
    fn on_execution_event(&self, mut event: ExecutionEvent) {
        let mut state = self.state();

        match &mut event {
            ExecutionEvent::StepStarted { step } if step.is_root() => {
                let existing = state.root.as_ref().map(|r| r.step_id.clone());
                let root_id = match existing {
                    Some(root_id) => root_id,
                    None => {
                        let root_id = uuid::Uuid::new_v4().to_string();
                        let mut root_step = step.clone();
                        root_step.id = root_id.clone();
                        state.root = Some(MergedRoot {
                            step_id: root_id.clone(),
                            result: TestResult::default(),
                            started: Instant::now(),
                        });
                        self.inner
                            .on_execution_event(ExecutionEvent::StepStarted { step: root_step });
                        root_id
                    }
                };
                state.redirects.insert(step.id.clone(), root_id);
                return;
            }
            ExecutionEvent::StepStarted { step } => {
                if let Some(parent_id) = step.parent_id.as_mut() {
                    if let Some(target) = state.redirect(parent_id) {
                        *parent_id = target.clone();
                    }
                }
            }
            ExecutionEvent::StepFinished { step_id, result }
                if state.redirects.contains_key(step_id.as_str()) =>
            {
                if let Some(root) = state.root.as_mut() {
                    root.result.absorb(result);
                }
                return;
            }
            other => {
                if let Some(step_id) = other.referenced_step_id_mut() {
                    if let Some(target) = state.redirect(step_id) {
                        *step_id = target.clone();
                    }
                }
            }
        }

        self.inner.on_execution_event(event);
    }
}
