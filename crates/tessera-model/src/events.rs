//! Listener protocol: exploration and execution events.
//!
//! Each listener method of the driver contract is modelled as one variant of a
//! serializable event enum, so the same value can be replayed on a local
//! listener or sent across a host boundary without translation.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

use crate::outcome::TestResult;
use crate::step::{Annotation, Attachment, Marker, TestData, TestStepData};

// ---------------------------------------------------------------------------
// Exploration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExplorationEvent {
    /// A subtree of discovered tests was merged under `parent_test_id`.
    SubtreeMerged {
        parent_test_id: Option<String>,
        test: TestData,
    },

    AnnotationAdded { annotation: Annotation },
}

/// Receives exploration events.
pub trait ExplorationListener: Send + Sync {
    fn on_exploration_event(&self, event: ExplorationEvent);
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    StepStarted { step: TestStepData },

    StepFinished { step_id: String, result: TestResult },

    LifecyclePhaseChanged { step_id: String, phase: String },

    MetadataAdded {
        step_id: String,
        key: String,
        value: String,
    },

    LogAttach {
        step_id: String,
        attachment: Attachment,
    },

    LogStreamWrite {
        step_id: String,
        stream_name: String,
        text: String,
    },

    LogStreamEmbed {
        step_id: String,
        stream_name: String,
        attachment_name: String,
    },

    LogStreamBeginSection {
        step_id: String,
        stream_name: String,
        section_name: String,
    },

    LogStreamBeginMarker {
        step_id: String,
        stream_name: String,
        marker: Marker,
    },

    LogStreamEnd { step_id: String, stream_name: String },
}

impl ExecutionEvent {
    /// Event kind as a stable string (for logging).
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionEvent::StepStarted { .. } => "step_started",
            ExecutionEvent::StepFinished { .. } => "step_finished",
            ExecutionEvent::LifecyclePhaseChanged { .. } => "lifecycle_phase_changed",
            ExecutionEvent::MetadataAdded { .. } => "metadata_added",
            ExecutionEvent::LogAttach { .. } => "log_attach",
            ExecutionEvent::LogStreamWrite { .. } => "log_stream_write",
            ExecutionEvent::LogStreamEmbed { .. } => "log_stream_embed",
            ExecutionEvent::LogStreamBeginSection { .. } => "log_stream_begin_section",
            ExecutionEvent::LogStreamBeginMarker { .. } => "log_stream_begin_marker",
            ExecutionEvent::LogStreamEnd { .. } => "log_stream_end",
        }
    }

    /// The id of the step this event is about.
    pub fn step_id(&self) -> &str {
        match self {
            ExecutionEvent::StepStarted { step } => &step.id,
            ExecutionEvent::StepFinished { step_id, .. }
            | ExecutionEvent::LifecyclePhaseChanged { step_id, .. }
            | ExecutionEvent::MetadataAdded { step_id, .. }
            | ExecutionEvent::LogAttach { step_id, .. }
            | ExecutionEvent::LogStreamWrite { step_id, .. }
            | ExecutionEvent::LogStreamEmbed { step_id, .. }
            | ExecutionEvent::LogStreamBeginSection { step_id, .. }
            | ExecutionEvent::LogStreamBeginMarker { step_id, .. }
            | ExecutionEvent::LogStreamEnd { step_id, .. } => step_id,
        }
    }

    /// Mutable access to the step id referenced by a non-start event.
    ///
    /// Returns `None` for `StepStarted`, whose own id is never rewritten.
    pub fn referenced_step_id_mut(&mut self) -> Option<&mut String> {
        match self {
            ExecutionEvent::StepStarted { .. } => None,
            ExecutionEvent::StepFinished { step_id, .. }
            | ExecutionEvent::LifecyclePhaseChanged { step_id, .. }
            | ExecutionEvent::MetadataAdded { step_id, .. }
            | ExecutionEvent::LogAttach { step_id, .. }
            | ExecutionEvent::LogStreamWrite { step_id, .. }
            | ExecutionEvent::LogStreamEmbed { step_id, .. }
            | ExecutionEvent::LogStreamBeginSection { step_id, .. }
            | ExecutionEvent::LogStreamBeginMarker { step_id, .. }
            | ExecutionEvent::LogStreamEnd { step_id, .. } => Some(step_id),
        }
    }
}

/// Receives execution events.
pub trait ExecutionListener: Send + Sync {
    fn on_execution_event(&self, event: ExecutionEvent);
}

// ---------------------------------------------------------------------------
// Stock listeners
// ---------------------------------------------------------------------------

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullListener;

impl ExplorationListener for NullListener {
    fn on_exploration_event(&self, _event: ExplorationEvent) {}
}

impl ExecutionListener for NullListener {
    fn on_execution_event(&self, _event: ExecutionEvent) {}
}

/// Records every event in arrival order.
#[derive(Debug, Default)]
pub struct RecordingListener {
    exploration: Mutex<Vec<ExplorationEvent>>,
    execution: Mutex<Vec<ExecutionEvent>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exploration_events(&self) -> Vec<ExplorationEvent> {
        self.exploration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn execution_events(&self) -> Vec<ExecutionEvent> {
        self.execution
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Steps reported as started without a parent.
    pub fn root_steps(&self) -> Vec<TestStepData> {
        self.execution_events()
            .into_iter()
            .filter_map(|e| match e {
                ExecutionEvent::StepStarted { step } if step.is_root() => Some(step),
                _ => None,
            })
            .collect()
    }

    /// The result reported for `step_id`, if it finished.
    pub fn finished_result(&self, step_id: &str) -> Option<TestResult> {
        self.execution_events().into_iter().find_map(|e| match e {
            ExecutionEvent::StepFinished { step_id: id, result } if id == step_id => Some(result),
            _ => None,
        })
    }
}

impl ExplorationListener for RecordingListener {
    fn on_exploration_event(&self, event: ExplorationEvent) {
        self.exploration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl ExecutionListener for RecordingListener {
    fn on_execution_event(&self, event: ExecutionEvent) {
        self.execution
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
