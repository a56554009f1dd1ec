//! Test and step descriptors carried by listener events.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata attached to tests and steps: key → values.
pub type Metadata = BTreeMap<String, Vec<String>>;

/// A test step as reported when it starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestStepData {
    /// Unique step id within a run.
    pub id: String,

    pub name: String,

    pub full_name: String,

    /// Id of the test this step executes.
    pub test_id: String,

    /// Enclosing step; `None` for a root step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    #[serde(default)]
    pub is_primary: bool,

    #[serde(default)]
    pub is_test_case: bool,

    #[serde(default)]
    pub is_dynamic: bool,

    #[serde(default)]
    pub metadata: Metadata,
}

impl TestStepData {
    pub fn new(id: impl Into<String>, name: impl Into<String>, test_id: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            full_name: name.clone(),
            name,
            test_id: test_id.into(),
            is_primary: true,
            ..Default::default()
        }
    }

    /// Builder helper setting the parent step.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// A discovered test, possibly with children, as reported during exploration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestData {
    pub id: String,

    pub name: String,

    pub full_name: String,

    #[serde(default)]
    pub is_test_case: bool,

    #[serde(default)]
    pub metadata: Metadata,

    #[serde(default)]
    pub children: Vec<TestData>,
}

impl TestData {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            full_name: name.clone(),
            name,
            ..Default::default()
        }
    }

    /// Number of tests in this subtree, including this one.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(TestData::count).sum::<usize>()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationType {
    Info,
    Warning,
    Error,
}

/// A diagnostic produced during exploration (e.g. a malformed test).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Annotation {
    pub annotation_type: AnnotationType,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl Annotation {
    pub fn new(annotation_type: AnnotationType, message: impl Into<String>) -> Self {
        Self {
            annotation_type,
            message: message.into(),
            details: None,
        }
    }
}

/// An attachment added to a step's log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    /// Text content, or base64 for binary payloads.
    pub content: String,
}

/// A log stream marker (e.g. `highlight`, `stack_trace`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Marker {
    pub class: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Marker {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            attributes: BTreeMap::new(),
        }
    }
}
