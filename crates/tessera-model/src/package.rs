//! Package, exploration, execution, and runner options.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{ModelError, Result};
use crate::host_setup::HostSetup;

/// The full description of what to test.
///
/// Owned by the caller. Partitioning always works on clones, so specializing
/// one partition's copy never affects another's.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestPackageConfig {
    /// Test assembly files, in caller order.
    #[serde(default)]
    pub assembly_files: Vec<PathBuf>,

    /// Directories searched when resolving assembly references.
    #[serde(default)]
    pub hint_directories: Vec<PathBuf>,

    /// Host setup applied to every host created for this package.
    #[serde(default)]
    pub host_setup: HostSetup,
}

impl TestPackageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder helper adding an assembly file.
    pub fn with_assembly(mut self, path: impl Into<PathBuf>) -> Self {
        self.assembly_files.push(path.into());
        self
    }

    /// Builder helper adding a hint directory.
    pub fn with_hint_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.hint_directories.push(path.into());
        self
    }

    /// Add an assembly if not already present.
    pub fn add_assembly(&mut self, path: &Path) {
        if !self.assembly_files.iter().any(|p| p == path) {
            self.assembly_files.push(path.to_path_buf());
        }
    }

    /// Add a hint directory if not already present.
    pub fn add_hint_directory(&mut self, path: &Path) {
        if !self.hint_directories.iter().any(|p| p == path) {
            self.hint_directories.push(path.to_path_buf());
        }
    }

    /// Reject configurations no driver could act on.
    pub fn validate(&self) -> Result<()> {
        if let Some(bad) = self
            .assembly_files
            .iter()
            .find(|p| p.as_os_str().is_empty())
        {
            return Err(ModelError::InvalidPackage(format!(
                "assembly path must not be empty (got {:?})",
                bad
            )));
        }
        if self
            .hint_directories
            .iter()
            .any(|p| p.as_os_str().is_empty())
        {
            return Err(ModelError::InvalidPackage(
                "hint directory must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Options controlling test exploration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestExplorationOptions {
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Options controlling test execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestExecutionOptions {
    /// Opaque filter expression interpreted by the harness.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Whether tests marked explicit are selected by the filter.
    #[serde(default)]
    pub explicit_tests_included: bool,

    #[serde(default)]
    pub skip_dynamic_tests: bool,

    /// Explore and report tests without executing their bodies.
    #[serde(default)]
    pub skip_test_execution: bool,

    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Process-wide runner options handed to `initialize`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestRunnerOptions {
    /// Extra properties merged into every created host setup.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl TestRunnerOptions {
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}
