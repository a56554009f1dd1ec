//! Test domains and isolation policy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;
use crate::host_setup::HostSetup;
use crate::package::TestPackageConfig;

/// How many hosts and contexts are created relative to the number of
/// assemblies. Selected once per run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    /// One host, one shared context.
    #[default]
    None,
    /// One lightweight context per assembly group inside a single host.
    ContextPerAssembly,
    /// One separate host per assembly.
    HostPerAssembly,
}

impl IsolationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationMode::None => "none",
            IsolationMode::ContextPerAssembly => "context_per_assembly",
            IsolationMode::HostPerAssembly => "host_per_assembly",
        }
    }
}

impl fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationMode {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "none" | "shared" => Ok(IsolationMode::None),
            "context_per_assembly" | "context" => Ok(IsolationMode::ContextPerAssembly),
            "host_per_assembly" | "host" | "process" => Ok(IsolationMode::HostPerAssembly),
            other => Err(ModelError::UnknownIsolationMode(other.to_string())),
        }
    }
}

/// A group of assemblies that can share a single isolated host.
///
/// The domain's package configuration is a private copy of the caller's; its
/// host setup is the derived setup shared by every assembly in the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDomain {
    package: TestPackageConfig,
}

impl TestDomain {
    /// Create a domain from an already-specialized package copy.
    pub fn new(package: TestPackageConfig) -> Self {
        Self { package }
    }

    pub fn package(&self) -> &TestPackageConfig {
        &self.package
    }

    pub fn host_setup(&self) -> &HostSetup {
        &self.package.host_setup
    }

    pub fn host_setup_mut(&mut self) -> &mut HostSetup {
        &mut self.package.host_setup
    }

    /// Merge another domain's assemblies and hint directories into this one.
    pub fn merge_from(&mut self, other: &TestDomain) {
        for assembly in &other.package.assembly_files {
            self.package.add_assembly(assembly);
        }
        for hint in &other.package.hint_directories {
            self.package.add_hint_directory(hint);
        }
    }

    pub fn into_package(self) -> TestPackageConfig {
        self.package
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_isolation_mode_parse() {
        assert_eq!("none".parse::<IsolationMode>().unwrap(), IsolationMode::None);
        assert_eq!(
            "host-per-assembly".parse::<IsolationMode>().unwrap(),
            IsolationMode::HostPerAssembly
        );
        assert_eq!(
            "Context_Per_Assembly".parse::<IsolationMode>().unwrap(),
            IsolationMode::ContextPerAssembly
        );
        assert!("bogus".parse::<IsolationMode>().is_err());
    }

    #[test]
    fn test_merge_from_unions_without_duplicates() {
        let mut a = TestDomain::new(
            TestPackageConfig::new()
                .with_assembly("/x/a.dll")
                .with_hint_directory("/lib"),
        );
        let b = TestDomain::new(
            TestPackageConfig::new()
                .with_assembly("/x/b.dll")
                .with_assembly("/x/a.dll")
                .with_hint_directory("/lib"),
        );
        a.merge_from(&b);
        assert_eq!(
            a.package().assembly_files,
            vec![PathBuf::from("/x/a.dll"), PathBuf::from("/x/b.dll")]
        );
        assert_eq!(a.package().hint_directories.len(), 1);
    }
}
