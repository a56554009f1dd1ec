//! Host setup: how an isolated execution context is constructed.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ModelError;

/// Processor architecture required by a test assembly or host.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorArchitecture {
    /// Unknown or unspecified.
    #[default]
    None,
    /// Portable code that runs on any architecture.
    Any,
    X86,
    X64,
    Arm64,
}

impl ProcessorArchitecture {
    /// Whether this architecture pins the host to a particular processor.
    pub fn is_specific(&self) -> bool {
        matches!(
            self,
            ProcessorArchitecture::X86 | ProcessorArchitecture::X64 | ProcessorArchitecture::Arm64
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorArchitecture::None => "none",
            ProcessorArchitecture::Any => "any",
            ProcessorArchitecture::X86 => "x86",
            ProcessorArchitecture::X64 => "x64",
            ProcessorArchitecture::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for ProcessorArchitecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessorArchitecture {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(ProcessorArchitecture::None),
            "any" | "msil" => Ok(ProcessorArchitecture::Any),
            "x86" => Ok(ProcessorArchitecture::X86),
            "x64" | "amd64" | "x86_64" => Ok(ProcessorArchitecture::X64),
            "arm64" | "aarch64" => Ok(ProcessorArchitecture::Arm64),
            other => Err(ModelError::InvalidHostSetup(format!(
                "unknown processor architecture: {other}"
            ))),
        }
    }
}

/// Configuration embedded into a host.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct HostConfiguration {
    /// Verbatim configuration text (typically sniffed from a sibling file).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_text: Option<String>,

    /// Runtime versions the host may use. Empty means unconstrained.
    #[serde(default)]
    pub supported_runtime_versions: BTreeSet<String>,
}

/// Declares how an isolated execution context should be constructed.
///
/// Two setups are compatible for sharing a host only if they are structurally
/// equal, which is what the derived `Eq`/`Hash` express.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct HostSetup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_base_directory: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,

    #[serde(default)]
    pub configuration: HostConfiguration,

    #[serde(default)]
    pub processor_architecture: ProcessorArchitecture,

    #[serde(default)]
    pub shadow_copy: bool,

    #[serde(default)]
    pub debug: bool,

    /// Free-form properties exported into the host.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl HostSetup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge additional properties; existing keys are overwritten.
    pub fn add_properties<'a, I>(&mut self, properties: I)
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (key, value) in properties {
            self.properties.insert(key.clone(), value.clone());
        }
    }

    /// Stable SHA-256 digest of the setup's canonical JSON form.
    pub fn digest(&self) -> String {
        // BTree collections keep the serialized field order deterministic.
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        hex::encode(hasher.finalize())
    }

    /// Short digest (first 12 chars).
    pub fn short_digest(&self) -> String {
        let digest = self.digest();
        digest[..12.min(digest.len())].to_string()
    }
}
