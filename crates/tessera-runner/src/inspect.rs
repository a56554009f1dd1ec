//! Filesystem and assembly inspection seams used while deriving host setups.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use tessera_model::ProcessorArchitecture;

/// File access needed to sniff sibling configuration files.
pub trait FileSystem: Send + Sync {
    fn file_exists(&self, path: &Path) -> bool;

    fn read_to_string(&self, path: &Path) -> io::Result<String>;
}

/// The real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeFileSystem;

impl FileSystem for NativeFileSystem {
    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// Requirements an assembly declares about the host it runs in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyTraits {
    pub processor_architecture: ProcessorArchitecture,
    /// Empty means any runtime version.
    pub supported_runtime_versions: BTreeSet<String>,
}

impl AssemblyTraits {
    pub fn new(processor_architecture: ProcessorArchitecture) -> Self {
        Self {
            processor_architecture,
            supported_runtime_versions: BTreeSet::new(),
        }
    }

    pub fn with_runtime_version(mut self, version: impl Into<String>) -> Self {
        self.supported_runtime_versions.insert(version.into());
        self
    }
}

/// Reads host requirements out of an assembly file.
pub trait AssemblyInspector: Send + Sync {
    fn inspect(&self, assembly: &Path) -> AssemblyTraits;
}

/// Declares no requirements for any assembly.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAssemblyInspector;

impl AssemblyInspector for DefaultAssemblyInspector {
    fn inspect(&self, _assembly: &Path) -> AssemblyTraits {
        AssemblyTraits::default()
    }
}

/// Looks requirements up in a fixed table; unknown assemblies declare none.
#[derive(Debug, Default, Clone)]
pub struct MapAssemblyInspector {
    traits: HashMap<PathBuf, AssemblyTraits>,
}

impl MapAssemblyInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, assembly: impl Into<PathBuf>, traits: AssemblyTraits) -> Self {
        self.traits.insert(assembly.into(), traits);
        self
    }
}

impl AssemblyInspector for MapAssemblyInspector {
    fn inspect(&self, assembly: &Path) -> AssemblyTraits {
        self.traits.get(assembly).cloned().unwrap_or_default()
    }
}

/// Path of the configuration file that sits next to `assembly`
/// (`<assembly file name>.config`).
pub fn sibling_config_path(assembly: &Path) -> Option<PathBuf> {
    let file_name = assembly.file_name()?;
    let mut config_name = file_name.to_os_string();
    config_name.push(".config");
    Some(assembly.with_file_name(config_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sibling_config_path() {
        assert_eq!(
            sibling_config_path(Path::new("/bin/tests/Foo.Tests.dll")),
            Some(PathBuf::from("/bin/tests/Foo.Tests.dll.config"))
        );
        assert_eq!(sibling_config_path(Path::new("/")), None);
    }

    #[test]
    fn test_map_inspector_defaults_unknown() {
        let inspector = MapAssemblyInspector::new().with(
            "/a/x86.dll",
            AssemblyTraits::new(ProcessorArchitecture::X86).with_runtime_version("4.0"),
        );
        assert_eq!(
            inspector.inspect(Path::new("/a/x86.dll")).processor_architecture,
            ProcessorArchitecture::X86
        );
        assert_eq!(
            inspector.inspect(Path::new("/a/other.dll")),
            AssemblyTraits::default()
        );
    }

    #[test]
    fn test_native_file_system_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.dll.config");
        std::fs::write(&path, "<configuration/>").unwrap();
        assert!(NativeFileSystem.file_exists(&path));
        assert!(!NativeFileSystem.file_exists(&dir.path().join("missing")));
        assert_eq!(NativeFileSystem.read_to_string(&path).unwrap(), "<configuration/>");
    }
}
