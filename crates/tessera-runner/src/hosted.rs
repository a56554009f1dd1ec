//! The hosted driver: groups assemblies into test domains and runs each
//! domain in an isolated host.
//!
//! Partitioning derives a host setup per assembly, groups assemblies whose
//! setups are equal (unless every assembly gets its own host), and reconciles
//! runtime versions and processor architectures across the whole package
//! before any host exists. Hosts are only created when a partition's driver is
//! created, so a compatibility failure never starts a host.
//!
//! | Isolation mode          | Hosts                 | Driver placement                    |
//! |-------------------------|-----------------------|-------------------------------------|
//! | `None`                  | one shared            | directly in the shared host         |
//! | `ContextPerAssembly`    | one shared            | in a nested context per domain      |
//! | `HostPerAssembly`       | one per assembly      | directly in the dedicated host      |

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tessera_model::{
    HostSetup, IsolationMode, Logger, ProcessorArchitecture, ProgressMonitor, TestDomain,
    TestPackageConfig,
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::aggregate::{AggregateDriverCore, Partition, PartitionStrategy, TestDriverFactory};
use crate::driver::{BaseDriver, DriverEnv, TestDriver};
use crate::error::{DriverError, HostError, Result};
use crate::host::{Host, HostFactory};
use crate::inspect::{
    sibling_config_path, AssemblyInspector, DefaultAssemblyInspector, FileSystem, NativeFileSystem,
};
use crate::proxy::ProxyTestDriver;

/// Adjusts every host setup right before a host or context is created.
pub type HostConfigurer = Arc<dyn Fn(&mut HostSetup) + Send + Sync>;

/// Partition strategy of the hosted driver.
pub struct HostedPartitioner {
    host_factory: Arc<dyn HostFactory>,
    isolation: IsolationMode,
    file_system: Arc<dyn FileSystem>,
    inspector: Arc<dyn AssemblyInspector>,
    host_configurer: Option<HostConfigurer>,
}

pub type HostedTestDriver = BaseDriver<AggregateDriverCore<HostedPartitioner>>;

impl BaseDriver<AggregateDriverCore<HostedPartitioner>> {
    pub fn hosted(partitioner: HostedPartitioner) -> Self {
        Self::aggregate(partitioner)
    }
}

impl HostedPartitioner {
    pub fn new(host_factory: Arc<dyn HostFactory>, isolation: IsolationMode) -> Self {
        Self {
            host_factory,
            isolation,
            file_system: Arc::new(NativeFileSystem),
            inspector: Arc::new(DefaultAssemblyInspector),
            host_configurer: None,
        }
    }

    pub fn with_file_system(mut self, file_system: Arc<dyn FileSystem>) -> Self {
        self.file_system = file_system;
        self
    }

    pub fn with_inspector(mut self, inspector: Arc<dyn AssemblyInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    pub fn with_host_configurer(mut self, configurer: HostConfigurer) -> Self {
        self.host_configurer = Some(configurer);
        self
    }

    pub fn isolation(&self) -> IsolationMode {
        self.isolation
    }

    /// One domain per assembly, merged by equal host setup unless every
    /// assembly gets its own host. Domains keep first-seen order.
    pub fn split_into_domains(&self, package: &TestPackageConfig, logger: &dyn Logger) -> Vec<TestDomain> {
        let mut domains: Vec<TestDomain> = Vec::new();
        let mut by_setup: HashMap<HostSetup, usize> = HashMap::new();

        for assembly in &package.assembly_files {
            let domain = self.derive_domain(package, assembly, logger);
            if self.isolation == IsolationMode::HostPerAssembly {
                domains.push(domain);
                continue;
            }
            let existing = by_setup.get(domain.host_setup()).copied();
            match existing {
                Some(index) => domains[index].merge_from(&domain),
                None => {
                    by_setup.insert(domain.host_setup().clone(), domains.len());
                    domains.push(domain);
                }
            }
        }
        domains
    }

    fn derive_domain(&self, package: &TestPackageConfig, assembly: &Path, logger: &dyn Logger) -> TestDomain {
        let mut slice = package.clone();
        slice.assembly_files = vec![assembly.to_path_buf()];
        let mut domain = TestDomain::new(slice);
        let setup = domain.host_setup_mut();

        let assembly_dir = assembly
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf);
        if setup.application_base_directory.is_none() {
            setup.application_base_directory = assembly_dir.clone();
        }
        if setup.working_directory.is_none() {
            setup.working_directory = assembly_dir;
        }

        let traits = self.inspector.inspect(assembly);
        setup.processor_architecture = traits.processor_architecture;
        if !traits.supported_runtime_versions.is_empty() {
            setup.configuration.supported_runtime_versions = traits.supported_runtime_versions;
        }

        if let Some(config_path) = sibling_config_path(assembly) {
            if self.file_system.file_exists(&config_path) {
                match self.file_system.read_to_string(&config_path) {
                    Ok(text) => setup.configuration.configuration_text = Some(text),
                    Err(err) => logger.warning(
                        &format!("Could not read configuration file {}.", config_path.display()),
                        Some(&err.to_string()),
                    ),
                }
            }
        }
        domain
    }

    /// Finish a setup for host creation: runner properties, then the configurer.
    fn prepare_setup(&self, mut setup: HostSetup, env: &DriverEnv) -> HostSetup {
        setup.add_properties(&env.options.properties);
        if let Some(configurer) = &self.host_configurer {
            configurer(&mut setup);
        }
        setup
    }

    /// The setup of the host shared by all domains.
    fn shared_host_setup(
        &self,
        package: &TestPackageConfig,
        architecture: ProcessorArchitecture,
        runtime_versions: BTreeSet<String>,
        env: &DriverEnv,
    ) -> HostSetup {
        let base = &package.host_setup;
        let mut setup = HostSetup {
            working_directory: base.working_directory.clone(),
            shadow_copy: base.shadow_copy,
            debug: base.debug,
            processor_architecture: architecture,
            properties: base.properties.clone(),
            ..HostSetup::default()
        };
        setup.configuration.supported_runtime_versions = runtime_versions;
        self.prepare_setup(setup, env)
    }
}

/// Intersect the runtime versions every domain supports. Domains that declare
/// none are unconstrained. An empty result is returned when nothing was
/// declared at all.
pub fn reconcile_runtime_versions(domains: &[TestDomain]) -> Result<BTreeSet<String>> {
    let mut common: Option<BTreeSet<String>> = None;
    for domain in domains {
        let versions = &domain.host_setup().configuration.supported_runtime_versions;
        if versions.is_empty() {
            continue;
        }
        common = Some(match common {
            None => versions.clone(),
            Some(current) => {
                let shared: BTreeSet<String> = current.intersection(versions).cloned().collect();
                if shared.is_empty() {
                    return Err(DriverError::IncompatibleRuntimeVersions(format!(
                        "some require {} while others require {}",
                        format_versions(&current),
                        format_versions(versions)
                    )));
                }
                shared
            }
        });
    }
    Ok(common.unwrap_or_default())
}

fn format_versions(versions: &BTreeSet<String>) -> String {
    let list: Vec<&str> = versions.iter().map(String::as_str).collect();
    format!("{{{}}}", list.join(", "))
}

/// The architecture every domain can run on: starts at `Any` and narrows to
/// the first specific architecture. A second, different specific
/// architecture is an error.
pub fn reconcile_architecture(domains: &[TestDomain]) -> Result<ProcessorArchitecture> {
    let mut common = ProcessorArchitecture::Any;
    for domain in domains {
        let arch = domain.host_setup().processor_architecture;
        if !arch.is_specific() {
            continue;
        }
        if common.is_specific() && common != arch {
            return Err(DriverError::IncompatibleArchitectures {
                first: common,
                second: arch,
            });
        }
        common = arch;
    }
    Ok(common)
}

impl PartitionStrategy for HostedPartitioner {
    fn compute_partitions(&self, package: &TestPackageConfig, env: &DriverEnv) -> Result<Vec<Partition>> {
        let domains = self.split_into_domains(package, env.logger.as_ref());
        if domains.is_empty() {
            return Ok(Vec::new());
        }

        let runtime_versions = reconcile_runtime_versions(&domains)?;
        let architecture = match package.host_setup.processor_architecture {
            ProcessorArchitecture::None => reconcile_architecture(&domains)?,
            explicit => explicit,
        };
        debug!(
            isolation = %self.isolation,
            domains = domains.len(),
            architecture = %architecture,
            "resolved test domains"
        );

        let partitions = match self.isolation {
            IsolationMode::HostPerAssembly => domains
                .into_iter()
                .map(|domain| {
                    let setup = self.prepare_setup(domain.host_setup().clone(), env);
                    let factory = HostedDriverFactory::Dedicated {
                        host_factory: self.host_factory.clone(),
                        setup,
                    };
                    Partition::new(Arc::new(factory), domain.into_package())
                })
                .collect(),
            mode => {
                let slot = Arc::new(SharedHost::new(
                    self.host_factory.clone(),
                    self.shared_host_setup(package, architecture, runtime_versions, env),
                ));
                domains
                    .into_iter()
                    .map(|domain| {
                        let factory = if mode == IsolationMode::ContextPerAssembly {
                            HostedDriverFactory::Context {
                                shared: slot.clone(),
                                setup: self.prepare_setup(domain.host_setup().clone(), env),
                            }
                        } else {
                            HostedDriverFactory::Shared {
                                shared: slot.clone(),
                            }
                        };
                        Partition::new(Arc::new(factory), domain.into_package())
                    })
                    .collect()
            }
        };
        Ok(partitions)
    }
}

// ---------------------------------------------------------------------------
// Host lifecycle
// ---------------------------------------------------------------------------

/// A host created on first use and shared by every partition of a run.
struct SharedHost {
    host_factory: Arc<dyn HostFactory>,
    setup: HostSetup,
    host: Mutex<Option<Arc<dyn Host>>>,
}

impl SharedHost {
    fn new(host_factory: Arc<dyn HostFactory>, setup: HostSetup) -> Self {
        Self {
            host_factory,
            setup,
            host: Mutex::new(None),
        }
    }

    async fn acquire(&self, progress: &ProgressMonitor) -> std::result::Result<Arc<dyn Host>, HostError> {
        let mut slot = self.host.lock().await;
        if let Some(host) = slot.as_ref() {
            return Ok(host.clone());
        }
        progress.set_status("Initializing the test host.");
        let host = self.host_factory.create_host(&self.setup).await?;
        *slot = Some(host.clone());
        Ok(host)
    }

    async fn release(&self, progress: &ProgressMonitor) -> std::result::Result<(), HostError> {
        let host = self.host.lock().await.take();
        match host {
            Some(host) => {
                progress.set_status("Disposing the test host.");
                host.shutdown().await
            }
            None => Ok(()),
        }
    }
}

/// Builds proxy drivers placed according to the isolation mode.
enum HostedDriverFactory {
    /// Driver directly in the shared host.
    Shared { shared: Arc<SharedHost> },
    /// Driver in a nested context of the shared host; the context is torn
    /// down when the driver is disposed.
    Context {
        shared: Arc<SharedHost>,
        setup: HostSetup,
    },
    /// Driver in a host of its own, torn down when the driver is disposed.
    Dedicated {
        host_factory: Arc<dyn HostFactory>,
        setup: HostSetup,
    },
}

/// A proxy to a new driver in `host`, shutting `host` down on dispose.
async fn proxy_owning(host: Arc<dyn Host>) -> Result<Box<dyn TestDriver>> {
    let client = match host.create_driver().await {
        Ok(client) => client,
        Err(err) => {
            if let Err(shutdown) = host.shutdown().await {
                debug!(host_id = %host.id(), error = %shutdown, "shutdown after failed driver creation failed");
            }
            return Err(err.into());
        }
    };
    let driver = ProxyTestDriver::proxy(client).on_disposed(move || async move { host.shutdown().await });
    Ok(Box::new(driver))
}

#[async_trait]
impl TestDriverFactory for HostedDriverFactory {
    async fn create_driver(&self, progress: &ProgressMonitor) -> Result<Box<dyn TestDriver>> {
        match self {
            HostedDriverFactory::Shared { shared } => {
                let host = shared.acquire(progress).await?;
                let client = host.create_driver().await?;
                Ok(Box::new(ProxyTestDriver::proxy(client)))
            }
            HostedDriverFactory::Context { shared, setup } => {
                let host = shared.acquire(progress).await?;
                let context = host.create_isolated_context(setup).await?;
                proxy_owning(context).await
            }
            HostedDriverFactory::Dedicated {
                host_factory,
                setup,
            } => {
                progress.set_status("Initializing the test host.");
                let host = host_factory.create_host(setup).await?;
                proxy_owning(host).await
            }
        }
    }

    async fn release(&self, progress: &ProgressMonitor) -> Result<()> {
        match self {
            HostedDriverFactory::Shared { shared } | HostedDriverFactory::Context { shared, .. } => {
                Ok(shared.release(progress).await?)
            }
            HostedDriverFactory::Dedicated { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_model::MemoryLogger;

    fn domain(arch: ProcessorArchitecture, versions: &[&str]) -> TestDomain {
        let mut package = TestPackageConfig::new().with_assembly("/a/x.dll");
        package.host_setup.processor_architecture = arch;
        package.host_setup.configuration.supported_runtime_versions =
            versions.iter().map(|v| v.to_string()).collect();
        TestDomain::new(package)
    }

    #[test]
    fn test_architecture_narrows_from_any() {
        let domains = vec![
            domain(ProcessorArchitecture::Any, &[]),
            domain(ProcessorArchitecture::None, &[]),
            domain(ProcessorArchitecture::X86, &[]),
            domain(ProcessorArchitecture::X86, &[]),
        ];
        assert_eq!(reconcile_architecture(&domains).unwrap(), ProcessorArchitecture::X86);
        assert_eq!(reconcile_architecture(&[]).unwrap(), ProcessorArchitecture::Any);
    }

    #[test]
    fn test_architecture_conflict_names_both() {
        let domains = vec![
            domain(ProcessorArchitecture::X86, &[]),
            domain(ProcessorArchitecture::X64, &[]),
        ];
        match reconcile_architecture(&domains).unwrap_err() {
            DriverError::IncompatibleArchitectures { first, second } => {
                assert_eq!(first, ProcessorArchitecture::X86);
                assert_eq!(second, ProcessorArchitecture::X64);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_runtime_versions_intersect() {
        let domains = vec![
            domain(ProcessorArchitecture::None, &["2.0", "4.0"]),
            domain(ProcessorArchitecture::None, &[]),
            domain(ProcessorArchitecture::None, &["4.0", "4.5"]),
        ];
        let common = reconcile_runtime_versions(&domains).unwrap();
        assert_eq!(common.into_iter().collect::<Vec<_>>(), vec!["4.0".to_string()]);
    }

    #[test]
    fn test_runtime_versions_disjoint_fail() {
        let domains = vec![
            domain(ProcessorArchitecture::None, &["2.0"]),
            domain(ProcessorArchitecture::None, &["4.0"]),
        ];
        let err = reconcile_runtime_versions(&domains).unwrap_err();
        assert!(err.is_compatibility());
        assert!(err.to_string().contains("{2.0}"));
    }

    #[test]
    fn test_relative_assembly_keeps_directories_unset() {
        struct NoHosts;

        #[async_trait]
        impl HostFactory for NoHosts {
            async fn create_host(&self, _setup: &HostSetup) -> std::result::Result<Arc<dyn Host>, HostError> {
                Err(HostError::Creation("not in this test".into()))
            }
        }

        let partitioner = HostedPartitioner::new(Arc::new(NoHosts), IsolationMode::None);
        let package = TestPackageConfig::new().with_assembly("bare.dll");
        let domains = partitioner.split_into_domains(&package, &MemoryLogger::new());
        assert_eq!(domains.len(), 1);
        assert!(domains[0].host_setup().working_directory.is_none());
    }
}
