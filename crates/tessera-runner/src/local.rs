//! The local driver: runs a package in the current process through a harness.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tessera_model::{
    ExecutionListener, ExplorationListener, HostSetup, Logger, ProgressMonitor,
    TestExecutionOptions, TestExplorationOptions, TestPackageConfig,
};
use tracing::debug;

use crate::driver::{BaseDriver, DriverCore, DriverEnv};
use crate::error::{DriverError, HostError, Result};
use crate::harness::TestHarnessFactory;

/// The execution environment established for one harness session.
#[derive(Clone)]
pub struct HarnessContext {
    pub working_directory: PathBuf,
    pub application_base_directory: PathBuf,
    pub debug: bool,
    /// Host properties visible to the harness.
    pub properties: BTreeMap<String, String>,
    pub logger: Arc<dyn Logger>,
}

impl std::fmt::Debug for HarnessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessContext")
            .field("working_directory", &self.working_directory)
            .field("application_base_directory", &self.application_base_directory)
            .field("debug", &self.debug)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

/// Acquires and releases the environment a harness runs in.
#[async_trait]
pub trait EnvironmentFactory: Send + Sync {
    async fn acquire(&self, setup: &HostSetup, logger: Arc<dyn Logger>) -> Result<HarnessContext>;

    async fn release(&self, context: HarnessContext) -> Result<()>;
}

/// Resolves the environment from the host setup against the local filesystem.
///
/// A missing working directory falls back to the process's current directory;
/// a configured one that does not exist is a host creation failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalEnvironmentFactory;

#[async_trait]
impl EnvironmentFactory for LocalEnvironmentFactory {
    async fn acquire(&self, setup: &HostSetup, logger: Arc<dyn Logger>) -> Result<HarnessContext> {
        let working_directory = match &setup.working_directory {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().map_err(HostError::from)?,
        };
        let is_dir = tokio::fs::metadata(&working_directory)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(HostError::Creation(format!(
                "working directory {} does not exist",
                working_directory.display()
            ))
            .into());
        }

        let application_base_directory = setup
            .application_base_directory
            .clone()
            .unwrap_or_else(|| working_directory.clone());

        debug!(
            working_directory = %working_directory.display(),
            debug = setup.debug,
            "acquired local environment"
        );
        Ok(HarnessContext {
            working_directory,
            application_base_directory,
            debug: setup.debug,
            properties: setup.properties.clone(),
            logger,
        })
    }

    async fn release(&self, context: HarnessContext) -> Result<()> {
        debug!(working_directory = %context.working_directory.display(), "released local environment");
        Ok(())
    }
}

/// Driver hooks that execute a package directly through a harness.
pub struct LocalDriverCore {
    harness_factory: Arc<dyn TestHarnessFactory>,
    environment: Arc<dyn EnvironmentFactory>,
    host_setup: Option<HostSetup>,
}

/// A local driver behind the validating lifecycle wrapper.
pub type LocalTestDriver = BaseDriver<LocalDriverCore>;

impl BaseDriver<LocalDriverCore> {
    pub fn local(
        harness_factory: Arc<dyn TestHarnessFactory>,
        environment: Arc<dyn EnvironmentFactory>,
    ) -> Self {
        BaseDriver::new(LocalDriverCore {
            harness_factory,
            environment,
            host_setup: None,
        })
    }

    /// A local driver serving inside a host; the host's properties are laid
    /// over each package's own.
    pub fn local_in_host(
        harness_factory: Arc<dyn TestHarnessFactory>,
        environment: Arc<dyn EnvironmentFactory>,
        host_setup: HostSetup,
    ) -> Self {
        BaseDriver::new(LocalDriverCore {
            harness_factory,
            environment,
            host_setup: Some(host_setup),
        })
    }
}

impl LocalDriverCore {
    fn effective_setup(&self, package: &TestPackageConfig) -> HostSetup {
        let mut setup = package.host_setup.clone();
        if let Some(host) = &self.host_setup {
            setup.add_properties(&host.properties);
        }
        setup
    }

    /// Load → explore → [run] → unload, inside an acquired environment.
    ///
    /// Unload and release always happen. The first failure is returned; later
    /// ones are logged.
    async fn drive(
        &self,
        env: &DriverEnv,
        package: &TestPackageConfig,
        exploration: &TestExplorationOptions,
        exploration_listener: &dyn ExplorationListener,
        execution: Option<(&TestExecutionOptions, &dyn ExecutionListener)>,
        progress: &ProgressMonitor,
    ) -> Result<()> {
        let steps = if execution.is_some() { 4.0 } else { 3.0 };
        let task = if execution.is_some() {
            "Running tests."
        } else {
            "Exploring tests."
        };
        progress.begin_task(task, steps);

        let context = self
            .environment
            .acquire(&self.effective_setup(package), env.logger.clone())
            .await?;
        let mut harness = self.harness_factory.create_harness();

        let session = async {
            harness
                .load(package, &context, &progress.sub_monitor(1.0))
                .await?;
            harness
                .explore(exploration, exploration_listener, &progress.sub_monitor(1.0))
                .await?;
            if let Some((options, listener)) = execution {
                harness
                    .run(options, listener, &progress.sub_monitor(1.0))
                    .await?;
            }
            anyhow::Ok(())
        }
        .await
        .map_err(DriverError::Harness);

        let unload = harness
            .unload(&progress.sub_monitor(1.0))
            .await
            .map_err(DriverError::Harness);
        let release = self.environment.release(context).await;
        progress.done();

        let mut first: Option<DriverError> = None;
        for outcome in [session, unload, release] {
            if let Err(err) = outcome {
                if first.is_none() {
                    first = Some(err);
                } else {
                    env.logger.warning(
                        "additional failure while cleaning up the harness",
                        Some(&err.to_string()),
                    );
                }
            }
        }
        first.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl DriverCore for LocalDriverCore {
    async fn explore_core(
        &mut self,
        env: &DriverEnv,
        package: &TestPackageConfig,
        exploration: &TestExplorationOptions,
        exploration_listener: &dyn ExplorationListener,
        progress: &ProgressMonitor,
    ) -> Result<()> {
        self.drive(env, package, exploration, exploration_listener, None, progress)
            .await
    }

    async fn run_core(
        &mut self,
        env: &DriverEnv,
        package: &TestPackageConfig,
        exploration: &TestExplorationOptions,
        exploration_listener: &dyn ExplorationListener,
        execution: &TestExecutionOptions,
        execution_listener: &dyn ExecutionListener,
        progress: &ProgressMonitor,
    ) -> Result<()> {
        self.drive(
            env,
            package,
            exploration,
            exploration_listener,
            Some((execution, execution_listener)),
            progress,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::TestDriver;
    use crate::harness::TestHarness;
    use std::sync::Mutex;
    use tessera_model::{MemoryLogger, NullListener, TestRunnerOptions};

    #[derive(Clone, Default)]
    struct Journal(Arc<Mutex<Vec<String>>>);

    impl Journal {
        fn push(&self, entry: &str) {
            self.0.lock().unwrap().push(entry.to_string());
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct JournalingHarness {
        journal: Journal,
        fail_explore: bool,
    }

    #[async_trait]
    impl TestHarness for JournalingHarness {
        async fn load(
            &mut self,
            _package: &TestPackageConfig,
            _context: &HarnessContext,
            _progress: &ProgressMonitor,
        ) -> anyhow::Result<()> {
            self.journal.push("load");
            Ok(())
        }

        async fn explore(
            &mut self,
            _options: &TestExplorationOptions,
            _listener: &dyn ExplorationListener,
            _progress: &ProgressMonitor,
        ) -> anyhow::Result<()> {
            self.journal.push("explore");
            if self.fail_explore {
                anyhow::bail!("explore blew up");
            }
            Ok(())
        }

        async fn run(
            &mut self,
            _options: &TestExecutionOptions,
            _listener: &dyn ExecutionListener,
            _progress: &ProgressMonitor,
        ) -> anyhow::Result<()> {
            self.journal.push("run");
            Ok(())
        }

        async fn unload(&mut self, _progress: &ProgressMonitor) -> anyhow::Result<()> {
            self.journal.push("unload");
            Ok(())
        }
    }

    struct JournalingEnvironment(Journal);

    #[async_trait]
    impl EnvironmentFactory for JournalingEnvironment {
        async fn acquire(&self, setup: &HostSetup, logger: Arc<dyn Logger>) -> Result<HarnessContext> {
            self.0.push("acquire");
            for (key, value) in &setup.properties {
                self.0.push(&format!("{key}={value}"));
            }
            Ok(HarnessContext {
                working_directory: setup.working_directory.clone().unwrap_or_default(),
                application_base_directory: PathBuf::new(),
                debug: false,
                properties: setup.properties.clone(),
                logger,
            })
        }

        async fn release(&self, _context: HarnessContext) -> Result<()> {
            self.0.push("release");
            Ok(())
        }
    }

    async fn driver(journal: &Journal, fail_explore: bool) -> LocalTestDriver {
        let harness_journal = journal.clone();
        let factory = move || -> Box<dyn TestHarness> {
            Box::new(JournalingHarness {
                journal: harness_journal.clone(),
                fail_explore,
            })
        };
        let mut driver = LocalTestDriver::local(
            Arc::new(factory),
            Arc::new(JournalingEnvironment(journal.clone())),
        );
        driver
            .initialize(&TestRunnerOptions::default(), Arc::new(MemoryLogger::new()))
            .await
            .unwrap();
        driver
    }

    #[tokio::test]
    async fn test_run_drives_full_harness_sequence() {
        let journal = Journal::default();
        let mut driver = driver(&journal, false).await;
        driver
            .run(
                &TestPackageConfig::new().with_assembly("/a/x.dll"),
                &TestExplorationOptions::default(),
                &NullListener,
                &TestExecutionOptions::default(),
                &NullListener,
                &ProgressMonitor::new(),
            )
            .await
            .unwrap();
        assert_eq!(
            journal.entries(),
            vec!["acquire", "load", "explore", "run", "unload", "release"]
        );
    }

    #[tokio::test]
    async fn test_unload_and_release_run_after_failure() {
        let journal = Journal::default();
        let mut driver = driver(&journal, true).await;
        let err = driver
            .explore(
                &TestPackageConfig::new().with_assembly("/a/x.dll"),
                &TestExplorationOptions::default(),
                &NullListener,
                &ProgressMonitor::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Harness(_)));
        assert_eq!(
            journal.entries(),
            vec!["acquire", "load", "explore", "unload", "release"]
        );
    }

    #[tokio::test]
    async fn test_host_properties_override_package_properties() {
        let journal = Journal::default();
        let harness_journal = journal.clone();
        let factory = move || -> Box<dyn TestHarness> {
            Box::new(JournalingHarness {
                journal: harness_journal.clone(),
                fail_explore: false,
            })
        };
        let mut host_setup = HostSetup::new();
        host_setup.properties.insert("Mode".into(), "host".into());
        let mut driver = LocalTestDriver::local_in_host(
            Arc::new(factory),
            Arc::new(JournalingEnvironment(journal.clone())),
            host_setup,
        );
        driver
            .initialize(&TestRunnerOptions::default(), Arc::new(MemoryLogger::new()))
            .await
            .unwrap();

        let mut package = TestPackageConfig::new().with_assembly("/a/x.dll");
        package.host_setup.properties.insert("Mode".into(), "package".into());
        package.host_setup.properties.insert("Seed".into(), "7".into());
        driver
            .explore(
                &package,
                &TestExplorationOptions::default(),
                &NullListener,
                &ProgressMonitor::new(),
            )
            .await
            .unwrap();

        let entries = journal.entries();
        assert_eq!(&entries[..3], ["acquire", "Mode=host", "Seed=7"]);
    }

    #[tokio::test]
    async fn test_local_environment_rejects_missing_directory() {
        let mut setup = HostSetup::new();
        setup.working_directory = Some(PathBuf::from("/definitely/not/a/real/dir"));
        let err = LocalEnvironmentFactory
            .acquire(&setup, Arc::new(MemoryLogger::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Host(HostError::Creation(_))));
    }

    #[tokio::test]
    async fn test_local_environment_defaults_app_base_to_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut setup = HostSetup::new();
        setup.working_directory = Some(dir.path().to_path_buf());
        setup.debug = true;
        let context = LocalEnvironmentFactory
            .acquire(&setup, Arc::new(MemoryLogger::new()))
            .await
            .unwrap();
        assert_eq!(context.application_base_directory, dir.path());
        assert!(context.debug);
    }
}
