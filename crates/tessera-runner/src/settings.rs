//! Runner settings: isolation mode, host program, and log format.
//!
//! Settings come from a JSON file or from `TESSERA_*` environment variables.
//! They only select how hosts are built; the package being tested still
//! carries its own host setup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tessera_model::IsolationMode;
use tracing::Level;

use crate::error::{DriverError, Result};
use crate::harness::TestHarnessFactory;
use crate::host::{HostFactory, ProcessHostFactory, TaskHostFactory};
use crate::hosted::{HostedPartitioner, HostedTestDriver};
use crate::local::EnvironmentFactory;
use crate::telemetry;

pub const ISOLATION_ENV: &str = "TESSERA_ISOLATION";
pub const HOST_PROGRAM_ENV: &str = "TESSERA_HOST_PROGRAM";
pub const HOST_ARGS_ENV: &str = "TESSERA_HOST_ARGS";
pub const LOG_FORMAT_ENV: &str = "TESSERA_LOG_FORMAT";
pub const LOG_LEVEL_ENV: &str = "TESSERA_LOG_LEVEL";

/// Settings for building a hosted driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunnerSettings {
    /// How assemblies are spread across hosts.
    pub isolation: IsolationMode,

    /// Program launched per host. Hosts run as in-process tasks when unset.
    pub host_program: Option<PathBuf>,

    /// Extra arguments for `host_program`.
    pub host_args: Vec<String>,

    /// Emit newline-delimited JSON logs.
    pub json_logs: bool,

    /// Default log level when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            isolation: IsolationMode::None,
            host_program: None,
            host_args: Vec::new(),
            json_logs: false,
            log_level: "info".to_string(),
        }
    }
}

impl RunnerSettings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();
        if let Some(isolation) = lookup(ISOLATION_ENV) {
            settings.isolation = isolation.trim().parse().map_err(|err| {
                DriverError::Configuration(format!("{ISOLATION_ENV}: {err}"))
            })?;
        }
        if let Some(program) = lookup(HOST_PROGRAM_ENV).filter(|p| !p.trim().is_empty()) {
            settings.host_program = Some(PathBuf::from(program.trim()));
        }
        if let Some(args) = lookup(HOST_ARGS_ENV) {
            settings.host_args = args.split_whitespace().map(str::to_string).collect();
        }
        if let Some(format) = lookup(LOG_FORMAT_ENV) {
            settings.json_logs = match format.trim().to_ascii_lowercase().as_str() {
                "json" => true,
                "text" | "pretty" | "" => false,
                other => {
                    return Err(DriverError::Configuration(format!(
                        "{LOG_FORMAT_ENV}: unknown log format '{other}'"
                    )))
                }
            };
        }
        if let Some(level) = lookup(LOG_LEVEL_ENV) {
            settings.log_level = level.trim().to_string();
        }
        settings.level()?;
        Ok(settings)
    }

    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            DriverError::Configuration(format!("cannot read {}: {err}", path.display()))
        })?;
        let settings: Self = serde_json::from_str(&text).map_err(|err| {
            DriverError::Configuration(format!("invalid settings in {}: {err}", path.display()))
        })?;
        settings.level()?;
        Ok(settings)
    }

    pub fn level(&self) -> Result<Level> {
        self.log_level.parse().map_err(|_| {
            DriverError::Configuration(format!("unknown log level '{}'", self.log_level))
        })
    }

    /// Install the global tracing subscriber described by these settings.
    pub fn init_tracing(&self) -> Result<()> {
        telemetry::init_tracing(self.json_logs, self.level()?);
        Ok(())
    }

    /// Child-process hosts when a host program is configured, task hosts otherwise.
    pub fn host_factory(
        &self,
        harness_factory: Arc<dyn TestHarnessFactory>,
        environment: Arc<dyn EnvironmentFactory>,
    ) -> Arc<dyn HostFactory> {
        match &self.host_program {
            Some(program) => {
                Arc::new(ProcessHostFactory::new(program).with_args(self.host_args.iter().cloned()))
            }
            None => Arc::new(TaskHostFactory::new(harness_factory, environment)),
        }
    }

    pub fn hosted_driver(
        &self,
        harness_factory: Arc<dyn TestHarnessFactory>,
        environment: Arc<dyn EnvironmentFactory>,
    ) -> HostedTestDriver {
        let host_factory = self.host_factory(harness_factory, environment);
        HostedTestDriver::hosted(HostedPartitioner::new(host_factory, self.isolation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let settings = RunnerSettings::from_lookup(|_| None).unwrap();
        assert_eq!(settings, RunnerSettings::default());
        assert_eq!(settings.level().unwrap(), Level::INFO);
    }

    #[test]
    fn test_reads_environment_keys() {
        let settings = RunnerSettings::from_lookup(lookup(&[
            (ISOLATION_ENV, "host-per-assembly"),
            (HOST_PROGRAM_ENV, "/usr/bin/tessera-host"),
            (HOST_ARGS_ENV, "--serve  --quiet"),
            (LOG_FORMAT_ENV, "JSON"),
            (LOG_LEVEL_ENV, "debug"),
        ]))
        .unwrap();
        assert_eq!(settings.isolation, IsolationMode::HostPerAssembly);
        assert_eq!(settings.host_program, Some(PathBuf::from("/usr/bin/tessera-host")));
        assert_eq!(settings.host_args, vec!["--serve", "--quiet"]);
        assert!(settings.json_logs);
        assert_eq!(settings.level().unwrap(), Level::DEBUG);
    }

    #[test]
    fn test_bad_isolation_is_configuration_error() {
        let err = RunnerSettings::from_lookup(lookup(&[(ISOLATION_ENV, "everything")])).unwrap_err();
        assert!(matches!(err, DriverError::Configuration(_)));
        assert!(err.to_string().contains(ISOLATION_ENV));
    }

    #[test]
    fn test_bad_log_level_is_rejected() {
        let err = RunnerSettings::from_lookup(lookup(&[(LOG_LEVEL_ENV, "loud")])).unwrap_err();
        assert!(matches!(err, DriverError::Configuration(_)));
    }

    #[test]
    fn test_json_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"isolation": "context_per_assembly"}}"#).unwrap();

        let settings = RunnerSettings::from_json_file(file.path()).unwrap();
        assert_eq!(settings.isolation, IsolationMode::ContextPerAssembly);
        assert!(settings.host_program.is_none());
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RunnerSettings::from_json_file(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, DriverError::Configuration(_)));
    }
}
