//! Tessera Domain Model
//!
//! Defines the objects shared by every driver in the orchestration hierarchy:
//! - TestPackageConfig: what to test (assemblies, hint directories, host setup)
//! - HostSetup: how an isolated execution context is constructed
//! - TestDomain / IsolationMode: how assemblies are grouped into hosts
//! - TestOutcome / TestResult: outcome data with a "worst wins" combine
//! - ExplorationEvent / ExecutionEvent: the listener protocol
//! - ProgressMonitor: hierarchical work reporting and cooperative cancellation
//! - Logger: the logging capability handed to drivers
//!
//! All configuration and event types are serializable so they can cross a
//! host boundary unchanged.

pub mod domain;
pub mod error;
pub mod events;
pub mod host_setup;
pub mod logger;
pub mod outcome;
pub mod package;
pub mod progress;
pub mod step;

pub use domain::{IsolationMode, TestDomain};
pub use error::{ModelError, Result};
pub use events::{
    ExecutionEvent, ExecutionListener, ExplorationEvent, ExplorationListener, NullListener,
    RecordingListener,
};
pub use host_setup::{HostConfiguration, HostSetup, ProcessorArchitecture};
pub use logger::{LogEntry, LogSeverity, Logger, MemoryLogger, TracingLogger};
pub use outcome::{TestOutcome, TestResult, TestStatus};
pub use package::{TestExecutionOptions, TestExplorationOptions, TestPackageConfig, TestRunnerOptions};
pub use progress::{ProgressMonitor, ProgressReporter, ProgressUpdate};
pub use step::{Annotation, AnnotationType, Attachment, Marker, TestData, TestStepData};

/// Tessera model version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
