//! Integration tests for proxies talking to drivers across a host boundary,
//! both over in-process channels and over the JSON-lines wire.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tessera_model::{
    ExecutionEvent, ExecutionListener, ExplorationListener, HostSetup, LogSeverity, MemoryLogger,
    NullListener, ProgressMonitor, RecordingListener, TestExecutionOptions,
    TestExplorationOptions, TestOutcome, TestPackageConfig, TestResult, TestRunnerOptions,
    TestStepData,
};
use tessera_runner::host::ConnectionHost;
use tessera_runner::{
    channel_pair, serve_connection, serve_driver, Connection, HarnessContext, Host, HostError,
    LocalEnvironmentFactory, LocalTestDriver, ProxyTestDriver, TestDriver, TestHarness,
    TestHarnessFactory,
};

/// Writes `lines` log lines under a single root step.
struct StreamingHarness {
    lines: usize,
    wait_for_cancel: Option<Arc<AtomicBool>>,
    root_id: String,
}

#[async_trait]
impl TestHarness for StreamingHarness {
    async fn load(
        &mut self,
        package: &TestPackageConfig,
        context: &HarnessContext,
        _progress: &ProgressMonitor,
    ) -> anyhow::Result<()> {
        self.root_id = format!("root:{}", package.assembly_files[0].display());
        context.logger.info("harness loaded");
        Ok(())
    }

    async fn explore(
        &mut self,
        _options: &TestExplorationOptions,
        _listener: &dyn ExplorationListener,
        _progress: &ProgressMonitor,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn run(
        &mut self,
        _options: &TestExecutionOptions,
        listener: &dyn ExecutionListener,
        progress: &ProgressMonitor,
    ) -> anyhow::Result<()> {
        listener.on_execution_event(ExecutionEvent::StepStarted {
            step: TestStepData::new(&self.root_id, "Root", "root"),
        });
        for i in 0..self.lines {
            listener.on_execution_event(ExecutionEvent::LogStreamWrite {
                step_id: self.root_id.clone(),
                stream_name: "stdout".into(),
                text: format!("line-{i}"),
            });
        }
        if let Some(canceled) = &self.wait_for_cancel {
            let seen = tokio::time::timeout(Duration::from_secs(5), progress.cancelled())
                .await
                .is_ok();
            canceled.store(seen, Ordering::SeqCst);
        }
        listener.on_execution_event(ExecutionEvent::StepFinished {
            step_id: self.root_id.clone(),
            result: TestResult::new(TestOutcome::passed(), 1, 0),
        });
        Ok(())
    }

    async fn unload(&mut self, _progress: &ProgressMonitor) -> anyhow::Result<()> {
        Ok(())
    }
}

struct Streaming {
    lines: usize,
    wait_for_cancel: Option<Arc<AtomicBool>>,
}

impl TestHarnessFactory for Streaming {
    fn create_harness(&self) -> Box<dyn TestHarness> {
        Box::new(StreamingHarness {
            lines: self.lines,
            wait_for_cancel: self.wait_for_cancel.clone(),
            root_id: String::new(),
        })
    }
}

fn streaming(lines: usize) -> Arc<dyn TestHarnessFactory> {
    Arc::new(Streaming {
        lines,
        wait_for_cancel: None,
    })
}

/// Records the host properties every harness session is loaded with.
#[derive(Clone, Default)]
struct SeenProperties(Arc<Mutex<Vec<BTreeMap<String, String>>>>);

impl SeenProperties {
    fn record(&self, properties: &BTreeMap<String, String>) {
        self.0.lock().unwrap().push(properties.clone());
    }

    fn all(&self) -> Vec<BTreeMap<String, String>> {
        self.0.lock().unwrap().clone()
    }
}

struct PropertyHarness(SeenProperties);

#[async_trait]
impl TestHarness for PropertyHarness {
    async fn load(
        &mut self,
        _package: &TestPackageConfig,
        context: &HarnessContext,
        _progress: &ProgressMonitor,
    ) -> anyhow::Result<()> {
        self.0.record(&context.properties);
        Ok(())
    }

    async fn explore(
        &mut self,
        _options: &TestExplorationOptions,
        _listener: &dyn ExplorationListener,
        _progress: &ProgressMonitor,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn run(
        &mut self,
        _options: &TestExecutionOptions,
        _listener: &dyn ExecutionListener,
        _progress: &ProgressMonitor,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn unload(&mut self, _progress: &ProgressMonitor) -> anyhow::Result<()> {
        Ok(())
    }
}

impl TestHarnessFactory for SeenProperties {
    fn create_harness(&self) -> Box<dyn TestHarness> {
        Box::new(PropertyHarness(self.clone()))
    }
}

fn setup_with(properties: &[(&str, &str)]) -> HostSetup {
    let mut setup = HostSetup::new();
    for (key, value) in properties {
        setup.properties.insert(key.to_string(), value.to_string());
    }
    setup
}

async fn run_through(
    driver: &mut ProxyTestDriver,
    assembly: &str,
    logger: Arc<MemoryLogger>,
    listener: &RecordingListener,
    progress: &ProgressMonitor,
) -> tessera_runner::Result<()> {
    driver
        .initialize(&TestRunnerOptions::default(), logger)
        .await?;
    driver
        .run(
            &TestPackageConfig::new().with_assembly(assembly),
            &TestExplorationOptions::default(),
            &NullListener,
            &TestExecutionOptions::default(),
            listener,
            progress,
        )
        .await?;
    driver.dispose().await
}

fn written_lines(listener: &RecordingListener) -> Vec<String> {
    listener
        .execution_events()
        .into_iter()
        .filter_map(|e| match e {
            ExecutionEvent::LogStreamWrite { text, .. } => Some(text),
            _ => None,
        })
        .collect()
}

/// Test: events arrive in the order the remote harness produced them
#[tokio::test]
async fn test_events_keep_order_across_channel_boundary() {
    let (client, server) = channel_pair();
    let remote = LocalTestDriver::local(streaming(50), Arc::new(LocalEnvironmentFactory));
    let served = tokio::spawn(serve_driver(Box::new(remote), server));

    let mut driver = ProxyTestDriver::proxy(client);
    let logger = Arc::new(MemoryLogger::new());
    let listener = RecordingListener::new();
    let progress = ProgressMonitor::new();
    run_through(&mut driver, "/suite/a.dll", logger.clone(), &listener, &progress)
        .await
        .expect("proxied run failed");
    served.await.unwrap();

    let expected: Vec<String> = (0..50).map(|i| format!("line-{i}")).collect();
    assert_eq!(written_lines(&listener), expected);

    let events = listener.execution_events();
    assert!(matches!(events.first(), Some(ExecutionEvent::StepStarted { .. })));
    assert!(matches!(events.last(), Some(ExecutionEvent::StepFinished { .. })));

    assert!(logger
        .entries()
        .iter()
        .any(|e| e.severity == LogSeverity::Info && e.message == "harness loaded"));
    assert!(progress.is_done(), "remote progress is replayed locally");
}

/// Test: canceling the local monitor cancels the remote operation
#[tokio::test]
async fn test_cancellation_crosses_boundary() {
    let canceled = Arc::new(AtomicBool::new(false));
    let harness: Arc<dyn TestHarnessFactory> = Arc::new(Streaming {
        lines: 1,
        wait_for_cancel: Some(canceled.clone()),
    });
    let (client, server) = channel_pair();
    let remote = LocalTestDriver::local(harness, Arc::new(LocalEnvironmentFactory));
    tokio::spawn(serve_driver(Box::new(remote), server));

    let mut driver = ProxyTestDriver::proxy(client);
    let listener = RecordingListener::new();
    let progress = ProgressMonitor::new();

    let canceller = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        progress.cancel();
    };
    let (outcome, ()) = tokio::join!(
        run_through(
            &mut driver,
            "/suite/a.dll",
            Arc::new(MemoryLogger::new()),
            &listener,
            &progress,
        ),
        canceller
    );

    outcome.expect("a canceled run still completes");
    assert!(canceled.load(Ordering::SeqCst), "remote harness saw the cancel");
}

/// Test: several drivers share one wire connection without mixing events
#[tokio::test]
async fn test_wire_connection_multiplexes_drivers() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_io);
    let server = tokio::spawn(serve_connection(
        server_read,
        server_write,
        streaming(3),
        Arc::new(LocalEnvironmentFactory),
    ));

    let (client_read, client_write) = tokio::io::split(client_io);
    let connection = Arc::new(Connection::new(client_read, client_write));
    let host = ConnectionHost::new(HostSetup::new(), connection.clone());

    let first = RecordingListener::new();
    let second = RecordingListener::new();
    {
        let mut a = ProxyTestDriver::proxy(host.create_driver().await.unwrap());
        let mut b = ProxyTestDriver::proxy(host.create_driver().await.unwrap());
        run_through(
            &mut a,
            "/suite/a.dll",
            Arc::new(MemoryLogger::new()),
            &first,
            &ProgressMonitor::new(),
        )
        .await
        .unwrap();
        run_through(
            &mut b,
            "/suite/b.dll",
            Arc::new(MemoryLogger::new()),
            &second,
            &ProgressMonitor::new(),
        )
        .await
        .unwrap();
    }

    assert_eq!(written_lines(&first), vec!["line-0", "line-1", "line-2"]);
    assert_eq!(first.root_steps()[0].id, "root:/suite/a.dll");
    assert_eq!(second.root_steps()[0].id, "root:/suite/b.dll");

    host.shutdown().await.unwrap();
    connection.close();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop after the client closed")
        .unwrap()
        .unwrap();
}

/// Test: a nested context's setup reaches the harness on the far side of the wire
#[tokio::test]
async fn test_wire_context_setup_reaches_remote_harness() {
    let seen = SeenProperties::default();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_io);
    let server = tokio::spawn(serve_connection(
        server_read,
        server_write,
        Arc::new(seen.clone()),
        Arc::new(LocalEnvironmentFactory),
    ));

    let (client_read, client_write) = tokio::io::split(client_io);
    let connection = Arc::new(Connection::new(client_read, client_write));
    let host = ConnectionHost::new(setup_with(&[("Scope", "host")]), connection.clone());
    let context = host
        .create_isolated_context(&setup_with(&[("Scope", "context"), ("Verbosity", "high")]))
        .await
        .unwrap();

    {
        let mut in_context = ProxyTestDriver::proxy(context.create_driver().await.unwrap());
        run_through(
            &mut in_context,
            "/suite/a.dll",
            Arc::new(MemoryLogger::new()),
            &RecordingListener::new(),
            &ProgressMonitor::new(),
        )
        .await
        .unwrap();
        let mut in_host = ProxyTestDriver::proxy(host.create_driver().await.unwrap());
        run_through(
            &mut in_host,
            "/suite/b.dll",
            Arc::new(MemoryLogger::new()),
            &RecordingListener::new(),
            &ProgressMonitor::new(),
        )
        .await
        .unwrap();
    }

    let seen = seen.all();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0]["Scope"], "context");
    assert_eq!(seen[0]["Verbosity"], "high");
    assert_eq!(seen[1]["Scope"], "host");
    assert!(!seen[1].contains_key("Verbosity"));

    context.shutdown().await.unwrap();
    assert!(matches!(
        context.create_driver().await,
        Err(HostError::ShutDown(_))
    ));
    host.shutdown().await.unwrap();
    assert_eq!(connection.open_channels(), 0, "closed channels leave no routes");

    connection.close();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop after the client closed")
        .unwrap()
        .unwrap();
}
