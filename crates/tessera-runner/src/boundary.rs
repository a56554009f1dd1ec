//! The host boundary: driver calls and their callbacks as ordered messages.
//!
//! A driver living behind a boundary is reached through a [`DriverClient`].
//! Each call is one [`DriverRequest`]; everything the remote driver reports
//! while handling it (log records, listener events, progress) comes back as
//! [`HostMessage`]s on a single ordered channel, terminated by
//! [`HostMessage::Completed`]. The client replays those messages on the
//! caller's logger, listeners, and progress monitor in arrival order.
//!
//! Cancellation crosses in the other direction: once the caller's monitor is
//! canceled the client sends [`DriverRequest::Cancel`], and [`serve_driver`]
//! cancels the monitor it handed to the remote driver.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tessera_model::{
    ExecutionEvent, ExecutionListener, ExplorationEvent, ExplorationListener, LogSeverity, Logger,
    ProgressMonitor, ProgressReporter, ProgressUpdate, TestExecutionOptions,
    TestExplorationOptions, TestPackageConfig, TestRunnerOptions,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::driver::TestDriver;
use crate::error::{HostError, RemoteError, Result};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A driver call sent across the boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DriverRequest {
    Initialize {
        options: TestRunnerOptions,
    },
    Explore {
        package: TestPackageConfig,
        exploration: TestExplorationOptions,
    },
    Run {
        package: TestPackageConfig,
        exploration: TestExplorationOptions,
        execution: TestExecutionOptions,
    },
    Dispose,
    /// Cancel the operation in flight, if any.
    Cancel,
}

impl DriverRequest {
    pub fn op(&self) -> &'static str {
        match self {
            DriverRequest::Initialize { .. } => "initialize",
            DriverRequest::Explore { .. } => "explore",
            DriverRequest::Run { .. } => "run",
            DriverRequest::Dispose => "dispose",
            DriverRequest::Cancel => "cancel",
        }
    }
}

/// A callback or completion reported by the remote side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostMessage {
    Log {
        severity: LogSeverity,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    Exploration {
        event: ExplorationEvent,
    },
    Execution {
        event: ExecutionEvent,
    },
    Progress {
        update: ProgressUpdate,
    },
    /// The request finished; `error` is set if it failed.
    Completed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<RemoteError>,
    },
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// Where the client replays the messages of one call.
#[derive(Clone, Copy)]
pub struct CallSinks<'a> {
    pub logger: &'a dyn Logger,
    pub exploration: Option<&'a dyn ExplorationListener>,
    pub execution: Option<&'a dyn ExecutionListener>,
    pub progress: Option<&'a ProgressMonitor>,
}

impl<'a> CallSinks<'a> {
    /// Sinks for calls that only produce log records.
    pub fn logging(logger: &'a dyn Logger) -> Self {
        Self {
            logger,
            exploration: None,
            execution: None,
            progress: None,
        }
    }
}

/// The caller's end of a boundary.
#[derive(Debug)]
pub struct DriverClient {
    requests: mpsc::UnboundedSender<DriverRequest>,
    messages: mpsc::UnboundedReceiver<HostMessage>,
}

impl DriverClient {
    pub(crate) fn new(
        requests: mpsc::UnboundedSender<DriverRequest>,
        messages: mpsc::UnboundedReceiver<HostMessage>,
    ) -> Self {
        Self { requests, messages }
    }

    /// Send `request` and replay its messages until it completes.
    pub async fn call(&mut self, request: DriverRequest, sinks: CallSinks<'_>) -> Result<()> {
        let op = request.op();
        self.requests
            .send(request)
            .map_err(|_| HostError::BoundaryClosed)?;

        let monitor = sinks.progress.cloned().unwrap_or_default();
        let mut cancel_sent = false;
        loop {
            let message = tokio::select! {
                message = self.messages.recv() => message,
                _ = monitor.cancelled(), if !cancel_sent => {
                    cancel_sent = true;
                    debug!(op = %op, "forwarding cancellation across boundary");
                    // A closed request channel shows up as a closed message channel next.
                    let _ = self.requests.send(DriverRequest::Cancel);
                    continue;
                }
            };
            let Some(message) = message else {
                return Err(HostError::BoundaryClosed.into());
            };
            match message {
                HostMessage::Log {
                    severity,
                    message,
                    details,
                } => sinks.logger.log(severity, &message, details.as_deref()),
                HostMessage::Exploration { event } => {
                    if let Some(listener) = sinks.exploration {
                        listener.on_exploration_event(event);
                    }
                }
                HostMessage::Execution { event } => {
                    if let Some(listener) = sinks.execution {
                        listener.on_execution_event(event);
                    }
                }
                HostMessage::Progress { update } => replay_progress(&monitor, update),
                HostMessage::Completed { error } => {
                    return error.map_or(Ok(()), |e| Err(e.into()));
                }
            }
        }
    }
}

fn replay_progress(monitor: &ProgressMonitor, update: ProgressUpdate) {
    match update {
        ProgressUpdate::TaskStarted {
            task_name,
            total_work,
        } => monitor.begin_task(task_name, total_work),
        ProgressUpdate::Worked { work } => monitor.worked(work),
        ProgressUpdate::Status { status } => monitor.set_status(status),
        ProgressUpdate::Done => monitor.done(),
    }
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

/// The driver's end of a boundary.
#[derive(Debug)]
pub struct ServerChannel {
    requests: mpsc::UnboundedReceiver<DriverRequest>,
    messages: mpsc::UnboundedSender<HostMessage>,
}

impl ServerChannel {
    pub(crate) fn new(
        requests: mpsc::UnboundedReceiver<DriverRequest>,
        messages: mpsc::UnboundedSender<HostMessage>,
    ) -> Self {
        Self { requests, messages }
    }
}

/// An in-process boundary: a connected client and server channel.
pub fn channel_pair() -> (DriverClient, ServerChannel) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (message_tx, message_rx) = mpsc::unbounded_channel();
    (
        DriverClient::new(request_tx, message_rx),
        ServerChannel::new(request_rx, message_tx),
    )
}

/// Sends every callback of the remote driver back over the boundary.
#[derive(Clone)]
struct MessageSink(mpsc::UnboundedSender<HostMessage>);

impl MessageSink {
    fn send(&self, message: HostMessage) {
        // The caller went away; nothing left to report to.
        let _ = self.0.send(message);
    }
}

impl Logger for MessageSink {
    fn log(&self, severity: LogSeverity, message: &str, details: Option<&str>) {
        self.send(HostMessage::Log {
            severity,
            message: message.to_string(),
            details: details.map(str::to_string),
        });
    }
}

impl ExplorationListener for MessageSink {
    fn on_exploration_event(&self, event: ExplorationEvent) {
        self.send(HostMessage::Exploration { event });
    }
}

impl ExecutionListener for MessageSink {
    fn on_execution_event(&self, event: ExecutionEvent) {
        self.send(HostMessage::Execution { event });
    }
}

impl ProgressReporter for MessageSink {
    fn on_progress(&self, update: &ProgressUpdate) {
        self.send(HostMessage::Progress {
            update: update.clone(),
        });
    }
}

/// Serve `driver` until the client disposes it or goes away.
///
/// The driver is disposed when the request channel closes without an
/// explicit dispose.
pub async fn serve_driver(mut driver: Box<dyn TestDriver>, channel: ServerChannel) {
    let ServerChannel {
        mut requests,
        messages,
    } = channel;
    let sink = MessageSink(messages);
    let logger: Arc<dyn Logger> = Arc::new(sink.clone());
    let mut disposed = false;

    while let Some(request) = requests.recv().await {
        let op = request.op();
        let outcome = match request {
            DriverRequest::Cancel => continue,
            DriverRequest::Initialize { options } => {
                driver.initialize(&options, logger.clone()).await
            }
            DriverRequest::Explore {
                package,
                exploration,
            } => {
                let monitor = ProgressMonitor::with_reporter(Arc::new(sink.clone()));
                let call = driver.explore(&package, &exploration, &sink, &monitor);
                until_complete(call, &mut requests, &monitor).await
            }
            DriverRequest::Run {
                package,
                exploration,
                execution,
            } => {
                let monitor = ProgressMonitor::with_reporter(Arc::new(sink.clone()));
                let call = driver.run(&package, &exploration, &sink, &execution, &sink, &monitor);
                until_complete(call, &mut requests, &monitor).await
            }
            DriverRequest::Dispose => {
                disposed = true;
                driver.dispose().await
            }
        };

        if let Err(err) = &outcome {
            debug!(op = %op, error = %err, "remote driver call failed");
        }
        sink.send(HostMessage::Completed {
            error: outcome.err().map(|e| RemoteError::from(&e)),
        });
        if disposed {
            break;
        }
    }

    if !disposed {
        if let Err(err) = driver.dispose().await {
            warn!(error = %err, "failed to dispose abandoned remote driver");
        }
    }
}

/// Drive `call` to completion while watching for cancel requests.
async fn until_complete<F>(
    call: F,
    requests: &mut mpsc::UnboundedReceiver<DriverRequest>,
    monitor: &ProgressMonitor,
) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    tokio::pin!(call);
    let mut open = true;
    loop {
        tokio::select! {
            outcome = &mut call => return outcome,
            request = requests.recv(), if open => match request {
                Some(DriverRequest::Cancel) => monitor.cancel(),
                Some(other) => {
                    warn!(op = %other.op(), "ignoring request received while a call is in flight");
                }
                None => {
                    open = false;
                    monitor.cancel();
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_model::{TestOutcome, TestResult, TestStepData};

    #[test]
    fn test_request_wire_shape() {
        let request = DriverRequest::Explore {
            package: TestPackageConfig::new().with_assembly("/a/x.dll"),
            exploration: TestExplorationOptions::default(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["op"], "explore");
        assert_eq!(json["package"]["assembly_files"][0], "/a/x.dll");

        let back: DriverRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_message_wire_shape() {
        let message = HostMessage::Execution {
            event: ExecutionEvent::StepFinished {
                step_id: "s1".into(),
                result: TestResult::new(TestOutcome::passed(), 1, 2),
            },
        };
        let json = serde_json::to_string(&message).unwrap();
        let back: HostMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);

        let done: HostMessage = serde_json::from_str(r#"{"kind":"completed"}"#).unwrap();
        assert_eq!(done, HostMessage::Completed { error: None });
    }

    #[tokio::test]
    async fn test_client_replays_until_completed() {
        let (mut client, mut server) = channel_pair();
        let recorder = tessera_model::RecordingListener::new();
        let logger = tessera_model::MemoryLogger::new();

        tokio::spawn(async move {
            let request = server.requests.recv().await.unwrap();
            assert_eq!(request.op(), "run");
            let step = TestStepData::new("root", "Root", "t");
            server
                .messages
                .send(HostMessage::Log {
                    severity: LogSeverity::Info,
                    message: "starting".into(),
                    details: None,
                })
                .unwrap();
            server
                .messages
                .send(HostMessage::Execution {
                    event: ExecutionEvent::StepStarted { step },
                })
                .unwrap();
            server
                .messages
                .send(HostMessage::Completed { error: None })
                .unwrap();
        });

        client
            .call(
                DriverRequest::Run {
                    package: TestPackageConfig::new(),
                    exploration: TestExplorationOptions::default(),
                    execution: TestExecutionOptions::default(),
                },
                CallSinks {
                    logger: &logger,
                    exploration: Some(&recorder),
                    execution: Some(&recorder),
                    progress: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(recorder.execution_events().len(), 1);
        assert_eq!(logger.entries()[0].message, "starting");
    }

    #[tokio::test]
    async fn test_client_reports_closed_boundary() {
        let (mut client, server) = channel_pair();
        drop(server);
        let logger = tessera_model::MemoryLogger::new();
        let err = client
            .call(DriverRequest::Dispose, CallSinks::logging(&logger))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::DriverError::Host(HostError::BoundaryClosed)
        ));
    }
}
