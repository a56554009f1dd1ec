//! JSON-lines transport for the host boundary.
//!
//! Several driver boundaries share one byte stream. Each boundary is a
//! channel identified by a uuid; the client opens it with the setup of the
//! host context it belongs to, sends requests on it, and closes it, while the
//! server tags every message with the channel it belongs to. One frame per
//! line, serialized with `serde_json`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tessera_model::HostSetup;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::boundary::{serve_driver, DriverClient, DriverRequest, HostMessage, ServerChannel};
use crate::error::HostError;
use crate::harness::TestHarnessFactory;
use crate::local::{EnvironmentFactory, LocalTestDriver};

/// Frames written by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum ClientFrame {
    Open {
        channel: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        setup: Option<HostSetup>,
    },
    Request { channel: Uuid, request: DriverRequest },
    Close { channel: Uuid },
}

/// Frames written by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerFrame {
    pub channel: Uuid,
    pub message: HostMessage,
}

fn encode<T: Serialize>(frame: &T) -> Result<Vec<u8>, HostError> {
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    Ok(line)
}

/// Drain `frames` onto `writer`, one line each, until every sender is gone.
fn spawn_writer<T, W>(mut frames: mpsc::UnboundedReceiver<T>, mut writer: W) -> JoinHandle<()>
where
    T: Serialize + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let written = match encode(&frame) {
                Ok(line) => match writer.write_all(&line).await {
                    Ok(()) => writer.flush().await.map_err(HostError::from),
                    Err(err) => Err(err.into()),
                },
                Err(err) => Err(err),
            };
            if let Err(err) = written {
                warn!(error = %err, "wire writer stopped");
                break;
            }
        }
        let _ = writer.shutdown().await;
    })
}

type Routes = Arc<Mutex<HashMap<Uuid, mpsc::UnboundedSender<HostMessage>>>>;

/// Client side of a multiplexed wire.
pub struct Connection {
    outgoing: Mutex<Option<mpsc::UnboundedSender<ClientFrame>>>,
    routes: Routes,
    reader: JoinHandle<()>,
}

impl Connection {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing, frames) = mpsc::unbounded_channel();
        spawn_writer(frames, writer);

        let routes: Routes = Arc::default();
        let reader = tokio::spawn(read_server_frames(reader, routes.clone()));
        Self {
            outgoing: Mutex::new(Some(outgoing)),
            routes,
            reader,
        }
    }

    fn outgoing(&self) -> Result<mpsc::UnboundedSender<ClientFrame>, HostError> {
        self.outgoing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(HostError::BoundaryClosed)
    }

    /// Open a new boundary channel to a fresh driver on the server.
    ///
    /// The server builds the driver for `setup` when one is given. The
    /// channel closes once the returned client is dropped or
    /// [`close_channel`](Self::close_channel) is called.
    pub fn open_channel(&self, setup: Option<HostSetup>) -> Result<(Uuid, DriverClient), HostError> {
        let outgoing = self.outgoing()?;
        let channel = Uuid::new_v4();
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel, message_tx);
        if outgoing.send(ClientFrame::Open { channel, setup }).is_err() {
            remove_route(&self.routes, &channel);
            return Err(HostError::BoundaryClosed);
        }

        let routes = self.routes.clone();
        let (request_tx, mut request_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(request) = request_rx.recv().await {
                if outgoing
                    .send(ClientFrame::Request { channel, request })
                    .is_err()
                {
                    break;
                }
            }
            remove_route(&routes, &channel);
            let _ = outgoing.send(ClientFrame::Close { channel });
        });

        debug!(channel = %channel, "opened wire channel");
        Ok((channel, DriverClient::new(request_tx, message_rx)))
    }

    /// Close a channel: its driver on the server stops and further replies
    /// are dropped. Closing twice is harmless.
    pub fn close_channel(&self, channel: Uuid) {
        remove_route(&self.routes, &channel);
        if let Ok(outgoing) = self.outgoing() {
            let _ = outgoing.send(ClientFrame::Close { channel });
        }
    }

    /// Number of channels that can still receive replies.
    pub fn open_channels(&self) -> usize {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Stop sending. The server sees end of input once pending frames are
    /// written.
    pub fn close(&self) {
        self.outgoing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_finished()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn remove_route(routes: &Routes, channel: &Uuid) {
    routes
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(channel);
}

async fn read_server_frames<R>(reader: R, routes: Routes)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "wire reader failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let frame: ServerFrame = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "discarding malformed server frame");
                continue;
            }
        };
        let route = routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&frame.channel)
            .cloned();
        match route {
            Some(route) => {
                let _ = route.send(frame.message);
            }
            None => debug!(channel = %frame.channel, "message for unknown channel"),
        }
    }
    // Dropping the routes closes every client still waiting for a reply.
    routes
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
}

/// Serve local drivers over a multiplexed wire until the input ends.
///
/// Every opened channel gets its own local driver built from
/// `harness_factory`, inside the host setup the channel was opened with.
/// Returns once all drivers have finished and their
/// output has been written.
pub async fn serve_connection<R, W>(
    reader: R,
    writer: W,
    harness_factory: Arc<dyn TestHarnessFactory>,
    environment: Arc<dyn EnvironmentFactory>,
) -> Result<(), HostError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outgoing, frames) = mpsc::unbounded_channel::<ServerFrame>();
    let writer = spawn_writer(frames, writer);

    let mut channels: HashMap<Uuid, mpsc::UnboundedSender<DriverRequest>> = HashMap::new();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let frame: ClientFrame = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "discarding malformed client frame");
                continue;
            }
        };
        match frame {
            ClientFrame::Open { channel, setup } => {
                let (request_tx, request_rx) = mpsc::unbounded_channel();
                let (message_tx, mut message_rx) = mpsc::unbounded_channel();
                let outgoing = outgoing.clone();
                tokio::spawn(async move {
                    while let Some(message) = message_rx.recv().await {
                        if outgoing.send(ServerFrame { channel, message }).is_err() {
                            return;
                        }
                    }
                });
                let driver = match setup {
                    Some(setup) => {
                        LocalTestDriver::local_in_host(harness_factory.clone(), environment.clone(), setup)
                    }
                    None => LocalTestDriver::local(harness_factory.clone(), environment.clone()),
                };
                tokio::spawn(serve_driver(
                    Box::new(driver),
                    ServerChannel::new(request_rx, message_tx),
                ));
                channels.insert(channel, request_tx);
                debug!(channel = %channel, "serving driver channel");
            }
            ClientFrame::Request { channel, request } => match channels.get(&channel) {
                Some(requests) => {
                    let _ = requests.send(request);
                }
                None => warn!(channel = %channel, op = %request.op(), "request for unknown channel"),
            },
            ClientFrame::Close { channel } => {
                channels.remove(&channel);
            }
        }
    }

    drop(channels);
    drop(outgoing);
    writer
        .await
        .map_err(|err| HostError::Wire(format!("writer task failed: {err}")))
}

/// Serve local drivers over this process's stdin and stdout.
pub async fn serve_stdio(
    harness_factory: Arc<dyn TestHarnessFactory>,
    environment: Arc<dyn EnvironmentFactory>,
) -> Result<(), HostError> {
    serve_connection(
        tokio::io::stdin(),
        tokio::io::stdout(),
        harness_factory,
        environment,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_frame_shape() {
        let channel = Uuid::new_v4();
        let frame = ClientFrame::Request {
            channel,
            request: DriverRequest::Dispose,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["frame"], "request");
        assert_eq!(json["request"]["op"], "dispose");

        let line = encode(&frame).unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        let back: ClientFrame = serde_json::from_slice(&line).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_open_frame_setup_is_optional() {
        let channel = Uuid::new_v4();
        let bare: ClientFrame =
            serde_json::from_value(serde_json::json!({"frame": "open", "channel": channel}))
                .unwrap();
        assert_eq!(bare, ClientFrame::Open { channel, setup: None });

        let mut setup = HostSetup::new();
        setup.properties.insert("Mode".into(), "context".into());
        let json = serde_json::to_value(ClientFrame::Open {
            channel,
            setup: Some(setup),
        })
        .unwrap();
        assert_eq!(json["setup"]["properties"]["Mode"], "context");
    }
}
