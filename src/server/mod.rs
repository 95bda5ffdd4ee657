//! Purpose: Socket layer for `codebridge serve`: bind, accept, per-connection tasks, SSE fan-out.
//! Exports: `ServeConfig`, `ConnectionManager`, `SseHub`, `Outbound`, `serve`, `validate_config`.
//! Role: Async shell around `connection::ConnectionState` and the shared `ProtocolDispatcher`.
//! Invariants: Each socket is owned by one task; all writes reach it through its outbound channel.
//! Invariants: Dispatch runs on the blocking pool so command-thread hand-offs never stall socket I/O.
//! Invariants: Raw TCP requests on one socket are dispatched in arrival order.
//! Invariants: A completion for a closed socket is logged and dropped.
//! Invariants: An event stream whose queue is full is detached and closed.

pub mod connection;

use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::backend::{CommandThread, WorkspaceBackend};
use crate::core::error::{Error, ErrorKind};
use crate::http::response::{cors_response, no_content, sse_event, sse_prologue};
use crate::mcp::{JsonRpcResponse, ProtocolDispatcher, build_registry};
use connection::{Action, ConnectionState, SSE_PATH};

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_PORT_ATTEMPTS: u16 = 10;

const READ_CHUNK: usize = 8 * 1024;
/// Frames buffered per event stream before a slow reader is dropped.
const SSE_QUEUE: usize = 256;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);
/// Time given to in-flight writes (the `quit` reply in particular) after the listener stops.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub port_attempts: u16,
    pub workspace: PathBuf,
    pub allow_non_loopback: bool,
}

/// Bytes queued for one socket.
#[derive(Debug)]
pub enum Outbound {
    Write(Bytes),
    /// Write, then shut the socket down.
    Close(Bytes),
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    init_tracing();
    validate_config(&config)?;

    let quit = Arc::new(Notify::new());
    let quit_hook = Arc::clone(&quit);
    let backend =
        WorkspaceBackend::open(&config.workspace)?.with_quit_hook(move || quit_hook.notify_one());
    let workspace = backend.root().to_path_buf();
    let commands = CommandThread::spawn(backend)?;
    let dispatcher = Arc::new(ProtocolDispatcher::new(build_registry(&commands)));
    let tool_count = dispatcher.tools().len();

    let manager =
        ConnectionManager::bind(config.bind, config.port, config.port_attempts, dispatcher)
            .await?;
    let addr = manager.local_addr()?;
    info!(%addr, workspace = %workspace.display(), tools = tool_count, "listening");
    println!(
        "{}",
        json!({
            "listening": addr.to_string(),
            "workspace": workspace.display().to_string(),
        })
    );

    manager
        .run(async move {
            tokio::select! {
                _ = shutdown_signal() => info!("shutdown signal received"),
                _ = quit.notified() => info!("quit requested"),
            }
        })
        .await?;

    tokio::time::sleep(SHUTDOWN_GRACE).await;
    info!("server stopped");
    Ok(())
}

pub fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if config.port_attempts == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--port-attempts must be greater than zero")
            .with_hint("Use a positive value like 10."));
    }

    if config.port != 0 && config.port.checked_add(config.port_attempts - 1).is_none() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!(
                "port range starting at {} with {} attempts exceeds 65535",
                config.port, config.port_attempts
            ))
            .with_hint("Lower --port or --port-attempts."));
    }

    if !is_loopback(config.bind) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }

    Ok(())
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

/// Event-stream connections that receive every HTTP POST response.
#[derive(Clone, Debug, Default)]
pub struct SseHub {
    streams: Arc<Mutex<HashMap<u64, mpsc::Sender<Bytes>>>>,
}

impl SseHub {
    pub fn register(&self, connection: u64, sender: mpsc::Sender<Bytes>) {
        self.lock().insert(connection, sender);
    }

    pub fn remove(&self, connection: u64) -> bool {
        self.lock().remove(&connection).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Queue `frame` on every stream with room for it and forget the rest.
    /// Returns how many streams it was queued on.
    pub fn broadcast(&self, frame: Bytes) -> usize {
        let mut streams = self.lock();
        streams.retain(|connection, sender| match sender.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(connection = *connection, "event stream is not draining; dropping it");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(connection = *connection, "dropping closed event stream");
                false
            }
        });
        streams.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, mpsc::Sender<Bytes>>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct ConnectionManager {
    listener: TcpListener,
    dispatcher: Arc<ProtocolDispatcher>,
    hub: SseHub,
}

impl ConnectionManager {
    /// Bind `host:port`, trying the next port on failure up to `attempts` ports in total.
    /// Port 0 asks the OS for a free port and is tried once.
    pub async fn bind(
        host: IpAddr,
        port: u16,
        attempts: u16,
        dispatcher: Arc<ProtocolDispatcher>,
    ) -> Result<Self, Error> {
        let listener = bind_with_probe(host, port, attempts).await?;
        Ok(Self {
            listener,
            dispatcher,
            hub: SseHub::default(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        self.listener.local_addr().map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read listener address")
                .with_source(err)
        })
    }

    /// Accept connections until `shutdown` resolves. Open connections keep running on their tasks.
    pub async fn run<F>(self, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut next_id: u64 = 0;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("listener closed");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        next_id += 1;
                        debug!(connection = next_id, %peer, "accepted");
                        let connection = Connection::new(
                            next_id,
                            Arc::clone(&self.dispatcher),
                            self.hub.clone(),
                        );
                        tokio::spawn(connection.run(stream));
                    }
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }
    }
}

async fn bind_with_probe(host: IpAddr, port: u16, attempts: u16) -> Result<TcpListener, Error> {
    let attempts = if port == 0 { 1 } else { attempts.max(1) };
    let mut last_err = None;
    for offset in 0..attempts {
        let Some(candidate) = port.checked_add(offset) else {
            break;
        };
        let addr = SocketAddr::new(host, candidate);
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                if offset > 0 {
                    info!(port = candidate, requested = port, "bound to fallback port");
                }
                return Ok(listener);
            }
            Err(err) => {
                debug!(%addr, error = %err, "bind failed");
                last_err = Some(err);
            }
        }
    }

    let last_port = port.saturating_add(attempts - 1);
    let mut error = Error::new(ErrorKind::Unavailable)
        .with_message(format!("no free port in {host}:{port}..={last_port}"))
        .with_hint("Stop the process holding the port or pass a different --port.");
    if let Some(err) = last_err {
        error = error.with_source(err);
    }
    Err(error)
}

struct Connection {
    id: u64,
    dispatcher: Arc<ProtocolDispatcher>,
    hub: SseHub,
    outbound: mpsc::UnboundedSender<Outbound>,
    receiver: Option<mpsc::UnboundedReceiver<Outbound>>,
    events: Option<mpsc::Receiver<Bytes>>,
    lines: Option<mpsc::UnboundedSender<Value>>,
}

impl Connection {
    fn new(id: u64, dispatcher: Arc<ProtocolDispatcher>, hub: SseHub) -> Self {
        let (outbound, receiver) = mpsc::unbounded_channel();
        Self {
            id,
            dispatcher,
            hub,
            outbound,
            receiver: Some(receiver),
            events: None,
            lines: None,
        }
    }

    async fn run(mut self, stream: TcpStream) {
        let Some(mut receiver) = self.receiver.take() else {
            return;
        };
        let (mut reader, mut writer) = stream.into_split();
        let mut state = ConnectionState::new();
        let mut chunk = vec![0u8; READ_CHUNK];

        loop {
            tokio::select! {
                read = reader.read(&mut chunk) => match read {
                    Ok(0) => {
                        debug!(connection = self.id, "peer closed");
                        break;
                    }
                    Ok(len) => {
                        for action in state.on_data(&chunk[..len]) {
                            self.apply(action);
                        }
                    }
                    Err(err) => {
                        debug!(connection = self.id, error = %err, "read failed");
                        break;
                    }
                },
                Some(outbound) = receiver.recv() => {
                    let (bytes, close) = match outbound {
                        Outbound::Write(bytes) => (bytes, false),
                        Outbound::Close(bytes) => (bytes, true),
                    };
                    if let Err(err) = writer.write_all(&bytes).await {
                        warn!(connection = self.id, error = %err, "socket write failed");
                        break;
                    }
                    if close {
                        let _ = writer.shutdown().await;
                        break;
                    }
                }
                frame = next_event(&mut self.events) => {
                    let Some(frame) = frame else {
                        debug!(connection = self.id, "event stream detached by the hub");
                        break;
                    };
                    if let Err(err) = writer.write_all(&frame).await {
                        warn!(connection = self.id, error = %err, "event write failed");
                        break;
                    }
                }
            }
        }

        state.close();
        if self.hub.remove(self.id) {
            debug!(connection = self.id, "event stream detached");
        }
        debug!(connection = self.id, "connection closed");
    }

    fn apply(&mut self, action: Action) {
        match action {
            Action::Write(bytes) => self.send(Outbound::Write(Bytes::from(bytes))),
            Action::WriteAndClose(bytes) => self.send(Outbound::Close(Bytes::from(bytes))),
            Action::DispatchLine(value) => self.dispatch_line(value),
            Action::DispatchPost(value) => self.dispatch_post(value),
            Action::ServeInfo => {
                let body = server_info(&self.dispatcher).to_string();
                self.send(Outbound::Close(Bytes::from(cors_response(
                    body.as_bytes(),
                    200,
                ))));
            }
            Action::StartSse => {
                let (events, receiver) = mpsc::channel(SSE_QUEUE);
                let opening = [
                    Bytes::from(sse_prologue()),
                    Bytes::from(sse_event("endpoint", SSE_PATH)),
                ];
                for frame in opening {
                    if events.try_send(frame).is_err() {
                        warn!(connection = self.id, "event stream queue rejected its opening");
                    }
                }
                self.events = Some(receiver);
                self.hub.register(self.id, events);
                debug!(connection = self.id, streams = self.hub.len(), "event stream attached");
            }
        }
    }

    fn send(&self, message: Outbound) {
        deliver(&self.outbound, message, self.id);
    }

    fn dispatch_line(&mut self, value: Value) {
        let lines = self.lines.get_or_insert_with(|| {
            let (sender, receiver) = mpsc::unbounded_channel();
            tokio::spawn(dispatch_lines(
                self.id,
                Arc::clone(&self.dispatcher),
                receiver,
                self.outbound.clone(),
            ));
            sender
        });
        if lines.send(value).is_err() {
            warn!(connection = self.id, "line dispatcher stopped; request dropped");
        }
    }

    fn dispatch_post(&self, value: Value) {
        let id = self.id;
        let dispatcher = Arc::clone(&self.dispatcher);
        let hub = self.hub.clone();
        let outbound = self.outbound.clone();
        tokio::task::spawn_blocking(move || {
            dispatcher.dispatch_value(value, move |response| {
                if let Some(response) = response {
                    let frame = sse_event("message", &response.to_compact_json());
                    let streams = hub.broadcast(Bytes::from(frame));
                    debug!(connection = id, streams, "response broadcast");
                }
                deliver(&outbound, Outbound::Close(Bytes::from(no_content())), id);
            });
        });
    }
}

/// Runs one socket's raw TCP requests one after another; async tools may still finish out of order.
async fn dispatch_lines(
    connection: u64,
    dispatcher: Arc<ProtocolDispatcher>,
    mut lines: mpsc::UnboundedReceiver<Value>,
    outbound: mpsc::UnboundedSender<Outbound>,
) {
    while let Some(value) = lines.recv().await {
        let dispatcher = Arc::clone(&dispatcher);
        let outbound = outbound.clone();
        let joined = tokio::task::spawn_blocking(move || {
            dispatcher.dispatch_value(value, move |response| {
                if let Some(response) = response {
                    deliver(&outbound, Outbound::Write(response_line(&response)), connection);
                }
            });
        })
        .await;
        if let Err(err) = joined {
            warn!(connection, error = %err, "dispatch task failed");
        }
    }
}

/// Next frame for an attached event stream; never resolves before `StartSse`.
async fn next_event(events: &mut Option<mpsc::Receiver<Bytes>>) -> Option<Bytes> {
    match events {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

fn deliver(outbound: &mpsc::UnboundedSender<Outbound>, message: Outbound, connection: u64) {
    if outbound.send(message).is_err() {
        warn!(connection, "connection closed before its response; dropping it");
    }
}

fn response_line(response: &JsonRpcResponse) -> Bytes {
    let mut line = response.to_compact_json().into_bytes();
    line.push(b'\n');
    Bytes::from(line)
}

fn server_info(dispatcher: &ProtocolDispatcher) -> Value {
    let metadata = dispatcher.metadata();
    json!({
        "name": metadata.name,
        "version": metadata.version,
        "protocolVersion": metadata.protocol_version,
        "tools": dispatcher.tools().len(),
        "endpoints": {
            "sse": SSE_PATH,
            "post": "/",
            "tcp": "newline-delimited JSON-RPC",
        },
    })
}
