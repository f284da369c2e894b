//! Async debug-protocol client: one TCP connection, one read loop, requests
//! correlated to responses purely by sequence number.
//!
//! The design mirrors the usual shape for this kind of client: shared state in
//! an `Arc`, a writer guarded by a mutex, a pending-request map of oneshot
//! senders keyed by sequence number, a broadcast channel for asynchronous
//! events, and a cancellation token that ties the read loop and all callers
//! together. Responses may arrive in any order relative to requests;
//! concurrently outstanding requests are the normal case.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::{broadcast, oneshot, Mutex},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::breakpoints::Breakpoint;
use crate::codec::{encode, FrameDecoder};
use crate::error::{DapError, DapResult};
use crate::messages::{Event, ProtocolMessage, Request, Response};
use crate::session::{Capabilities, SessionState, SessionTracker};

/// Evaluation context sent with every `evaluate` request.
const EVALUATE_CONTEXT: &str = "watch";

#[derive(Debug, Clone)]
pub struct DapClientConfig {
    pub connect_timeout: Duration,
    /// Per-request deadline. Other in-flight requests are unaffected by one
    /// request's timeout.
    pub request_timeout: Duration,
    pub event_channel_size: usize,
}

impl Default for DapClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            event_channel_size: 64,
        }
    }
}

#[derive(Debug)]
struct Inner {
    writer: Mutex<tokio::net::tcp::OwnedWriteHalf>,
    pending: Mutex<HashMap<i64, oneshot::Sender<Response>>>,
    next_seq: AtomicI64,
    session: SyncMutex<SessionTracker>,
    events: broadcast::Sender<Event>,
    shutdown: CancellationToken,
    config: DapClientConfig,
}

/// Handle to one debug session. Cheap to clone; the transport socket is owned
/// exclusively by this client — reconnecting means building a new instance and
/// letting the old one's in-flight requests drain via timeout.
#[derive(Clone)]
pub struct DapClient {
    inner: Arc<Inner>,
}

impl DapClient {
    pub async fn connect(addr: SocketAddr) -> DapResult<Self> {
        Self::connect_with_config(addr, DapClientConfig::default()).await
    }

    pub async fn connect_with_config(addr: SocketAddr, config: DapClientConfig) -> DapResult<Self> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| DapError::Timeout)??;
        let _ = stream.set_nodelay(true);

        let (reader, writer) = stream.into_split();
        let (events, _) = broadcast::channel(config.event_channel_size);

        let inner = Arc::new(Inner {
            writer: Mutex::new(writer),
            pending: Mutex::new(HashMap::new()),
            next_seq: AtomicI64::new(1),
            session: SyncMutex::new(SessionTracker::new()),
            events,
            shutdown: CancellationToken::new(),
            config,
        });

        tokio::spawn(read_loop(reader, inner.clone()));

        let client = Self { inner };

        // Handshake: capabilities come from `initialize`; the session counts
        // as live once `configurationDone` is acknowledged. A failed handshake
        // tears the client down so the read loop does not outlive it.
        match client.handshake().await {
            Ok(()) => Ok(client),
            Err(err) => {
                client.shutdown();
                Err(err)
            }
        }
    }

    async fn handshake(&self) -> DapResult<()> {
        let capabilities = self
            .request(
                "initialize",
                Some(json!({
                    "clientID": "warden",
                    "adapterID": "godot",
                    "linesStartAt1": true,
                    "columnsStartAt1": true,
                    "pathFormat": "path",
                })),
            )
            .await?;
        self.inner
            .session
            .lock()
            .mark_connected(Capabilities(capabilities));

        self.request("configurationDone", None).await?;
        self.inner.session.lock().mark_running();
        Ok(())
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Cancelled when the client shuts down, explicitly or because the
    /// transport closed underneath it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.inner.session.lock().state()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.session.lock().is_paused()
    }

    pub fn current_thread(&self) -> Option<i64> {
        self.inner.session.lock().current_thread()
    }

    pub fn capabilities(&self) -> Option<Capabilities> {
        self.inner.session.lock().capabilities().cloned()
    }

    /// Send one request and await its correlated response.
    ///
    /// Resolves to the response body on `success = true`, rejects with the
    /// server-supplied message otherwise. On timeout the pending entry is
    /// removed so a late response is ignored rather than misrouted.
    pub async fn request(&self, command: &str, arguments: Option<Value>) -> DapResult<Value> {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.inner.pending.lock().await;
            pending.insert(seq, tx);
        }

        let frame = match encode(&ProtocolMessage::Request(Request::new(
            seq, command, arguments,
        ))) {
            Ok(frame) => frame,
            Err(err) => {
                self.remove_pending(seq).await;
                return Err(err);
            }
        };

        {
            let mut writer = self.inner.writer.lock().await;
            if let Err(err) = writer.write_all(&frame).await {
                self.remove_pending(seq).await;
                return Err(err.into());
            }
        }

        let response = tokio::select! {
            _ = self.inner.shutdown.cancelled() => {
                self.remove_pending(seq).await;
                return Err(DapError::Cancelled);
            }
            res = tokio::time::timeout(self.inner.config.request_timeout, rx) => {
                match res {
                    Ok(Ok(response)) => response,
                    Ok(Err(_closed)) => return Err(DapError::ConnectionClosed),
                    Err(_elapsed) => {
                        self.remove_pending(seq).await;
                        return Err(DapError::Timeout);
                    }
                }
            }
        };

        if !response.success {
            return Err(DapError::Request {
                command: command.to_string(),
                message: response.failure_message(),
            });
        }
        Ok(response.body.unwrap_or(Value::Null))
    }

    async fn remove_pending(&self, seq: i64) {
        let mut pending = self.inner.pending.lock().await;
        pending.remove(&seq);
    }

    pub async fn threads(&self) -> DapResult<Vec<Thread>> {
        #[derive(Deserialize)]
        struct Body {
            threads: Vec<Thread>,
        }
        let body = self.request("threads", None).await?;
        let body: Body = serde_json::from_value(body)?;
        Ok(body.threads)
    }

    pub async fn stack_trace(
        &self,
        thread_id: i64,
        start_frame: usize,
        levels: usize,
    ) -> DapResult<Vec<StackFrame>> {
        #[derive(Deserialize)]
        struct Body {
            #[serde(rename = "stackFrames")]
            stack_frames: Vec<WireFrame>,
        }
        #[derive(Deserialize)]
        struct WireFrame {
            id: i64,
            name: String,
            #[serde(default)]
            source: Option<WireSource>,
            #[serde(default)]
            line: u32,
        }
        #[derive(Deserialize)]
        struct WireSource {
            #[serde(default)]
            path: Option<String>,
        }

        let body = self
            .request(
                "stackTrace",
                Some(json!({
                    "threadId": thread_id,
                    "startFrame": start_frame,
                    "levels": levels,
                })),
            )
            .await?;
        let body: Body = serde_json::from_value(body)?;
        Ok(body
            .stack_frames
            .into_iter()
            .map(|frame| StackFrame {
                id: frame.id,
                function: frame.name,
                source_path: frame
                    .source
                    .and_then(|source| source.path)
                    .unwrap_or_default(),
                line: frame.line,
            })
            .collect())
    }

    pub async fn scopes(&self, frame_id: i64) -> DapResult<Vec<Scope>> {
        #[derive(Deserialize)]
        struct Body {
            scopes: Vec<Scope>,
        }
        let body = self
            .request("scopes", Some(json!({"frameId": frame_id})))
            .await?;
        let body: Body = serde_json::from_value(body)?;
        Ok(body.scopes)
    }

    pub async fn variables(
        &self,
        variables_reference: i64,
        start: Option<usize>,
        count: Option<usize>,
    ) -> DapResult<Vec<DapVariable>> {
        #[derive(Deserialize)]
        struct Body {
            variables: Vec<DapVariable>,
        }
        let mut arguments = json!({"variablesReference": variables_reference});
        if let Some(start) = start {
            arguments["start"] = json!(start);
        }
        if let Some(count) = count {
            arguments["count"] = json!(count);
        }
        let body = self.request("variables", Some(arguments)).await?;
        let body: Body = serde_json::from_value(body)?;
        Ok(body.variables)
    }

    /// Evaluate an expression in a stack frame's context.
    ///
    /// An evaluation miss (name not in scope) comes back as
    /// [`DapError::Request`]; callers doing batch resolution are expected to
    /// swallow those per name.
    pub async fn evaluate(&self, expression: &str, frame_id: i64) -> DapResult<Evaluation> {
        let body = self
            .request(
                "evaluate",
                Some(json!({
                    "expression": expression,
                    "frameId": frame_id,
                    "context": EVALUATE_CONTEXT,
                })),
            )
            .await?;
        Ok(serde_json::from_value(body)?)
    }

    /// Issue `setBreakpoints` and return the set the server actually verified,
    /// which may differ from the requested lines.
    pub async fn set_breakpoints(
        &self,
        source_path: &str,
        lines: &[u32],
    ) -> DapResult<Vec<Breakpoint>> {
        #[derive(Deserialize)]
        struct Body {
            #[serde(default)]
            breakpoints: Vec<WireBreakpoint>,
        }
        #[derive(Deserialize)]
        struct WireBreakpoint {
            #[serde(default)]
            verified: bool,
            #[serde(default)]
            line: Option<u32>,
            #[serde(default)]
            id: Option<i64>,
        }

        let breakpoints: Vec<Value> = lines.iter().map(|line| json!({"line": line})).collect();
        let body = self
            .request(
                "setBreakpoints",
                Some(json!({
                    "source": {"path": source_path},
                    "breakpoints": breakpoints,
                })),
            )
            .await?;
        let body: Body = serde_json::from_value(body)?;
        Ok(body
            .breakpoints
            .into_iter()
            .map(|wire| Breakpoint {
                source_path: source_path.to_string(),
                line: wire.line.unwrap_or(0),
                verified: wire.verified,
                id: wire.id,
            })
            .collect())
    }

    pub async fn continue_(&self, thread_id: i64) -> DapResult<()> {
        let _ = self
            .request("continue", Some(json!({"threadId": thread_id})))
            .await?;
        Ok(())
    }

    pub async fn next(&self, thread_id: i64) -> DapResult<()> {
        let _ = self
            .request("next", Some(json!({"threadId": thread_id})))
            .await?;
        Ok(())
    }

    pub async fn step_in(&self, thread_id: i64) -> DapResult<()> {
        let _ = self
            .request("stepIn", Some(json!({"threadId": thread_id})))
            .await?;
        Ok(())
    }

    pub async fn step_out(&self, thread_id: i64) -> DapResult<()> {
        let _ = self
            .request("stepOut", Some(json!({"threadId": thread_id})))
            .await?;
        Ok(())
    }

    pub async fn pause(&self, thread_id: i64) -> DapResult<()> {
        let _ = self
            .request("pause", Some(json!({"threadId": thread_id})))
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Thread {
    pub id: i64,
    pub name: String,
}

/// One level of the paused call stack. Frame ids are transient — they are only
/// meaningful while the session stays paused at the same stop event.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub id: i64,
    pub function: String,
    pub source_path: String,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Scope {
    pub name: String,
    #[serde(rename = "variablesReference")]
    pub variables_reference: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DapVariable {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(rename = "variablesReference", default)]
    pub variables_reference: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Evaluation {
    pub result: String,
    #[serde(rename = "variablesReference", default)]
    pub variables_reference: i64,
}

async fn read_loop(mut reader: tokio::net::tcp::OwnedReadHalf, inner: Arc<Inner>) {
    let mut decoder = FrameDecoder::new();
    let mut chunk = [0u8; 8192];

    loop {
        let read = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            res = reader.read(&mut chunk) => res,
        };
        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                debug!(error = %err, "transport read failed");
                break;
            }
        };

        decoder.extend(&chunk[..n]);
        while let Some(message) = decoder.next_message() {
            dispatch(&inner, message).await;
        }
    }

    inner.shutdown.cancel();
    inner.session.lock().mark_disconnected();

    // Dropping the senders rejects every in-flight request with
    // `ConnectionClosed` on the caller side.
    let mut pending = inner.pending.lock().await;
    pending.clear();
}

/// Route one decoded message. Total: every message maps to a defined action.
async fn dispatch(inner: &Inner, message: ProtocolMessage) {
    match message {
        ProtocolMessage::Response(response) => {
            let tx = {
                let mut pending = inner.pending.lock().await;
                pending.remove(&response.request_seq)
            };
            match tx {
                Some(tx) => {
                    let _ = tx.send(response);
                }
                // Late response after a timeout already removed the entry.
                None => debug!(
                    request_seq = response.request_seq,
                    "dropping response with no pending request"
                ),
            }
        }
        ProtocolMessage::Event(event) => {
            inner.session.lock().apply_event(&event);
            let _ = inner.events.send(event);
        }
        ProtocolMessage::Request(request) => {
            debug!(command = %request.command, "ignoring reverse request from server");
        }
    }
}
