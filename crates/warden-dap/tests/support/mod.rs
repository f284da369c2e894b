//! In-process mock debug server.
//!
//! Speaks just enough of the protocol for the client tests: framed JSON over a
//! local TCP socket, scripted reply bodies, optional delayed or dropped
//! replies, and test-injected asynchronous events.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use warden_dap::codec::{encode, FrameDecoder};
use warden_dap::messages::{Event, ProtocolMessage, Request, Response};

/// Scripted server behavior. Anything unspecified gets a sensible default
/// reply; unknown commands fail.
#[derive(Debug, Default, Clone)]
pub struct MockBehavior {
    /// `stackTrace` reply entries (wire shape).
    pub frames: Vec<Value>,
    /// `evaluate` reply bodies keyed by expression; anything absent fails.
    pub evaluations: HashMap<String, Value>,
    /// `variables` reply arrays keyed by variablesReference.
    pub children: HashMap<i64, Value>,
    /// Expressions whose `evaluate` reply is delayed, to force out-of-order
    /// response arrival.
    pub slow_expressions: HashSet<String>,
    /// Commands that never get a reply at all.
    pub drop_commands: HashSet<String>,
    /// Requested breakpoint lines the server refuses to verify (omitted from
    /// the reply, like the real server does for unreachable lines).
    pub rejected_lines: HashSet<u32>,
}

pub struct MockDapServer {
    addr: SocketAddr,
    events: mpsc::UnboundedSender<Event>,
    handle: JoinHandle<()>,
}

impl MockDapServer {
    pub async fn spawn() -> io::Result<Self> {
        Self::spawn_with(MockBehavior::default()).await
    }

    pub async fn spawn_with(behavior: MockBehavior) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            if let Ok((stream, _peer)) = listener.accept().await {
                serve(stream, behavior, events_rx).await;
            }
        });

        Ok(Self {
            addr,
            events: events_tx,
            handle,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn send_event(&self, name: &str, body: Option<Value>) {
        let _ = self.events.send(Event {
            seq: 0,
            event: name.to_string(),
            body,
        });
    }

    pub fn send_stopped(&self, thread_id: i64) {
        self.send_event(
            "stopped",
            Some(json!({"reason": "breakpoint", "threadId": thread_id})),
        );
    }

    pub fn send_continued(&self) {
        self.send_event("continued", Some(json!({"allThreadsContinued": true})));
    }

    pub fn send_terminated(&self) {
        self.send_event("terminated", None);
    }

    /// Tear the connection down, leaving in-flight client requests to observe
    /// the close.
    pub fn close(self) {
        self.handle.abort();
    }
}

async fn serve(stream: TcpStream, behavior: MockBehavior, mut events: mpsc::UnboundedReceiver<Event>) {
    let (mut reader, mut writer) = stream.into_split();
    let mut decoder = FrameDecoder::new();
    let (out_tx, mut out) = mpsc::unbounded_channel::<ProtocolMessage>();
    let mut next_seq: i64 = 1;
    let mut chunk = [0u8; 8192];

    loop {
        tokio::select! {
            read = reader.read(&mut chunk) => {
                let n = match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                decoder.extend(&chunk[..n]);
                while let Some(message) = decoder.next_message() {
                    let ProtocolMessage::Request(request) = message else {
                        continue;
                    };
                    if behavior.drop_commands.contains(request.command.as_str()) {
                        continue;
                    }
                    let slow = is_slow(&behavior, &request);
                    let reply = build_reply(&behavior, &request);
                    if slow {
                        let tx = out_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(Duration::from_millis(150)).await;
                            let _ = tx.send(reply);
                        });
                    } else {
                        let _ = out_tx.send(reply);
                    }
                }
            }
            Some(mut message) = out.recv() => {
                stamp_seq(&mut message, &mut next_seq);
                let Ok(frame) = encode(&message) else { break };
                if writer.write_all(&frame).await.is_err() {
                    break;
                }
            }
            Some(event) = events.recv() => {
                let mut message = ProtocolMessage::Event(event);
                stamp_seq(&mut message, &mut next_seq);
                let Ok(frame) = encode(&message) else { break };
                if writer.write_all(&frame).await.is_err() {
                    break;
                }
            }
        }
    }
}

fn stamp_seq(message: &mut ProtocolMessage, next_seq: &mut i64) {
    let seq = *next_seq;
    *next_seq += 1;
    match message {
        ProtocolMessage::Request(request) => request.seq = seq,
        ProtocolMessage::Response(response) => response.seq = seq,
        ProtocolMessage::Event(event) => event.seq = seq,
    }
}

fn is_slow(behavior: &MockBehavior, request: &Request) -> bool {
    if request.command != "evaluate" {
        return false;
    }
    let expression = request
        .arguments
        .as_ref()
        .and_then(|args| args.get("expression"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    behavior.slow_expressions.contains(expression)
}

fn build_reply(behavior: &MockBehavior, request: &Request) -> ProtocolMessage {
    let args = request.arguments.clone().unwrap_or(Value::Null);
    let (success, message, body) = match request.command.as_str() {
        "initialize" => (
            true,
            None,
            Some(json!({"supportsConfigurationDoneRequest": true})),
        ),
        "configurationDone" | "continue" | "next" | "stepIn" | "stepOut" | "pause" => {
            (true, None, None)
        }
        "threads" => (
            true,
            None,
            Some(json!({"threads": [{"id": 1, "name": "main"}]})),
        ),
        "stackTrace" => (true, None, Some(json!({"stackFrames": behavior.frames}))),
        "scopes" => (true, None, Some(json!({"scopes": []}))),
        "variables" => {
            let reference = args["variablesReference"].as_i64().unwrap_or(0);
            let variables = behavior
                .children
                .get(&reference)
                .cloned()
                .unwrap_or_else(|| json!([]));
            (true, None, Some(json!({"variables": variables})))
        }
        "evaluate" => {
            let expression = args["expression"].as_str().unwrap_or_default();
            match behavior.evaluations.get(expression) {
                Some(body) => (true, None, Some(body.clone())),
                None => (
                    false,
                    Some(format!("Could not evaluate expression: {expression}")),
                    None,
                ),
            }
        }
        "setBreakpoints" => {
            let requested = args["breakpoints"].as_array().cloned().unwrap_or_default();
            let verified: Vec<Value> = requested
                .iter()
                .filter_map(|bp| bp["line"].as_u64())
                .filter(|line| !behavior.rejected_lines.contains(&(*line as u32)))
                .map(|line| json!({"verified": true, "line": line}))
                .collect();
            (true, None, Some(json!({"breakpoints": verified})))
        }
        other => (false, Some(format!("unsupported command {other}")), None),
    };

    ProtocolMessage::Response(Response {
        seq: 0,
        request_seq: request.seq,
        success,
        command: request.command.clone(),
        message,
        body,
    })
}
