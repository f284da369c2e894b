//! Debug-protocol client for inspecting a running Godot game.
//!
//! This crate provides:
//! - An async client (`DapClient`) for the engine's Debug Adapter Protocol
//!   endpoint: length-prefixed frame codec, sequence-number request
//!   correlation, and a session state machine fed by asynchronous events.
//! - A breakpoint registry mirroring the server-verified breakpoint set.
//! - A variable resolution engine that unions static scope analysis
//!   (`warden-scope`) with implicit names and evaluates each candidate over
//!   the protocol.
//! - A `Debugger` facade exposing the JSON-shaped query surface used by the
//!   tool layer.

pub mod breakpoints;
pub mod client;
pub mod codec;
pub mod debugger;
pub mod error;
pub mod messages;
pub mod session;
pub mod variables;

pub use breakpoints::{Breakpoint, BreakpointRegistry};
pub use client::{
    DapClient, DapClientConfig, DapVariable, Evaluation, Scope, StackFrame, Thread,
};
pub use debugger::{CallStack, Debugger, FrameVariables};
pub use error::{DapError, DapResult};
pub use messages::{Event, ProtocolMessage, Request, Response};
pub use session::{Capabilities, SessionState, SessionTracker};
pub use variables::{infer_type, ResolvedVariable, DEFAULT_MAX_DEPTH, MAX_RENDERED_CHILDREN};
