//! High-level debugger facade: the query surface handed to the tool layer.
//!
//! One `Debugger` owns one client at a time plus the connection-independent
//! breakpoint registry. Queries return plain JSON-serializable structures, and
//! "not paused" is a well-formed answer, never an error.

use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;
use warden_scope::SymbolTable;

use crate::breakpoints::{Breakpoint, BreakpointRegistry};
use crate::client::{DapClient, DapClientConfig, StackFrame};
use crate::error::{DapError, DapResult};
use crate::messages::Event;
use crate::session::SessionState;
use crate::variables::{resolve_frame_variables, ResolvedVariable, DEFAULT_MAX_DEPTH};

/// How many frames `stackTrace` asks for.
const MAX_STACK_FRAMES: usize = 20;

/// Call-stack query result. `paused: false` means the stack is empty by
/// definition and no request was made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallStack {
    pub paused: bool,
    pub stack: Vec<StackFrame>,
}

/// Local-variable query result for one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameVariables {
    pub paused: bool,
    pub variables: Vec<ResolvedVariable>,
}

pub struct Debugger {
    config: DapClientConfig,
    client: Option<DapClient>,
    breakpoints: BreakpointRegistry,
    /// Project root used to read script sources for scope analysis. Without
    /// it, `res://` paths cannot be resolved and inspection falls back to the
    /// implicit names only.
    project_root: Option<PathBuf>,
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new(DapClientConfig::default())
    }
}

impl Debugger {
    pub fn new(config: DapClientConfig) -> Self {
        Self {
            config,
            client: None,
            breakpoints: BreakpointRegistry::new(),
            project_root: None,
        }
    }

    pub fn set_project_root(&mut self, root: impl Into<PathBuf>) {
        self.project_root = Some(root.into());
    }

    /// Connect to the debug server embedded in the running game.
    ///
    /// Any previous connection is discarded; its in-flight requests drain via
    /// their own timeouts. The breakpoint registry deliberately survives.
    pub async fn connect(&mut self, host: &str, port: u16) -> DapResult<()> {
        if let Some(old) = self.client.take() {
            old.shutdown();
        }

        let addr = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| DapError::Protocol(format!("could not resolve {host}:{port}")))?;

        let client = DapClient::connect_with_config(addr, self.config.clone()).await?;
        info!(%addr, "debug session established");
        self.client = Some(client);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            client.shutdown();
        }
    }

    pub fn state(&self) -> SessionState {
        self.client
            .as_ref()
            .map(DapClient::state)
            .unwrap_or(SessionState::Disconnected)
    }

    pub fn subscribe_events(&self) -> DapResult<broadcast::Receiver<Event>> {
        Ok(self.client()?.subscribe_events())
    }

    fn client(&self) -> DapResult<&DapClient> {
        self.client.as_ref().ok_or(DapError::NotConnected)
    }

    /// Pure read of the last-known verified breakpoints. Reflects only what
    /// this client has observed — breakpoints set through other channels are
    /// invisible.
    pub fn get_breakpoints(&self) -> Vec<Breakpoint> {
        self.breakpoints.all()
    }

    /// Set the breakpoints for one source file, replacing the previous set.
    /// The registry keeps what the server verified, not what was requested.
    pub async fn set_breakpoints(
        &mut self,
        source_path: &str,
        lines: &[u32],
    ) -> DapResult<Vec<Breakpoint>> {
        let verified = self.client()?.set_breakpoints(source_path, lines).await?;
        self.breakpoints.record(source_path, verified.clone());
        Ok(verified)
    }

    /// The paused call stack, or `{paused: false, stack: []}` without any
    /// network traffic while the game is running.
    pub async fn get_call_stack(&self, thread_id: Option<i64>) -> DapResult<CallStack> {
        let client = self.client()?;
        if !client.is_paused() {
            return Ok(CallStack {
                paused: false,
                stack: Vec::new(),
            });
        }

        let thread = thread_id
            .or_else(|| client.current_thread())
            .ok_or(DapError::NoActiveThread)?;
        let stack = client.stack_trace(thread, 0, MAX_STACK_FRAMES).await?;
        Ok(CallStack {
            paused: true,
            stack,
        })
    }

    /// Resolve the variables visible in one frame of the paused stack.
    ///
    /// Frame ids are transient, so the frame is picked by index into a fresh
    /// `stackTrace` rather than by a cached id from an earlier pause.
    pub async fn get_local_variables(
        &self,
        frame_index: usize,
        max_depth: Option<usize>,
    ) -> DapResult<FrameVariables> {
        let client = self.client()?;
        if !client.is_paused() {
            return Ok(FrameVariables {
                paused: false,
                variables: Vec::new(),
            });
        }

        let thread = client.current_thread().ok_or(DapError::NoActiveThread)?;
        let frames = client.stack_trace(thread, 0, MAX_STACK_FRAMES).await?;
        let frame = frames
            .get(frame_index)
            .ok_or(DapError::UnknownFrame(frame_index))?;

        let table = self.symbol_table_for(&frame.source_path);
        let variables = resolve_frame_variables(
            client,
            frame,
            &table,
            max_depth.unwrap_or(DEFAULT_MAX_DEPTH),
        )
        .await?;

        Ok(FrameVariables {
            paused: true,
            variables,
        })
    }

    pub async fn continue_(&self, thread_id: Option<i64>) -> DapResult<()> {
        let thread = self.target_thread(thread_id).await?;
        self.client()?.continue_(thread).await
    }

    pub async fn next(&self, thread_id: Option<i64>) -> DapResult<()> {
        let thread = self.target_thread(thread_id).await?;
        self.client()?.next(thread).await
    }

    pub async fn step_in(&self, thread_id: Option<i64>) -> DapResult<()> {
        let thread = self.target_thread(thread_id).await?;
        self.client()?.step_in(thread).await
    }

    pub async fn step_out(&self, thread_id: Option<i64>) -> DapResult<()> {
        let thread = self.target_thread(thread_id).await?;
        self.client()?.step_out(thread).await
    }

    pub async fn pause(&self, thread_id: Option<i64>) -> DapResult<()> {
        let thread = self.target_thread(thread_id).await?;
        self.client()?.pause(thread).await
    }

    /// Pick the thread an execution-control request applies to: the caller's
    /// choice, else the stopped thread, else the first one the server lists.
    async fn target_thread(&self, requested: Option<i64>) -> DapResult<i64> {
        if let Some(thread) = requested {
            return Ok(thread);
        }
        let client = self.client()?;
        if let Some(thread) = client.current_thread() {
            return Ok(thread);
        }
        let threads = client.threads().await?;
        threads
            .first()
            .map(|thread| thread.id)
            .ok_or(DapError::NoActiveThread)
    }

    /// Read and analyze the script backing a frame. Any failure — no project
    /// root, unresolvable path, unreadable file — degrades to an empty table,
    /// which in turn means only implicit names get evaluated.
    fn symbol_table_for(&self, source_path: &str) -> SymbolTable {
        match self.resolve_script_path(source_path) {
            Some(path) => warden_scope::analyze_file(&path),
            None => SymbolTable::default(),
        }
    }

    fn resolve_script_path(&self, source_path: &str) -> Option<PathBuf> {
        if source_path.is_empty() {
            return None;
        }
        match source_path.strip_prefix(warden_core::RES_SCHEME) {
            Some(relative) => self.project_root.as_ref().map(|root| root.join(relative)),
            None => Some(PathBuf::from(source_path)),
        }
    }
}
