//! Command-line driver for inspecting a running Godot game.
//!
//! Debugging queries attach to the game's DAP endpoint; playback and scene
//! introspection go through the editor's bridge plugin. Every result is
//! printed as JSON so the output is easy to feed into other tooling.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;
use warden_bridge::{BridgeClient, PlaybackStatus};
use warden_dap::Debugger;

#[derive(Debug, Parser)]
#[command(name = "warden", version, about)]
struct Cli {
    /// Host the game and editor are running on.
    #[arg(long, global = true, default_value = "127.0.0.1")]
    host: String,

    /// Debug Adapter Protocol port exposed by the running game.
    #[arg(long, global = true, default_value_t = 6006)]
    dap_port: u16,

    /// Port of the editor-embedded bridge plugin.
    #[arg(long, global = true, default_value_t = 9080)]
    bridge_port: u16,

    /// Project root, used to read script sources for variable inspection.
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the call stack of the paused game.
    Stack {
        /// Thread to inspect; defaults to the stopped thread.
        #[arg(long)]
        thread: Option<i64>,
    },
    /// Resolve the variables visible in a paused stack frame.
    Variables {
        /// Frame index into the current call stack (0 = innermost).
        #[arg(long, default_value_t = 0)]
        frame: usize,
        /// Maximum expansion depth for structured values.
        #[arg(long)]
        depth: Option<usize>,
    },
    /// Set breakpoints in a script and show the server-verified result.
    Break {
        /// Script path (`res://...` or project-relative).
        file: String,
        /// 1-based line numbers.
        lines: Vec<u32>,
    },
    /// Resume the paused game.
    Continue {
        #[arg(long)]
        thread: Option<i64>,
    },
    /// Step over the current line.
    Next {
        #[arg(long)]
        thread: Option<i64>,
    },
    /// Step into the current call.
    StepIn {
        #[arg(long)]
        thread: Option<i64>,
    },
    /// Step out of the current function.
    StepOut {
        #[arg(long)]
        thread: Option<i64>,
    },
    /// Pause the running game.
    Pause {
        #[arg(long)]
        thread: Option<i64>,
    },
    /// Classify game output piped to stdin into structured telemetry.
    Telemetry {
        /// Keep at most this many debug messages.
        #[arg(long, default_value_t = warden_telemetry::DEFAULT_MESSAGE_CAPACITY)]
        message_capacity: usize,
        /// Keep at most this many runtime errors.
        #[arg(long, default_value_t = warden_telemetry::DEFAULT_ERROR_CAPACITY)]
        error_capacity: usize,
    },
    /// Check that the editor bridge is reachable.
    Ping,
    /// Report whether the editor is playing a scene.
    Status,
    /// Play the main scene, or a specific one.
    Play {
        #[arg(long)]
        scene: Option<String>,
    },
    /// Stop the running game.
    Stop,
    /// List the signals declared by a node.
    Signals { node: String },
    /// List signal connections under a node.
    Connections {
        node: String,
        #[arg(long)]
        recursive: bool,
        #[arg(long)]
        include_internal: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Stack { thread } => {
            let debugger = attach(&cli).await?;
            print_json(&debugger.get_call_stack(*thread).await?)
        }
        Command::Variables { frame, depth } => {
            let debugger = attach(&cli).await?;
            print_json(&debugger.get_local_variables(*frame, *depth).await?)
        }
        Command::Break { file, lines } => {
            let mut debugger = attach(&cli).await?;
            let verified = debugger.set_breakpoints(file, lines).await?;
            print_json(&json!({
                "verified": verified,
                "all": debugger.get_breakpoints(),
            }))
        }
        Command::Continue { thread } => {
            let debugger = attach(&cli).await?;
            debugger.continue_(*thread).await?;
            print_ok()
        }
        Command::Next { thread } => {
            let debugger = attach(&cli).await?;
            debugger.next(*thread).await?;
            print_ok()
        }
        Command::StepIn { thread } => {
            let debugger = attach(&cli).await?;
            debugger.step_in(*thread).await?;
            print_ok()
        }
        Command::StepOut { thread } => {
            let debugger = attach(&cli).await?;
            debugger.step_out(*thread).await?;
            print_ok()
        }
        Command::Pause { thread } => {
            let debugger = attach(&cli).await?;
            debugger.pause(*thread).await?;
            print_ok()
        }
        Command::Telemetry {
            message_capacity,
            error_capacity,
        } => {
            use tokio::io::AsyncBufReadExt;

            let mut classifier =
                warden_telemetry::TelemetryClassifier::with_capacities(*message_capacity, *error_capacity);
            let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                classifier.ingest_line(&line);
            }
            classifier.flush_pending();

            print_json(&json!({
                "messages": classifier.messages().collect::<Vec<_>>(),
                "errors": classifier.errors().collect::<Vec<_>>(),
            }))
        }
        Command::Ping => {
            bridge(&cli).await?.ping().await?;
            print_ok()
        }
        Command::Status => {
            let status = bridge(&cli).await?.status().await?;
            match status {
                PlaybackStatus::Playing { scene } => {
                    print_json(&json!({"status": "playing", "scene": scene}))
                }
                PlaybackStatus::Stopped => print_json(&json!({"status": "stopped"})),
            }
        }
        Command::Play { scene } => {
            let mut bridge = bridge(&cli).await?;
            match scene {
                Some(scene) => bridge.play_scene(scene).await?,
                None => bridge.play_main().await?,
            }
            print_ok()
        }
        Command::Stop => {
            bridge(&cli).await?.stop().await?;
            print_ok()
        }
        Command::Signals { node } => {
            let signals = bridge(&cli).await?.get_signals(node).await?;
            print_json(&signals)
        }
        Command::Connections {
            node,
            recursive,
            include_internal,
        } => {
            let connections = bridge(&cli)
                .await?
                .get_signal_connections(node, *recursive, *include_internal)
                .await?;
            print_json(&connections)
        }
    }
}

async fn attach(cli: &Cli) -> anyhow::Result<Debugger> {
    let mut debugger = Debugger::default();
    if let Some(project) = &cli.project {
        debugger.set_project_root(project);
    }
    debugger
        .connect(&cli.host, cli.dap_port)
        .await
        .with_context(|| format!("attaching to {}:{}", cli.host, cli.dap_port))?;
    Ok(debugger)
}

async fn bridge(cli: &Cli) -> anyhow::Result<BridgeClient> {
    let addr = resolve(&cli.host, cli.bridge_port).await?;
    BridgeClient::connect(addr)
        .await
        .with_context(|| format!("connecting to the editor bridge at {addr}"))
}

async fn resolve(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .with_context(|| format!("could not resolve {host}:{port}"))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_ok() -> anyhow::Result<()> {
    print_json(&json!({"ok": true}))
}
