//! Client for the editor-embedded bridge plugin.
//!
//! The bridge speaks single-line ASCII commands over a plain TCP stream:
//! `ping` → `PONG`, `play_main`, `play_scene:<path>`, `stop`, `status` →
//! `STATUS:PLAYING:<path>` | `STATUS:STOPPED`, plus two node-introspection
//! commands whose replies carry a JSON payload. Failures come back in an
//! `ERROR:<reason>[:<detail>]` envelope.
//!
//! One command is in flight at a time; the protocol has no correlation ids,
//! so replies are matched to commands purely by ordering.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpStream,
};
use tracing::debug;

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("bridge command timed out")]
    Timeout,
    #[error("bridge connection closed")]
    ConnectionClosed,
    /// The plugin reported a failure via the `ERROR:` envelope.
    #[error("bridge error: {reason}{}", .detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    Remote {
        reason: String,
        detail: Option<String>,
    },
    #[error("unexpected bridge reply: {0}")]
    Protocol(String),
    #[error("bridge payload was not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// What the editor is currently running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackStatus {
    Playing { scene: String },
    Stopped,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(10),
        }
    }
}

pub struct BridgeClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    config: BridgeConfig,
}

impl BridgeClient {
    pub async fn connect(addr: SocketAddr) -> BridgeResult<Self> {
        Self::connect_with_config(addr, BridgeConfig::default()).await
    }

    pub async fn connect_with_config(addr: SocketAddr, config: BridgeConfig) -> BridgeResult<Self> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| BridgeError::Timeout)??;
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            config,
        })
    }

    pub async fn ping(&mut self) -> BridgeResult<()> {
        let reply = self.command("ping").await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(BridgeError::Protocol(reply))
        }
    }

    /// Run the project's main scene.
    pub async fn play_main(&mut self) -> BridgeResult<()> {
        self.command("play_main").await.map(|_| ())
    }

    /// Run a specific scene by resource path.
    pub async fn play_scene(&mut self, scene_path: &str) -> BridgeResult<()> {
        self.command(&format!("play_scene:{scene_path}")).await.map(|_| ())
    }

    /// Stop the running game.
    pub async fn stop(&mut self) -> BridgeResult<()> {
        self.command("stop").await.map(|_| ())
    }

    pub async fn status(&mut self) -> BridgeResult<PlaybackStatus> {
        let reply = self.command("status").await?;
        if let Some(scene) = reply.strip_prefix("STATUS:PLAYING:") {
            return Ok(PlaybackStatus::Playing {
                scene: scene.to_string(),
            });
        }
        if reply == "STATUS:STOPPED" {
            return Ok(PlaybackStatus::Stopped);
        }
        Err(BridgeError::Protocol(reply))
    }

    /// Signals declared by the node at `node_path`.
    pub async fn get_signals(&mut self, node_path: &str) -> BridgeResult<Value> {
        let reply = self.command(&format!("get_signals:{node_path}")).await?;
        let payload = reply
            .strip_prefix("SIGNALS:")
            .ok_or_else(|| BridgeError::Protocol(reply.clone()))?;
        Ok(serde_json::from_str(payload)?)
    }

    /// Signal connections under `node_path`, optionally recursive and
    /// including the engine's internal connections.
    pub async fn get_signal_connections(
        &mut self,
        node_path: &str,
        recursive: bool,
        include_internal: bool,
    ) -> BridgeResult<Value> {
        let reply = self
            .command(&format!(
                "get_signal_connections:{node_path}:{recursive}:{include_internal}"
            ))
            .await?;
        let payload = reply
            .strip_prefix("CONNECTIONS:")
            .ok_or_else(|| BridgeError::Protocol(reply.clone()))?;
        Ok(serde_json::from_str(payload)?)
    }

    /// Send one command line and await the single reply line.
    async fn command(&mut self, command: &str) -> BridgeResult<String> {
        debug!(command, "bridge command");
        self.writer.write_all(command.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        let mut line = String::new();
        let read = tokio::time::timeout(
            self.config.command_timeout,
            self.reader.read_line(&mut line),
        )
        .await
        .map_err(|_| BridgeError::Timeout)??;
        if read == 0 {
            return Err(BridgeError::ConnectionClosed);
        }

        let reply = line.trim_end_matches(['\r', '\n']).to_string();
        if let Some(envelope) = reply.strip_prefix("ERROR:") {
            let (reason, detail) = match envelope.split_once(':') {
                Some((reason, detail)) => (reason.to_string(), Some(detail.to_string())),
                None => (envelope.to_string(), None),
            };
            return Err(BridgeError::Remote { reason, detail });
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// One-connection mock bridge: records received command lines and answers
    /// from a scripted reply list.
    async fn spawn_bridge(
        replies: Vec<&'static str>,
    ) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            let mut replies = replies.into_iter();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = seen_tx.send(line);
                match replies.next() {
                    Some(reply) => {
                        writer.write_all(reply.as_bytes()).await.unwrap();
                        writer.write_all(b"\n").await.unwrap();
                    }
                    None => break,
                }
            }
        });

        (addr, seen_rx)
    }

    fn quick_config() -> BridgeConfig {
        BridgeConfig {
            command_timeout: Duration::from_millis(300),
            ..BridgeConfig::default()
        }
    }

    #[tokio::test]
    async fn ping_expects_pong() {
        let (addr, _seen) = spawn_bridge(vec!["PONG"]).await;
        let mut bridge = BridgeClient::connect(addr).await.unwrap();
        bridge.ping().await.unwrap();
    }

    #[tokio::test]
    async fn status_parses_both_forms() {
        let (addr, _seen) =
            spawn_bridge(vec!["STATUS:PLAYING:res://scenes/main.tscn", "STATUS:STOPPED"]).await;
        let mut bridge = BridgeClient::connect(addr).await.unwrap();

        assert_eq!(
            bridge.status().await.unwrap(),
            PlaybackStatus::Playing {
                scene: "res://scenes/main.tscn".to_string()
            }
        );
        assert_eq!(bridge.status().await.unwrap(), PlaybackStatus::Stopped);
    }

    #[tokio::test]
    async fn error_envelope_with_and_without_detail() {
        let (addr, _seen) = spawn_bridge(vec![
            "ERROR:scene_not_found:res://missing.tscn",
            "ERROR:not_playing",
        ])
        .await;
        let mut bridge = BridgeClient::connect(addr).await.unwrap();

        match bridge.play_scene("res://missing.tscn").await.unwrap_err() {
            BridgeError::Remote { reason, detail } => {
                assert_eq!(reason, "scene_not_found");
                assert_eq!(detail.as_deref(), Some("res://missing.tscn"));
            }
            other => panic!("expected a remote error, got {other:?}"),
        }

        match bridge.stop().await.unwrap_err() {
            BridgeError::Remote { reason, detail } => {
                assert_eq!(reason, "not_playing");
                assert_eq!(detail, None);
            }
            other => panic!("expected a remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn signals_reply_carries_json() {
        let (addr, mut seen) =
            spawn_bridge(vec![r#"SIGNALS:["pressed","toggled"]"#]).await;
        let mut bridge = BridgeClient::connect(addr).await.unwrap();

        let signals = bridge.get_signals("/root/Main/Button").await.unwrap();
        assert_eq!(signals, serde_json::json!(["pressed", "toggled"]));
        assert_eq!(seen.recv().await.unwrap(), "get_signals:/root/Main/Button");
    }

    #[tokio::test]
    async fn connections_command_encodes_its_flags() {
        let (addr, mut seen) = spawn_bridge(vec![r#"CONNECTIONS:[]"#]).await;
        let mut bridge = BridgeClient::connect(addr).await.unwrap();

        let connections = bridge
            .get_signal_connections("/root/Main", true, false)
            .await
            .unwrap();
        assert_eq!(connections, serde_json::json!([]));
        assert_eq!(
            seen.recv().await.unwrap(),
            "get_signal_connections:/root/Main:true:false"
        );
    }

    #[tokio::test]
    async fn silent_bridge_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and hold the connection without ever replying.
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut bridge = BridgeClient::connect_with_config(addr, quick_config())
            .await
            .unwrap();
        assert!(matches!(bridge.ping().await, Err(BridgeError::Timeout)));
    }

    #[tokio::test]
    async fn malformed_payload_is_a_json_error() {
        let (addr, _seen) = spawn_bridge(vec!["SIGNALS:not-json"]).await;
        let mut bridge = BridgeClient::connect(addr).await.unwrap();
        assert!(matches!(
            bridge.get_signals("/root").await,
            Err(BridgeError::Json(_))
        ));
    }
}
