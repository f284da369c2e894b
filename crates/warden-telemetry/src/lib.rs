//! Streaming classification of the game's raw process output.
//!
//! The engine writes diagnostics to stderr as free-form text. This crate turns
//! that stream, line by line, into two structured views:
//!
//! - a unified feed of [`DebugMessage`]s — every non-blank line becomes exactly
//!   one record, categorized by marker;
//! - a feed of [`RuntimeError`]s recovered from the engine's two-line error
//!   grammar (`ERROR: ...` followed by `at: function (path:line)`).
//!
//! Classification is total: no input line can fail, and anything the scanner
//! cannot place is recorded as a diagnostic rather than dropped. Both feeds sit
//! in bounded FIFO buffers so a chatty game cannot grow memory without bound.

use std::collections::VecDeque;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use warden_core::{ensure_res_path, parse_locator};

pub const DEFAULT_MESSAGE_CAPACITY: usize = 1000;
pub const DEFAULT_ERROR_CAPACITY: usize = 200;

/// Category of a unified debug message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageCategory {
    Print,
    Warning,
    Error,
}

/// One line of process output, categorized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugMessage {
    pub timestamp: DateTime<Utc>,
    pub category: MessageCategory,
    pub message: String,
    /// `path:line` locator when one could be extracted, `"unknown"` otherwise.
    pub source: String,
}

/// Severity of a structured runtime error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Error,
    Warning,
}

/// A runtime error recovered from the engine's two-line error grammar.
///
/// When the continuation line is missing, `script` is empty and `line` is 0 —
/// the error is still recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeError {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
    pub script: String,
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
}

/// Fixed-capacity FIFO: pushing past capacity evicts the single oldest entry.
#[derive(Debug, Clone)]
pub struct FifoBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> FifoBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Oldest-first iteration.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

#[derive(Debug, Clone)]
struct PendingError {
    timestamp: DateTime<Utc>,
    kind: ErrorKind,
    message: String,
}

/// Line-by-line classifier over the game's output stream.
///
/// Single producer: the process supervisor feeds lines in order. One line of
/// pending state bridges the two-line error grammar.
#[derive(Debug)]
pub struct TelemetryClassifier {
    messages: FifoBuffer<DebugMessage>,
    errors: FifoBuffer<RuntimeError>,
    pending: Option<PendingError>,
}

impl Default for TelemetryClassifier {
    fn default() -> Self {
        Self::with_capacities(DEFAULT_MESSAGE_CAPACITY, DEFAULT_ERROR_CAPACITY)
    }
}

impl TelemetryClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacities(message_capacity: usize, error_capacity: usize) -> Self {
        Self {
            messages: FifoBuffer::new(message_capacity),
            errors: FifoBuffer::new(error_capacity),
            pending: None,
        }
    }

    /// Classify one line of process output. Infallible.
    pub fn ingest_line(&mut self, line: &str) {
        self.ingest_line_at(line, Utc::now());
    }

    /// [`TelemetryClassifier::ingest_line`] with an explicit timestamp, so
    /// tests and replayed logs are deterministic.
    pub fn ingest_line_at(&mut self, line: &str, timestamp: DateTime<Utc>) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            self.flush_pending();
            return;
        }

        self.classify_message(trimmed, timestamp);

        if let Some((function, script, line_no)) = parse_continuation(trimmed) {
            if let Some(pending) = self.pending.take() {
                self.errors.push(RuntimeError {
                    timestamp: pending.timestamp,
                    kind: pending.kind,
                    message: pending.message,
                    script: ensure_res_path(&script),
                    line: line_no,
                    function: Some(function),
                });
            }
            // A continuation with no pending start already produced its
            // DebugMessage above; nothing structured to record.
            return;
        }

        // Any non-continuation line ends the previous error's window.
        self.flush_pending();

        if let Some((kind, message)) = parse_error_start(trimmed) {
            self.pending = Some(PendingError {
                timestamp,
                kind,
                message,
            });
        }
    }

    /// Record a pending error that never saw its continuation line. Called
    /// automatically on the next non-matching line; call it once more when the
    /// stream ends.
    pub fn flush_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.errors.push(RuntimeError {
                timestamp: pending.timestamp,
                kind: pending.kind,
                message: pending.message,
                script: String::new(),
                line: 0,
                function: None,
            });
        }
    }

    pub fn messages(&self) -> impl Iterator<Item = &DebugMessage> {
        self.messages.iter()
    }

    pub fn errors(&self) -> impl Iterator<Item = &RuntimeError> {
        self.errors.iter()
    }

    pub fn clear_messages(&mut self) {
        self.messages.clear();
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    fn classify_message(&mut self, trimmed: &str, timestamp: DateTime<Utc>) {
        let source = parse_locator(trimmed)
            .map(|loc| format!("{}:{}", loc.path, loc.line))
            .unwrap_or_else(|| "unknown".to_string());

        let category = if trimmed.contains("WARNING:") {
            MessageCategory::Warning
        } else if trimmed.contains("ERROR:") {
            // Covers the distinguished `SCRIPT ERROR:` variant too.
            MessageCategory::Error
        } else if source_annotated(trimmed).is_some() {
            MessageCategory::Print
        } else {
            // This stream is the engine's error channel; unclassified content
            // is presumed diagnostic.
            MessageCategory::Error
        };

        self.messages.push(DebugMessage {
            timestamp,
            category,
            message: trimmed.to_string(),
            source,
        });
    }
}

fn continuation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^at:\s*(.*?)\s*\((.+):(\d+)\)\s*$").expect("continuation regex is valid")
    })
}

fn source_annotated_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\S+):(\d+)\s+-\s+(.+)$").expect("source-annotated regex is valid")
    })
}

/// `at: <function> (<path>:<line>)`, the second line of the error grammar.
fn parse_continuation(trimmed: &str) -> Option<(String, String, u32)> {
    let captures = continuation_regex().captures(trimmed)?;
    let function = captures.get(1)?.as_str().to_string();
    let script = captures.get(2)?.as_str().to_string();
    let line = captures.get(3)?.as_str().parse::<u32>().ok()?;
    Some((function, script, line))
}

/// `path:line - message`, the engine's source-annotated single-line format.
fn source_annotated(trimmed: &str) -> Option<(String, u32, String)> {
    let captures = source_annotated_regex().captures(trimmed)?;
    let path = captures.get(1)?.as_str().to_string();
    let line = captures.get(2)?.as_str().parse::<u32>().ok()?;
    let message = captures.get(3)?.as_str().to_string();
    Some((path, line, message))
}

/// An error/warning start line. `SCRIPT ERROR:` is the script-level variant of
/// `ERROR:`; both map to [`ErrorKind::Error`].
fn parse_error_start(trimmed: &str) -> Option<(ErrorKind, String)> {
    if let Some(rest) = trimmed.strip_prefix("SCRIPT ERROR:") {
        return Some((ErrorKind::Error, rest.trim().to_string()));
    }
    if let Some(rest) = trimmed.strip_prefix("ERROR:") {
        return Some((ErrorKind::Error, rest.trim().to_string()));
    }
    if let Some(rest) = trimmed.strip_prefix("WARNING:") {
        return Some((ErrorKind::Warning, rest.trim().to_string()));
    }
    None
}
