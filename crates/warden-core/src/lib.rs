//! Core shared types for warden.
//!
//! This crate is intentionally small: resource-path handling and the
//! `path:line` source-locator parsing shared by the telemetry classifier and
//! the debugger facade.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Godot's project-root resource scheme.
pub const RES_SCHEME: &str = "res://";

/// Normalize a script path to the `res://` form the engine reports.
///
/// Absolute resource paths (`res://`, `user://`) and OS-absolute paths are
/// returned unchanged; anything else is treated as project-relative.
pub fn ensure_res_path(path: &str) -> String {
    if path.is_empty()
        || path.starts_with(RES_SCHEME)
        || path.starts_with("user://")
        || path.starts_with('/')
    {
        return path.to_string();
    }
    format!("{RES_SCHEME}{path}")
}

/// Strip the `res://` scheme, yielding a project-relative path.
pub fn strip_res_scheme(path: &str) -> &str {
    path.strip_prefix(RES_SCHEME).unwrap_or(path)
}

/// A `path:line` location extracted from diagnostic text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocator {
    pub path: String,
    pub line: u32,
}

impl SourceLocator {
    pub fn new(path: impl Into<String>, line: u32) -> Self {
        Self {
            path: path.into(),
            line,
        }
    }
}

fn locator_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // A path needs a file extension before the `:<line>` suffix so bare times
    // like `12:30` don't match.
    RE.get_or_init(|| {
        Regex::new(r"((?:res://|user://)?[A-Za-z0-9_\-./\\]+\.[A-Za-z0-9_]+):(\d+)")
            .expect("locator regex is valid")
    })
}

/// Best-effort extraction of the first `path:line` locator in `text`.
///
/// Returns `None` when no locator is present; the line must fit in `u32`.
pub fn parse_locator(text: &str) -> Option<SourceLocator> {
    let captures = locator_regex().captures(text)?;
    let path = captures.get(1)?.as_str().to_string();
    let line = captures.get(2)?.as_str().parse::<u32>().ok()?;
    Some(SourceLocator { path, line })
}
