//! Last-known breakpoint verification state, per source file.
//!
//! The registry reflects only what the debug server has confirmed: each
//! `setBreakpoints` round trip replaces the entry for that source wholesale
//! with the server's verified set. Reads are pure — breakpoints set through
//! any other channel are invisible here. The registry is connection-scoped
//! configuration, not session state, so it survives disconnects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One verified (or rejected) breakpoint as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub source_path: String,
    pub line: u32,
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    // BTreeMap keeps `all()` deterministic across runs.
    by_source: BTreeMap<String, Vec<Breakpoint>>,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entry for `source_path` with the server-confirmed set.
    /// Stale entries are never merged.
    pub fn record(&mut self, source_path: &str, breakpoints: Vec<Breakpoint>) {
        self.by_source.insert(source_path.to_string(), breakpoints);
    }

    /// Flattened view across all tracked sources. No I/O.
    pub fn all(&self) -> Vec<Breakpoint> {
        self.by_source.values().flatten().cloned().collect()
    }

    pub fn for_source(&self, source_path: &str) -> &[Breakpoint] {
        self.by_source
            .get(source_path)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
