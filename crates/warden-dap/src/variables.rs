//! Variable resolution over a paused stack frame.
//!
//! The debug server has no "list locals" command worth the name, so the
//! resolver unions the scope analyzer's reconstruction with a few implicit
//! names and evaluates each candidate independently. A name that fails to
//! evaluate is simply not in scope — that is the expected common case, not an
//! error. Structured values are expanded recursively to a bounded depth with a
//! bounded child count, so one giant dictionary cannot flood the caller.

use async_recursion::async_recursion;
use serde::Serialize;
use warden_scope::{variables_in_scope_at, SymbolTable};

use crate::client::{DapClient, StackFrame};
use crate::error::{DapError, DapResult};

pub const DEFAULT_MAX_DEPTH: usize = 3;
pub const MAX_RENDERED_CHILDREN: usize = 25;

/// The implicit receiver, visible in every frame.
const RECEIVER: &str = "self";

/// Per-tick callbacks whose frames carry an implicit `delta` argument.
const TICK_FUNCTIONS: &[&str] = &["_process", "_physics_process"];

/// A resolved variable: evaluated text plus a type inferred from it.
/// Recomputed per query, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedVariable {
    pub name: String,
    #[serde(rename = "type")]
    pub inferred_type: &'static str,
    pub value: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ResolvedVariable>,
}

/// Heuristic type inference from the server's textual rendering of a value.
///
/// Degrades to `"unknown"` rather than erroring: the engine prints aggregates
/// and objects in recognizable shapes, but nothing here is guaranteed.
pub fn infer_type(text: &str) -> &'static str {
    let text = text.trim();
    if text == "true" || text == "false" {
        return "bool";
    }
    if text.parse::<i64>().is_ok() {
        return "int";
    }
    if text.parse::<f64>().is_ok() {
        return "float";
    }
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        return "String";
    }
    if text.starts_with('[') && text.ends_with(']') {
        return "Array";
    }
    if text.starts_with('{') && text.ends_with('}') {
        return "Dictionary";
    }
    if text.starts_with('<') && text.ends_with('>') {
        return "Object";
    }
    if text.starts_with('(') && text.ends_with(')') {
        // The engine prints vectors as bare tuples; arity is the only clue.
        return match text.matches(',').count() {
            1 => "Vector2",
            2 => "Vector3",
            _ => "unknown",
        };
    }
    "unknown"
}

/// Candidate names for a frame: receiver + lexical scope + tick implicits,
/// first occurrence wins.
pub fn candidate_names(frame: &StackFrame, table: &SymbolTable) -> Vec<String> {
    let mut names = vec![RECEIVER.to_string()];
    for name in variables_in_scope_at(table, frame.line) {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    if TICK_FUNCTIONS.contains(&frame.function.as_str()) {
        let delta = "delta".to_string();
        if !names.contains(&delta) {
            names.push(delta);
        }
    }
    names
}

/// Evaluate every candidate name in `frame`, expanding aggregates to
/// `max_depth` levels.
///
/// Evaluation misses are omitted silently; transport failures propagate.
pub async fn resolve_frame_variables(
    client: &DapClient,
    frame: &StackFrame,
    table: &SymbolTable,
    max_depth: usize,
) -> DapResult<Vec<ResolvedVariable>> {
    let mut resolved = Vec::new();

    for name in candidate_names(frame, table) {
        let evaluation = match client.evaluate(&name, frame.id).await {
            Ok(evaluation) => evaluation,
            Err(err) if is_evaluation_miss(&err) => continue,
            Err(err) => return Err(err),
        };

        let mut value = evaluation.result.clone();
        let children = if evaluation.variables_reference != 0 {
            if max_depth >= 1 {
                expand_children(client, evaluation.variables_reference, 1, max_depth).await?
            } else {
                value = annotate_depth_limit(value);
                Vec::new()
            }
        } else {
            Vec::new()
        };

        resolved.push(ResolvedVariable {
            name,
            inferred_type: infer_type(&evaluation.result),
            value,
            children,
        });
    }

    Ok(resolved)
}

/// Fetch the children behind `reference` (one expansion level), recursing
/// while the depth budget allows and the server hands out child references.
#[async_recursion]
async fn expand_children(
    client: &DapClient,
    reference: i64,
    level: usize,
    max_depth: usize,
) -> DapResult<Vec<ResolvedVariable>> {
    let children = match client.variables(reference, None, None).await {
        Ok(children) => children,
        Err(err) if is_evaluation_miss(&err) => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    let total = children.len();
    let mut rendered = Vec::new();

    for child in children.into_iter().take(MAX_RENDERED_CHILDREN) {
        let mut value = child.value.clone();
        let grandchildren = if child.variables_reference != 0 {
            if level < max_depth {
                expand_children(client, child.variables_reference, level + 1, max_depth).await?
            } else {
                value = annotate_depth_limit(value);
                Vec::new()
            }
        } else {
            Vec::new()
        };
        rendered.push(ResolvedVariable {
            name: child.name,
            inferred_type: infer_type(&child.value),
            value,
            children: grandchildren,
        });
    }

    if total > MAX_RENDERED_CHILDREN {
        rendered.push(ResolvedVariable {
            name: "…".to_string(),
            inferred_type: "unknown",
            value: format!("and {} more", total - MAX_RENDERED_CHILDREN),
            children: Vec::new(),
        });
    }

    Ok(rendered)
}

fn annotate_depth_limit(value: String) -> String {
    format!("{value} (max depth reached)")
}

/// A per-name failure: the name is not in scope, the server refused it, or the
/// answer did not come back in time. None of these fail the batch.
fn is_evaluation_miss(err: &DapError) -> bool {
    matches!(
        err,
        DapError::Request { .. } | DapError::Timeout | DapError::Json(_) | DapError::Protocol(_)
    )
}
