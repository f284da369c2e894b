//! Best-effort static scope analysis for GDScript source text.
//!
//! The engine's debug server reports stack frames but no lexical scopes, so the
//! variable inspector has to reconstruct which names are visible at a given
//! line by reading the script itself. This is a deliberate heuristic, not a
//! grammar: one indentation-aware top-to-bottom scan that recovers class
//! variables, function extents, parameters, and local declarations. It never
//! fails — malformed input degrades to a partial (possibly empty) table.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// A declared variable and the line it first appears on (1-based).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDecl {
    pub name: String,
    pub decl_line: u32,
    /// Explicit `: Type` annotation, when syntactically present right after
    /// the name. Inferred (`:=`) declarations carry no hint.
    pub type_hint: Option<String>,
}

/// One function's extent and the names declared inside it.
///
/// `start_line..=end_line` is inclusive and ends at the last code line of the
/// body; functions are non-overlapping and ordered by `start_line`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    pub start_line: u32,
    pub end_line: u32,
    pub parameters: Vec<String>,
    pub locals: Vec<VariableDecl>,
}

/// The analyzer's reconstruction of a script's declared names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolTable {
    pub class_variables: Vec<VariableDecl>,
    pub functions: Vec<FunctionInfo>,
}

/// Analyze a script file. Unreadable files yield an empty table — a missing
/// script is an expected condition while the game is live-reloading.
pub fn analyze_file(path: &Path) -> SymbolTable {
    match std::fs::read_to_string(path) {
        Ok(source) => analyze(&source),
        Err(_) => SymbolTable::default(),
    }
}

/// Analyze GDScript source text into a [`SymbolTable`].
pub fn analyze(source: &str) -> SymbolTable {
    let mut table = SymbolTable::default();
    let mut current: Option<OpenFunction> = None;

    for (idx, raw_line) in source.lines().enumerate() {
        let line_no = (idx + 1) as u32;
        let trimmed = raw_line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let indent = indent_width(raw_line);

        // The first code line that dedents to (or past) the `func` line closes
        // the open function; the boundary line itself is not part of the body.
        let dedents = matches!(&current, Some(open) if indent <= open.indent);
        if dedents {
            if let Some(open) = current.take() {
                table.functions.push(open.close());
            }
        }

        if let Some((name, parameters)) = parse_function_def(trimmed) {
            if let Some(open) = current.take() {
                table.functions.push(open.close());
            }
            current = Some(OpenFunction {
                name,
                parameters,
                indent,
                start_line: line_no,
                last_code_line: line_no,
                locals: Vec::new(),
            });
            continue;
        }

        match &mut current {
            None => {
                // Class-level declarations are only recognized at zero
                // indentation; inner-class members are out of scope for the
                // inspector.
                if indent == 0 {
                    if let Some(decl) = parse_var_decl(trimmed, line_no) {
                        table.class_variables.push(decl);
                    }
                }
            }
            Some(open) => {
                open.last_code_line = line_no;
                if let Some(decl) = parse_var_decl(trimmed, line_no) {
                    open.push_local(decl);
                } else if let Some(name) = parse_for_loop_var(trimmed) {
                    open.push_local(VariableDecl {
                        name,
                        decl_line: line_no,
                        type_hint: None,
                    });
                } else if let Some(name) = parse_bare_assignment(trimmed) {
                    // Heuristic: an assignment to an unknown, dot-free name is
                    // treated as an implicit declaration. GDScript does not
                    // actually work that way, but the debug server will happily
                    // evaluate the name if it exists and the inspector drops it
                    // if it does not, so over-approximating is harmless.
                    let known = name == "self"
                        || open.knows(&name)
                        || table.class_variables.iter().any(|v| v.name == name);
                    if !known {
                        open.push_local(VariableDecl {
                            name,
                            decl_line: line_no,
                            type_hint: None,
                        });
                    }
                }
            }
        }
    }

    if let Some(open) = current {
        table.functions.push(open.close());
    }

    table
}

/// All names visible at `line`: every class variable, plus the parameters and
/// the locals declared at or before `line` of the single function containing
/// it. Functions are non-overlapping, so at most one matches.
pub fn variables_in_scope_at(table: &SymbolTable, line: u32) -> Vec<String> {
    let mut names: Vec<String> = table
        .class_variables
        .iter()
        .map(|v| v.name.clone())
        .collect();

    if let Some(function) = table
        .functions
        .iter()
        .find(|f| f.start_line <= line && line <= f.end_line)
    {
        names.extend(function.parameters.iter().cloned());
        names.extend(
            function
                .locals
                .iter()
                .filter(|local| local.decl_line <= line)
                .map(|local| local.name.clone()),
        );
    }

    names
}

struct OpenFunction {
    name: String,
    parameters: Vec<String>,
    indent: u32,
    start_line: u32,
    last_code_line: u32,
    locals: Vec<VariableDecl>,
}

impl OpenFunction {
    fn close(self) -> FunctionInfo {
        FunctionInfo {
            name: self.name,
            start_line: self.start_line,
            end_line: self.last_code_line,
            parameters: self.parameters,
            locals: self.locals,
        }
    }

    fn knows(&self, name: &str) -> bool {
        self.parameters.iter().any(|p| p == name) || self.locals.iter().any(|l| l.name == name)
    }

    fn push_local(&mut self, decl: VariableDecl) {
        if !self.knows(&decl.name) {
            self.locals.push(decl);
        }
    }
}

/// Leading whitespace width; tabs count as 4 so tab- and space-indented files
/// both compare consistently.
fn indent_width(line: &str) -> u32 {
    let mut width = 0;
    for ch in line.chars() {
        match ch {
            '\t' => width += 4,
            ' ' => width += 1,
            _ => break,
        }
    }
    width
}

fn leading_identifier(text: &str) -> Option<&str> {
    let text = text.trim_start();
    let end = text
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_alphanumeric() && *ch != '_')
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    if end == 0 {
        return None;
    }
    let ident = &text[..end];
    if ident.chars().next().is_some_and(|ch| ch.is_ascii_digit()) {
        return None;
    }
    Some(ident)
}

/// `func name(a, b: int, c := 3):` at any indentation, including
/// `static func`. Parameters keep only the leading identifier; type hints and
/// defaults are dropped.
fn parse_function_def(trimmed: &str) -> Option<(String, Vec<String>)> {
    let rest = trimmed
        .strip_prefix("static func")
        .or_else(|| trimmed.strip_prefix("func"))?;
    let rest = rest.strip_prefix([' ', '\t'])?.trim_start();

    let name = leading_identifier(rest)?.to_string();
    let after_name = rest[name.len()..].trim_start();
    let params_src = after_name.strip_prefix('(')?;
    // Signatures split over multiple lines lose their tail parameters; the
    // scan is line-oriented by design.
    let params_src = match params_src.find(')') {
        Some(end) => &params_src[..end],
        None => params_src,
    };

    let parameters = params_src
        .split(',')
        .filter_map(|param| leading_identifier(param).map(str::to_string))
        .collect();

    Some((name, parameters))
}

/// `var x`, `const X`, `onready var x`, `export var x`, and the Godot 4
/// annotation forms `@onready var x` / `@export var x`. Captures an explicit
/// `: Type` hint when present.
fn parse_var_decl(trimmed: &str, line_no: u32) -> Option<VariableDecl> {
    let mut rest = trimmed;
    while rest.starts_with('@') {
        // Strip one annotation token and re-trim.
        let end = rest
            .find(char::is_whitespace)
            .unwrap_or(rest.len());
        rest = rest[end..].trim_start();
    }
    for prefix in ["onready ", "export "] {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped.trim_start();
        }
    }

    let rest = rest
        .strip_prefix("var ")
        .or_else(|| rest.strip_prefix("const "))?
        .trim_start();
    let name = leading_identifier(rest)?.to_string();
    let after_name = rest[name.len()..].trim_start();

    let type_hint = after_name.strip_prefix(':').and_then(|after_colon| {
        // `:=` is inference, not an annotation.
        let after_colon = after_colon.trim_start();
        if after_colon.starts_with('=') {
            return None;
        }
        leading_identifier(after_colon).map(str::to_string)
    });

    Some(VariableDecl {
        name,
        decl_line: line_no,
        type_hint,
    })
}

/// The iteration variable of `for x in ...:`.
fn parse_for_loop_var(trimmed: &str) -> Option<String> {
    let rest = trimmed.strip_prefix("for ")?.trim_start();
    let name = leading_identifier(rest)?;
    let after = rest[name.len()..].trim_start();
    after.starts_with("in ").then(|| name.to_string())
}

/// A bare `name = ...` / `name += ...` statement. Comparison operators and
/// member assignments (`a.b = ...`) are rejected here; the caller applies the
/// already-known / `self` filters.
fn parse_bare_assignment(trimmed: &str) -> Option<String> {
    let name = leading_identifier(trimmed)?;
    let after = trimmed[name.len()..].trim_start();

    after
        .strip_prefix("+=")
        .or_else(|| after.strip_prefix("-="))
        .or_else(|| after.strip_prefix("*="))
        .or_else(|| after.strip_prefix("/="))
        .or_else(|| after.strip_prefix("%="))
        .or_else(|| {
            after
                .strip_prefix('=')
                .filter(|rest| !rest.starts_with('='))
        })
        .map(|_| name.to_string())
}
